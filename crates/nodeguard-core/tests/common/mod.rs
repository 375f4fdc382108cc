//! Common test utilities
//!
//! In-memory control plane, IP recorder and traffic reporter, plus small
//! fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use nodeguard_core::{ManualClock, GovernanceRegistry};
use nodeguard_types::control_plane::{ControlPlane, IpRecorder, TrafficReporter};
use nodeguard_types::node::NodeInfo;
use nodeguard_types::prelude::*;
use nodeguard_types::roster::{RosterUser, RuleSet, UserIps, UserTraffic};
use uuid::Uuid;

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn ip(last: u8) -> IpAddr {
	IpAddr::V4(Ipv4Addr::new(198, 51, 100, last))
}

pub fn user(id: u64, speed_limit: u64, device_limit: u32) -> RosterUser {
	RosterUser { id: UserId(id), uuid: Uuid::from_u128(u128::from(id)), speed_limit, device_limit }
}

pub fn registry_at(start: i64) -> (Arc<GovernanceRegistry>, Arc<ManualClock>) {
	let clock = Arc::new(ManualClock::new(Timestamp(start)));
	let registry = Arc::new(GovernanceRegistry::with_clock(clock.clone()));
	(registry, clock)
}

// Control plane
//***************

#[derive(Debug, Default)]
pub struct MockControlPlane {
	pub node: Mutex<Option<NodeInfo>>,
	pub roster: Mutex<Option<Vec<RosterUser>>>,
	pub rules: Mutex<Option<RuleSet>>,
	pub failing: AtomicBool,
	pub fetches: AtomicU64,
}

impl MockControlPlane {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn set_roster(&self, roster: Vec<RosterUser>) {
		*self.roster.lock() = Some(roster);
	}

	pub fn set_rules(&self, rules: RuleSet) {
		*self.rules.lock() = Some(rules);
	}

	pub fn set_node(&self, node: NodeInfo) {
		*self.node.lock() = Some(node);
	}

	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	fn check(&self) -> NgResult<()> {
		self.fetches.fetch_add(1, Ordering::SeqCst);
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::Fetch("control plane unreachable".into()));
		}
		Ok(())
	}
}

#[async_trait]
impl ControlPlane for MockControlPlane {
	async fn fetch_node(&self, _scope: &Scope) -> NgResult<Option<NodeInfo>> {
		self.check()?;
		Ok(self.node.lock().clone())
	}

	async fn fetch_roster(&self, _scope: &Scope) -> NgResult<Option<Vec<RosterUser>>> {
		self.check()?;
		Ok(self.roster.lock().clone())
	}

	async fn fetch_rules(&self, _scope: &Scope) -> NgResult<Option<RuleSet>> {
		self.check()?;
		Ok(self.rules.lock().clone())
	}
}

// Traffic reporter
//******************

#[derive(Debug, Default)]
pub struct MockReporter {
	pub reports: Mutex<Vec<Vec<UserTraffic>>>,
	pub failing: AtomicBool,
}

impl MockReporter {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Sum of everything reported for a user: (upload, download)
	pub fn total(&self, user_id: UserId) -> (u64, u64) {
		self.reports
			.lock()
			.iter()
			.flatten()
			.filter(|t| t.user_id == user_id)
			.fold((0, 0), |(up, down), t| (up + t.upload, down + t.download))
	}
}

#[async_trait]
impl TrafficReporter for MockReporter {
	async fn report_traffic(&self, _scope: &Scope, traffic: Vec<UserTraffic>) -> NgResult<()> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::Report("reporter unavailable".into()));
		}
		self.reports.lock().push(traffic);
		Ok(())
	}
}

// IP recorder
//*************

/// Recorder that merges the local view with a fixed set of IPs seen on
/// other nodes
#[derive(Debug, Default)]
pub struct MockRecorder {
	pub other_nodes: Mutex<Vec<UserIps>>,
	pub received: Mutex<Vec<Vec<UserIps>>>,
	pub failing: AtomicBool,
}

impl MockRecorder {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}
}

#[async_trait]
impl IpRecorder for MockRecorder {
	async fn sync_online_ips(&self, _scope: &Scope, local: Vec<UserIps>) -> NgResult<Vec<UserIps>> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::Sync("recorder unavailable".into()));
		}
		self.received.lock().push(local.clone());

		let mut merged = local;
		for remote in self.other_nodes.lock().iter() {
			match merged.iter_mut().find(|u| u.user_id == remote.user_id) {
				Some(entry) => entry.ips.extend(remote.ips.iter().copied()),
				None => merged.push(remote.clone()),
			}
		}
		Ok(merged)
	}
}

// vim: ts=4
