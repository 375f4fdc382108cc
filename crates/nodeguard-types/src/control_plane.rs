//! Collaborator traits implemented outside the engine.
//!
//! The engine never performs network I/O itself. The control-plane client,
//! the optional cross-node IP recorder and the traffic reporter are plugged
//! in through these traits; every method is async and may fail, and the
//! engine recovers from failures locally.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::node::NodeInfo;
use crate::prelude::*;
use crate::roster::{RosterUser, RuleSet, UserIps, UserTraffic};

#[async_trait]
pub trait ControlPlane: Debug + Send + Sync {
	/// Fetches node metadata. `None` means unchanged since the previous fetch.
	async fn fetch_node(&self, scope: &Scope) -> NgResult<Option<NodeInfo>>;

	/// Fetches the full user roster. `None` means unchanged.
	async fn fetch_roster(&self, scope: &Scope) -> NgResult<Option<Vec<RosterUser>>>;

	/// Fetches the rule lists. `None` means unchanged.
	async fn fetch_rules(&self, scope: &Scope) -> NgResult<Option<RuleSet>>;
}

/// Cross-node online IP recorder
#[async_trait]
pub trait IpRecorder: Debug + Send + Sync {
	/// Pushes this node's online IPs and returns the merged view across nodes
	async fn sync_online_ips(&self, scope: &Scope, local: Vec<UserIps>) -> NgResult<Vec<UserIps>>;
}

/// Upstream traffic accounting
#[async_trait]
pub trait TrafficReporter: Debug + Send + Sync {
	async fn report_traffic(&self, scope: &Scope, traffic: Vec<UserTraffic>) -> NgResult<()>;
}

// vim: ts=4
