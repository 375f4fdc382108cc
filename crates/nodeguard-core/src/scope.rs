//! State of one activated scope.
//!
//! Holds every per-scope map (limit records, device sets and connection
//! counters, token buckets, rules, traffic) and routes hot-path and
//! control-path calls to them. A gate lock is held shared by admissions and
//! control-path writes and exclusively by teardown, so nothing can be
//! admitted into a scope that is being torn down.
//!
//! A user's limit record is created, removed and its bucket retired while
//! the user's session entry is locked, so these never interleave with an
//! admission or removal of the same user. Lock order is session, then limit
//! record, then bucket.

use parking_lot::RwLock;
use std::net::IpAddr;
use std::sync::Arc;

use nodeguard_types::node::{DynamicLimitConfig, NodeLimits};
use nodeguard_types::roster::{RuleSet, UserIps, UserTraffic};

use crate::config::ScopeConfig;
use crate::conn_limit::{Admission, ConnLimiter, ConnLimits, RejectReason, SessionId};
use crate::dynamic::DynamicEscalator;
use crate::online_ip::{OnlineIpAccounting, OnlineSnapshot};
use crate::prelude::*;
use crate::reconcile::RosterDiff;
use crate::rules::{CompiledRules, RuleMatcher};
use crate::speed_limit::{SpeedLimiter, TokenBucket, UserLimitRecord, min_nonzero};
use crate::traffic::TrafficLedger;

/// Point-in-time counters of a scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeStats {
	/// Users with a limit record
	pub users: usize,
	/// Users with at least one open connection
	pub online_users: usize,
	/// Open connections across all users
	pub connections: u64,
	/// Live token buckets
	pub buckets: usize,
	pub domain_rules: usize,
	pub protocol_rules: usize,
}

#[derive(Debug)]
pub struct ScopeState {
	scope: Scope,
	/// `true` while the scope accepts traffic
	gate: RwLock<bool>,
	limits: RwLock<NodeLimits>,
	conns: ConnLimiter,
	speed: SpeedLimiter,
	rules: RuleMatcher,
	dynamic: DynamicEscalator,
	online: OnlineIpAccounting,
	traffic: TrafficLedger,
	clock: Arc<dyn Clock>,
}

impl ScopeState {
	pub fn new(scope: Scope, config: ScopeConfig, clock: Arc<dyn Clock>) -> Self {
		Self {
			scope,
			gate: RwLock::new(true),
			limits: RwLock::new(config.limits),
			conns: ConnLimiter::new(),
			speed: SpeedLimiter::new(),
			rules: RuleMatcher::new(),
			dynamic: DynamicEscalator::new(config.dynamic_limit),
			online: OnlineIpAccounting::new(config.ip_recorder_enabled),
			traffic: TrafficLedger::new(),
			clock,
		}
	}

	pub fn scope(&self) -> &Scope {
		&self.scope
	}

	pub fn is_active(&self) -> bool {
		*self.gate.read()
	}

	fn key(&self, user_id: UserId) -> UserKey {
		UserKey::new(self.scope.clone(), user_id)
	}

	fn closed(&self) -> Error {
		Error::UnknownScope(self.scope.clone())
	}

	// Data path
	//***********

	pub fn admit(&self, user_id: UserId, ip: IpAddr) -> NgResult<Admission> {
		self.open(user_id, ip).map(Admission::from)
	}

	fn open(&self, user_id: UserId, ip: IpAddr) -> NgResult<Result<SessionId, RejectReason>> {
		let gate = self.gate.read();
		if !*gate {
			return Err(self.closed());
		}

		let key = self.key(user_id);
		let node = *self.limits.read();
		let device_limit =
			min_nonzero(u64::from(node.device_limit), u64::from(self.speed.device_limit(&key)));
		let limits = ConnLimits {
			conn_limit: node.conn_limit,
			device_limit: u32::try_from(device_limit).unwrap_or(u32::MAX),
		};

		let res = self.conns.admit_with(&key, ip, limits, || self.speed.ensure_user(&key));
		if let Err(reason) = res {
			debug!("rejected {} from {}: {:?}", key, ip, reason);
		}
		Ok(res)
	}

	pub fn release(&self, user_id: UserId, ip: IpAddr) {
		self.release_in(user_id, ip, None);
	}

	fn release_in(&self, user_id: UserId, ip: IpAddr, session: Option<SessionId>) {
		let key = self.key(user_id);
		if self.conns.release_with(&key, ip, session, || self.speed.drop_bucket(&key)) {
			debug!("user {} went offline", key);
		}
	}

	pub fn get_bucket(&self, user_id: UserId) -> (Option<Arc<TokenBucket>>, bool) {
		let key = self.key(user_id);
		let node_cap = self.limits.read().speed_limit;
		self.speed.get_bucket(&key, node_cap, self.clock.now())
	}

	/// Cap a new bucket for this user would get right now
	pub fn effective_cap(&self, user_id: UserId) -> u64 {
		let node_cap = self.limits.read().speed_limit;
		self.speed.effective_cap(&self.key(user_id), node_cap, self.clock.now())
	}

	pub fn match_domain(&self, destination: &str) -> bool {
		self.rules.match_domain(destination)
	}

	pub fn match_protocol(&self, protocol: &str) -> bool {
		self.rules.match_protocol(protocol)
	}

	pub fn report_traffic(&self, user_id: UserId, upload: u64, download: u64) {
		self.traffic.add(&self.key(user_id), upload, download);
	}

	// Control path
	//**************

	/// Apply a roster delta: removals first, then additions
	pub fn apply_roster_delta(&self, diff: &RosterDiff) -> NgResult<()> {
		let gate = self.gate.read();
		if !*gate {
			return Err(self.closed());
		}

		for user in &diff.removed {
			let key = self.key(user.id);
			self.conns.remove_user(&key, || {
				self.speed.remove_user(&key);
				self.dynamic.remove_user(&key);
			});
		}
		for user in &diff.added {
			self.speed.insert_user(self.key(user.id), user.speed_limit, user.device_limit);
		}
		Ok(())
	}

	pub fn replace_rules(&self, rules: &RuleSet) {
		self.rules.replace(rules);
	}

	/// Current compiled rule lists
	pub fn rules(&self) -> Arc<CompiledRules> {
		self.rules.snapshot()
	}

	pub fn node_limits(&self) -> NodeLimits {
		*self.limits.read()
	}

	/// Returns `true` if the limits changed
	pub fn set_node_limits(&self, limits: NodeLimits) -> bool {
		let mut current = self.limits.write();
		if *current == limits {
			return false;
		}
		info!("scope {} node limits changed: {:?} -> {:?}", self.scope, *current, limits);
		*current = limits;
		true
	}

	pub fn set_dynamic_config(&self, config: Option<DynamicLimitConfig>) {
		self.dynamic.set_config(config);
	}

	pub fn user_record(&self, user_id: UserId) -> Option<UserLimitRecord> {
		self.speed.record(&self.key(user_id))
	}

	pub fn connections(&self, user_id: UserId) -> u32 {
		self.conns.connections(&self.key(user_id))
	}

	/// Take the traffic accumulated since the previous drain
	pub fn drain_traffic(&self) -> Vec<(UserKey, UserTraffic)> {
		self.traffic.drain()
	}

	pub fn credit_traffic(&self, entries: &[(UserKey, UserTraffic)]) {
		self.traffic.credit(entries);
	}

	/// Feed drained traffic to the escalator; returns escalated users
	pub fn escalate(&self, entries: &[(UserKey, UserTraffic)]) -> Vec<UserId> {
		let now = self.clock.now();
		entries
			.iter()
			.filter(|(key, traffic)| {
				self.dynamic.accumulate_and_check(key, traffic.total(), &self.speed, now)
			})
			.map(|(key, _)| key.user_id)
			.collect()
	}

	pub fn recorder_enabled(&self) -> bool {
		self.online.recorder_enabled()
	}

	pub fn online_snapshot(&self) -> OnlineSnapshot {
		self.online.snapshot(&self.conns)
	}

	pub fn reset_online(&self) {
		self.online.reset(&self.conns);
	}

	pub fn merge_remote_ips(&self, merged: Vec<UserIps>) {
		self.online.merge(&self.conns, &self.scope, merged);
	}

	pub fn discard_online(&self) {
		self.online.discard(&self.conns);
	}

	/// Close the gate and drop all per-scope state
	pub fn teardown(&self) {
		let mut gate = self.gate.write();
		*gate = false;
		self.conns.clear();
		self.speed.clear();
		self.rules.clear();
		self.dynamic.clear();
		self.traffic.clear();
		info!("scope {} torn down", self.scope);
	}

	pub fn stats(&self) -> ScopeStats {
		let (online_users, connections) = self.conns.online();
		let rules = self.rules.snapshot();
		ScopeStats {
			users: self.speed.user_count(),
			online_users,
			connections,
			buckets: self.speed.bucket_count(),
			domain_rules: rules.domain_count(),
			protocol_rules: rules.protocol_count(),
		}
	}
}

/// Admitted connection that releases itself when dropped
///
/// Release runs exactly once per lease, so a connection that both times out
/// and is closed explicitly cannot release twice. A lease whose user was
/// removed from the roster meanwhile releases nothing.
#[derive(Debug)]
pub struct ConnectionLease {
	state: Arc<ScopeState>,
	user_id: UserId,
	ip: IpAddr,
	session: SessionId,
}

impl ConnectionLease {
	/// Admit a connection and wrap it in a lease. `Ok(None)` means rejected.
	pub fn acquire(
		state: &Arc<ScopeState>,
		user_id: UserId,
		ip: IpAddr,
	) -> NgResult<Option<Self>> {
		Ok(state.open(user_id, ip)?.ok().map(|session| Self {
			state: Arc::clone(state),
			user_id,
			ip,
			session,
		}))
	}

	pub fn user_id(&self) -> UserId {
		self.user_id
	}

	pub fn ip(&self) -> IpAddr {
		self.ip
	}

	/// Limiting decision for this connection's user
	pub fn bucket(&self) -> (Option<Arc<TokenBucket>>, bool) {
		self.state.get_bucket(self.user_id)
	}

	pub fn report_traffic(&self, upload: u64, download: u64) {
		self.state.report_traffic(self.user_id, upload, download);
	}
}

impl Drop for ConnectionLease {
	fn drop(&mut self) {
		self.state.release_in(self.user_id, self.ip, Some(self.session));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use nodeguard_types::roster::RosterUser;
	use std::net::Ipv4Addr;
	use uuid::Uuid;

	fn state(limits: NodeLimits) -> ScopeState {
		let config = ScopeConfig { limits, ..Default::default() };
		ScopeState::new(Scope::new("test"), config, Arc::new(ManualClock::new(Timestamp(0))))
	}

	fn ip(last: u8) -> IpAddr {
		IpAddr::V4(Ipv4Addr::new(172, 16, 0, last))
	}

	fn user(id: u64, speed_limit: u64, device_limit: u32) -> RosterUser {
		RosterUser { id: UserId(id), uuid: Uuid::nil(), speed_limit, device_limit }
	}

	#[test]
	fn test_user_device_limit_combines_with_node() {
		let state = state(NodeLimits { device_limit: 3, ..Default::default() });
		let diff = RosterDiff { added: vec![user(1, 0, 1)], removed: vec![] };
		state.apply_roster_delta(&diff).unwrap();

		assert!(!state.admit(UserId(1), ip(1)).unwrap().is_rejected());
		assert!(state.admit(UserId(1), ip(2)).unwrap().is_rejected());
		// User without a roster device limit gets the node's
		for i in 1..=3 {
			assert!(!state.admit(UserId(2), ip(i)).unwrap().is_rejected());
		}
		assert!(state.admit(UserId(2), ip(4)).unwrap().is_rejected());
	}

	#[test]
	fn test_first_admission_creates_record() {
		let state = state(NodeLimits::default());
		assert!(state.user_record(UserId(5)).is_none());
		state.admit(UserId(5), ip(1)).unwrap();
		assert_eq!(state.user_record(UserId(5)), Some(UserLimitRecord::default()));
	}

	#[test]
	fn test_bucket_retired_when_user_goes_offline() {
		let state = state(NodeLimits { speed_limit: 1000, ..Default::default() });
		state.admit(UserId(1), ip(1)).unwrap();
		state.admit(UserId(1), ip(2)).unwrap();
		let (bucket, limited) = state.get_bucket(UserId(1));
		assert!(limited && bucket.is_some());

		state.release(UserId(1), ip(1));
		assert_eq!(state.stats().buckets, 1);
		state.release(UserId(1), ip(2));
		assert_eq!(state.stats().buckets, 0);
	}

	#[test]
	fn test_removed_user_state_is_gone() {
		let state = state(NodeLimits::default());
		let diff = RosterDiff { added: vec![user(1, 500, 0)], removed: vec![] };
		state.apply_roster_delta(&diff).unwrap();
		state.admit(UserId(1), ip(1)).unwrap();
		let _ = state.get_bucket(UserId(1));

		let diff = RosterDiff { added: vec![], removed: vec![user(1, 500, 0)] };
		state.apply_roster_delta(&diff).unwrap();
		assert!(state.user_record(UserId(1)).is_none());
		assert_eq!(state.connections(UserId(1)), 0);
		assert_eq!(state.stats().buckets, 0);

		// Late release of the dropped connection is harmless
		state.release(UserId(1), ip(1));
		assert_eq!(state.connections(UserId(1)), 0);
	}

	#[test]
	fn test_teardown_blocks_admission() {
		let state = state(NodeLimits::default());
		state.admit(UserId(1), ip(1)).unwrap();
		state.teardown();

		assert!(!state.is_active());
		assert!(matches!(state.admit(UserId(1), ip(1)), Err(Error::UnknownScope(_))));
		assert_eq!(state.stats(), ScopeStats::default());
	}

	#[test]
	fn test_lease_releases_once() {
		let state = Arc::new(state(NodeLimits { conn_limit: 1, ..Default::default() }));
		let lease = ConnectionLease::acquire(&state, UserId(1), ip(1)).unwrap().unwrap();
		assert!(ConnectionLease::acquire(&state, UserId(1), ip(1)).unwrap().is_none());

		drop(lease);
		assert_eq!(state.connections(UserId(1)), 0);
		let again = ConnectionLease::acquire(&state, UserId(1), ip(1)).unwrap();
		assert!(again.is_some());
	}

	#[test]
	fn test_lease_from_removed_session_releases_nothing() {
		let state = Arc::new(state(NodeLimits { conn_limit: 1, speed_limit: 0, device_limit: 0 }));
		let diff = RosterDiff { added: vec![user(1, 1000, 0)], removed: vec![] };
		state.apply_roster_delta(&diff).unwrap();
		let old = ConnectionLease::acquire(&state, UserId(1), ip(1)).unwrap().unwrap();

		// Cap change arrives as remove + add
		let diff = RosterDiff { added: vec![user(1, 2000, 0)], removed: vec![user(1, 1000, 0)] };
		state.apply_roster_delta(&diff).unwrap();
		let new = ConnectionLease::acquire(&state, UserId(1), ip(1)).unwrap().unwrap();
		let (bucket, _) = new.bucket();
		assert_eq!(bucket.unwrap().capacity(), 2000);

		drop(old);
		assert_eq!(state.connections(UserId(1)), 1);
		assert_eq!(state.stats().buckets, 1);
		assert!(ConnectionLease::acquire(&state, UserId(1), ip(1)).unwrap().is_none());

		drop(new);
		assert_eq!(state.connections(UserId(1)), 0);
		assert_eq!(state.stats().buckets, 0);
	}

	#[test]
	fn test_set_node_limits_reports_change() {
		let state = state(NodeLimits::default());
		let limits = NodeLimits { speed_limit: 10, device_limit: 1, conn_limit: 2 };
		assert!(state.set_node_limits(limits));
		assert!(!state.set_node_limits(limits));
		assert_eq!(state.node_limits(), limits);
	}
}

// vim: ts=4
