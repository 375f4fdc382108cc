//! Governance Registry
//!
//! Owns the state of every active scope. The proxy engine keeps one registry
//! and calls into it from any number of connection tasks; scopes are looked
//! up in a sharded map, so unrelated scopes never contend.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::IpAddr;
use std::sync::Arc;

use nodeguard_types::node::NodeLimits;
use nodeguard_types::roster::{RuleSet, UserIps, UserTraffic};

use crate::clock::SystemClock;
use crate::config::ScopeConfig;
use crate::conn_limit::Admission;
use crate::online_ip::OnlineSnapshot;
use crate::prelude::*;
use crate::reconcile::RosterDiff;
use crate::scope::{ConnectionLease, ScopeState, ScopeStats};
use crate::speed_limit::TokenBucket;

#[derive(Debug)]
pub struct GovernanceRegistry {
	scopes: DashMap<Scope, Arc<ScopeState>>,
	clock: Arc<dyn Clock>,
}

impl Default for GovernanceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl GovernanceRegistry {
	pub fn new() -> Self {
		Self::with_clock(Arc::new(SystemClock))
	}

	pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
		Self { scopes: DashMap::new(), clock }
	}

	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	// Scope lifecycle
	//*****************

	pub fn activate_scope(&self, scope: Scope, config: ScopeConfig) -> NgResult<Arc<ScopeState>> {
		match self.scopes.entry(scope.clone()) {
			Entry::Occupied(_) => Err(Error::ScopeExists(scope)),
			Entry::Vacant(entry) => {
				info!("activating scope {}", scope);
				let state = Arc::new(ScopeState::new(scope, config, Arc::clone(&self.clock)));
				entry.insert(Arc::clone(&state));
				Ok(state)
			}
		}
	}

	/// Remove a scope and discard all of its state
	pub fn deactivate_scope(&self, scope: &Scope) -> NgResult<()> {
		let (_, state) =
			self.scopes.remove(scope).ok_or_else(|| Error::UnknownScope(scope.clone()))?;
		state.teardown();
		Ok(())
	}

	pub fn scope(&self, scope: &Scope) -> NgResult<Arc<ScopeState>> {
		self.scopes
			.get(scope)
			.map(|state| Arc::clone(&state))
			.ok_or_else(|| Error::UnknownScope(scope.clone()))
	}

	pub fn scopes(&self) -> Vec<Scope> {
		self.scopes.iter().map(|entry| entry.key().clone()).collect()
	}

	// Data path
	//***********

	pub fn admit(&self, key: &UserKey, ip: IpAddr) -> NgResult<Admission> {
		self.scope(&key.scope)?.admit(key.user_id, ip)
	}

	/// Admit a connection wrapped in a lease that releases on drop
	pub fn acquire(&self, key: &UserKey, ip: IpAddr) -> NgResult<Option<ConnectionLease>> {
		ConnectionLease::acquire(&self.scope(&key.scope)?, key.user_id, ip)
	}

	/// Release a connection admitted through [`admit`](Self::admit)
	///
	/// Unlike a lease this is not tied to a session, so after the user's
	/// removal it releases from whatever session the user has by then.
	pub fn release(&self, key: &UserKey, ip: IpAddr) -> NgResult<()> {
		self.scope(&key.scope)?.release(key.user_id, ip);
		Ok(())
	}

	pub fn get_bucket(&self, key: &UserKey) -> NgResult<(Option<Arc<TokenBucket>>, bool)> {
		Ok(self.scope(&key.scope)?.get_bucket(key.user_id))
	}

	pub fn effective_cap(&self, key: &UserKey) -> NgResult<u64> {
		Ok(self.scope(&key.scope)?.effective_cap(key.user_id))
	}

	pub fn match_domain(&self, scope: &Scope, destination: &str) -> NgResult<bool> {
		Ok(self.scope(scope)?.match_domain(destination))
	}

	pub fn match_protocol(&self, scope: &Scope, protocol: &str) -> NgResult<bool> {
		Ok(self.scope(scope)?.match_protocol(protocol))
	}

	pub fn report_traffic(&self, key: &UserKey, upload: u64, download: u64) -> NgResult<()> {
		self.scope(&key.scope)?.report_traffic(key.user_id, upload, download);
		Ok(())
	}

	// Control path
	//**************

	pub fn apply_roster_delta(&self, scope: &Scope, diff: &RosterDiff) -> NgResult<()> {
		self.scope(scope)?.apply_roster_delta(diff)
	}

	pub fn replace_rules(&self, scope: &Scope, rules: &RuleSet) -> NgResult<()> {
		self.scope(scope)?.replace_rules(rules);
		Ok(())
	}

	/// Returns `true` if the limits changed
	pub fn update_node_limits(&self, scope: &Scope, limits: NodeLimits) -> NgResult<bool> {
		Ok(self.scope(scope)?.set_node_limits(limits))
	}

	pub fn online_snapshot(&self, scope: &Scope) -> NgResult<OnlineSnapshot> {
		Ok(self.scope(scope)?.online_snapshot())
	}

	pub fn reset_online(&self, scope: &Scope) -> NgResult<()> {
		self.scope(scope)?.reset_online();
		Ok(())
	}

	pub fn merge_remote_ips(&self, scope: &Scope, merged: Vec<UserIps>) -> NgResult<()> {
		self.scope(scope)?.merge_remote_ips(merged);
		Ok(())
	}

	pub fn drain_traffic(&self, scope: &Scope) -> NgResult<Vec<(UserKey, UserTraffic)>> {
		Ok(self.scope(scope)?.drain_traffic())
	}

	pub fn stats(&self, scope: &Scope) -> NgResult<ScopeStats> {
		Ok(self.scope(scope)?.stats())
	}
}


// vim: ts=4
