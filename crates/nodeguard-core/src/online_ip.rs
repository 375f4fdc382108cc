//! Online IP accounting for the reporting window.
//!
//! Device sets are owned by the connection limiter; this module decides how a
//! reporting window ends. Without a recorder the window is simply reset. With
//! a recorder, local sets persist until the recorder's merged view replaces
//! the remote part, and a failed round-trip falls back to a plain reset so the
//! sets cannot grow without bound.

use std::collections::HashMap;
use std::net::IpAddr;

use nodeguard_types::roster::UserIps;

use crate::conn_limit::ConnLimiter;
use crate::prelude::*;

pub type OnlineSnapshot = HashMap<UserKey, Vec<IpAddr>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct OnlineIpAccounting {
	recorder_enabled: bool,
}

impl OnlineIpAccounting {
	pub fn new(recorder_enabled: bool) -> Self {
		Self { recorder_enabled }
	}

	pub fn recorder_enabled(&self) -> bool {
		self.recorder_enabled
	}

	/// Active IPs per user
	pub fn snapshot(&self, devices: &ConnLimiter) -> OnlineSnapshot {
		devices.snapshot()
	}

	/// End the reporting window without recorder input
	pub fn reset(&self, devices: &ConnLimiter) {
		if !self.recorder_enabled {
			devices.reset_window();
		}
	}

	/// End the reporting window with the recorder's merged view
	pub fn merge(&self, devices: &ConnLimiter, scope: &Scope, merged: Vec<UserIps>) {
		let remote = from_user_ips(scope, merged);
		devices.merge_remote(&remote);
	}

	/// Drop the window after a failed recorder round-trip
	pub fn discard(&self, devices: &ConnLimiter) {
		devices.reset_window();
	}
}

/// Snapshot in the recorder's wire shape
pub fn to_user_ips(snapshot: OnlineSnapshot) -> Vec<UserIps> {
	let mut list: Vec<UserIps> = snapshot
		.into_iter()
		.map(|(key, ips)| UserIps { user_id: key.user_id, ips })
		.collect();
	list.sort_by_key(|u| u.user_id);
	list
}

pub fn from_user_ips(scope: &Scope, list: Vec<UserIps>) -> OnlineSnapshot {
	list.into_iter()
		.filter(|u| !u.ips.is_empty())
		.map(|u| (UserKey::new(scope.clone(), u.user_id), u.ips))
		.collect()
}


// vim: ts=4
