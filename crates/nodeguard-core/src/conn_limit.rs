//! Connection and Device Admission
//!
//! Tracks open connections and distinct source IPs per user. Both counters of
//! a user live in one map entry, so admission and release for a key are
//! serialized by that entry's shard lock while unrelated users proceed in
//! parallel.
//!
//! Every session gets a fresh [`SessionId`] when it is created, so a release
//! carrying the id of a session that has since been removed and recreated
//! does not touch the new one.
//!
//! The `*_with` variants run a callback while the user's entry is still
//! locked. The scope uses them to create, drop and retire the user's other
//! state in step with the session.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::prelude::*;

/// Why an admission was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
	/// User already holds the maximum number of concurrent connections
	ConnectionLimit,
	/// Source IP would exceed the user's distinct device cap
	DeviceLimit,
}

/// Outcome of an admission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
	Accepted,
	Rejected(RejectReason),
}

impl Admission {
	pub fn is_rejected(&self) -> bool {
		matches!(self, Admission::Rejected(_))
	}
}

impl From<Result<SessionId, RejectReason>> for Admission {
	fn from(res: Result<SessionId, RejectReason>) -> Self {
		match res {
			Ok(_) => Admission::Accepted,
			Err(reason) => Admission::Rejected(reason),
		}
	}
}

/// Identity of one user session, from creation until it is removed or
/// emptied by a window reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Caps applied to one admission. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnLimits {
	pub conn_limit: u32,
	pub device_limit: u32,
}

/// One source IP of a user
#[derive(Debug, Clone, Copy, Default)]
struct DeviceEntry {
	/// Open local connections from this IP
	conns: u32,
	/// Reported online by the cross-node recorder
	remote: bool,
}

impl DeviceEntry {
	fn is_active(&self) -> bool {
		self.conns > 0 || self.remote
	}
}

/// Device set and connection counter of one user
#[derive(Debug)]
struct UserSession {
	id: SessionId,
	conns: u32,
	devices: HashMap<IpAddr, DeviceEntry>,
}

impl UserSession {
	fn new(id: SessionId) -> Self {
		Self { id, conns: 0, devices: HashMap::new() }
	}

	fn mark_remote(&mut self, ips: &[IpAddr]) {
		for ip in ips {
			self.devices.entry(*ip).or_default().remote = true;
		}
	}

	fn active_devices(&self) -> usize {
		self.devices.values().filter(|d| d.is_active()).count()
	}

	fn is_empty(&self) -> bool {
		self.conns == 0 && self.devices.is_empty()
	}
}

#[derive(Debug, Default)]
pub struct ConnLimiter {
	sessions: DashMap<UserKey, UserSession>,
	next_session: AtomicU64,
}

impl ConnLimiter {
	pub fn new() -> Self {
		Self::default()
	}

	fn open_session(&self, key: &UserKey) -> RefMut<'_, UserKey, UserSession> {
		self.sessions.entry(key.clone()).or_insert_with(|| {
			UserSession::new(SessionId(self.next_session.fetch_add(1, Ordering::Relaxed)))
		})
	}

	/// Try to admit a new connection from `ip`
	///
	/// Returns the session the connection belongs to. A rejection leaves the
	/// user's state untouched.
	pub fn admit(
		&self,
		key: &UserKey,
		ip: IpAddr,
		limits: ConnLimits,
	) -> Result<SessionId, RejectReason> {
		self.admit_with(key, ip, limits, || {})
	}

	/// [`admit`](Self::admit), running `on_accept` before the entry unlocks
	pub fn admit_with(
		&self,
		key: &UserKey,
		ip: IpAddr,
		limits: ConnLimits,
		on_accept: impl FnOnce(),
	) -> Result<SessionId, RejectReason> {
		let mut session = self.open_session(key);

		if limits.conn_limit > 0 && session.conns >= limits.conn_limit {
			return Err(RejectReason::ConnectionLimit);
		}

		if limits.device_limit > 0 {
			let known = session.devices.get(&ip).is_some_and(DeviceEntry::is_active);
			if !known && session.active_devices() >= limits.device_limit as usize {
				return Err(RejectReason::DeviceLimit);
			}
		}

		let device = session.devices.entry(ip).or_default();
		device.conns = device.conns.saturating_add(1);
		session.conns = session.conns.saturating_add(1);
		on_accept();
		Ok(session.id)
	}

	/// Release one connection from `ip`
	///
	/// Unknown users, unknown IPs and IPs without open connections are
	/// ignored, so duplicate releases cannot drive counters below zero.
	/// Returns `true` when the user has no open connections left.
	pub fn release(&self, key: &UserKey, ip: IpAddr) -> bool {
		self.release_with(key, ip, None, || {})
	}

	/// [`release`](Self::release), running `on_offline` under the entry lock
	/// when the last connection goes
	///
	/// With `id` set, only a connection of that session is released: once
	/// the session has been removed this is a no-op, even if the user has a
	/// new session by now.
	pub fn release_with(
		&self,
		key: &UserKey,
		ip: IpAddr,
		id: Option<SessionId>,
		on_offline: impl FnOnce(),
	) -> bool {
		let Some(mut session) = self.sessions.get_mut(key) else {
			return false;
		};
		if id.is_some_and(|id| id != session.id) {
			return false;
		}
		let Some(device) = session.devices.get_mut(&ip) else {
			return false;
		};
		if device.conns == 0 {
			return false;
		}
		device.conns -= 1;
		session.conns = session.conns.saturating_sub(1);
		if session.conns > 0 {
			return false;
		}
		on_offline();
		true
	}

	pub fn connections(&self, key: &UserKey) -> u32 {
		self.sessions.get(key).map_or(0, |s| s.conns)
	}

	pub fn active_devices(&self, key: &UserKey) -> usize {
		self.sessions.get(key).map_or(0, |s| s.active_devices())
	}

	/// Locally connected IPs per user
	pub fn snapshot(&self) -> HashMap<UserKey, Vec<IpAddr>> {
		self.sessions
			.iter()
			.filter_map(|entry| {
				let mut ips: Vec<IpAddr> = entry
					.devices
					.iter()
					.filter(|(_, d)| d.conns > 0)
					.map(|(ip, _)| *ip)
					.collect();
				if ips.is_empty() {
					return None;
				}
				ips.sort_unstable();
				Some((entry.key().clone(), ips))
			})
			.collect()
	}

	/// Start a new reporting window
	///
	/// Drops every IP without open connections, including remote entries.
	/// IPs with open connections are kept so their releases still balance.
	pub fn reset_window(&self) {
		self.sessions.retain(|_, session| {
			session.devices.retain(|_, d| {
				d.remote = false;
				d.conns > 0
			});
			!session.is_empty()
		});
	}

	/// Replace the remote view with the recorder's merged response
	///
	/// Each user's reset and re-mark happen under that user's entry lock, so
	/// a concurrent admission never sees the remote devices missing.
	pub fn merge_remote(&self, remote: &HashMap<UserKey, Vec<IpAddr>>) {
		self.sessions.retain(|key, session| {
			let ips = remote.get(key).map_or(&[][..], Vec::as_slice);
			session.devices.retain(|_, d| {
				d.remote = false;
				d.conns > 0
			});
			session.mark_remote(ips);
			!session.is_empty()
		});
		// Users first seen through the recorder
		for (key, ips) in remote.iter().filter(|(_, ips)| !ips.is_empty()) {
			self.open_session(key).mark_remote(ips);
		}
	}

	/// Drop the user's session, running `on_remove` under its entry lock
	///
	/// `on_remove` runs even if the user has no session.
	pub fn remove_user(&self, key: &UserKey, on_remove: impl FnOnce()) {
		match self.sessions.entry(key.clone()) {
			Entry::Occupied(entry) => {
				on_remove();
				entry.remove();
			}
			Entry::Vacant(entry) => {
				on_remove();
				drop(entry);
			}
		}
	}

	pub fn clear(&self) {
		self.sessions.clear();
	}

	/// (users with open connections, total open connections)
	pub fn online(&self) -> (usize, u64) {
		self.sessions.iter().filter(|s| s.conns > 0).fold((0, 0), |(users, conns), s| {
			(users + 1, conns + u64::from(s.conns))
		})
	}
}


// vim: ts=4
