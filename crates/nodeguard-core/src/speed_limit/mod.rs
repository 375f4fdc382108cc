//! Speed Limiting
//!
//! Per-user limit records and lazily created token buckets. The effective
//! cap of a user is the smallest non-zero value among the node cap, the
//! user's static cap and an unexpired dynamic cap.
//!
//! A bucket is created on first use and then reused until the user goes
//! offline. Roster cap changes arrive as remove + add and retire the bucket
//! that way; installing or expiring a dynamic cap retires it directly.
//!
//! Lock order is records before buckets. A bucket is only created while the
//! record's shard is read-locked, so it cannot outlive the cap it was built
//! from.

mod bucket;

pub use bucket::TokenBucket;

use dashmap::DashMap;
use std::sync::Arc;

use crate::prelude::*;

/// Smallest non-zero of two caps, where zero means unlimited
pub fn min_nonzero(a: u64, b: u64) -> u64 {
	match (a, b) {
		(0, x) | (x, 0) => x,
		(a, b) => a.min(b),
	}
}

/// Limits of one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserLimitRecord {
	/// Roster speed cap (bytes/sec)
	pub static_speed: u64,
	/// Roster device cap
	pub device_limit: u32,
	/// Traffic-triggered speed cap (bytes/sec)
	pub dynamic_speed: u64,
	pub dynamic_expiry: Option<Timestamp>,
}

impl UserLimitRecord {
	pub fn new(static_speed: u64, device_limit: u32) -> Self {
		Self { static_speed, device_limit, ..Default::default() }
	}

	/// Dynamic cap if one is installed and not yet expired
	pub fn dynamic_cap(&self, now: Timestamp) -> Option<u64> {
		match self.dynamic_expiry {
			Some(expiry) if expiry > now && self.dynamic_speed > 0 => Some(self.dynamic_speed),
			_ => None,
		}
	}

	fn has_expired_dynamic(&self, now: Timestamp) -> bool {
		self.dynamic_expiry.is_some_and(|expiry| expiry <= now)
	}

	fn cap(&self, node_cap: u64, now: Timestamp) -> u64 {
		let cap = min_nonzero(node_cap, self.static_speed);
		match self.dynamic_cap(now) {
			Some(dynamic) => min_nonzero(cap, dynamic),
			None => cap,
		}
	}
}

#[derive(Debug, Default)]
pub struct SpeedLimiter {
	records: DashMap<UserKey, UserLimitRecord>,
	buckets: DashMap<UserKey, Arc<TokenBucket>>,
}

impl SpeedLimiter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Create or replace a user's record from a roster entry
	pub fn insert_user(&self, key: UserKey, static_speed: u64, device_limit: u32) {
		self.records.insert(key, UserLimitRecord::new(static_speed, device_limit));
	}

	/// Create an empty record for a user first seen on admission
	pub fn ensure_user(&self, key: &UserKey) {
		if !self.records.contains_key(key) {
			self.records.entry(key.clone()).or_default();
		}
	}

	/// Delete the user's record and bucket
	pub fn remove_user(&self, key: &UserKey) {
		self.records.remove(key);
		self.buckets.remove(key);
	}

	/// Retire the user's bucket (user went offline)
	pub fn drop_bucket(&self, key: &UserKey) {
		self.buckets.remove(key);
	}

	pub fn record(&self, key: &UserKey) -> Option<UserLimitRecord> {
		self.records.get(key).map(|r| *r)
	}

	pub fn device_limit(&self, key: &UserKey) -> u32 {
		self.records.get(key).map_or(0, |r| r.device_limit)
	}

	/// Install a temporary reduced cap and retire the user's bucket
	///
	/// Users without a record are left alone. Returns `true` if installed.
	pub fn install_dynamic(&self, key: &UserKey, speed: u64, expiry: Timestamp) -> bool {
		let Some(mut record) = self.records.get_mut(key) else {
			return false;
		};
		record.dynamic_speed = speed;
		record.dynamic_expiry = Some(expiry);
		self.buckets.remove(key);
		true
	}

	fn has_expired_dynamic(&self, key: &UserKey, now: Timestamp) -> bool {
		self.records.get(key).is_some_and(|r| r.has_expired_dynamic(now))
	}

	/// Clear an expired dynamic cap along with the bucket built under it
	fn clear_expired(&self, key: &UserKey, now: Timestamp) {
		let Some(mut record) = self.records.get_mut(key) else {
			return;
		};
		if record.has_expired_dynamic(now) {
			debug!("dynamic speed limit of {} expired", key);
			record.dynamic_speed = 0;
			record.dynamic_expiry = None;
			self.buckets.remove(key);
		}
	}

	/// Effective cap for a user, clearing an expired dynamic cap on the way
	pub fn effective_cap(&self, key: &UserKey, node_cap: u64, now: Timestamp) -> u64 {
		if self.has_expired_dynamic(key, now) {
			self.clear_expired(key, now);
		}
		self.records.get(key).map_or(node_cap, |r| r.cap(node_cap, now))
	}

	/// Bucket for a user, if the user is limited at all
	///
	/// An existing bucket is returned as is unless the dynamic cap it was
	/// built under has expired. A new one is created only when the
	/// effective cap is non-zero.
	pub fn get_bucket(
		&self,
		key: &UserKey,
		node_cap: u64,
		now: Timestamp,
	) -> (Option<Arc<TokenBucket>>, bool) {
		if self.has_expired_dynamic(key, now) {
			self.clear_expired(key, now);
		} else if let Some(bucket) = self.buckets.get(key).map(|b| Arc::clone(&b)) {
			return (Some(bucket), true);
		}

		let record = self.records.get(key);
		let cap = record.as_deref().map_or(node_cap, |r| r.cap(node_cap, now));
		let Some(bucket) = TokenBucket::new(cap) else {
			return (None, false);
		};
		let bucket = Arc::clone(&self.buckets.entry(key.clone()).or_insert_with(|| Arc::new(bucket)));
		drop(record);
		(Some(bucket), true)
	}

	pub fn bucket_count(&self) -> usize {
		self.buckets.len()
	}

	pub fn user_count(&self) -> usize {
		self.records.len()
	}

	pub fn clear(&self) {
		self.records.clear();
		self.buckets.clear();
	}
}


// vim: ts=4
