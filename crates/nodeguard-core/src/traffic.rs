//! Per-user traffic ledger
//!
//! Hot path adds to atomic counters under a shared shard lock; the push cycle
//! drains the whole ledger under the exclusive lock, so no increment is lost
//! between a read and the reset.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use nodeguard_types::roster::UserTraffic;

use crate::prelude::*;

#[derive(Debug, Default)]
struct TrafficCounter {
	upload: AtomicU64,
	download: AtomicU64,
}

#[derive(Debug, Default)]
pub struct TrafficLedger {
	counters: DashMap<UserKey, TrafficCounter>,
}

impl TrafficLedger {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&self, key: &UserKey, upload: u64, download: u64) {
		if upload == 0 && download == 0 {
			return;
		}
		if let Some(counter) = self.counters.get(key) {
			counter.upload.fetch_add(upload, Ordering::Relaxed);
			counter.download.fetch_add(download, Ordering::Relaxed);
			return;
		}
		let counter = self.counters.entry(key.clone()).or_default();
		counter.upload.fetch_add(upload, Ordering::Relaxed);
		counter.download.fetch_add(download, Ordering::Relaxed);
	}

	/// Take every counter, leaving the ledger empty
	pub fn drain(&self) -> Vec<(UserKey, UserTraffic)> {
		let mut drained = Vec::with_capacity(self.counters.len());
		self.counters.retain(|key, counter| {
			let upload = counter.upload.swap(0, Ordering::Relaxed);
			let download = counter.download.swap(0, Ordering::Relaxed);
			if upload > 0 || download > 0 {
				drained.push((key.clone(), UserTraffic { user_id: key.user_id, upload, download }));
			}
			false
		});
		drained
	}

	/// Put back counts that could not be reported
	pub fn credit(&self, entries: &[(UserKey, UserTraffic)]) {
		for (key, traffic) in entries {
			self.add(key, traffic.upload, traffic.download);
		}
	}

	pub fn pending(&self, key: &UserKey) -> (u64, u64) {
		self.counters.get(key).map_or((0, 0), |c| {
			(c.upload.load(Ordering::Relaxed), c.download.load(Ordering::Relaxed))
		})
	}

	pub fn clear(&self) {
		self.counters.clear();
	}
}


// vim: ts=4
