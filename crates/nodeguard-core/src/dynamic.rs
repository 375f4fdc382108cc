//! Dynamic Speed Limit Escalation
//!
//! Accumulates reported traffic per user and installs a reduced, expiring
//! speed cap once a user crosses the configured threshold.

use dashmap::DashMap;
use parking_lot::RwLock;

use nodeguard_types::node::DynamicLimitConfig;

use crate::prelude::*;
use crate::speed_limit::SpeedLimiter;

#[derive(Debug, Default)]
pub struct DynamicEscalator {
	config: RwLock<Option<DynamicLimitConfig>>,
	/// Bytes since the last escalation
	counters: DashMap<UserKey, u64>,
}

impl DynamicEscalator {
	pub fn new(config: Option<DynamicLimitConfig>) -> Self {
		Self { config: RwLock::new(config), counters: DashMap::new() }
	}

	pub fn config(&self) -> Option<DynamicLimitConfig> {
		*self.config.read()
	}

	/// Replace the configuration; running counters are kept
	pub fn set_config(&self, config: Option<DynamicLimitConfig>) {
		let mut current = self.config.write();
		if *current != config {
			info!("dynamic speed limit configuration changed to {:?}", config);
			*current = config;
		}
	}

	/// Add `bytes` to the user's counter and escalate on threshold
	///
	/// Returns `true` if a reduced cap was installed.
	pub fn accumulate_and_check(
		&self,
		key: &UserKey,
		bytes: u64,
		speed: &SpeedLimiter,
		now: Timestamp,
	) -> bool {
		let Some(config) = self.config().filter(DynamicLimitConfig::is_enabled) else {
			return false;
		};

		let mut counter = self.counters.entry(key.clone()).or_insert(0);
		*counter = counter.saturating_add(bytes);
		if *counter < config.threshold_bytes {
			return false;
		}
		*counter = 0;
		drop(counter);

		let expiry = now.add_seconds(config.duration_secs);
		if !speed.install_dynamic(key, config.reduced_speed, expiry) {
			debug!("user {} crossed the threshold but has no limit record", key);
			return false;
		}
		info!(
			"user {} crossed {} bytes, speed reduced to {} B/s until {}",
			key, config.threshold_bytes, config.reduced_speed, expiry
		);
		true
	}

	pub fn pending(&self, key: &UserKey) -> u64 {
		self.counters.get(key).map_or(0, |c| *c)
	}

	pub fn remove_user(&self, key: &UserKey) {
		self.counters.remove(key);
	}

	pub fn clear(&self) {
		self.counters.clear();
	}
}


// vim: ts=4
