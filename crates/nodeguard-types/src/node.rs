//! Node-wide limits and node metadata supplied by the control plane.

use serde::{Deserialize, Serialize};

/// Node-wide caps for one scope. A zero value means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeLimits {
	/// Speed cap applied to every user (bytes/sec)
	pub speed_limit: u64,
	/// Distinct concurrent source IPs per user
	pub device_limit: u32,
	/// Concurrent connections per user
	pub conn_limit: u32,
}

/// Traffic-triggered speed reduction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicLimitConfig {
	/// Bytes a user may transfer between checks before the reduced cap kicks in
	pub threshold_bytes: u64,
	/// Reduced speed cap (bytes/sec)
	pub reduced_speed: u64,
	/// How long the reduced cap stays installed
	pub duration_secs: u64,
}

impl DynamicLimitConfig {
	pub fn is_enabled(&self) -> bool {
		self.threshold_bytes > 0 && self.reduced_speed > 0 && self.duration_secs > 0
	}
}

/// Node metadata fetched at the start of every pull cycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
	#[serde(default)]
	pub limits: NodeLimits,
	/// Roster/rule pull interval in seconds
	pub pull_interval_secs: u64,
	/// Traffic and online IP push interval in seconds
	pub push_interval_secs: u64,
	#[serde(default)]
	pub dynamic_limit: Option<DynamicLimitConfig>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_node_info_defaults() {
		let json = r#"{"pull_interval_secs": 60, "push_interval_secs": 30}"#;
		let info: NodeInfo = serde_json::from_str(json).unwrap();
		assert_eq!(info.limits, NodeLimits::default());
		assert!(info.dynamic_limit.is_none());
	}

	#[test]
	fn test_dynamic_limit_enabled() {
		let cfg = DynamicLimitConfig { threshold_bytes: 1, reduced_speed: 1, duration_secs: 1 };
		assert!(cfg.is_enabled());
		assert!(!DynamicLimitConfig { threshold_bytes: 0, ..cfg }.is_enabled());
		assert!(!DynamicLimitConfig { duration_secs: 0, ..cfg }.is_enabled());
	}
}

// vim: ts=4
