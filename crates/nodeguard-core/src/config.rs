//! Governance Configuration
//!
//! Per-scope limit configuration and reconciliation timing. Both structs are
//! deserializable so the host's config loader can fill them directly.

use serde::Deserialize;
use std::time::Duration;

use nodeguard_types::node::{DynamicLimitConfig, NodeLimits};

use crate::prelude::*;

/// Initial state of a scope at activation
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
	/// Node-wide caps (replaced later by control-plane node info)
	pub limits: NodeLimits,
	/// Traffic-triggered speed reduction, disabled when absent
	pub dynamic_limit: Option<DynamicLimitConfig>,
	/// Keep online IP sets across reporting windows and merge them with an
	/// external recorder's view
	pub ip_recorder_enabled: bool,
}

/// Reconciliation timing for one scope
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
	/// Roster/rule pull interval in seconds
	pub pull_interval_secs: u64,
	/// Traffic and online IP push interval in seconds
	pub push_interval_secs: u64,
	/// Lower bound applied to intervals supplied by the control plane
	pub min_interval_secs: u64,
}

impl CoordinatorConfig {
	pub fn pull_interval(&self) -> Duration {
		Duration::from_secs(self.pull_interval_secs.max(self.min_interval_secs))
	}

	pub fn push_interval(&self) -> Duration {
		Duration::from_secs(self.push_interval_secs.max(self.min_interval_secs))
	}

	pub fn validate(&self) -> NgResult<()> {
		if self.pull_interval().is_zero() || self.push_interval().is_zero() {
			return Err(Error::Config("reconciliation intervals must be non-zero".into()));
		}
		Ok(())
	}
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			pull_interval_secs: 60, // 1 minute
			push_interval_secs: 60,
			min_interval_secs: 5,
		}
	}
}


// vim: ts=4
