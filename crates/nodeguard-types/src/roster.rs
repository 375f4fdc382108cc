//! Roster and rule snapshots, plus the report shapes pushed back upstream.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::types::UserId;

/// One user entry of the roster
///
/// Equality covers every field, so a speed or device limit change makes the
/// entry compare unequal to its previous version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RosterUser {
	pub id: UserId,
	pub uuid: Uuid,
	/// Per-user speed cap (bytes/sec, 0 = unlimited)
	#[serde(default)]
	pub speed_limit: u64,
	/// Per-user distinct device cap (0 = unlimited)
	#[serde(default)]
	pub device_limit: u32,
}

/// Rule lists for one scope
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
	/// Regex patterns matched against destination strings, in priority order
	pub domain_patterns: Vec<String>,
	/// Exact protocol names
	pub protocols: Vec<String>,
}

/// Online IPs of one user, exchanged with the IP recorder
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIps {
	pub user_id: UserId,
	pub ips: Vec<IpAddr>,
}

/// Traffic of one user since the previous report
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTraffic {
	pub user_id: UserId,
	pub upload: u64,
	pub download: u64,
}

impl UserTraffic {
	pub fn total(&self) -> u64 {
		self.upload.saturating_add(self.download)
	}
}


// vim: ts=4
