//! Error type shared by the nodeguard crates.

use crate::types::Scope;

pub type NgResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Scope was never activated or has already been torn down
	UnknownScope(Scope),
	/// Scope is already active
	ScopeExists(Scope),
	/// Control-plane fetch failed (unreachable or malformed response)
	Fetch(String),
	/// Online IP recorder round-trip failed
	Sync(String),
	/// Traffic report could not be delivered upstream
	Report(String),
	/// Invalid configuration value
	Config(String),
	Internal(String),
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::UnknownScope(scope) => write!(f, "unknown scope: {}", scope),
			Error::ScopeExists(scope) => write!(f, "scope already active: {}", scope),
			Error::Fetch(msg) => write!(f, "control plane fetch failed: {}", msg),
			Error::Sync(msg) => write!(f, "online ip sync failed: {}", msg),
			Error::Report(msg) => write!(f, "traffic report failed: {}", msg),
			Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
		}
	}
}

impl std::error::Error for Error {}


// vim: ts=4
