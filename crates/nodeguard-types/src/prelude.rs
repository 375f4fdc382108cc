pub use crate::error::{Error, NgResult};
pub use crate::types::{Scope, Timestamp, UserId, UserKey};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
