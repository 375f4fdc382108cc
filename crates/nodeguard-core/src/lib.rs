//! Per-node traffic governance engine.
//!
//! The proxy engine calls into the [`GovernanceRegistry`] on its hot path
//! (admission, release, token buckets, rule matching, traffic accounting)
//! while a [`Coordinator`] per scope reconciles the same state against the
//! roster and rules fetched from the control plane.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod config;
pub mod conn_limit;
pub mod dynamic;
pub mod online_ip;
pub mod periodic;
pub mod prelude;
pub mod reconcile;
pub mod registry;
pub mod rules;
pub mod scope;
pub mod speed_limit;
pub mod traffic;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CoordinatorConfig, ScopeConfig};
pub use conn_limit::{Admission, RejectReason};
pub use periodic::PeriodicTask;
pub use reconcile::{Coordinator, CoordinatorBuilder, CoordinatorState, PushSummary, RosterDiff};
pub use registry::GovernanceRegistry;
pub use scope::{ConnectionLease, ScopeState, ScopeStats};
pub use speed_limit::{TokenBucket, min_nonzero};

// vim: ts=4
