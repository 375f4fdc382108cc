//! Shared types, collaborator traits, and error types for nodeguard.
//!
//! This crate holds everything the governance engine exchanges with its
//! collaborators: scope and user identities, the typed control-plane
//! snapshots (node info, roster, rules), and the traits the control plane,
//! IP recorder and traffic reporter implement. Keeping them here lets
//! collaborator implementations depend on the types without pulling in the
//! engine itself.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod control_plane;
pub mod error;
pub mod node;
pub mod prelude;
pub mod roster;
pub mod types;

// vim: ts=4
