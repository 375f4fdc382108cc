pub use nodeguard_types::prelude::*;

pub use crate::clock::Clock;

// vim: ts=4
