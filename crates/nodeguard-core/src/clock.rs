//! Wall clock used for dynamic speed limit expiry

use std::sync::atomic::{AtomicI64, Ordering};

use nodeguard_types::types::Timestamp;

pub trait Clock: Send + Sync + std::fmt::Debug {
	fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> Timestamp {
		Timestamp::now()
	}
}

/// Manually advanced clock, for simulations and tests
#[derive(Debug, Default)]
pub struct ManualClock {
	now: AtomicI64,
}

impl ManualClock {
	pub fn new(start: Timestamp) -> Self {
		Self { now: AtomicI64::new(start.0) }
	}

	pub fn advance(&self, secs: u64) {
		let secs = i64::try_from(secs).unwrap_or(i64::MAX);
		self.now.fetch_add(secs, Ordering::SeqCst);
	}

	pub fn set(&self, ts: Timestamp) {
		self.now.store(ts.0, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> Timestamp {
		Timestamp(self.now.load(Ordering::SeqCst))
	}
}


// vim: ts=4
