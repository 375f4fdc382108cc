//! Token bucket backed by governor's GCRA limiter.
//!
//! Capacity and refill rate are both the effective cap, so a bucket allows
//! one second's worth of burst.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;

use crate::prelude::*;

pub struct TokenBucket {
	capacity: NonZeroU32,
	limiter: DefaultDirectRateLimiter,
}

impl TokenBucket {
	/// Create a bucket for `rate` bytes/sec. Returns `None` for a zero rate.
	///
	/// Rates above `u32::MAX` bytes/sec are clamped.
	pub fn new(rate: u64) -> Option<Self> {
		let capacity = NonZeroU32::new(u32::try_from(rate).unwrap_or(u32::MAX))?;
		let quota = Quota::per_second(capacity).allow_burst(capacity);
		Some(Self { capacity, limiter: RateLimiter::direct(quota) })
	}

	/// Burst capacity in bytes
	pub fn capacity(&self) -> u64 {
		u64::from(self.capacity.get())
	}

	/// Refill rate in bytes/sec
	pub fn fill_rate(&self) -> u64 {
		u64::from(self.capacity.get())
	}

	/// Take `bytes` tokens if they are available right now
	pub fn try_consume(&self, bytes: u64) -> bool {
		let Some(n) = NonZeroU32::new(u32::try_from(bytes).unwrap_or(u32::MAX)) else {
			return true;
		};
		matches!(self.limiter.check_n(n), Ok(Ok(())))
	}

	/// Wait until `bytes` tokens have been taken
	///
	/// Requests larger than the capacity are split into capacity-sized
	/// chunks. Dropping the future cancels the wait.
	pub async fn consume(&self, bytes: u64) {
		let mut remaining = bytes;
		while remaining > 0 {
			let chunk = remaining.min(self.capacity());
			remaining -= chunk;
			let Some(n) = NonZeroU32::new(u32::try_from(chunk).unwrap_or(u32::MAX)) else {
				break;
			};
			if let Err(err) = self.limiter.until_n_ready(n).await {
				// Chunks never exceed capacity
				warn!("token bucket rejected chunk of {} bytes: {}", chunk, err);
				break;
			}
		}
	}
}

impl std::fmt::Debug for TokenBucket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TokenBucket").field("capacity", &self.capacity).finish_non_exhaustive()
	}
}


// vim: ts=4
