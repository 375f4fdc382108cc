//! Periodic Tasks
//!
//! A named job run on a fixed interval by one spawned tokio task. Runs never
//! overlap: the loop awaits each run before arming the next sleep. The
//! interval can be changed while running (the pending sleep is re-armed) and
//! a run can be requested out of schedule.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;

#[derive(Debug)]
struct Running {
	cancel: CancellationToken,
	handle: JoinHandle<()>,
}

#[derive(Debug)]
pub struct PeriodicTask {
	name: &'static str,
	interval_ms: AtomicU64,
	/// Wakes the loop on interval change or run request
	wake: Notify,
	run_requested: AtomicBool,
	runs: AtomicU64,
	running: Mutex<Option<Running>>,
}

fn as_millis(interval: Duration) -> u64 {
	u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

impl PeriodicTask {
	pub fn new(name: &'static str, interval: Duration) -> NgResult<Arc<Self>> {
		if interval.is_zero() {
			return Err(Error::Config(format!("periodic task {} needs a non-zero interval", name)));
		}
		Ok(Arc::new(Self {
			name,
			interval_ms: AtomicU64::new(as_millis(interval)),
			wake: Notify::new(),
			run_requested: AtomicBool::new(false),
			runs: AtomicU64::new(0),
			running: Mutex::new(None),
		}))
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms.load(Ordering::Relaxed))
	}

	/// Change the interval; the next run is scheduled one new interval from now
	pub fn set_interval(&self, interval: Duration) {
		if interval.is_zero() {
			warn!("ignoring zero interval for periodic task {}", self.name);
			return;
		}
		let previous = self.interval_ms.swap(as_millis(interval), Ordering::Relaxed);
		if previous != as_millis(interval) {
			info!("periodic task {} interval set to {:?}", self.name, interval);
			self.wake.notify_one();
		}
	}

	/// Request a run as soon as the current one (if any) finishes
	pub fn run_now(&self) {
		self.run_requested.store(true, Ordering::Release);
		self.wake.notify_one();
	}

	/// Number of completed runs
	pub fn runs(&self) -> u64 {
		self.runs.load(Ordering::Relaxed)
	}

	pub fn is_running(&self) -> bool {
		self.running.lock().as_ref().is_some_and(|r| !r.handle.is_finished())
	}

	/// Spawn the loop. Fails if the task is already running.
	pub fn start<F, Fut>(self: &Arc<Self>, job: F) -> NgResult<()>
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let mut running = self.running.lock();
		if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
			return Err(Error::Internal(format!("periodic task {} already started", self.name)));
		}

		let cancel = CancellationToken::new();
		let task = Arc::clone(self);
		let token = cancel.clone();
		let handle = tokio::spawn(async move { task.run_loop(job, token).await });
		*running = Some(Running { cancel, handle });
		debug!("periodic task {} started", self.name);
		Ok(())
	}

	/// Cancel the loop and wait for an in-flight run to finish
	pub async fn stop(&self) {
		let Some(running) = self.running.lock().take() else {
			return;
		};
		running.cancel.cancel();
		if let Err(err) = running.handle.await {
			error!("periodic task {} ended abnormally: {}", self.name, err);
		}
		debug!("periodic task {} stopped", self.name);
	}

	async fn run_loop<F, Fut>(&self, job: F, cancel: CancellationToken)
	where
		F: Fn() -> Fut,
		Fut: Future<Output = ()>,
	{
		loop {
			let due = tokio::select! {
				() = cancel.cancelled() => break,
				() = tokio::time::sleep(self.interval()) => true,
				() = self.wake.notified() => self.run_requested.swap(false, Ordering::Acquire),
			};
			if due {
				job().await;
				self.runs.fetch_add(1, Ordering::Relaxed);
			}
		}
	}
}


// vim: ts=4
