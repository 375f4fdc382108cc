//! Reconciliation Coordinator
//!
//! Keeps one scope in step with the control plane. The pull cycle fetches
//! node info, roster and rules and applies whatever changed; the push cycle
//! reports accumulated traffic, feeds the dynamic escalator and closes the
//! online IP window. Both run on their own periodic task.
//!
//! A failed fetch leaves the scope exactly as it was: all three fetches
//! complete before anything is applied.

mod diff;

pub use diff::RosterDiff;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use nodeguard_types::control_plane::{ControlPlane, IpRecorder, TrafficReporter};
use nodeguard_types::node::NodeInfo;
use nodeguard_types::roster::{RosterUser, RuleSet, UserTraffic};

use crate::config::CoordinatorConfig;
use crate::online_ip::to_user_ips;
use crate::periodic::PeriodicTask;
use crate::prelude::*;
use crate::registry::GovernanceRegistry;
use crate::scope::ScopeState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
	Idle,
	Fetching,
	Diffing,
	Applying,
}

/// Outcome of one push cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushSummary {
	/// Users whose traffic left the ledger
	pub reported_users: usize,
	/// Set when the reporter failed and the counts were credited back
	pub report_failed: bool,
	/// Users that got a reduced speed cap in this cycle
	pub escalated: Vec<UserId>,
	/// Users in the merged online view, when a recorder is in use
	pub synced_users: Option<usize>,
}

type Fetched = (Option<NodeInfo>, Option<Vec<RosterUser>>, Option<RuleSet>);

#[derive(Debug)]
struct Inner {
	scope: Scope,
	registry: Arc<GovernanceRegistry>,
	control: Arc<dyn ControlPlane>,
	recorder: Option<Arc<dyn IpRecorder>>,
	reporter: Option<Arc<dyn TrafficReporter>>,
	config: CoordinatorConfig,
	state: Mutex<CoordinatorState>,
	/// Roster as last applied
	roster: Mutex<Vec<RosterUser>>,
	pull_flight: tokio::sync::Mutex<()>,
	push_flight: tokio::sync::Mutex<()>,
	pull_task: Arc<PeriodicTask>,
	push_task: Arc<PeriodicTask>,
}

#[derive(Debug, Clone)]
pub struct Coordinator {
	inner: Arc<Inner>,
}

/// Fluent builder for a [`Coordinator`]
#[derive(Debug)]
pub struct CoordinatorBuilder {
	scope: Scope,
	registry: Arc<GovernanceRegistry>,
	control: Arc<dyn ControlPlane>,
	recorder: Option<Arc<dyn IpRecorder>>,
	reporter: Option<Arc<dyn TrafficReporter>>,
	config: CoordinatorConfig,
}

impl CoordinatorBuilder {
	pub fn config(mut self, config: CoordinatorConfig) -> Self {
		self.config = config;
		self
	}

	pub fn recorder(mut self, recorder: Arc<dyn IpRecorder>) -> Self {
		self.recorder = Some(recorder);
		self
	}

	pub fn reporter(mut self, reporter: Arc<dyn TrafficReporter>) -> Self {
		self.reporter = Some(reporter);
		self
	}

	pub fn build(self) -> NgResult<Coordinator> {
		self.config.validate()?;
		let pull_task = PeriodicTask::new("roster-pull", self.config.pull_interval())?;
		let push_task = PeriodicTask::new("traffic-push", self.config.push_interval())?;

		Ok(Coordinator {
			inner: Arc::new(Inner {
				scope: self.scope,
				registry: self.registry,
				control: self.control,
				recorder: self.recorder,
				reporter: self.reporter,
				config: self.config,
				state: Mutex::new(CoordinatorState::Idle),
				roster: Mutex::new(Vec::new()),
				pull_flight: tokio::sync::Mutex::new(()),
				push_flight: tokio::sync::Mutex::new(()),
				pull_task,
				push_task,
			}),
		})
	}
}

impl Coordinator {
	pub fn builder(
		registry: Arc<GovernanceRegistry>,
		scope: Scope,
		control: Arc<dyn ControlPlane>,
	) -> CoordinatorBuilder {
		CoordinatorBuilder {
			scope,
			registry,
			control,
			recorder: None,
			reporter: None,
			config: CoordinatorConfig::default(),
		}
	}

	pub fn scope(&self) -> &Scope {
		&self.inner.scope
	}

	pub fn state(&self) -> CoordinatorState {
		*self.inner.state.lock()
	}

	pub fn pull_interval(&self) -> Duration {
		self.inner.pull_task.interval()
	}

	pub fn push_interval(&self) -> Duration {
		self.inner.push_task.interval()
	}

	/// Roster as last applied
	pub fn roster(&self) -> Vec<RosterUser> {
		self.inner.roster.lock().clone()
	}

	/// Start both periodic cycles; the first pull runs right away
	pub fn start(&self) -> NgResult<()> {
		let inner = Arc::clone(&self.inner);
		self.inner.pull_task.start(move || {
			let inner = Arc::clone(&inner);
			async move {
				if let Err(err) = inner.pull_once().await {
					warn!("scope {} pull cycle failed, keeping current state: {}", inner.scope, err);
				}
			}
		})?;

		let inner = Arc::clone(&self.inner);
		self.inner.push_task.start(move || {
			let inner = Arc::clone(&inner);
			async move {
				if let Err(err) = inner.push_once().await {
					warn!("scope {} push cycle failed: {}", inner.scope, err);
				}
			}
		})?;

		self.inner.pull_task.run_now();
		info!("coordinator for scope {} started", self.inner.scope);
		Ok(())
	}

	/// Stop both cycles and push the last traffic window
	pub async fn stop(&self) -> NgResult<PushSummary> {
		self.inner.pull_task.stop().await;
		self.inner.push_task.stop().await;
		info!("coordinator for scope {} stopped", self.inner.scope);
		self.inner.push_once().await
	}

	/// Run one pull cycle now
	pub async fn pull_once(&self) -> NgResult<()> {
		self.inner.pull_once().await
	}

	/// Run one push cycle now
	pub async fn push_once(&self) -> NgResult<PushSummary> {
		self.inner.push_once().await
	}
}

impl Inner {
	fn set_state(&self, state: CoordinatorState) {
		*self.state.lock() = state;
	}

	fn clamp_interval(&self, secs: u64) -> Option<Duration> {
		(secs > 0).then(|| Duration::from_secs(secs.max(self.config.min_interval_secs)))
	}

	async fn fetch(&self) -> NgResult<Fetched> {
		let node = self.control.fetch_node(&self.scope).await?;
		let roster = self.control.fetch_roster(&self.scope).await?;
		let rules = self.control.fetch_rules(&self.scope).await?;
		Ok((node, roster, rules))
	}

	async fn pull_once(&self) -> NgResult<()> {
		let _flight = self.pull_flight.lock().await;
		let state = self.registry.scope(&self.scope)?;

		self.set_state(CoordinatorState::Fetching);
		let fetched = self.fetch().await;
		let res = match fetched {
			Ok(fetched) => self.apply(&state, fetched),
			Err(err) => Err(err),
		};
		self.set_state(CoordinatorState::Idle);
		res
	}

	fn apply(&self, state: &ScopeState, (node, roster, rules): Fetched) -> NgResult<()> {
		self.set_state(CoordinatorState::Diffing);
		let diff = roster.as_ref().map(|roster| RosterDiff::compute(&self.roster.lock(), roster));

		self.set_state(CoordinatorState::Applying);
		if let Some(info) = node {
			state.set_node_limits(info.limits);
			state.set_dynamic_config(info.dynamic_limit);
			if let Some(interval) = self.clamp_interval(info.pull_interval_secs) {
				self.pull_task.set_interval(interval);
			}
			if let Some(interval) = self.clamp_interval(info.push_interval_secs) {
				self.push_task.set_interval(interval);
			}
		}

		if let (Some(diff), Some(roster)) = (diff, roster) {
			if !diff.is_empty() {
				state.apply_roster_delta(&diff)?;
				info!(
					"scope {} roster: {} added, {} removed",
					self.scope,
					diff.added.len(),
					diff.removed.len()
				);
			}
			*self.roster.lock() = roster;
		}

		if let Some(rules) = rules {
			state.replace_rules(&rules);
		}
		Ok(())
	}

	async fn push_once(&self) -> NgResult<PushSummary> {
		let _flight = self.push_flight.lock().await;
		let state = self.registry.scope(&self.scope)?;
		let mut summary = PushSummary::default();

		let drained = state.drain_traffic();
		if !drained.is_empty() {
			let delivered = match &self.reporter {
				Some(reporter) => {
					let traffic: Vec<UserTraffic> = drained.iter().map(|(_, t)| *t).collect();
					match reporter.report_traffic(&self.scope, traffic).await {
						Ok(()) => true,
						Err(err) => {
							warn!("scope {} traffic report failed, keeping counts: {}", self.scope, err);
							state.credit_traffic(&drained);
							false
						}
					}
				}
				None => true,
			};

			// Credited counts reach the escalator once they are delivered
			if delivered {
				summary.reported_users = drained.len();
				summary.escalated = state.escalate(&drained);
			} else {
				summary.report_failed = true;
			}
		}

		if !state.recorder_enabled() {
			state.reset_online();
			return Ok(summary);
		}
		let Some(recorder) = &self.recorder else {
			state.discard_online();
			return Ok(summary);
		};

		let local = to_user_ips(state.online_snapshot());
		match recorder.sync_online_ips(&self.scope, local).await {
			Ok(merged) => {
				summary.synced_users = Some(merged.len());
				state.merge_remote_ips(merged);
			}
			Err(err) => {
				warn!("scope {} online IP sync failed, clearing window: {}", self.scope, err);
				state.discard_online();
			}
		}
		Ok(summary)
	}
}

// vim: ts=4
