//! End-to-end governance scenarios
//!
//! Each test drives a scope through the registry and a coordinator backed by
//! in-memory collaborators.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use nodeguard_core::{Coordinator, CoordinatorState, ScopeConfig};
use nodeguard_types::node::{DynamicLimitConfig, NodeInfo, NodeLimits};
use nodeguard_types::prelude::*;
use nodeguard_types::roster::RuleSet;

const GB: u64 = 1_000_000_000;

#[tokio::test]
async fn test_static_cap_bucket() {
	init_tracing();
	let (registry, _clock) = registry_at(0);
	let scope = Scope::new("vless-1");
	registry.activate_scope(scope.clone(), ScopeConfig::default()).unwrap();

	let control = MockControlPlane::new();
	control.set_roster(vec![user(1, 1_000_000, 0)]);
	let coordinator = Coordinator::builder(registry.clone(), scope.clone(), control).build().unwrap();
	coordinator.pull_once().await.unwrap();

	let key = UserKey::new(scope, UserId(1));
	let (bucket, limited) = registry.get_bucket(&key).unwrap();
	let bucket = bucket.unwrap();
	assert!(limited);
	assert_eq!(bucket.capacity(), 1_000_000);
	assert_eq!(bucket.fill_rate(), 1_000_000);
}

#[tokio::test]
async fn test_device_limit_two() {
	init_tracing();
	let (registry, _clock) = registry_at(0);
	let scope = Scope::new("trojan-1");
	registry.activate_scope(scope.clone(), ScopeConfig::default()).unwrap();

	let control = MockControlPlane::new();
	control.set_roster(vec![user(7, 0, 2)]);
	let coordinator = Coordinator::builder(registry.clone(), scope.clone(), control).build().unwrap();
	coordinator.pull_once().await.unwrap();

	let key = UserKey::new(scope, UserId(7));
	assert!(!registry.admit(&key, ip(1)).unwrap().is_rejected());
	assert!(!registry.admit(&key, ip(2)).unwrap().is_rejected());
	assert!(registry.admit(&key, ip(3)).unwrap().is_rejected());

	// Another connection from a known device is fine
	assert!(!registry.admit(&key, ip(2)).unwrap().is_rejected());

	registry.release(&key, ip(1)).unwrap();
	assert!(!registry.admit(&key, ip(3)).unwrap().is_rejected());
}

#[tokio::test]
async fn test_dynamic_escalation_and_expiry() {
	init_tracing();
	let (registry, clock) = registry_at(1_700_000_000);
	let scope = Scope::new("ss-1");
	let config = ScopeConfig {
		dynamic_limit: Some(DynamicLimitConfig {
			threshold_bytes: GB,
			reduced_speed: 100_000,
			duration_secs: 600,
		}),
		..Default::default()
	};
	registry.activate_scope(scope.clone(), config).unwrap();

	let control = MockControlPlane::new();
	control.set_roster(vec![user(3, 1_000_000, 0)]);
	let reporter = MockReporter::new();
	let coordinator = Coordinator::builder(registry.clone(), scope.clone(), control)
		.reporter(reporter.clone())
		.build()
		.unwrap();
	coordinator.pull_once().await.unwrap();

	let key = UserKey::new(scope.clone(), UserId(3));
	registry.admit(&key, ip(1)).unwrap();
	let (bucket, limited) = registry.get_bucket(&key).unwrap();
	assert!(limited);
	assert_eq!(bucket.unwrap().capacity(), 1_000_000);
	registry.report_traffic(&key, GB / 10, GB).unwrap();

	let summary = coordinator.push_once().await.unwrap();
	assert_eq!(summary.escalated, vec![UserId(3)]);
	assert_eq!(reporter.total(UserId(3)), (GB / 10, GB));

	// Same session, reduced cap
	let (bucket, limited) = registry.get_bucket(&key).unwrap();
	assert!(limited);
	assert_eq!(bucket.unwrap().capacity(), 100_000);

	clock.advance(599);
	assert_eq!(registry.effective_cap(&key).unwrap(), 100_000);
	let (bucket, _) = registry.get_bucket(&key).unwrap();
	assert_eq!(bucket.unwrap().capacity(), 100_000);

	// Still the same session, static cap again
	clock.advance(1);
	let (bucket, limited) = registry.get_bucket(&key).unwrap();
	assert!(limited);
	assert_eq!(bucket.unwrap().capacity(), 1_000_000);
	assert_eq!(registry.effective_cap(&key).unwrap(), 1_000_000);
	assert_eq!(registry.stats(&scope).unwrap().buckets, 1);
}

#[tokio::test]
async fn test_bucket_created_during_escalation_reverts() {
	init_tracing();
	let (registry, clock) = registry_at(1_700_000_000);
	let scope = Scope::new("ss-2");
	let config = ScopeConfig {
		dynamic_limit: Some(DynamicLimitConfig {
			threshold_bytes: GB,
			reduced_speed: 100_000,
			duration_secs: 600,
		}),
		..Default::default()
	};
	registry.activate_scope(scope.clone(), config).unwrap();
	let coordinator =
		Coordinator::builder(registry.clone(), scope.clone(), MockControlPlane::new())
			.reporter(MockReporter::new())
			.build()
			.unwrap();

	// Unknown user, no static cap: only the dynamic cap limits it
	let key = UserKey::new(scope.clone(), UserId(4));
	registry.admit(&key, ip(1)).unwrap();
	registry.report_traffic(&key, 0, 2 * GB).unwrap();
	coordinator.push_once().await.unwrap();

	let (bucket, limited) = registry.get_bucket(&key).unwrap();
	assert!(limited);
	assert_eq!(bucket.unwrap().capacity(), 100_000);

	clock.advance(601);
	let (bucket, limited) = registry.get_bucket(&key).unwrap();
	assert!(bucket.is_none());
	assert!(!limited);
	assert_eq!(registry.stats(&scope).unwrap().buckets, 0);
}

#[tokio::test]
async fn test_failed_fetches_leave_state_unchanged() {
	init_tracing();
	let (registry, _clock) = registry_at(0);
	let scope = Scope::new("hy2-1");
	registry.activate_scope(scope.clone(), ScopeConfig::default()).unwrap();

	let control = MockControlPlane::new();
	control.set_roster(vec![user(1, 500, 1), user(2, 0, 0)]);
	control.set_rules(RuleSet {
		domain_patterns: vec![r"(^|\.)blocked\.example$".into()],
		protocols: vec!["bittorrent".into()],
	});
	let coordinator =
		Coordinator::builder(registry.clone(), scope.clone(), control.clone()).build().unwrap();
	coordinator.pull_once().await.unwrap();

	let key = UserKey::new(scope.clone(), UserId(1));
	registry.admit(&key, ip(1)).unwrap();
	let before = registry.stats(&scope).unwrap();
	let roster_before = coordinator.roster();

	// Upstream now has a different roster, but every fetch fails
	control.set_roster(vec![user(3, 0, 0)]);
	control.set_failing(true);
	for _ in 0..3 {
		assert!(matches!(coordinator.pull_once().await, Err(Error::Fetch(_))));
		assert_eq!(coordinator.state(), CoordinatorState::Idle);
	}

	assert_eq!(registry.stats(&scope).unwrap(), before);
	assert_eq!(coordinator.roster(), roster_before);
	assert!(registry.match_domain(&scope, "cdn.blocked.example").unwrap());
	assert!(registry.match_protocol(&scope, "bittorrent").unwrap());
	assert!(registry.admit(&key, ip(2)).unwrap().is_rejected());
	assert_eq!(control.fetches.load(Ordering::SeqCst), 3 + 3);

	// Recovery applies the new roster
	control.set_failing(false);
	coordinator.pull_once().await.unwrap();
	assert_eq!(registry.stats(&scope).unwrap().users, 1);
}

#[tokio::test]
async fn test_node_limits_from_control_plane() {
	init_tracing();
	let (registry, _clock) = registry_at(0);
	let scope = Scope::new("vmess-1");
	registry.activate_scope(scope.clone(), ScopeConfig::default()).unwrap();

	let control = MockControlPlane::new();
	control.set_node(NodeInfo {
		limits: NodeLimits { speed_limit: 2_000, device_limit: 1, conn_limit: 2 },
		pull_interval_secs: 30,
		push_interval_secs: 120,
		dynamic_limit: None,
	});
	control.set_roster(vec![user(1, 5_000, 0)]);
	let coordinator = Coordinator::builder(registry.clone(), scope.clone(), control).build().unwrap();
	coordinator.pull_once().await.unwrap();

	assert_eq!(coordinator.pull_interval(), Duration::from_secs(30));
	assert_eq!(coordinator.push_interval(), Duration::from_secs(120));

	let key = UserKey::new(scope.clone(), UserId(1));
	assert_eq!(registry.effective_cap(&key).unwrap(), 2_000);
	assert!(!registry.admit(&key, ip(1)).unwrap().is_rejected());
	assert!(registry.admit(&key, ip(2)).unwrap().is_rejected());
	assert!(!registry.admit(&key, ip(1)).unwrap().is_rejected());
	assert!(registry.admit(&key, ip(1)).unwrap().is_rejected());

	let state = registry.scope(&scope).unwrap();
	assert_eq!(state.node_limits().conn_limit, 2);
}

// vim: ts=4
