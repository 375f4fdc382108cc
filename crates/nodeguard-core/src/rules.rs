//! Domain and protocol rule matching.
//!
//! The compiled rule set is an immutable snapshot behind an `Arc`; a swap
//! replaces the pointer under a short write lock, and readers evaluate their
//! own clone of the pointer without holding the lock.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use nodeguard_types::roster::RuleSet;

use crate::prelude::*;

/// Compiled, immutable rule lists of one scope
#[derive(Debug, Default)]
pub struct CompiledRules {
	domains: Vec<Regex>,
	protocols: HashSet<Box<str>>,
}

impl CompiledRules {
	/// Compile a rule set, skipping patterns that are not valid regexes
	pub fn compile(rules: &RuleSet) -> Self {
		let domains = rules
			.domain_patterns
			.iter()
			.filter_map(|pattern| match Regex::new(pattern) {
				Ok(re) => Some(re),
				Err(err) => {
					warn!("skipping invalid domain rule {:?}: {}", pattern, err);
					None
				}
			})
			.collect();
		let protocols = rules.protocols.iter().map(|p| p.as_str().into()).collect();
		Self { domains, protocols }
	}

	/// Index of the first domain rule matching `destination`
	pub fn first_domain_match(&self, destination: &str) -> Option<usize> {
		self.domains.iter().position(|re| re.is_match(destination))
	}

	pub fn match_domain(&self, destination: &str) -> bool {
		self.first_domain_match(destination).is_some()
	}

	pub fn match_protocol(&self, protocol: &str) -> bool {
		self.protocols.contains(protocol)
	}

	pub fn domain_count(&self) -> usize {
		self.domains.len()
	}

	pub fn protocol_count(&self) -> usize {
		self.protocols.len()
	}
}

#[derive(Debug, Default)]
pub struct RuleMatcher {
	current: RwLock<Arc<CompiledRules>>,
}

impl RuleMatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Current snapshot
	pub fn snapshot(&self) -> Arc<CompiledRules> {
		Arc::clone(&self.current.read())
	}

	/// Replace both lists at once
	pub fn replace(&self, rules: &RuleSet) {
		let compiled = Arc::new(CompiledRules::compile(rules));
		info!(
			"installing {} domain rules and {} protocol rules",
			compiled.domain_count(),
			compiled.protocol_count()
		);
		*self.current.write() = compiled;
	}

	pub fn match_domain(&self, destination: &str) -> bool {
		self.snapshot().match_domain(destination)
	}

	pub fn match_protocol(&self, protocol: &str) -> bool {
		self.snapshot().match_protocol(protocol)
	}

	pub fn clear(&self) {
		*self.current.write() = Arc::new(CompiledRules::default());
	}
}


// vim: ts=4
