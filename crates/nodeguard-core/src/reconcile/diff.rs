//! Roster diffing
//!
//! Entries are compared in full, so a user whose caps changed shows up in
//! both lists: the old entry as removed and the new one as added.

use std::collections::HashSet;

use nodeguard_types::roster::RosterUser;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterDiff {
	pub added: Vec<RosterUser>,
	pub removed: Vec<RosterUser>,
}

impl RosterDiff {
	pub fn compute(old: &[RosterUser], new: &[RosterUser]) -> Self {
		let old_set: HashSet<&RosterUser> = old.iter().collect();
		let new_set: HashSet<&RosterUser> = new.iter().collect();

		let mut seen = HashSet::new();
		let added = new
			.iter()
			.filter(|user| !old_set.contains(user) && seen.insert(*user))
			.cloned()
			.collect();
		seen.clear();
		let removed = old
			.iter()
			.filter(|user| !new_set.contains(user) && seen.insert(*user))
			.cloned()
			.collect();

		Self { added, removed }
	}

	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.removed.is_empty()
	}
}


// vim: ts=4
