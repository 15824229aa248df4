//! Roster reconciliation.
//!
//! Computes what has to change to turn the set of bound companions into the
//! desired roster. Applying the plan is the orchestrator's job.

use crate::descriptor::CharacterDescriptor;
use std::collections::HashSet;
use tracing::warn;

/// Actions needed to align the registry with a roster.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Bound names absent from the roster
    pub dismiss: Vec<String>,
    /// Roster entries to ensure, in roster order
    pub ensure: Vec<CharacterDescriptor>,
    /// Roster entries dropped as invalid or duplicate
    pub skipped: usize,
}

/// Diff `current` bound names against the `desired` roster.
///
/// Invalid descriptors are skipped. When a name occurs twice only the first
/// entry is kept. An empty roster dismisses every bound name.
pub fn plan(current: &[String], desired: &[CharacterDescriptor]) -> ReconcilePlan {
    let mut seen = HashSet::new();
    let mut ensure = Vec::with_capacity(desired.len());
    let mut skipped = 0;

    for descriptor in desired {
        if let Err(e) = descriptor.validate() {
            warn!(error = %e, "Skipping invalid roster entry");
            skipped += 1;
            continue;
        }
        if !seen.insert(descriptor.name.as_str()) {
            warn!(companion = %descriptor.name, "Skipping duplicate roster entry");
            skipped += 1;
            continue;
        }
        ensure.push(descriptor.clone());
    }

    let dismiss = current
        .iter()
        .filter(|name| !seen.contains(name.as_str()))
        .cloned()
        .collect();

    ReconcilePlan {
        dismiss,
        ensure,
        skipped,
    }
}

/// Outcome of one reconciliation pass, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub dismissed: Vec<String>,
    pub reused: Vec<String>,
    pub created: Vec<String>,
    /// `(name, reason)` for entries whose ensure failed
    pub failed: Vec<(String, String)>,
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.dismissed.is_empty()
            && self.reused.is_empty()
            && self.created.is_empty()
            && self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn roster(list: &[&str]) -> Vec<CharacterDescriptor> {
        list.iter()
            .map(|n| CharacterDescriptor::new(*n, n.to_uppercase()))
            .collect()
    }

    fn ensured(plan: &ReconcilePlan) -> Vec<&str> {
        plan.ensure.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_diff_dismisses_missing_and_ensures_desired() {
        let plan = plan(&names(&["a", "b"]), &roster(&["b", "c"]));

        assert_eq!(plan.dismiss, names(&["a"]));
        assert_eq!(ensured(&plan), vec!["b", "c"]);
        assert_eq!(plan.skipped, 0);
    }

    #[test]
    fn test_empty_roster_dismisses_everything() {
        let mut plan = plan(&names(&["a", "b"]), &[]);
        plan.dismiss.sort();

        assert_eq!(plan.dismiss, names(&["a", "b"]));
        assert!(plan.ensure.is_empty());
    }

    #[test]
    fn test_empty_registry_ensures_whole_roster() {
        let plan = plan(&[], &roster(&["c", "a", "b"]));

        assert!(plan.dismiss.is_empty());
        assert_eq!(ensured(&plan), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_invalid_and_duplicate_entries_are_skipped() {
        let mut desired = roster(&["a", "", "a", "b"]);
        desired[2].short_name = "Second A".to_string();

        let plan = plan(&names(&["a"]), &desired);

        assert_eq!(ensured(&plan), vec!["a", "b"]);
        assert_eq!(plan.ensure[0].short_name, "A");
        assert_eq!(plan.skipped, 2);
        assert!(plan.dismiss.is_empty());
    }

    #[test]
    fn test_report_noop() {
        let mut report = ReconcileReport::default();
        assert!(report.is_noop());

        report.skipped = 3;
        assert!(report.is_noop());

        report.reused.push("a".to_string());
        assert!(!report.is_noop());
    }
}
