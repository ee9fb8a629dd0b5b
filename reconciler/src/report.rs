//! Per-cycle outcome reporting.
//!
//! The report is the engine's sole externally observed result: callers
//! render it, they never reinterpret it, and no automation result is ever
//! inferred from the absence of an error.

use std::fmt;

use serde::Serialize;

/// Final disposition of one template entry for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryOutcome {
    /// Live state already matched the template.
    NoActionNeeded,
    /// A toggle was dispatched and verified.
    Applied,
    /// The entry targeted a protected control and was dropped before any
    /// action could be planned. Surface prominently: it usually means a
    /// template author aimed at a submit/finalize control by mistake.
    SafetyExcluded,
    /// Live state no longer matched the plan's precondition at dispatch
    /// time; the action was skipped.
    StalePrecondition,
    /// The toggle never verified within the retry budget, or the entry was
    /// left unattempted because the dialog went away or the cycle was
    /// cancelled.
    ActionFailed,
    /// No live control matched the entry.
    Unresolved,
    /// More than one live control matched and the tie could not be broken.
    Ambiguous,
}

/// One line of the cycle report.
#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub label: String,
    pub group_path: Vec<String>,
    pub outcome: EntryOutcome,
}

/// Ordered per-entry outcomes for one reconciliation cycle, in template
/// author order.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub cycle: u64,
    pub entries: Vec<EntryReport>,
}

impl OutcomeReport {
    /// Count of entries with the given outcome.
    pub fn count(&self, outcome: EntryOutcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    /// True when every entry either needed no action or applied cleanly.
    pub fn fully_reconciled(&self) -> bool {
        self.entries.iter().all(|e| {
            matches!(
                e.outcome,
                EntryOutcome::NoActionNeeded | EntryOutcome::Applied
            )
        })
    }

    /// Entries that targeted protected controls.
    pub fn safety_excluded(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries
            .iter()
            .filter(|e| e.outcome == EntryOutcome::SafetyExcluded)
    }
}

impl fmt::Display for OutcomeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cycle {} ({} entries)", self.cycle, self.entries.len())?;
        for entry in &self.entries {
            writeln!(
                f,
                "  [{:?}] {} / {}",
                entry.outcome,
                entry.group_path.join(" > "),
                entry.label
            )?;
        }
        Ok(())
    }
}
