//! Diffing matched live state against the template into an ordered plan.
//!
//! The action vocabulary contains exactly one kind, `Toggle`. Submit,
//! confirm and finalize have no representation here, so no code path can
//! plan one.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::classify::{ClassTable, ControlRole};
use crate::matcher::{MatchOutcome, MatchReport};
use crate::platforms::NativeBackend;
use crate::report::EntryOutcome;
use crate::snapshot::{ControlHandle, Snapshot};
use crate::template::{normalize_label, Template};

/// The only input primitive the engine can plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Toggle,
}

/// One planned input event against a live control.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub target: ControlHandle,
    pub kind: ActionKind,
    /// Checked state read at plan-build time; the executor re-verifies it
    /// immediately before dispatching.
    pub expected_prior_state: bool,
    /// Index into the template's entry list.
    pub entry_index: usize,
}

/// Ordered sequence of actions: template group order first, then
/// top-to-bottom, left-to-right, to match visual scan order if interrupted.
#[derive(Debug, Clone, Default)]
pub struct ActionPlan {
    actions: Vec<PlannedAction>,
}

impl ActionPlan {
    pub fn actions(&self) -> &[PlannedAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

static DEFAULT_PROTECTED_CLASSES: Lazy<Vec<String>> = Lazy::new(|| {
    ["TButton", "TBitBtn", "TORButton", "Button"]
        .iter()
        .map(|s| s.to_ascii_lowercase())
        .collect()
});

static DEFAULT_PROTECTED_CAPTIONS: Lazy<Vec<String>> = Lazy::new(|| {
    ["finish", "submit", "sign", "ok", "apply"]
        .iter()
        .map(|s| s.to_string())
        .collect()
});

/// Controls the engine must never act on.
///
/// The built-in defaults (the foreign application's button classes and its
/// finish/submit captions) are always enforced; configuration can only add
/// patterns, never remove the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyPolicy {
    /// Extra class names to protect, compared case-insensitively.
    #[serde(default)]
    pub extra_classes: Vec<String>,
    /// Extra control captions to protect, compared normalized.
    #[serde(default)]
    pub extra_captions: Vec<String>,
}

impl SafetyPolicy {
    pub fn is_protected(&self, class_name: &str, text: &str) -> bool {
        let class = class_name.to_ascii_lowercase();
        let caption = normalize_label(text);

        DEFAULT_PROTECTED_CLASSES.iter().any(|c| *c == class)
            || self
                .extra_classes
                .iter()
                .any(|c| c.to_ascii_lowercase() == class)
            || DEFAULT_PROTECTED_CAPTIONS.iter().any(|c| *c == caption)
            || self
                .extra_captions
                .iter()
                .any(|c| normalize_label(c) == caption)
    }
}

/// Plan plus the entries whose fate was already decided at plan time.
#[derive(Debug)]
pub struct PlanBuild {
    pub plan: ActionPlan,
    /// `(entry_index, outcome)` for every entry that needs no executor
    /// involvement: unresolved, ambiguous, already-correct, protected, or
    /// unreadable at plan time.
    pub settled: Vec<(usize, EntryOutcome)>,
}

/// Diff matched entries against live checked state.
///
/// Live state is read through the backend here, at plan-build time, not
/// taken from the enumeration snapshot: it narrows the window in which a
/// user or the foreign application can change a box behind our back.
#[instrument(skip_all, fields(entries = matches.matches().len()))]
pub fn build_plan(
    template: &Template,
    matches: &MatchReport,
    snapshot: &Snapshot,
    table: &ClassTable,
    policy: &SafetyPolicy,
    backend: &dyn NativeBackend,
) -> PlanBuild {
    let mut actions = Vec::new();
    let mut settled = Vec::new();
    let ranks = group_ranks(template);

    for m in matches.matches() {
        let entry = &template.entries()[m.entry_index];
        let handle = match &m.outcome {
            MatchOutcome::Unresolved => {
                settled.push((m.entry_index, EntryOutcome::Unresolved));
                continue;
            }
            MatchOutcome::Ambiguous(_) => {
                settled.push((m.entry_index, EntryOutcome::Ambiguous));
                continue;
            }
            MatchOutcome::Resolved(handle) => *handle,
        };

        let Some(node) = snapshot.get(handle) else {
            // A resolved handle always comes from this snapshot; treat a
            // miss as the control having no usable identity anymore.
            warn!(
                label = %entry.label,
                handle = handle.raw(),
                "resolved control missing from snapshot"
            );
            settled.push((m.entry_index, EntryOutcome::ActionFailed));
            continue;
        };

        // Hard exclusion, independent of how confidently the control was
        // matched: anything button-shaped or on the protected list never
        // enters a plan.
        if table.classify(node).role == ControlRole::Button
            || policy.is_protected(&node.class_name, &node.text)
        {
            warn!(
                label = %entry.label,
                class = %node.class_name,
                "entry targets a protected control, excluding"
            );
            settled.push((m.entry_index, EntryOutcome::SafetyExcluded));
            continue;
        }

        match backend.read_check_state(handle) {
            Ok(live) if live == entry.desired_state => {
                settled.push((m.entry_index, EntryOutcome::NoActionNeeded));
            }
            Ok(live) => {
                actions.push((
                    ranks[m.entry_index],
                    node.bounds.y,
                    node.bounds.x,
                    PlannedAction {
                        target: handle,
                        kind: ActionKind::Toggle,
                        expected_prior_state: live,
                        entry_index: m.entry_index,
                    },
                ));
            }
            Err(e) => {
                warn!(label = %entry.label, error = %e, "cannot read live state at plan time");
                settled.push((m.entry_index, EntryOutcome::ActionFailed));
            }
        }
    }

    actions.sort_by_key(|(rank, y, x, action)| (*rank, *y, *x, action.target));
    let plan = ActionPlan {
        actions: actions.into_iter().map(|(_, _, _, a)| a).collect(),
    };

    debug!(
        planned = plan.len(),
        settled = settled.len(),
        "action plan built"
    );
    PlanBuild { plan, settled }
}

/// Per-entry position of its group in template-declared order: the index of
/// the first entry sharing its (normalized) group path. Computed in one pass
/// so each group path is normalized once per plan build.
fn group_ranks(template: &Template) -> Vec<usize> {
    let mut first_seen: HashMap<Vec<String>, usize> = HashMap::new();
    let mut ranks = Vec::with_capacity(template.len());
    for (idx, entry) in template.entries().iter().enumerate() {
        let key: Vec<String> = entry.group_path.iter().map(|s| normalize_label(s)).collect();
        ranks.push(*first_seen.entry(key).or_insert(idx));
    }
    ranks
}
