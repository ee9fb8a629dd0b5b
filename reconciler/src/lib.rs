//! Checkbox state reconciliation for foreign Windows dialogs.
//!
//! This crate drives a third-party clinical records application by
//! enumerating its native dialog controls, matching them against a
//! user-authored template, and toggling checkboxes until live state matches
//! the template. It never clicks submit or finalize controls: that rule is
//! built into the action vocabulary, not bolted on as a runtime check.
//!
//! One reconciliation cycle is: resolve the root window, snapshot its
//! control tree, classify, match, diff, execute. The per-entry outcome
//! report is the sole result of a cycle.
//!
//! ```no_run
//! use reconciler::{CancelToken, EngineConfig, Session, Template};
//! use reconciler::platforms::FixedRoot;
//! # fn main() -> Result<(), reconciler::AutomationError> {
//! let template = Template::from_file("admission.json")?;
//! let session = Session::new(template, EngineConfig::default())?;
//! # let root = reconciler::ControlHandle::from_raw(0);
//! let report = session.run_cycle(&FixedRoot(root), &CancelToken::new())?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tracing::{info, instrument};

pub mod classify;
pub mod errors;
pub mod executor;
pub mod matcher;
pub mod plan;
pub mod platforms;
pub mod report;
pub mod snapshot;
pub mod template;

pub use classify::{ClassRule, ClassTable, Classification, Confidence, ControlRole, PatternKind};
pub use errors::AutomationError;
pub use executor::{CancelToken, ExecutorConfig, SafeExecutor};
pub use matcher::{match_template, EntryMatch, MatchOutcome, MatchReport};
pub use plan::{build_plan, ActionKind, ActionPlan, PlanBuild, PlannedAction, SafetyPolicy};
pub use platforms::{create_backend, FixedRoot, NativeBackend, RootLocator};
pub use report::{EntryOutcome, EntryReport, OutcomeReport};
pub use snapshot::{Bounds, ControlHandle, ControlNode, Snapshot};
pub use template::{Template, TemplateEntry};

/// Everything configurable about a session: classification rules, safety
/// patterns, matching strictness and executor timing.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub class_table: ClassTable,
    pub safety: SafetyPolicy,
    pub executor: ExecutorConfig,
    /// Let geometry-classified (heuristic) checkboxes participate in
    /// matching. Off by default.
    pub allow_heuristic_matches: bool,
}

/// The main entry point: one foreign-process target, one immutable
/// template, sequential reconciliation cycles.
pub struct Session {
    backend: Arc<dyn NativeBackend>,
    template: Template,
    config: EngineConfig,
}

impl Session {
    /// Create a session against the current platform's native backend.
    pub fn new(template: Template, config: EngineConfig) -> Result<Self, AutomationError> {
        let backend = platforms::create_backend()?;
        Ok(Self::with_backend(backend, template, config))
    }

    /// Create a session over an explicit backend. This is how tests and
    /// non-Windows hosts attach the simulator.
    pub fn with_backend(
        backend: Arc<dyn NativeBackend>,
        template: Template,
        config: EngineConfig,
    ) -> Self {
        Self {
            backend,
            template,
            config,
        }
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one full reconciliation cycle and return its outcome report.
    ///
    /// The root is re-resolved through `locator` on every call. The only
    /// fatal outcomes are a failed root resolution and a failed enumeration,
    /// both of which abort before any input is dispatched; everything else
    /// lands in the report, one outcome per template entry, in author order.
    #[instrument(skip_all)]
    pub fn run_cycle(
        &self,
        locator: &dyn RootLocator,
        cancel: &CancelToken,
    ) -> Result<OutcomeReport, AutomationError> {
        let root = locator.resolve()?;
        let snapshot = Snapshot::capture(self.backend.as_ref(), root)?;

        let matches = match_template(
            &self.template,
            &snapshot,
            &self.config.class_table,
            self.config.allow_heuristic_matches,
        );
        let build = build_plan(
            &self.template,
            &matches,
            &snapshot,
            &self.config.class_table,
            &self.config.safety,
            self.backend.as_ref(),
        );
        let executed = SafeExecutor::new(self.backend.as_ref(), &self.config.executor)
            .execute(&build.plan, cancel);

        let mut outcomes: Vec<Option<EntryOutcome>> = vec![None; self.template.len()];
        for (entry_index, outcome) in build.settled.into_iter().chain(executed) {
            outcomes[entry_index] = Some(outcome);
        }

        let entries = self
            .template
            .entries()
            .iter()
            .zip(outcomes)
            .map(|(entry, outcome)| {
                let outcome = outcome.ok_or_else(|| {
                    AutomationError::Internal(format!(
                        "entry {:?} fell through planning and execution",
                        entry.label
                    ))
                })?;
                Ok(EntryReport {
                    label: entry.label.clone(),
                    group_path: entry.group_path.clone(),
                    outcome,
                })
            })
            .collect::<Result<Vec<_>, AutomationError>>()?;

        let report = OutcomeReport {
            cycle: snapshot.cycle(),
            entries,
        };
        info!(
            cycle = report.cycle,
            applied = report.count(EntryOutcome::Applied),
            safety_excluded = report.count(EntryOutcome::SafetyExcluded),
            "reconciliation cycle finished"
        );
        Ok(report)
    }
}
