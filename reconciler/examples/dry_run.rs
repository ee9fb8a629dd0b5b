//! Runs a reconciliation cycle against the simulated dialog backend and
//! prints the outcome report. Useful for eyeballing engine behavior on any
//! platform:
//!
//! ```text
//! RUST_LOG=reconciler=debug cargo run --example dry_run
//! ```

use std::sync::Arc;

use reconciler::platforms::sim::SimulatedBackend;
use reconciler::platforms::FixedRoot;
use reconciler::{Bounds, CancelToken, EngineConfig, Session, Template};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let sim = Arc::new(SimulatedBackend::new("Reminder Resolution"));
    let root = sim.root();
    let assessments = sim.add_group(root, "Assessments", Bounds::new(10, 10, 580, 200));
    sim.add_checkbox(assessments, "Fall Risk", Bounds::new(20, 30, 140, 17), false);
    sim.add_checkbox(assessments, "Pain", Bounds::new(20, 55, 140, 17), true);
    sim.add_checkbox(assessments, "Smoking Cessation", Bounds::new(20, 80, 140, 17), false);
    sim.add_button(root, "Finish", Bounds::new(480, 420, 90, 25));

    let template = Template::from_json(
        r#"{
            "version": 1,
            "entries": [
                {"label": "Fall Risk", "groupPath": ["Assessments"], "desiredState": true},
                {"label": "Pain", "groupPath": ["Assessments"], "desiredState": true},
                {"label": "Smoking Cessation", "groupPath": ["Assessments"], "desiredState": false},
                {"label": "Finish", "groupPath": [], "desiredState": true}
            ]
        }"#,
    )?;

    let session = Session::with_backend(sim, template, EngineConfig::default());
    let report = session.run_cycle(&FixedRoot(root), &CancelToken::new())?;
    print!("{report}");

    Ok(())
}
