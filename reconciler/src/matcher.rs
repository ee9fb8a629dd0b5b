//! Resolution of template entries against a live snapshot.
//!
//! Matching is structural only: class-derived roles, container ancestry and
//! normalized label text. There are no stable IDs in the foreign tree, so
//! every outcome is an explicit tagged variant; an entry the matcher cannot
//! pin down is reported Ambiguous or Unresolved, never guessed.

use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::classify::{ClassTable, Confidence, ControlRole};
use crate::snapshot::{ControlHandle, ControlNode, Snapshot};
use crate::template::{normalize_label, Template};

/// Resolution result for one template entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Resolved(ControlHandle),
    /// More than one candidate survived label and ordinal filtering.
    /// Candidates are listed in visual order (top-to-bottom, left-to-right).
    Ambiguous(Vec<ControlHandle>),
    Unresolved,
}

/// One template entry paired with its resolution.
#[derive(Debug, Clone)]
pub struct EntryMatch {
    /// Index into the template's entry list.
    pub entry_index: usize,
    pub outcome: MatchOutcome,
}

/// All entry resolutions, in template author order.
#[derive(Debug, Clone)]
pub struct MatchReport {
    matches: Vec<EntryMatch>,
}

impl MatchReport {
    pub fn matches(&self) -> &[EntryMatch] {
        &self.matches
    }
}

struct Candidate {
    handle: ControlHandle,
    label: String,
    x: i32,
    y: i32,
}

/// Resolve every template entry against `snapshot`.
///
/// Deterministic for a given snapshot and template: candidate ordering is
/// (y, x, handle), and no map iteration order leaks into the result.
#[instrument(skip_all, fields(entries = template.len(), controls = snapshot.len()))]
pub fn match_template(
    template: &Template,
    snapshot: &Snapshot,
    table: &ClassTable,
    allow_heuristic: bool,
) -> MatchReport {
    let groups = partition_checkboxes(snapshot, table, allow_heuristic);

    let mut matches = Vec::with_capacity(template.len());
    for (entry_index, entry) in template.entries().iter().enumerate() {
        let key: Vec<String> = entry.group_path.iter().map(|s| normalize_label(s)).collect();
        let wanted = normalize_label(&entry.label);

        let outcome = match groups.get(&key) {
            None => MatchOutcome::Unresolved,
            Some(group) => resolve_in_group(group, &wanted, entry.ordinal_hint),
        };

        if !matches!(outcome, MatchOutcome::Resolved(_)) {
            debug!(
                label = %entry.label,
                group = ?entry.group_path,
                outcome = ?outcome,
                "entry did not resolve to a single control"
            );
        }
        matches.push(EntryMatch {
            entry_index,
            outcome,
        });
    }

    MatchReport { matches }
}

/// Collect checkbox candidates and bucket them by their derived group path.
/// Each bucket is sorted into visual scan order.
fn partition_checkboxes(
    snapshot: &Snapshot,
    table: &ClassTable,
    allow_heuristic: bool,
) -> HashMap<Vec<String>, Vec<Candidate>> {
    let mut groups: HashMap<Vec<String>, Vec<Candidate>> = HashMap::new();

    for node in snapshot.nodes() {
        let classification = table.classify(node);
        if classification.role != ControlRole::Checkbox {
            continue;
        }
        if classification.confidence == Confidence::Heuristic && !allow_heuristic {
            debug!(
                handle = node.handle.raw(),
                class = %node.class_name,
                "skipping heuristic checkbox (opt-in not set)"
            );
            continue;
        }

        let key = group_path_of(snapshot, table, node);
        let label = label_of(snapshot, table, node);
        groups.entry(key).or_default().push(Candidate {
            handle: node.handle,
            label,
            x: node.bounds.x,
            y: node.bounds.y,
        });
    }

    for group in groups.values_mut() {
        group.sort_by_key(|c| (c.y, c.x, c.handle));
    }
    groups
}

/// Derive a checkbox's group path by walking its container ancestry.
///
/// Ancestors come back innermost-first; the path reads outermost-first, the
/// way a template author writes it. Containers without a caption (scroll
/// boxes usually) contribute no segment. A checkbox with no captioned
/// container ancestor ends up with an empty path; proximity-based grouping
/// is deliberately not attempted.
fn group_path_of(snapshot: &Snapshot, table: &ClassTable, node: &ControlNode) -> Vec<String> {
    let mut segments: Vec<String> = snapshot
        .ancestors(node.handle)
        .iter()
        .filter(|a| {
            matches!(
                table.classify(a).role,
                ControlRole::GroupContainer | ControlRole::ScrollContainer
            )
        })
        .map(|a| normalize_label(&a.text))
        .filter(|s| !s.is_empty())
        .collect();
    segments.reverse();
    segments
}

/// A checkbox's label is its own window text; VCL dialogs occasionally pair
/// a bare checkbox with a separate label control, so an empty caption
/// borrows from the nearest static text to its right under the same parent.
fn label_of(snapshot: &Snapshot, table: &ClassTable, node: &ControlNode) -> String {
    let own = normalize_label(&node.text);
    if !own.is_empty() {
        return own;
    }

    let right_edge = node.bounds.x + node.bounds.width;
    let mut best: Option<(i32, &ControlNode)> = None;
    for sibling in snapshot.nodes() {
        if sibling.parent != node.parent || sibling.handle == node.handle {
            continue;
        }
        if table.classify(sibling).role != ControlRole::StaticText {
            continue;
        }
        if sibling.bounds.x < right_edge || !vertically_overlaps(node, sibling) {
            continue;
        }
        let gap = sibling.bounds.x - right_edge;
        if best.map_or(true, |(best_gap, _)| gap < best_gap) {
            best = Some((gap, sibling));
        }
    }

    best.map(|(_, label)| normalize_label(&label.text))
        .unwrap_or_default()
}

fn vertically_overlaps(a: &ControlNode, b: &ControlNode) -> bool {
    let a_top = a.bounds.y;
    let a_bottom = a.bounds.y + a.bounds.height;
    let b_top = b.bounds.y;
    let b_bottom = b.bounds.y + b.bounds.height;
    a_top < b_bottom && b_top < a_bottom
}

/// Match by label within one group bucket, breaking ties with the entry's
/// ordinal hint (1-based position within the group, visual order).
fn resolve_in_group(
    group: &[Candidate],
    wanted_label: &str,
    ordinal_hint: Option<u32>,
) -> MatchOutcome {
    let hits: Vec<(usize, &Candidate)> = group
        .iter()
        .enumerate()
        .filter(|(_, c)| c.label == wanted_label)
        .collect();

    match hits.len() {
        0 => MatchOutcome::Unresolved,
        1 => MatchOutcome::Resolved(hits[0].1.handle),
        _ => {
            if let Some(hint) = ordinal_hint {
                for (pos, candidate) in &hits {
                    if (*pos as u32) + 1 == hint {
                        return MatchOutcome::Resolved(candidate.handle);
                    }
                }
            }
            MatchOutcome::Ambiguous(hits.iter().map(|(_, c)| c.handle).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Bounds;
    use crate::template::Template;

    fn node(
        handle: isize,
        parent: Option<isize>,
        class: &str,
        text: &str,
        bounds: Bounds,
    ) -> ControlNode {
        ControlNode {
            handle: ControlHandle::from_raw(handle),
            class_name: class.to_string(),
            bounds,
            parent: parent.map(ControlHandle::from_raw),
            visible: true,
            enabled: true,
            text: text.to_string(),
        }
    }

    fn assessments_snapshot() -> Snapshot {
        Snapshot::from_nodes(vec![
            node(1, None, "TfrmRemDlg", "Reminder Dialog", Bounds::new(0, 0, 600, 400)),
            node(2, Some(1), "TGroupBox", "Assessments", Bounds::new(10, 10, 580, 200)),
            node(3, Some(2), "TORCheckBox", "Fall Risk", Bounds::new(20, 30, 120, 17)),
            node(4, Some(2), "TORCheckBox", "Pain", Bounds::new(20, 55, 120, 17)),
        ])
    }

    fn template(json: &str) -> Template {
        Template::from_json(json).unwrap()
    }

    #[test]
    fn resolves_by_label_within_group() {
        let t = template(
            r#"{"version":1,"entries":[{"label":"Fall Risk","groupPath":["Assessments"],"desiredState":true}]}"#,
        );
        let report = match_template(&t, &assessments_snapshot(), &ClassTable::default(), false);
        assert_eq!(
            report.matches()[0].outcome,
            MatchOutcome::Resolved(ControlHandle::from_raw(3))
        );
    }

    #[test]
    fn wrong_group_is_unresolved() {
        let t = template(
            r#"{"version":1,"entries":[{"label":"Fall Risk","groupPath":["Vitals"],"desiredState":true}]}"#,
        );
        let report = match_template(&t, &assessments_snapshot(), &ClassTable::default(), false);
        assert_eq!(report.matches()[0].outcome, MatchOutcome::Unresolved);
    }

    #[test]
    fn missing_label_is_unresolved() {
        let t = template(
            r#"{"version":1,"entries":[{"label":"Smoking","groupPath":["Assessments"],"desiredState":true}]}"#,
        );
        let report = match_template(&t, &assessments_snapshot(), &ClassTable::default(), false);
        assert_eq!(report.matches()[0].outcome, MatchOutcome::Unresolved);
    }

    #[test]
    fn duplicate_labels_without_hint_are_ambiguous() {
        let snapshot = Snapshot::from_nodes(vec![
            node(1, None, "TfrmRemDlg", "", Bounds::new(0, 0, 600, 400)),
            node(2, Some(1), "TGroupBox", "Assessments", Bounds::new(10, 10, 580, 300)),
            node(3, Some(2), "TORCheckBox", "Pain", Bounds::new(20, 30, 120, 17)),
            node(4, Some(2), "TORCheckBox", "Pain", Bounds::new(20, 55, 120, 17)),
        ]);
        let t = template(
            r#"{"version":1,"entries":[{"label":"Pain","groupPath":["Assessments"],"desiredState":true}]}"#,
        );
        let report = match_template(&t, &snapshot, &ClassTable::default(), false);
        assert_eq!(
            report.matches()[0].outcome,
            MatchOutcome::Ambiguous(vec![
                ControlHandle::from_raw(3),
                ControlHandle::from_raw(4)
            ])
        );
    }

    #[test]
    fn ordinal_hint_breaks_ties_by_group_position() {
        let snapshot = Snapshot::from_nodes(vec![
            node(1, None, "TfrmRemDlg", "", Bounds::new(0, 0, 600, 400)),
            node(2, Some(1), "TGroupBox", "Assessments", Bounds::new(10, 10, 580, 300)),
            node(3, Some(2), "TORCheckBox", "Pain", Bounds::new(20, 30, 120, 17)),
            node(4, Some(2), "TORCheckBox", "Pain", Bounds::new(20, 55, 120, 17)),
        ]);
        let t = template(
            r#"{"version":1,"entries":[{"label":"Pain","groupPath":["Assessments"],"desiredState":true,"ordinalHint":2}]}"#,
        );
        let report = match_template(&t, &snapshot, &ClassTable::default(), false);
        assert_eq!(
            report.matches()[0].outcome,
            MatchOutcome::Resolved(ControlHandle::from_raw(4))
        );
    }

    #[test]
    fn hint_outside_matched_set_stays_ambiguous() {
        let snapshot = Snapshot::from_nodes(vec![
            node(1, None, "TfrmRemDlg", "", Bounds::new(0, 0, 600, 400)),
            node(2, Some(1), "TGroupBox", "Assessments", Bounds::new(10, 10, 580, 300)),
            node(3, Some(2), "TORCheckBox", "Pain", Bounds::new(20, 30, 120, 17)),
            node(4, Some(2), "TORCheckBox", "Pain", Bounds::new(20, 55, 120, 17)),
        ]);
        let t = template(
            r#"{"version":1,"entries":[{"label":"Pain","groupPath":["Assessments"],"desiredState":true,"ordinalHint":7}]}"#,
        );
        let report = match_template(&t, &snapshot, &ClassTable::default(), false);
        assert!(matches!(
            report.matches()[0].outcome,
            MatchOutcome::Ambiguous(_)
        ));
    }

    #[test]
    fn nested_containers_build_outermost_first_paths() {
        let snapshot = Snapshot::from_nodes(vec![
            node(1, None, "TfrmRemDlg", "", Bounds::new(0, 0, 600, 400)),
            node(2, Some(1), "TScrollBox", "", Bounds::new(0, 0, 600, 400)),
            node(3, Some(2), "TGroupBox", "Admission", Bounds::new(10, 10, 580, 300)),
            node(4, Some(3), "TGroupBox", "Assessments", Bounds::new(20, 30, 540, 200)),
            node(5, Some(4), "TORCheckBox", "Fall Risk", Bounds::new(30, 50, 120, 17)),
        ]);
        // Uncaptioned scroll box contributes no segment.
        let t = template(
            r#"{"version":1,"entries":[{"label":"Fall Risk","groupPath":["Admission","Assessments"],"desiredState":true}]}"#,
        );
        let report = match_template(&t, &snapshot, &ClassTable::default(), false);
        assert_eq!(
            report.matches()[0].outcome,
            MatchOutcome::Resolved(ControlHandle::from_raw(5))
        );
    }

    #[test]
    fn checkbox_without_container_matches_empty_group_path() {
        let snapshot = Snapshot::from_nodes(vec![
            node(1, None, "TfrmRemDlg", "", Bounds::new(0, 0, 600, 400)),
            node(2, Some(1), "TORCheckBox", "Fall Risk", Bounds::new(20, 30, 120, 17)),
        ]);
        let t = template(
            r#"{"version":1,"entries":[{"label":"Fall Risk","groupPath":[],"desiredState":true}]}"#,
        );
        let report = match_template(&t, &snapshot, &ClassTable::default(), false);
        assert_eq!(
            report.matches()[0].outcome,
            MatchOutcome::Resolved(ControlHandle::from_raw(2))
        );
    }

    #[test]
    fn bare_checkbox_borrows_label_from_static_text_on_its_right() {
        let snapshot = Snapshot::from_nodes(vec![
            node(1, None, "TfrmRemDlg", "", Bounds::new(0, 0, 600, 400)),
            node(2, Some(1), "TGroupBox", "Assessments", Bounds::new(10, 10, 580, 300)),
            node(3, Some(2), "TORCheckBox", "", Bounds::new(20, 30, 16, 16)),
            node(4, Some(2), "TLabel", "Fall Risk", Bounds::new(42, 31, 90, 14)),
            node(5, Some(2), "TLabel", "Elsewhere", Bounds::new(42, 90, 90, 14)),
        ]);
        let t = template(
            r#"{"version":1,"entries":[{"label":"Fall Risk","groupPath":["Assessments"],"desiredState":true}]}"#,
        );
        let report = match_template(&t, &snapshot, &ClassTable::default(), false);
        assert_eq!(
            report.matches()[0].outcome,
            MatchOutcome::Resolved(ControlHandle::from_raw(3))
        );
    }

    #[test]
    fn heuristic_checkboxes_are_skipped_unless_opted_in() {
        let snapshot = Snapshot::from_nodes(vec![
            node(1, None, "TfrmRemDlg", "", Bounds::new(0, 0, 600, 400)),
            node(2, Some(1), "TVendorTick", "Fall Risk", Bounds::new(20, 30, 16, 16)),
        ]);
        let t = template(
            r#"{"version":1,"entries":[{"label":"Fall Risk","groupPath":[],"desiredState":true}]}"#,
        );

        let strict = match_template(&t, &snapshot, &ClassTable::default(), false);
        assert_eq!(strict.matches()[0].outcome, MatchOutcome::Unresolved);

        let lenient = match_template(&t, &snapshot, &ClassTable::default(), true);
        assert_eq!(
            lenient.matches()[0].outcome,
            MatchOutcome::Resolved(ControlHandle::from_raw(2))
        );
    }

    #[test]
    fn repeated_runs_are_byte_identical() {
        let snapshot = Snapshot::from_nodes(vec![
            node(1, None, "TfrmRemDlg", "", Bounds::new(0, 0, 600, 400)),
            node(2, Some(1), "TGroupBox", "Assessments", Bounds::new(10, 10, 580, 300)),
            node(3, Some(2), "TORCheckBox", "Pain", Bounds::new(20, 55, 120, 17)),
            node(4, Some(2), "TORCheckBox", "Pain", Bounds::new(20, 30, 120, 17)),
            node(5, Some(2), "TORCheckBox", "Fall Risk", Bounds::new(20, 80, 120, 17)),
        ]);
        let t = template(
            r#"{"version":1,"entries":[
                {"label":"Pain","groupPath":["Assessments"],"desiredState":true},
                {"label":"Fall Risk","groupPath":["Assessments"],"desiredState":false}
            ]}"#,
        );

        let first = match_template(&t, &snapshot, &ClassTable::default(), false);
        for _ in 0..10 {
            let again = match_template(&t, &snapshot, &ClassTable::default(), false);
            let render = |r: &MatchReport| format!("{:?}", r.matches());
            assert_eq!(render(&first), render(&again));
        }
        // Ambiguous candidates come out in visual order: handle 4 sits above 3.
        assert_eq!(
            first.matches()[0].outcome,
            MatchOutcome::Ambiguous(vec![
                ControlHandle::from_raw(4),
                ControlHandle::from_raw(3)
            ])
        );
    }
}
