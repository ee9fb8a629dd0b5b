//! Class-name driven control classification.
//!
//! The foreign application ships several checkbox classes that all behave
//! identically, so the mapping from class name to role is data, not a type
//! hierarchy: new control classes are added through configuration, never
//! through code.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::snapshot::ControlNode;

/// Semantic role of a control, derived from its class name and geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlRole {
    Checkbox,
    GroupContainer,
    ScrollContainer,
    Button,
    StaticText,
    Unknown,
}

/// How the role was derived.
///
/// `Heuristic` classifications come from the geometry fallback and are
/// excluded from matching unless the caller explicitly opts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Exact,
    Heuristic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub role: ControlRole,
    pub confidence: Confidence,
}

impl Classification {
    fn exact(role: ControlRole) -> Self {
        Self {
            role,
            confidence: Confidence::Exact,
        }
    }

    fn heuristic(role: ControlRole) -> Self {
        Self {
            role,
            confidence: Confidence::Heuristic,
        }
    }
}

/// How a single rule's pattern is compared against a class name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Exact,
    Prefix,
}

/// One class-name → role rule. Comparison is case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRule {
    pub pattern: String,
    #[serde(rename = "match")]
    pub kind: PatternKind,
    pub role: ControlRole,
}

impl ClassRule {
    pub fn exact(pattern: &str, role: ControlRole) -> Self {
        Self {
            pattern: pattern.to_string(),
            kind: PatternKind::Exact,
            role,
        }
    }

    pub fn prefix(pattern: &str, role: ControlRole) -> Self {
        Self {
            pattern: pattern.to_string(),
            kind: PatternKind::Prefix,
            role,
        }
    }

    fn matches(&self, class_name_lower: &str) -> bool {
        let pattern = self.pattern.to_ascii_lowercase();
        match self.kind {
            PatternKind::Exact => class_name_lower == pattern,
            PatternKind::Prefix => class_name_lower.starts_with(&pattern),
        }
    }
}

// Controls smaller than this on both axes and roughly square are treated as
// checkbox-shaped by the geometry fallback.
const HEURISTIC_CHECKBOX_MAX_SIDE: i32 = 24;
const HEURISTIC_CHECKBOX_ASPECT_SLACK: i32 = 6;

static DEFAULT_RULES: Lazy<Vec<ClassRule>> = Lazy::new(|| {
    vec![
        // CPRS reminder-dialog checkbox family (Delphi VCL class names).
        ClassRule::exact("TORCheckBox", ControlRole::Checkbox),
        ClassRule::exact("TCPRSDialogParentCheckBox", ControlRole::Checkbox),
        ClassRule::exact("TCPRSDialogCheckBox", ControlRole::Checkbox),
        ClassRule::exact("TCheckBox", ControlRole::Checkbox),
        ClassRule::exact("TGroupBox", ControlRole::GroupContainer),
        ClassRule::exact("TORGroupBox", ControlRole::GroupContainer),
        ClassRule::exact("TScrollBox", ControlRole::ScrollContainer),
        ClassRule::exact("TButton", ControlRole::Button),
        ClassRule::exact("TBitBtn", ControlRole::Button),
        ClassRule::exact("TORButton", ControlRole::Button),
        ClassRule::exact("Button", ControlRole::Button),
        ClassRule::exact("TLabel", ControlRole::StaticText),
        ClassRule::exact("TStaticText", ControlRole::StaticText),
        ClassRule::exact("Static", ControlRole::StaticText),
        ClassRule::prefix("TCPRSDialogStatic", ControlRole::StaticText),
    ]
});

/// Ordered rule table mapping class names to roles.
///
/// First matching rule wins, so user-supplied rules (prepended) can shadow
/// the built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassTable {
    rules: Vec<ClassRule>,
}

impl Default for ClassTable {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }
}

impl ClassTable {
    /// A table with no built-in rules. Everything classifies as `Unknown`
    /// unless the geometry fallback applies.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule ahead of the existing ones.
    pub fn with_rule(mut self, rule: ClassRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    pub fn rules(&self) -> &[ClassRule] {
        &self.rules
    }

    /// Classify one control. Total: every node gets exactly one role,
    /// defaulting to `Unknown`. Pure: no native calls, no side effects.
    pub fn classify(&self, node: &ControlNode) -> Classification {
        let class_lower = node.class_name.to_ascii_lowercase();
        for rule in &self.rules {
            if rule.matches(&class_lower) {
                return Classification::exact(rule.role);
            }
        }

        if looks_like_checkbox(node) {
            return Classification::heuristic(ControlRole::Checkbox);
        }

        Classification::exact(ControlRole::Unknown)
    }
}

/// Geometry fallback for unrecognized classes: a small, near-square control
/// is probably a bare checkbox glyph.
fn looks_like_checkbox(node: &ControlNode) -> bool {
    let w = node.bounds.width;
    let h = node.bounds.height;
    w > 0
        && h > 0
        && w <= HEURISTIC_CHECKBOX_MAX_SIDE
        && h <= HEURISTIC_CHECKBOX_MAX_SIDE
        && (w - h).abs() <= HEURISTIC_CHECKBOX_ASPECT_SLACK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{Bounds, ControlHandle};

    fn node(class: &str, bounds: Bounds) -> ControlNode {
        ControlNode {
            handle: ControlHandle::from_raw(100),
            class_name: class.to_string(),
            bounds,
            parent: None,
            visible: true,
            enabled: true,
            text: String::new(),
        }
    }

    #[test]
    fn known_checkbox_classes_classify_exact() {
        let table = ClassTable::default();
        for class in [
            "TORCheckBox",
            "TCPRSDialogParentCheckBox",
            "TCPRSDialogCheckBox",
            "torcheckbox", // case-insensitive
        ] {
            let c = table.classify(&node(class, Bounds::default()));
            assert_eq!(c.role, ControlRole::Checkbox, "class {class}");
            assert_eq!(c.confidence, Confidence::Exact, "class {class}");
        }
    }

    #[test]
    fn containers_and_buttons() {
        let table = ClassTable::default();
        assert_eq!(
            table.classify(&node("TGroupBox", Bounds::default())).role,
            ControlRole::GroupContainer
        );
        assert_eq!(
            table.classify(&node("TScrollBox", Bounds::default())).role,
            ControlRole::ScrollContainer
        );
        assert_eq!(
            table.classify(&node("TBitBtn", Bounds::default())).role,
            ControlRole::Button
        );
    }

    #[test]
    fn unknown_class_with_checkbox_geometry_is_heuristic() {
        let table = ClassTable::default();
        let c = table.classify(&node("TWeirdVendorBox", Bounds::new(10, 10, 16, 16)));
        assert_eq!(c.role, ControlRole::Checkbox);
        assert_eq!(c.confidence, Confidence::Heuristic);
    }

    #[test]
    fn unknown_class_with_large_bounds_is_unknown() {
        let table = ClassTable::default();
        let c = table.classify(&node("TWeirdVendorBox", Bounds::new(10, 10, 300, 80)));
        assert_eq!(c.role, ControlRole::Unknown);
        assert_eq!(c.confidence, Confidence::Exact);
    }

    #[test]
    fn user_rule_shadows_default() {
        let table =
            ClassTable::default().with_rule(ClassRule::exact("TORCheckBox", ControlRole::Button));
        let c = table.classify(&node("TORCheckBox", Bounds::default()));
        assert_eq!(c.role, ControlRole::Button);
    }

    #[test]
    fn prefix_rule_matches() {
        let table = ClassTable::empty()
            .with_rule(ClassRule::prefix("TCPRSDialog", ControlRole::Checkbox));
        let c = table.classify(&node("TCPRSDialogChildCheckBox", Bounds::default()));
        assert_eq!(c.role, ControlRole::Checkbox);
    }

    #[test]
    fn table_round_trips_through_json() {
        let table = ClassTable::default();
        let json = serde_json::to_string(&table).unwrap();
        let back: ClassTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rules().len(), table.rules().len());
    }
}
