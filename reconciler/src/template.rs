//! Versioned template documents describing desired checkbox states.
//!
//! A template is loaded once per session and immutable afterwards. Entries
//! are keyed by semantic label and group path, never by native handles, and
//! author order is preserved: it seeds tie-break ordering downstream.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::errors::AutomationError;

pub const SUPPORTED_VERSION: u32 = 1;

/// Desired state for one checkbox, addressed by label and group path.
///
/// `desired_state` always originates here, never from live state.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateEntry {
    pub label: String,
    #[serde(default)]
    pub group_path: Vec<String>,
    pub desired_state: bool,
    #[serde(default)]
    pub ordinal_hint: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TemplateDoc {
    version: u32,
    entries: Vec<TemplateEntry>,
    // Unknown top-level fields are ignored for forward compatibility;
    // serde's default behavior already does that.
}

/// An immutable, validated set of template entries in author order.
#[derive(Debug, Clone)]
pub struct Template {
    entries: Vec<TemplateEntry>,
}

impl Template {
    /// Parse and validate a template from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, AutomationError> {
        let doc: TemplateDoc = serde_json::from_str(json)
            .map_err(|e| AutomationError::TemplateInvalid(format!("malformed document: {e}")))?;
        Self::from_doc(doc)
    }

    /// Load a template from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AutomationError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            AutomationError::TemplateInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    fn from_doc(doc: TemplateDoc) -> Result<Self, AutomationError> {
        if doc.version != SUPPORTED_VERSION {
            return Err(AutomationError::TemplateInvalid(format!(
                "unknown template version {} (supported: {SUPPORTED_VERSION})",
                doc.version
            )));
        }

        let mut seen_keys: Vec<(String, Vec<String>)> = Vec::with_capacity(doc.entries.len());
        for (idx, entry) in doc.entries.iter().enumerate() {
            if normalize_label(&entry.label).is_empty() {
                return Err(AutomationError::TemplateInvalid(format!(
                    "entry {idx} has an empty label"
                )));
            }
            for segment in &entry.group_path {
                if normalize_label(segment).is_empty() {
                    return Err(AutomationError::TemplateInvalid(format!(
                        "entry {idx} ({:?}) has an empty group path segment",
                        entry.label
                    )));
                }
            }

            // Two entries the matcher could never tell apart are a template
            // authoring error, so keys are compared normalized.
            let key = (
                normalize_label(&entry.label),
                entry.group_path.iter().map(|s| normalize_label(s)).collect(),
            );
            if seen_keys.contains(&key) {
                return Err(AutomationError::TemplateInvalid(format!(
                    "duplicate entry for label {:?} under group {:?}",
                    entry.label, entry.group_path
                )));
            }
            seen_keys.push(key);
        }

        debug!(entry_count = doc.entries.len(), "template loaded");
        Ok(Self {
            entries: doc.entries,
        })
    }

    /// Entries in author-specified order.
    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Case-insensitive, whitespace-collapsed form used for all label and group
/// comparisons. VCL accelerator markers are unescaped first: "&Finish"
/// reads as "Finish", a literal ampersand is written "&&".
pub(crate) fn normalize_label(raw: &str) -> String {
    let unescaped = raw
        .replace("&&", "\u{1}")
        .replace('&', "")
        .replace('\u{1}', "&");
    unescaped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
