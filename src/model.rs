use crate::anchor::Anchor;
use crate::error::PatchError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// A named, ordered collection of configuration items applied as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub items: Vec<ConfigItem>,
}

/// A named logical setting backed by one or more targets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigItem {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub default_value: String,
    /// Last applied value. Informational only; files are authoritative.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_value: String,
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// Where a value lives: one line of one file plus the anchor that finds it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub id: String,
    pub file_path: PathBuf,
    /// 1-based line where the anchor was found when the target was recorded.
    pub line_number: usize,
    pub prefix: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suffix: String,
}

impl Target {
    pub fn anchor(&self) -> Result<Anchor, PatchError> {
        Anchor::new(self.prefix.clone(), self.suffix.clone())
    }
}

/// A line found by an anchor search. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub line_number: usize,
    pub line_content: String,
}

/// One unit of work for the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    pub target: Target,
    pub new_value: String,
}

impl Modification {
    pub fn new(target: Target, new_value: impl Into<String>) -> Self {
        Self {
            target,
            new_value: new_value.into(),
        }
    }
}

/// List view of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub item_count: usize,
}

impl From<&Template> for TemplateSummary {
    fn from(template: &Template) -> Self {
        Self {
            id: template.id.clone(),
            name: template.name.clone(),
            description: template.description.clone(),
            item_count: template.items.len(),
        }
    }
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn item(&self, id: &str) -> Option<&ConfigItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Find an item by id, falling back to its name.
    pub fn find_item(&self, key: &str) -> Option<&ConfigItem> {
        self.item(key)
            .or_else(|| self.items.iter().find(|item| item.name == key))
    }

    /// Give a fresh id to the template and every item or target lacking one.
    pub fn assign_ids(&mut self) {
        if self.id.is_empty() {
            self.id = new_id();
        }
        for item in &mut self.items {
            if item.id.is_empty() {
                item.id = new_id();
            }
            for target in &mut item.targets {
                if target.id.is_empty() {
                    target.id = new_id();
                }
            }
        }
    }

    /// Check every structural rule, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.name.trim().is_empty() {
            issues.push(ValidationIssue::MissingTemplateName);
        }

        let mut item_ids = HashSet::new();
        for (item_idx, item) in self.items.iter().enumerate() {
            let item_label = label(&item.name, item_idx);

            if item.name.trim().is_empty() {
                issues.push(ValidationIssue::MissingItemName { index: item_idx });
            }
            if !item.id.is_empty() && !item_ids.insert(item.id.as_str()) {
                issues.push(ValidationIssue::DuplicateItemId {
                    id: item.id.clone(),
                });
            }

            let mut target_ids = HashSet::new();
            for (target_idx, target) in item.targets.iter().enumerate() {
                if !target.id.is_empty() && !target_ids.insert(target.id.as_str()) {
                    issues.push(ValidationIssue::DuplicateTargetId {
                        item: item_label.clone(),
                        id: target.id.clone(),
                    });
                }
                if let Some(field) = target_missing_field(target) {
                    issues.push(ValidationIssue::InvalidTarget {
                        item: item_label.clone(),
                        index: target_idx,
                        field,
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

fn target_missing_field(target: &Target) -> Option<&'static str> {
    if target.file_path.as_os_str().is_empty() {
        Some("filePath")
    } else if target.prefix.is_empty() {
        Some("prefix")
    } else if target.line_number == 0 {
        Some("lineNumber")
    } else {
        None
    }
}

fn label(name: &str, index: usize) -> String {
    if name.trim().is_empty() {
        format!("#{}", index + 1)
    } else {
        name.to_string()
    }
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingTemplateName,
    MissingItemName {
        index: usize,
    },
    DuplicateItemId {
        id: String,
    },
    DuplicateTargetId {
        item: String,
        id: String,
    },
    InvalidTarget {
        item: String,
        index: usize,
        field: &'static str,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingTemplateName => write!(f, "template name is required"),
            ValidationIssue::MissingItemName { index } => {
                write!(f, "config item #{} has no name", index + 1)
            }
            ValidationIssue::DuplicateItemId { id } => {
                write!(f, "config item id '{id}' is used more than once")
            }
            ValidationIssue::DuplicateTargetId { item, id } => {
                write!(f, "config item '{item}' reuses target id '{id}'")
            }
            ValidationIssue::InvalidTarget { item, index, field } => write!(
                f,
                "config item '{item}' target #{} has an invalid '{field}'",
                index + 1
            ),
        }
    }
}
