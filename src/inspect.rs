//! Read-only inspection of the values a template's targets currently hold.
//!
//! The template never stores authoritative values; this module re-reads the
//! files and reports, per item, whether all of its targets agree.

use crate::applier::FailureReason;
use crate::document::Document;
use crate::lock::FileLocks;
use crate::matcher::{resolve, Resolution};
use crate::model::{ConfigItem, Target, Template};
use encoding_rs::Encoding;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// What was found at one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TargetReading {
    #[serde(rename_all = "camelCase")]
    Found {
        line_number: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        relocated_from: Option<usize>,
        value: String,
    },
    Unavailable {
        reason: FailureReason,
    },
}

/// Agreement between the targets of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    /// Every target was read and all hold the same value.
    Ok,
    /// Every target was read but values differ.
    Inconsistent,
    /// Some targets could not be read.
    Partial,
    /// No target could be read, or the item has none.
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStatus {
    pub target_id: String,
    pub file_path: PathBuf,
    pub reading: TargetReading,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReport {
    pub item_id: String,
    pub name: String,
    pub status: ItemStatus,
    /// First value read, if any target could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<String>,
    pub targets: Vec<TargetStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateStatus {
    pub template_id: String,
    pub name: String,
    pub items: Vec<ItemReport>,
}

impl TemplateStatus {
    pub fn item(&self, item_id: &str) -> Option<&ItemReport> {
        self.items.iter().find(|item| item.item_id == item_id)
    }
}

/// Inspect every target of `template`. Each file is read once, under its lock;
/// files that are not valid UTF-8 are decoded with `fallback` when given.
pub fn inspect_template(
    template: &Template,
    locks: &FileLocks,
    fallback: Option<&'static Encoding>,
) -> TemplateStatus {
    let mut documents: HashMap<PathBuf, Result<Document, FailureReason>> = HashMap::new();

    let items = template
        .items
        .iter()
        .map(|item| inspect_item(item, locks, fallback, &mut documents))
        .collect();

    TemplateStatus {
        template_id: template.id.clone(),
        name: template.name.clone(),
        items,
    }
}

fn inspect_item(
    item: &ConfigItem,
    locks: &FileLocks,
    fallback: Option<&'static Encoding>,
    documents: &mut HashMap<PathBuf, Result<Document, FailureReason>>,
) -> ItemReport {
    let targets: Vec<TargetStatus> = item
        .targets
        .iter()
        .map(|target| {
            let document = documents
                .entry(target.file_path.clone())
                .or_insert_with(|| {
                    locks.with_lock(&target.file_path, || {
                        Document::read_with_fallback(&target.file_path, fallback)
                            .map_err(|e| FailureReason::from(&e))
                    })
                });
            TargetStatus {
                target_id: target.id.clone(),
                file_path: target.file_path.clone(),
                reading: read_target(target, document.as_ref()),
            }
        })
        .collect();

    let values: Vec<&str> = targets
        .iter()
        .filter_map(|t| match &t.reading {
            TargetReading::Found { value, .. } => Some(value.as_str()),
            TargetReading::Unavailable { .. } => None,
        })
        .collect();

    let status = if values.is_empty() {
        ItemStatus::Error
    } else if values.len() < targets.len() {
        ItemStatus::Partial
    } else if values.iter().all(|v| *v == values[0]) {
        ItemStatus::Ok
    } else {
        ItemStatus::Inconsistent
    };

    ItemReport {
        item_id: item.id.clone(),
        name: item.name.clone(),
        status,
        current_value: values.first().map(|v| v.to_string()),
        targets,
    }
}

fn read_target(target: &Target, document: Result<&Document, &FailureReason>) -> TargetReading {
    let document = match document {
        Ok(document) => document,
        Err(reason) => {
            return TargetReading::Unavailable {
                reason: reason.clone(),
            }
        }
    };

    let anchor = match target.anchor() {
        Ok(anchor) => anchor,
        Err(e) => {
            return TargetReading::Unavailable {
                reason: FailureReason::from(&e),
            }
        }
    };

    let resolution = resolve(document, &anchor, target.line_number);
    let found = resolution
        .line()
        .and_then(|line| document.line(line).map(|text| (line, text)))
        .and_then(|(line, text)| anchor.extract(text).map(|value| (line, value)));

    match found {
        Some((line_number, value)) => TargetReading::Found {
            line_number,
            relocated_from: match resolution {
                Resolution::Relocated { from, .. } => Some(from),
                _ => None,
            },
            value: value.to_string(),
        },
        None => TargetReading::Unavailable {
            reason: FailureReason::StaleAnchor {
                candidates: match resolution {
                    Resolution::Ambiguous(count) => count,
                    _ => 0,
                },
            },
        },
    }
}
