//! Batch application of modifications.
//!
//! This module turns a flat list of [`Modification`]s into file writes:
//! - Groups modifications by file so each file is read and written once
//! - Re-validates every recorded line against its anchor, re-anchoring to a
//!   unique match when the line moved
//! - Resolves duplicate targets in batch order
//! - Writes each file atomically under its per-file lock
//! - Reports one outcome per modification, in batch order

use crate::document::Document;
use crate::edit::{check_value, AtomicPersist, EditResult, LineEdit, Persist};
use crate::error::PatchError;
use crate::lock::{lock_key, FileLocks};
use crate::matcher::{resolve, Resolution};
use crate::model::Modification;
use encoding_rs::Encoding;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Why a modification was not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SkipReason {
    /// An earlier modification in the batch already claimed this line.
    #[serde(rename_all = "camelCase")]
    DuplicateTarget { line_number: usize },
}

/// Why a modification could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FailureReason {
    FileNotFound,
    NotReadable {
        message: String,
    },
    InvalidAnchor,
    /// The new value contains a line break.
    InvalidValue,
    /// The new value has characters the file's encoding cannot represent.
    Unencodable {
        encoding: String,
    },
    /// The recorded line no longer matches and `candidates` lines do.
    StaleAnchor {
        candidates: usize,
    },
    WriteError {
        message: String,
    },
}

/// Result for a single modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
#[must_use = "Outcome should be checked for success/failure"]
pub enum Outcome {
    #[serde(rename_all = "camelCase")]
    Applied {
        line_number: usize,
        /// Recorded line, when the anchor was found elsewhere.
        #[serde(skip_serializing_if = "Option::is_none")]
        relocated_from: Option<usize>,
        /// False when the line already held the value.
        changed: bool,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        reason: FailureReason,
    },
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    fn failed(reason: FailureReason) -> Self {
        Outcome::Failed { reason }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DuplicateTarget { line_number } => {
                write!(f, "line {line_number} already targeted earlier in the batch")
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::FileNotFound => write!(f, "file not found"),
            FailureReason::NotReadable { message } => write!(f, "file not readable: {message}"),
            FailureReason::InvalidAnchor => write!(f, "anchor prefix is empty"),
            FailureReason::InvalidValue => write!(f, "new value spans multiple lines"),
            FailureReason::Unencodable { encoding } => {
                write!(f, "new value cannot be written as {encoding}")
            }
            FailureReason::StaleAnchor { candidates: 0 } => {
                write!(f, "stale anchor: no line matches any more")
            }
            FailureReason::StaleAnchor { candidates } => {
                write!(f, "stale anchor: {candidates} lines match, expected 1")
            }
            FailureReason::WriteError { message } => write!(f, "write failed: {message}"),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied {
                line_number,
                relocated_from: Some(from),
                ..
            } => write!(f, "Applied at line {line_number} (moved from {from})"),
            Outcome::Applied { line_number, .. } => write!(f, "Applied at line {line_number}"),
            Outcome::Skipped { reason } => write!(f, "Skipped: {reason}"),
            Outcome::Failed { reason } => write!(f, "Failed: {reason}"),
        }
    }
}

impl From<&PatchError> for FailureReason {
    fn from(error: &PatchError) -> Self {
        match error {
            PatchError::FileNotFound(_) => FailureReason::FileNotFound,
            PatchError::NotReadable { reason, .. } => FailureReason::NotReadable {
                message: reason.clone(),
            },
            PatchError::InvalidAnchor => FailureReason::InvalidAnchor,
            PatchError::InvalidValue { .. } => FailureReason::InvalidValue,
            PatchError::Unencodable { encoding, .. } => FailureReason::Unencodable {
                encoding: encoding.to_string(),
            },
        }
    }
}

/// Outcome of one modification, tied back to the target it addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    /// Config item the target belongs to, when applied from a template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub target_id: String,
    pub file_path: PathBuf,
    pub new_value: String,
    pub outcome: Outcome,
}

/// Whether a run writes files or only reports what it would do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Write,
    Check,
}

/// Applies modification batches to the filesystem.
///
/// Clones share the same lock registry, so concurrent batches from clones of
/// one applier never interleave on a file.
#[derive(Debug, Clone)]
pub struct Applier {
    locks: FileLocks,
    persist: Arc<dyn Persist>,
    max_workers: usize,
    verify_unchanged: bool,
    fallback: Option<&'static Encoding>,
}

impl Default for Applier {
    fn default() -> Self {
        Self::new()
    }
}

impl Applier {
    pub fn new() -> Self {
        Self {
            locks: FileLocks::new(),
            persist: Arc::new(AtomicPersist),
            max_workers: 4,
            verify_unchanged: true,
            fallback: Some(encoding_rs::GBK),
        }
    }

    /// Use `persist` for write-back instead of the atomic file writer.
    pub fn with_persist(mut self, persist: Arc<dyn Persist>) -> Self {
        self.persist = persist;
        self
    }

    pub fn with_locks(mut self, locks: FileLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Upper bound on files processed in parallel (at least 1).
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Refuse a write when the file changed between validation and rename.
    pub fn with_verify_unchanged(mut self, verify: bool) -> Self {
        self.verify_unchanged = verify;
        self
    }

    /// Encoding for files that are not valid UTF-8; `None` makes such files
    /// unreadable.
    pub fn with_fallback_encoding(mut self, fallback: Option<&'static Encoding>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback_encoding(&self) -> Option<&'static Encoding> {
        self.fallback
    }

    pub fn locks(&self) -> &FileLocks {
        &self.locks
    }

    /// Apply a batch. Returns one outcome per modification, in batch order.
    pub fn apply(&self, modifications: &[Modification]) -> Vec<Outcome> {
        self.run(modifications, Mode::Write)
    }

    /// Report what [`Applier::apply`] would do, without writing anything.
    pub fn check(&self, modifications: &[Modification]) -> Vec<Outcome> {
        self.run(modifications, Mode::Check)
    }

    fn run(&self, modifications: &[Modification], mode: Mode) -> Vec<Outcome> {
        // Group modification indices by file, keeping first-seen order.
        let mut groups: Vec<(PathBuf, Vec<usize>)> = Vec::new();
        let mut group_of: HashMap<PathBuf, usize> = HashMap::new();
        for (idx, modification) in modifications.iter().enumerate() {
            let key = lock_key(&modification.target.file_path);
            let slot = *group_of.entry(key).or_insert_with(|| {
                groups.push((modification.target.file_path.clone(), Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(idx);
        }

        let mut outcomes: Vec<Option<Outcome>> = vec![None; modifications.len()];
        let workers = self.max_workers.min(groups.len());

        let per_file: Vec<Vec<(usize, Outcome)>> = if workers <= 1 {
            groups
                .iter()
                .map(|(path, indices)| self.process_file(path, indices, modifications, mode))
                .collect()
        } else {
            let next = &AtomicUsize::new(0);
            let groups = &groups;
            thread::scope(|scope| {
                let handles: Vec<_> = (0..workers)
                    .map(move |_| {
                        scope.spawn(move || {
                            let mut done = Vec::new();
                            loop {
                                let slot = next.fetch_add(1, Ordering::Relaxed);
                                let Some((path, indices)) = groups.get(slot) else {
                                    break;
                                };
                                done.push(self.process_file(path, indices, modifications, mode));
                            }
                            done
                        })
                    })
                    .collect();

                handles
                    .into_iter()
                    .flat_map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
                    })
                    .collect()
            })
        };

        for (idx, outcome) in per_file.into_iter().flatten() {
            outcomes[idx] = Some(outcome);
        }

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    Outcome::failed(FailureReason::WriteError {
                        message: "modification was not processed".to_string(),
                    })
                })
            })
            .collect()
    }

    /// Validate, substitute and write all modifications addressed to one file.
    fn process_file(
        &self,
        path: &Path,
        indices: &[usize],
        modifications: &[Modification],
        mode: Mode,
    ) -> Vec<(usize, Outcome)> {
        self.locks.with_lock(path, || {
            let mut document = match Document::read_with_fallback(path, self.fallback) {
                Ok(document) => document,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "cannot read target file");
                    let reason = FailureReason::from(&e);
                    return indices
                        .iter()
                        .map(|&idx| (idx, Outcome::failed(reason.clone())))
                        .collect();
                }
            };

            let mut results = Vec::with_capacity(indices.len());
            let mut claimed: HashMap<usize, usize> = HashMap::new();
            let mut planned: Vec<(usize, LineEdit, Option<usize>)> = Vec::new();

            // Validation pass: every target is checked against the file as read.
            for &idx in indices {
                let modification = &modifications[idx];
                let target = &modification.target;

                let anchor = match target.anchor() {
                    Ok(anchor) => anchor,
                    Err(e) => {
                        results.push((idx, Outcome::failed(FailureReason::from(&e))));
                        continue;
                    }
                };

                let resolution = resolve(&document, &anchor, target.line_number);
                let Some(line) = resolution.line() else {
                    let candidates = match resolution {
                        Resolution::Ambiguous(count) => count,
                        _ => 0,
                    };
                    warn!(
                        file = %path.display(),
                        line = target.line_number,
                        prefix = %target.prefix,
                        candidates,
                        "stale anchor"
                    );
                    results.push((
                        idx,
                        Outcome::failed(FailureReason::StaleAnchor { candidates }),
                    ));
                    continue;
                };

                // A value that can never be written must not claim the line.
                if let Err(e) = check_value(&document, line, &modification.new_value) {
                    debug!(file = %path.display(), line, error = %e, "value rejected");
                    results.push((idx, Outcome::failed(FailureReason::from(&e))));
                    continue;
                }

                if claimed.contains_key(&line) {
                    debug!(file = %path.display(), line, "duplicate target skipped");
                    results.push((
                        idx,
                        Outcome::Skipped {
                            reason: SkipReason::DuplicateTarget { line_number: line },
                        },
                    ));
                    continue;
                }
                claimed.insert(line, idx);

                let relocated_from = match resolution {
                    Resolution::Relocated { from, .. } => {
                        debug!(file = %path.display(), from, to = line, "target re-anchored");
                        Some(from)
                    }
                    _ => None,
                };
                planned.push((
                    idx,
                    LineEdit::new(line, anchor, modification.new_value.clone()),
                    relocated_from,
                ));
            }

            // Substitution pass on the in-memory document.
            let mut substituted = Vec::with_capacity(planned.len());
            for (idx, edit, relocated_from) in planned {
                match edit.apply_to(&mut document) {
                    Ok(result) => substituted.push((
                        idx,
                        Outcome::Applied {
                            line_number: edit.line,
                            relocated_from,
                            changed: result == EditResult::Applied,
                        },
                    )),
                    Err(e) => results.push((idx, Outcome::failed(FailureReason::from(&e)))),
                }
            }

            let changed = substituted.iter().any(|(_, outcome)| {
                matches!(outcome, Outcome::Applied { changed: true, .. })
            });

            if mode == Mode::Write && changed {
                let expected = self.verify_unchanged.then(|| document.fingerprint());
                let content = document.to_bytes();
                // Write through symlinks to the file they point at.
                let write_path = lock_key(path);
                if let Err(e) = self.persist.persist(&write_path, &content, expected) {
                    warn!(file = %path.display(), error = %e, "write-back failed, file left untouched");
                    let reason = FailureReason::WriteError {
                        message: e.to_string(),
                    };
                    results.extend(
                        substituted
                            .into_iter()
                            .map(|(idx, _)| (idx, Outcome::failed(reason.clone()))),
                    );
                    return results;
                }
                info!(
                    file = %path.display(),
                    targets = substituted.len(),
                    "file updated"
                );
            }

            results.extend(substituted);
            results
        })
    }
}
