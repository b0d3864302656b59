//! confpatch: template-driven configuration patching
//!
//! Operators record *targets* (a file, a line and a literal anchor around the
//! value) under named config items, then later write new values to every
//! target of an item in one batch.
//!
//! # Architecture
//!
//! All writes compile down to one primitive: a single-line substitution
//! between an anchor's prefix and suffix ([`Anchor::substitute`]). The
//! [`Applier`] validates each target against the file as it is right now,
//! groups substitutions per file and writes each file atomically.
//!
//! # Safety
//!
//! - Recorded line numbers are re-validated; a moved line is followed only
//!   when exactly one line still matches the anchor
//! - Atomic file writes (tempfile + fsync + rename), permissions preserved
//! - Per-file locks; different files proceed in parallel
//! - Encoding, BOM and line terminators preserved byte-for-byte, including
//!   legacy encodings such as GBK for files that are not UTF-8
//! - Idempotent operations
//!
//! # Example
//!
//! ```no_run
//! use confpatch::{Modification, PatchService, Target};
//!
//! let service = PatchService::new("/etc/myapp");
//! let line = service
//!     .search_anchor("app.conf", "timeout=", "#")?
//!     .next()
//!     .map(|m| m.line_number)
//!     .unwrap_or(1);
//!
//! let target = Target {
//!     id: "timeout".into(),
//!     file_path: "app.conf".into(),
//!     line_number: line,
//!     prefix: "timeout=".into(),
//!     suffix: "#".into(),
//! };
//! let summary = service.apply_modifications(&[Modification::new(target, "60")]);
//! for result in &summary.results {
//!     println!("{}: {}", result.file_path.display(), result.outcome);
//! }
//! # Ok::<(), confpatch::PatchError>(())
//! ```

pub mod anchor;
pub mod api;
pub mod applier;
pub mod config;
pub mod document;
pub mod edit;
pub mod error;
pub mod inspect;
pub mod lock;
pub mod matcher;
pub mod model;
pub mod path;
pub mod service;
pub mod session;
pub mod store;

// Re-exports
pub use anchor::Anchor;
pub use applier::{Applier, FailureReason, Outcome, SkipReason, TargetReport};
pub use config::{load_from_path, load_from_str, ConfigError, Settings};
pub use document::{Document, LineEnding, TextEncoding};
pub use edit::{atomic_write, AtomicPersist, EditResult, LineEdit, Persist};
pub use error::PatchError;
pub use inspect::{ItemReport, ItemStatus, TargetReading, TargetStatus, TemplateStatus};
pub use lock::FileLocks;
pub use matcher::{find_matches, find_matches_with, Matches};
pub use model::{
    ConfigItem, MatchCandidate, Modification, Target, Template, TemplateSummary,
    ValidationError, ValidationIssue,
};
pub use path::normalize_path;
pub use service::{ApplySummary, PatchService};
pub use session::EditSession;
pub use store::{JsonTemplateStore, StoreError, TemplateStore};
