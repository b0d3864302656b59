use crate::anchor::Anchor;
use crate::document::Document;
use crate::error::PatchError;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

/// The substitution primitive: replace the anchored value on one line.
///
/// A `LineEdit` is only built for a line that has already been validated
/// against its anchor. Applying it to a [`Document`] re-checks the anchor and
/// rewrites just the value span, leaving prefix, suffix and line terminator
/// as they were.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "LineEdit does nothing until apply_to() is called"]
pub struct LineEdit {
    /// 1-based line number
    pub line: usize,
    pub anchor: Anchor,
    pub new_value: String,
}

/// Result of applying a [`LineEdit`] to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditResult {
    /// The line content changed
    Applied,
    /// The line already held the new value
    AlreadyApplied,
}

impl LineEdit {
    pub fn new(line: usize, anchor: Anchor, new_value: impl Into<String>) -> Self {
        Self {
            line,
            anchor,
            new_value: new_value.into(),
        }
    }

    /// Apply this edit to the in-memory document.
    pub fn apply_to(&self, document: &mut Document) -> Result<EditResult, PatchError> {
        check_value(document, self.line, &self.new_value)?;

        let current = document
            .line(self.line)
            .ok_or(PatchError::InvalidAnchor)?;
        let replaced = self
            .anchor
            .substitute(current, &self.new_value)
            .ok_or(PatchError::InvalidAnchor)?;

        if replaced == current {
            return Ok(EditResult::AlreadyApplied);
        }

        document.set_line(self.line, replaced);
        Ok(EditResult::Applied)
    }
}

/// Whether `value` can be written on `line` of `document`: a single line,
/// representable in the document's encoding.
pub(crate) fn check_value(document: &Document, line: usize, value: &str) -> Result<(), PatchError> {
    if value.contains(['\n', '\r']) {
        return Err(PatchError::InvalidValue {
            path: document.path().to_path_buf(),
            line,
        });
    }

    let encoding = document.encoding();
    if !encoding.can_encode(value) {
        return Err(PatchError::Unencodable {
            path: document.path().to_path_buf(),
            line,
            encoding: encoding.name(),
        });
    }
    Ok(())
}

/// Destination for rewritten file content.
///
/// The production implementation is [`AtomicPersist`]; the seam exists so a
/// failing write can be simulated without touching filesystem permissions.
pub trait Persist: Send + Sync + fmt::Debug {
    /// Replace the content of `path` with `content`.
    ///
    /// When `expected` is set, the write is refused if the file's current
    /// bytes no longer hash to it.
    fn persist(&self, path: &Path, content: &[u8], expected: Option<u64>) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicPersist;

impl Persist for AtomicPersist {
    fn persist(&self, path: &Path, content: &[u8], expected: Option<u64>) -> io::Result<()> {
        atomic_write(path, content, expected)
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or nothing changes. The original file's
/// permissions are carried over to the replacement.
pub fn atomic_write(path: &Path, content: &[u8], expected: Option<u64>) -> io::Result<()> {
    // Create tempfile in same directory to ensure same filesystem
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            ))
        }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    match fs::metadata(path) {
        Ok(metadata) => fs::set_permissions(temp.path(), metadata.permissions())?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(expected) = expected {
        let current = fs::read(path)?;
        if xxh3_64(&current) != expected {
            return Err(io::Error::other(format!(
                "{} changed on disk since it was read",
                path.display()
            )));
        }
    }

    // Atomic rename
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
