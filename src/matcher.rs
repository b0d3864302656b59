//! Anchor matching over whole files.
//!
//! [`find_matches`] is the read-only search used when an operator selects
//! targets. [`resolve`] is the apply-time check that a previously recorded
//! line still satisfies its anchor, with a unique-match fallback when it does
//! not.

use crate::anchor::Anchor;
use crate::document::Document;
use crate::error::PatchError;
use crate::model::MatchCandidate;
use encoding_rs::Encoding;
use std::path::Path;

/// Candidate lines of one file snapshot, produced lazily.
///
/// Each call to [`find_matches`] reads the file again; a `Matches` value only
/// ever reflects the snapshot taken when it was created. Cloning it yields an
/// independent pass over the same snapshot.
#[derive(Debug, Clone)]
pub struct Matches {
    document: Document,
    anchor: Anchor,
    next_line: usize,
}

impl Matches {
    pub fn new(document: Document, anchor: Anchor) -> Self {
        Self {
            document,
            anchor,
            next_line: 1,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }
}

impl Iterator for Matches {
    type Item = MatchCandidate;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(line) = self.document.line(self.next_line) {
            let line_number = self.next_line;
            self.next_line += 1;
            if self.anchor.matches(line) {
                return Some(MatchCandidate {
                    line_number,
                    line_content: line.to_string(),
                });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.document.line_count() + 1).saturating_sub(self.next_line);
        (0, Some(remaining))
    }
}

/// Search `path` for every line satisfying `(prefix, suffix)`.
pub fn find_matches(path: &Path, prefix: &str, suffix: &str) -> Result<Matches, PatchError> {
    find_matches_with(path, prefix, suffix, None)
}

/// [`find_matches`], decoding a file that is not valid UTF-8 with `fallback`.
pub fn find_matches_with(
    path: &Path,
    prefix: &str,
    suffix: &str,
    fallback: Option<&'static Encoding>,
) -> Result<Matches, PatchError> {
    let anchor = Anchor::new(prefix, suffix)?;
    let document = Document::read_with_fallback(path, fallback)?;
    Ok(Matches::new(document, anchor))
}

/// Where an anchor was found relative to its recorded line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The recorded line still satisfies the anchor.
    Recorded(usize),
    /// The recorded line no longer matches, but exactly one other line does.
    Relocated { from: usize, to: usize },
    /// No line satisfies the anchor.
    Missing,
    /// The recorded line no longer matches and several lines do.
    Ambiguous(usize),
}

impl Resolution {
    pub fn line(self) -> Option<usize> {
        match self {
            Resolution::Recorded(line) | Resolution::Relocated { to: line, .. } => Some(line),
            Resolution::Missing | Resolution::Ambiguous(_) => None,
        }
    }
}

/// Re-validate `recorded_line` against current content, falling back to a
/// whole-file search that must yield a single line.
pub fn resolve(document: &Document, anchor: &Anchor, recorded_line: usize) -> Resolution {
    if document
        .line(recorded_line)
        .is_some_and(|line| anchor.matches(line))
    {
        return Resolution::Recorded(recorded_line);
    }

    let mut candidates = document
        .lines()
        .iter()
        .enumerate()
        .filter(|(_, line)| anchor.matches(&line.text))
        .map(|(idx, _)| idx + 1);

    match (candidates.next(), candidates.next()) {
        (None, _) => Resolution::Missing,
        (Some(to), None) => Resolution::Relocated {
            from: recorded_line,
            to,
        },
        (Some(_), Some(_)) => Resolution::Ambiguous(2 + candidates.count()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn doc(text: &str) -> Document {
        Document::from_bytes("mem.conf", text.as_bytes()).unwrap()
    }

    #[test]
    fn test_find_matches_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.conf");
        fs::write(
            &path,
            "# app\nname=demo\n\nretries=3\ntimeout=30 # seconds\n",
        )
        .unwrap();

        let found: Vec<_> = find_matches(&path, "timeout=", "#").unwrap().collect();
        assert_eq!(
            found,
            vec![MatchCandidate {
                line_number: 5,
                line_content: "timeout=30 # seconds".to_string(),
            }]
        );
    }

    #[test]
    fn test_line_reported_once_for_repeated_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ini");
        fs::write(&path, "k=1 k=2\nother\nk=3\n").unwrap();

        let lines: Vec<usize> = find_matches(&path, "k=", "")
            .unwrap()
            .map(|m| m.line_number)
            .collect();
        assert_eq!(lines, vec![1, 3]);
    }

    #[test]
    fn test_matches_is_restartable_by_clone() {
        let matches = Matches::new(doc("a=1\nb=2\na=3\n"), Anchor::new("a=", "").unwrap());
        let first: Vec<_> = matches.clone().collect();
        let second: Vec<_> = matches.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_find_matches_rejects_empty_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ini");
        fs::write(&path, "x\n").unwrap();
        assert!(matches!(
            find_matches(&path, "", "x"),
            Err(PatchError::InvalidAnchor)
        ));
    }

    #[test]
    fn test_find_matches_with_legacy_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gbk.ini");
        let (bytes, _, _) = encoding_rs::GBK.encode("[服务]\n端口=80\n");
        fs::write(&path, &bytes).unwrap();

        assert!(find_matches(&path, "端口=", "").is_err());
        let found: Vec<_> = find_matches_with(&path, "端口=", "", Some(encoding_rs::GBK))
            .unwrap()
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line_number, 2);
        assert_eq!(found[0].line_content, "端口=80");
    }

    #[test]
    fn test_find_matches_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_matches(&dir.path().join("nope"), "a", ""),
            Err(PatchError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_recorded_line() {
        let anchor = Anchor::new("port=", "").unwrap();
        assert_eq!(
            resolve(&doc("a\nport=1\n"), &anchor, 2),
            Resolution::Recorded(2)
        );
    }

    #[test]
    fn test_resolve_relocates_to_unique_line() {
        let anchor = Anchor::new("port=", "").unwrap();
        let d = doc("a\nb\nport=1\n");
        assert_eq!(
            resolve(&d, &anchor, 1),
            Resolution::Relocated { from: 1, to: 3 }
        );
        assert_eq!(
            resolve(&d, &anchor, 99),
            Resolution::Relocated { from: 99, to: 3 }
        );
    }

    #[test]
    fn test_resolve_ambiguous_and_missing() {
        let anchor = Anchor::new("port=", "").unwrap();
        assert_eq!(
            resolve(&doc("x\nport=1\nport=2\nport=3\n"), &anchor, 1),
            Resolution::Ambiguous(3)
        );
        assert_eq!(resolve(&doc("x\ny\n"), &anchor, 1), Resolution::Missing);
    }
}
