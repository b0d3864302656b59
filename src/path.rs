//! Cleaning of operator-supplied file paths.
//!
//! Paths are frequently copy-pasted from file explorers and chat windows and
//! carry invisible formatting characters or the "wrong" slash direction. The
//! same cleaning runs before a search and before an apply so that a stored
//! target path always compares equal to the path it was searched with.

use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Invisible characters removed from raw paths.
fn is_invisible(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '\u{00AD}'
                | '\u{061C}'
                | '\u{180E}'
                | '\u{200B}'..='\u{200F}'
                | '\u{202A}'..='\u{202E}'
                | '\u{2060}'..='\u{2064}'
                | '\u{2066}'..='\u{206F}'
                | '\u{FEFF}'
        )
}

/// Strip invisible characters, trim, and rewrite every `/` or `\` to `separator`.
pub fn clean_path(raw: &str, separator: char) -> String {
    let visible: String = raw.chars().filter(|c| !is_invisible(*c)).collect();
    visible
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' { separator } else { c })
        .collect()
}

/// [`clean_path`] with the host's native separator.
pub fn normalize_path(raw: &str) -> PathBuf {
    PathBuf::from(clean_path(raw, MAIN_SEPARATOR))
}

/// Normalize `raw` and anchor it to `base_dir` when it is relative.
pub fn resolve_path(raw: &str, base_dir: &Path) -> PathBuf {
    let normalized = normalize_path(raw);
    if normalized.is_absolute() {
        normalized
    } else {
        base_dir.join(normalized)
    }
}
