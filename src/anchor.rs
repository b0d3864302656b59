use crate::error::PatchError;
use std::ops::Range;

/// A literal `(prefix, suffix)` pair locating a value on a single line.
///
/// The value is the text between the end of the first `prefix` occurrence
/// and the start of the first `suffix` occurrence after it, less any
/// whitespace padding on either side. An empty suffix means the value runs to
/// the end of the line. Padding belongs to the layout, not the value, so it
/// survives a substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    prefix: String,
    suffix: String,
}

impl Anchor {
    /// Build an anchor, rejecting an empty prefix.
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Result<Self, PatchError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(PatchError::InvalidAnchor);
        }
        Ok(Self {
            prefix,
            suffix: suffix.into(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Byte range of the anchored value within `line`, if the line satisfies
    /// the anchor.
    pub fn value_span(&self, line: &str) -> Option<Range<usize>> {
        let start = line.find(&self.prefix)? + self.prefix.len();
        let end = if self.suffix.is_empty() {
            line.len()
        } else {
            start + line[start..].find(&self.suffix)?
        };

        let raw = &line[start..end];
        let lead = raw.len() - raw.trim_start().len();
        let value = raw.trim();
        Some(start + lead..start + lead + value.len())
    }

    pub fn matches(&self, line: &str) -> bool {
        self.value_span(line).is_some()
    }

    /// The value currently held between prefix and suffix.
    pub fn extract<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.value_span(line).map(|span| &line[span])
    }

    /// Rebuild `line` with `value` in place of the anchored value.
    ///
    /// Everything outside the value span, including prefix and suffix, is kept.
    /// `value` is trimmed first, since a value never carries its own padding.
    pub fn substitute(&self, line: &str, value: &str) -> Option<String> {
        let span = self.value_span(line)?;
        let value = value.trim();
        let mut out = String::with_capacity(line.len() - span.len() + value.len());
        out.push_str(&line[..span.start]);
        out.push_str(value);
        out.push_str(&line[span.end..]);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prefix_rejected() {
        assert!(matches!(Anchor::new("", "#"), Err(PatchError::InvalidAnchor)));
    }

    #[test]
    fn test_value_span_with_suffix() {
        let anchor = Anchor::new("timeout=", "#").unwrap();
        let line = "timeout=30 # seconds";
        assert_eq!(anchor.extract(line), Some("30"));
        assert_eq!(
            anchor.substitute(line, "60").as_deref(),
            Some("timeout=60 # seconds")
        );
    }

    #[test]
    fn test_padding_is_kept_around_new_value() {
        let anchor = Anchor::new("port =", "").unwrap();
        assert_eq!(anchor.extract("port =  80\t"), Some("80"));
        assert_eq!(
            anchor.substitute("port =  80\t", "8080").as_deref(),
            Some("port =  8080\t")
        );
    }

    #[test]
    fn test_padded_new_value_is_stable() {
        let anchor = Anchor::new("timeout=", "#").unwrap();
        let once = anchor.substitute("timeout=30 # seconds", " 60 ").unwrap();
        assert_eq!(once, "timeout=60 # seconds");
        assert_eq!(anchor.substitute(&once, " 60 ").as_deref(), Some(once.as_str()));
    }

    #[test]
    fn test_blank_value_inserts_after_padding() {
        let anchor = Anchor::new("key=", ";").unwrap();
        assert_eq!(anchor.extract("key=  ;"), Some(""));
        assert_eq!(anchor.substitute("key=  ;", "v").as_deref(), Some("key=  v;"));
    }

    #[test]
    fn test_value_span_without_suffix_runs_to_end() {
        let anchor = Anchor::new("host = ", "").unwrap();
        assert_eq!(anchor.extract("  host = db.local"), Some("db.local"));
        assert_eq!(
            anchor.substitute("  host = db.local", "db.prod").as_deref(),
            Some("  host = db.prod")
        );
    }

    #[test]
    fn test_suffix_must_follow_prefix() {
        let anchor = Anchor::new("port=", ";").unwrap();
        assert!(!anchor.matches("; port=80"));
        assert!(anchor.matches("; port=80;"));
    }

    #[test]
    fn test_first_prefix_occurrence_bounds_value() {
        let anchor = Anchor::new("v=", ",").unwrap();
        let line = "v=1, v=2,";
        assert_eq!(anchor.extract(line), Some("1"));
        assert_eq!(anchor.substitute(line, "9").as_deref(), Some("v=9, v=2,"));
    }

    #[test]
    fn test_adjacent_prefix_and_suffix_give_empty_value() {
        let anchor = Anchor::new("\"", "\"").unwrap();
        assert_eq!(anchor.extract("name=\"\""), Some(""));
        assert_eq!(
            anchor.substitute("name=\"\"", "app").as_deref(),
            Some("name=\"app\"")
        );
    }

    #[test]
    fn test_non_ascii_boundaries() {
        let anchor = Anchor::new("名称=", "；").unwrap();
        assert_eq!(anchor.extract("名称=测试；备注"), Some("测试"));
    }
}
