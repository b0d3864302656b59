use encoding_rs::Encoding;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Runtime settings, read from `confpatch.toml`.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding one JSON file per template.
    pub templates_dir: PathBuf,
    /// Directory that relative target paths are resolved against.
    pub base_dir: PathBuf,
    /// Upper bound on files processed in parallel during one apply.
    pub max_workers: usize,
    /// Refuse a write when the file changed on disk after it was validated.
    pub verify_unchanged: bool,
    /// WHATWG label of the encoding tried for files that are not valid UTF-8.
    /// Empty disables the fallback.
    pub fallback_encoding: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            templates_dir: default_templates_dir(),
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            max_workers: 4,
            verify_unchanged: true,
            fallback_encoding: "gbk".to_string(),
        }
    }
}

fn default_templates_dir() -> PathBuf {
    match home::home_dir() {
        Some(home) => home.join(".confpatch").join("templates"),
        None => PathBuf::from(".confpatch").join("templates"),
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), InvalidSetting> {
        if self.max_workers == 0 {
            return Err(InvalidSetting {
                field: "max_workers",
                message: "must be at least 1".to_string(),
            });
        }
        if self.templates_dir.as_os_str().is_empty() {
            return Err(InvalidSetting {
                field: "templates_dir",
                message: "must not be empty".to_string(),
            });
        }
        if self.base_dir.as_os_str().is_empty() {
            return Err(InvalidSetting {
                field: "base_dir",
                message: "must not be empty".to_string(),
            });
        }
        self.fallback_encoding()?;
        Ok(())
    }

    /// The configured fallback encoding, `None` when disabled.
    ///
    /// Only encodings that write back what they read are accepted, and UTF-8
    /// is refused since it is always tried first.
    pub fn fallback_encoding(&self) -> Result<Option<&'static Encoding>, InvalidSetting> {
        let label = self.fallback_encoding.trim();
        if label.is_empty() {
            return Ok(None);
        }

        let invalid = |message: String| InvalidSetting {
            field: "fallback_encoding",
            message,
        };
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| invalid(format!("'{label}' is not a known encoding")))?;
        if encoding == encoding_rs::UTF_8 || encoding.output_encoding() != encoding {
            return Err(invalid(format!(
                "'{}' cannot be used as a fallback",
                encoding.name()
            )));
        }
        Ok(Some(encoding))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("setting '{field}' {message}")]
pub struct InvalidSetting {
    pub field: &'static str,
    pub message: String,
}
