use crate::config::settings::{InvalidSetting, Settings};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to produce [`Settings`]. `path` is `None` when parsing a string.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read settings from {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse settings TOML{}: {source}", origin(.path))]
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },

    #[error("invalid settings{}: {source}", origin(.path))]
    Validation {
        path: Option<PathBuf>,
        source: InvalidSetting,
    },
}

fn origin(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|path| format!(" ({})", path.display()))
        .unwrap_or_default()
}

pub fn load_from_str(input: &str) -> Result<Settings, ConfigError> {
    parse(input, None)
}

fn parse(input: &str, path: Option<&Path>) -> Result<Settings, ConfigError> {
    let located = || path.map(Path::to_path_buf);
    let settings: Settings = toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml {
        path: located(),
        source,
    })?;
    settings
        .validate()
        .map_err(|source| ConfigError::Validation {
            path: located(),
            source,
        })?;
    Ok(settings)
}

/// Load settings from a file. Relative directories in the file are resolved
/// against the file's own directory.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings = parse(&contents, Some(path))?;

    if let Some(dir) = path.parent() {
        if settings.templates_dir.is_relative() {
            settings.templates_dir = dir.join(&settings.templates_dir);
        }
        if settings.base_dir.is_relative() {
            settings.base_dir = dir.join(&settings.base_dir);
        }
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let settings = load_from_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_overrides() {
        let settings = load_from_str(
            r#"
templates_dir = "/var/lib/confpatch"
max_workers = 8
verify_unchanged = false
"#,
        )
        .unwrap();
        assert_eq!(settings.templates_dir, PathBuf::from("/var/lib/confpatch"));
        assert_eq!(settings.max_workers, 8);
        assert!(!settings.verify_unchanged);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = load_from_str("max_workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            load_from_str("workers = 3"),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[test]
    fn test_relative_dirs_resolve_against_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confpatch.toml");
        fs::write(&path, "templates_dir = \"tpl\"\nbase_dir = \"targets\"\n").unwrap();

        let settings = load_from_path(&path).unwrap();
        assert_eq!(settings.templates_dir, dir.path().join("tpl"));
        assert_eq!(settings.base_dir, dir.path().join("targets"));
    }

    #[test]
    fn test_fallback_encoding_setting() {
        let settings = load_from_str("").unwrap();
        assert_eq!(settings.fallback_encoding().unwrap(), Some(encoding_rs::GBK));

        let settings = load_from_str("fallback_encoding = \"windows-1252\"").unwrap();
        assert_eq!(
            settings.fallback_encoding().unwrap(),
            Some(encoding_rs::WINDOWS_1252)
        );

        let settings = load_from_str("fallback_encoding = \"\"").unwrap();
        assert_eq!(settings.fallback_encoding().unwrap(), None);
    }

    #[test]
    fn test_unusable_fallback_encoding_rejected() {
        for label in ["klingon", "utf-8", "utf-16le"] {
            let err = load_from_str(&format!("fallback_encoding = \"{label}\"")).unwrap_err();
            assert!(matches!(err, ConfigError::Validation { path: None, .. }), "{label}");
            assert!(err.to_string().contains("fallback_encoding"), "{err}");
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as _;

        let err = load_from_str("max_workers = 0").unwrap_err();
        assert_eq!(err.to_string(), "invalid settings: setting 'max_workers' must be at least 1");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("absent.toml"));
    }

    #[test]
    fn test_error_carries_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confpatch.toml");
        fs::write(&path, "max_workers = \"many\"").unwrap();

        let err = load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("confpatch.toml"));
    }
}
