//! Template persistence.
//!
//! The patch engine only needs the [`TemplateStore`] interface.
//! [`JsonTemplateStore`] is the bundled implementation: one pretty-printed
//! `<id>.json` file per template in a single directory.

use crate::edit::atomic_write;
use crate::model::{Template, TemplateSummary, ValidationError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Invalid template id: {0:?}")]
    InvalidId(String),

    #[error("Invalid template: {0}")]
    Validation(#[from] ValidationError),

    #[error("Template store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed template file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistence interface consumed by the patch engine and the CLI.
pub trait TemplateStore {
    fn list_templates(&self) -> Result<Vec<TemplateSummary>, StoreError>;

    fn get_template(&self, id: &str) -> Result<Template, StoreError>;

    /// Validate, assign missing ids and persist. Returns the stored template.
    fn save_template(&self, template: Template) -> Result<Template, StoreError>;

    fn delete_template(&self, id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct JsonTemplateStore {
    dir: PathBuf,
}

impl JsonTemplateStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        let plain = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\'])
            && Path::new(id).file_name().is_some();
        if !plain {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    fn load(path: &Path) -> Result<Template, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl TemplateStore for JsonTemplateStore {
    fn list_templates(&self) -> Result<Vec<TemplateSummary>, StoreError> {
        let mut summaries = Vec::new();

        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| StoreError::Io {
                path: self.dir.clone(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file()
                || entry.path().extension().and_then(|s| s.to_str()) != Some("json")
            {
                continue;
            }

            match Self::load(entry.path()) {
                Ok(template) => summaries.push(TemplateSummary::from(&template)),
                Err(e) => warn!(error = %e, "skipping unreadable template file"),
            }
        }

        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        debug!(count = summaries.len(), dir = %self.dir.display(), "listed templates");
        Ok(summaries)
    }

    fn get_template(&self, id: &str) -> Result<Template, StoreError> {
        let path = self.path_for(id)?;
        if !path.is_file() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Self::load(&path)
    }

    fn save_template(&self, mut template: Template) -> Result<Template, StoreError> {
        template.validate()?;
        template.assign_ids();

        let path = self.path_for(&template.id)?;
        let json = serde_json::to_string_pretty(&template).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        atomic_write(&path, json.as_bytes(), None).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        info!(id = %template.id, name = %template.name, "template saved");
        Ok(template)
    }

    fn delete_template(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(id, "template deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(id.to_string()))
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}
