//! Editing a template as an explicit session.
//!
//! A session owns a working copy of one template. Nothing reaches the store
//! until [`EditSession::save`]; [`EditSession::cancel`] drops the copy.

use crate::anchor::Anchor;
use crate::error::PatchError;
use crate::model::{new_id, ConfigItem, MatchCandidate, Target, Template};
use crate::path::resolve_path;
use crate::store::{StoreError, TemplateStore};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
#[must_use = "an EditSession must be saved or cancelled"]
pub struct EditSession {
    working: Template,
    base_dir: PathBuf,
}

impl EditSession {
    /// Start editing a new, empty template.
    pub fn create(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            working: Template::new(name),
            base_dir: base_dir.into(),
        }
    }

    /// Start editing a stored template.
    pub fn open(
        store: &dyn TemplateStore,
        id: &str,
        base_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            working: store.get_template(id)?,
            base_dir: base_dir.into(),
        })
    }

    pub fn template(&self) -> &Template {
        &self.working
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.working.description = description.into();
    }

    /// Append a new item and return its id.
    pub fn add_item(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        default_value: impl Into<String>,
    ) -> String {
        let id = new_id();
        self.working.items.push(ConfigItem {
            id: id.clone(),
            name: name.into(),
            description: description.into(),
            default_value: default_value.into(),
            ..ConfigItem::default()
        });
        id
    }

    pub fn remove_item(&mut self, item_id: &str) -> Option<ConfigItem> {
        let idx = self.working.items.iter().position(|i| i.id == item_id)?;
        Some(self.working.items.remove(idx))
    }

    /// Record a target from a line the operator picked out of a search.
    ///
    /// Returns the new target id, or `None` if `item_id` is unknown.
    pub fn add_target_from_match(
        &mut self,
        item_id: &str,
        raw_path: &str,
        candidate: &MatchCandidate,
        prefix: &str,
        suffix: &str,
    ) -> Result<Option<String>, PatchError> {
        let anchor = Anchor::new(prefix, suffix)?;
        let file_path = resolve_path(raw_path, &self.base_dir);

        let Some(item) = self.working.items.iter_mut().find(|i| i.id == item_id) else {
            return Ok(None);
        };

        let id = new_id();
        item.targets.push(Target {
            id: id.clone(),
            file_path,
            line_number: candidate.line_number,
            prefix: anchor.prefix().to_string(),
            suffix: anchor.suffix().to_string(),
        });
        Ok(Some(id))
    }

    pub fn remove_target(&mut self, item_id: &str, target_id: &str) -> Option<Target> {
        let item = self.working.items.iter_mut().find(|i| i.id == item_id)?;
        let idx = item.targets.iter().position(|t| t.id == target_id)?;
        Some(item.targets.remove(idx))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Validate and persist the working copy, ending the session.
    pub fn save(self, store: &dyn TemplateStore) -> Result<Template, StoreError> {
        store.save_template(self.working)
    }

    /// Discard the working copy.
    pub fn cancel(self) {}
}
