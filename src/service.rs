//! Entry points used by the CLI and the JSON API.
//!
//! [`PatchService`] owns the path rules (cleaning and `base_dir` resolution)
//! and delegates to the matcher, the applier and the inspector.

use crate::applier::{Applier, Outcome, TargetReport};
use crate::config::Settings;
use crate::error::PatchError;
use crate::inspect::{inspect_template, TemplateStatus};
use crate::matcher::{find_matches_with, Matches};
use crate::model::{Modification, Target, Template};
use crate::path::resolve_path;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-target results of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    /// Targets reported `Applied`, including ones that already held the value.
    pub applied_count: usize,
    pub results: Vec<TargetReport>,
}

impl ApplySummary {
    fn new(results: Vec<TargetReport>) -> Self {
        Self {
            applied_count: results.iter().filter(|r| r.outcome.is_applied()).count(),
            results,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.outcome.is_failed())
    }
}

#[derive(Debug, Clone)]
pub struct PatchService {
    applier: Applier,
    base_dir: PathBuf,
}

impl PatchService {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            applier: Applier::new(),
            base_dir: base_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            applier: Applier::new()
                .with_max_workers(settings.max_workers)
                .with_verify_unchanged(settings.verify_unchanged)
                .with_fallback_encoding(settings.fallback_encoding().unwrap_or_default()),
            base_dir: settings.base_dir.clone(),
        }
    }

    pub fn with_applier(mut self, applier: Applier) -> Self {
        self.applier = applier;
        self
    }

    pub fn applier(&self) -> &Applier {
        &self.applier
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Clean `raw` and resolve it against `base_dir`.
    pub fn normalize(&self, raw: &str) -> PathBuf {
        resolve_path(raw, &self.base_dir)
    }

    /// Lines of `file_path` satisfying the anchor. The file is read once,
    /// under its lock; the returned sequence walks that snapshot.
    pub fn search_anchor(
        &self,
        file_path: &str,
        prefix: &str,
        suffix: &str,
    ) -> Result<Matches, PatchError> {
        let path = self.normalize(file_path);
        debug!(file = %path.display(), prefix, suffix, "searching anchor");
        self.applier
            .locks()
            .with_lock(&path, || {
                find_matches_with(&path, prefix, suffix, self.applier.fallback_encoding())
            })
    }

    pub fn apply_modifications(&self, modifications: &[Modification]) -> ApplySummary {
        let batch: Vec<Modification> = modifications
            .iter()
            .map(|m| Modification::new(self.normalize_target(&m.target), m.new_value.clone()))
            .collect();
        let outcomes = self.applier.apply(&batch);
        ApplySummary::new(reports(&batch, &vec![None; batch.len()], outcomes))
    }

    /// Write the supplied values to every target of the matching items.
    ///
    /// `values` is keyed by config item id; items with no value, or an empty
    /// one, are left alone. The template itself is not modified.
    pub fn apply_template_values(
        &self,
        template: &Template,
        values: &HashMap<String, String>,
    ) -> ApplySummary {
        let (batch, items) = self.expand(template, values);
        let outcomes = self.applier.apply(&batch);
        ApplySummary::new(reports(&batch, &items, outcomes))
    }

    /// What [`PatchService::apply_template_values`] would report, without writing.
    pub fn check_template_values(
        &self,
        template: &Template,
        values: &HashMap<String, String>,
    ) -> ApplySummary {
        let (batch, items) = self.expand(template, values);
        let outcomes = self.applier.check(&batch);
        ApplySummary::new(reports(&batch, &items, outcomes))
    }

    pub fn inspect_template(&self, template: &Template) -> TemplateStatus {
        let mut normalized = template.clone();
        for target in normalized.items.iter_mut().flat_map(|i| i.targets.iter_mut()) {
            target.file_path = self.normalize(&target.file_path.to_string_lossy());
        }
        inspect_template(
            &normalized,
            self.applier.locks(),
            self.applier.fallback_encoding(),
        )
    }

    fn normalize_target(&self, target: &Target) -> Target {
        Target {
            file_path: self.normalize(&target.file_path.to_string_lossy()),
            ..target.clone()
        }
    }

    fn expand(
        &self,
        template: &Template,
        values: &HashMap<String, String>,
    ) -> (Vec<Modification>, Vec<Option<String>>) {
        let mut batch = Vec::new();
        let mut items = Vec::new();
        for item in &template.items {
            let Some(value) = values.get(&item.id).filter(|v| !v.is_empty()) else {
                continue;
            };
            for target in &item.targets {
                batch.push(Modification::new(self.normalize_target(target), value.clone()));
                items.push(Some(item.id.clone()));
            }
        }
        for key in values.keys() {
            if template.item(key).is_none() {
                debug!(item = %key, template = %template.id, "value for unknown item ignored");
            }
        }
        (batch, items)
    }
}

fn reports(
    batch: &[Modification],
    items: &[Option<String>],
    outcomes: Vec<Outcome>,
) -> Vec<TargetReport> {
    batch
        .iter()
        .zip(items)
        .zip(outcomes)
        .map(|((modification, item_id), outcome)| TargetReport {
            item_id: item_id.clone(),
            target_id: modification.target.id.clone(),
            file_path: modification.target.file_path.clone(),
            new_value: modification.new_value.clone(),
            outcome,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::FailureReason;
    use crate::model::ConfigItem;
    use std::fs;

    fn target(id: &str, path: &str, line: usize, prefix: &str) -> Target {
        Target {
            id: id.to_string(),
            file_path: PathBuf::from(path),
            line_number: line,
            prefix: prefix.to_string(),
            suffix: String::new(),
        }
    }

    fn template() -> Template {
        let mut template = Template::new("svc");
        template.id = "tpl".into();
        template.items = vec![
            ConfigItem {
                id: "port".into(),
                name: "port".into(),
                current_value: "80".into(),
                targets: vec![
                    target("t1", "a.conf", 1, "port="),
                    target("t2", "b.conf", 2, "listen="),
                ],
                ..ConfigItem::default()
            },
            ConfigItem {
                id: "host".into(),
                name: "host".into(),
                targets: vec![target("t3", "a.conf", 2, "host=")],
                ..ConfigItem::default()
            },
        ];
        template
    }

    #[test]
    fn test_search_resolves_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.conf"), "port=80\nhost=x\nport=81\n").unwrap();

        let service = PatchService::new(dir.path());
        let found: Vec<usize> = service
            .search_anchor(" a.conf\u{200B}", "port=", "")
            .unwrap()
            .map(|m| m.line_number)
            .collect();
        assert_eq!(found, vec![1, 3]);
    }

    #[test]
    fn test_apply_template_values_expands_items() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.conf"), "port=80\nhost=x\n").unwrap();
        fs::write(dir.path().join("b.conf"), "# b\nlisten=80\n").unwrap();

        let service = PatchService::new(dir.path());
        let template = template();
        let values = HashMap::from([
            ("port".to_string(), "9090".to_string()),
            ("host".to_string(), String::new()),
        ]);

        let summary = service.apply_template_values(&template, &values);
        assert_eq!(summary.applied_count, 2);
        assert_eq!(summary.results.len(), 2);
        assert!(summary
            .results
            .iter()
            .all(|r| r.item_id.as_deref() == Some("port")));
        assert_eq!(
            fs::read_to_string(dir.path().join("a.conf")).unwrap(),
            "port=9090\nhost=x\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("b.conf")).unwrap(),
            "# b\nlisten=9090\n"
        );
        // Never touched by an apply.
        assert_eq!(template.items[0].current_value, "80");
    }

    #[test]
    fn test_check_reports_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.conf"), "port=80\nhost=x\n").unwrap();

        let service = PatchService::new(dir.path());
        let values = HashMap::from([("port".to_string(), "1".to_string())]);
        let summary = service.check_template_values(&template(), &values);

        assert!(summary.results[0].outcome.is_applied());
        assert_eq!(
            summary.results[1].outcome,
            Outcome::Failed {
                reason: FailureReason::FileNotFound
            }
        );
        assert!(summary.has_failures());
        assert_eq!(
            fs::read_to_string(dir.path().join("a.conf")).unwrap(),
            "port=80\nhost=x\n"
        );
    }

    #[test]
    fn test_summary_json_shape() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.conf"), "port=80\n").unwrap();

        let service = PatchService::new(dir.path());
        let summary =
            service.apply_modifications(&[Modification::new(target("t1", "a.conf", 1, "port="), "81")]);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["appliedCount"], 1);
        assert_eq!(json["results"][0]["targetId"], "t1");
        assert_eq!(json["results"][0]["outcome"]["status"], "applied");
        assert!(json["results"][0].get("itemId").is_none());
    }
}
