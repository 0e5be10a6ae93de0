//! Template registry: per-document-type schemas, loaded once at startup.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{DisclosureError, Result};
use crate::types::DocumentTemplate;

/// Read-only registry of document templates.
///
/// Loaded from a directory of `<document_type>.yaml` files at process start;
/// immutable afterwards, so it can be shared freely across workers.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, DocumentTemplate>,
}

impl TemplateRegistry {
    /// Load every YAML template under `dir`.
    ///
    /// A missing directory yields an empty registry (every lookup returns a
    /// degenerate template); an unreadable file inside an existing directory
    /// is a config error, since a half-loaded registry would silently skip
    /// sections for one document type.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut templates = BTreeMap::new();

        if !dir.exists() {
            warn!(dir = %dir.display(), "template directory missing; registry is empty");
            return Ok(Self { templates });
        }

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }

            let raw = std::fs::read_to_string(&path)?;
            let mut template: DocumentTemplate = serde_yaml::from_str(&raw).map_err(|e| {
                DisclosureError::Config(format!("invalid template {}: {e}", path.display()))
            })?;

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            if template.document_type.is_empty() {
                template.document_type = stem.clone();
            }

            debug!(document_type = %stem, sections = template.sections.len(), "loaded template");
            templates.insert(stem, template);
        }

        Ok(Self { templates })
    }

    /// Build a registry from in-memory templates (used by tests).
    pub fn from_templates(templates: impl IntoIterator<Item = DocumentTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|t| (t.document_type.clone(), t))
                .collect(),
        }
    }

    /// The template for `doc_type`, or a degenerate template with no
    /// expected sections when the type is unknown.
    pub fn load(&self, doc_type: &str) -> DocumentTemplate {
        self.templates
            .get(doc_type)
            .cloned()
            .unwrap_or_else(|| DocumentTemplate::degenerate(doc_type))
    }

    /// Known document types.
    pub fn list_types(&self) -> BTreeSet<String> {
        self.templates.keys().cloned().collect()
    }

    /// Display label for a document type; falls back to the raw type id.
    pub fn display_name(&self, doc_type: &str) -> String {
        self.templates
            .get(doc_type)
            .map(|t| t.display_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| doc_type.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TemplateSection;

    fn registry() -> TemplateRegistry {
        TemplateRegistry::from_templates([DocumentTemplate {
            document_type: "securities_report".into(),
            display_name: "有価証券報告書".into(),
            sections: vec![TemplateSection {
                id: "cover".into(),
                name: "表紙".into(),
                required: true,
                ..Default::default()
            }],
            keywords_for_detection: vec!["有価証券報告書".into()],
            ..Default::default()
        }])
    }

    #[test]
    fn unknown_type_returns_degenerate_template() {
        let registry = registry();
        let template = registry.load("integrated_report");
        assert!(template.is_degenerate());
        assert_eq!(template.document_type, "integrated_report");
    }

    #[test]
    fn known_type_resolves_template_and_display_name() {
        let registry = registry();
        assert_eq!(registry.load("securities_report").sections.len(), 1);
        assert_eq!(registry.display_name("securities_report"), "有価証券報告書");
        assert_eq!(registry.display_name("missing"), "missing");
        assert!(registry.list_types().contains("securities_report"));
    }
}
