//! Per-document-type templates: expected sections and detection keywords.
//!
//! Templates are loaded once at startup and treated as immutable.

use serde::{Deserialize, Serialize};

/// A template describing the expected structure of one document type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentTemplate {
    pub document_type: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub sections: Vec<TemplateSection>,

    /// Section ids the comparison UI highlights.
    #[serde(default)]
    pub important_sections: Vec<String>,

    /// Keywords the classifier matches against filename + text sample.
    #[serde(default)]
    pub keywords_for_detection: Vec<String>,
}

/// One expected section, possibly nested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateSection {
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub alternative_names: Vec<String>,

    #[serde(default)]
    pub items: Vec<TemplateSection>,

    #[serde(default)]
    pub tables: Vec<String>,

    #[serde(default)]
    pub subsections: Vec<TemplateSection>,
}

impl DocumentTemplate {
    /// Degenerate template for unknown document types: no expected sections.
    pub fn degenerate(document_type: impl Into<String>) -> Self {
        let document_type = document_type.into();
        Self {
            display_name: document_type.clone(),
            document_type,
            ..Default::default()
        }
    }

    /// All expected section names, flattened. Nested subsections and items
    /// are joined to their parents with " - " (parent - child - grandchild).
    pub fn flattened_section_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for section in &self.sections {
            names.push(section.name.clone());
            collect_nested(section, &section.name, &mut names);
        }
        names
    }

    /// Render the section hierarchy as an indented tree for prompts.
    /// Required sections are marked with a star.
    pub fn render_tree(&self) -> String {
        let mut lines = Vec::new();
        for section in &self.sections {
            render_section(section, 0, &mut lines);
        }
        lines.join("\n")
    }

    /// Whether the template carries no expected sections.
    pub fn is_degenerate(&self) -> bool {
        self.sections.is_empty()
    }
}

fn collect_nested(parent: &TemplateSection, parent_path: &str, names: &mut Vec<String>) {
    for child in parent.subsections.iter().chain(parent.items.iter()) {
        let combined = format!("{parent_path} - {}", child.name);
        names.push(combined.clone());
        collect_nested(child, &combined, names);
    }
}

fn render_section(section: &TemplateSection, indent: usize, lines: &mut Vec<String>) {
    let prefix = "  ".repeat(indent);
    let required_mark = if section.required { " ⭐" } else { "" };
    lines.push(format!("{prefix}- {}{required_mark}", section.name));
    for child in section.subsections.iter().chain(section.items.iter()) {
        render_section(child, indent + 1, lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> DocumentTemplate {
        serde_yaml::from_str(
            r#"
document_type: securities_report
display_name: 有価証券報告書
sections:
  - id: cover
    name: 表紙
    required: true
  - id: corporate
    name: 企業情報
    required: true
    subsections:
      - id: overview
        name: 企業の概況
        items:
          - id: kpis
            name: 主要な経営指標等の推移
keywords_for_detection:
  - 有価証券報告書
"#,
        )
        .unwrap()
    }

    #[test]
    fn flattening_joins_nested_names_with_dashes() {
        let names = template().flattened_section_names();
        assert_eq!(
            names,
            vec![
                "表紙",
                "企業情報",
                "企業情報 - 企業の概況",
                "企業情報 - 企業の概況 - 主要な経営指標等の推移",
            ]
        );
    }

    #[test]
    fn tree_marks_required_sections() {
        let tree = template().render_tree();
        assert!(tree.contains("- 表紙 ⭐"));
        assert!(tree.contains("  - 企業の概況"));
        assert!(tree.contains("    - 主要な経営指標等の推移"));
    }

    #[test]
    fn degenerate_template_has_no_sections() {
        let t = DocumentTemplate::degenerate("unknown");
        assert!(t.is_degenerate());
        assert!(t.flattened_section_names().is_empty());
    }
}
