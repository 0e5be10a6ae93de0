//! The structured representation of an ingested disclosure document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One page of the source PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number; dense and strictly increasing within a document.
    pub page_number: u32,

    /// Raw page text as produced by the extractor.
    pub text: String,

    /// Character count of `text`.
    pub char_count: usize,

    /// Whether the page contains any embedded raster image.
    #[serde(default)]
    pub has_images: bool,
}

impl Page {
    pub fn new(page_number: u32, text: impl Into<String>, has_images: bool) -> Self {
        let text = text.into();
        Self {
            page_number,
            char_count: text.chars().count(),
            text,
            has_images,
        }
    }
}

/// A table extracted from one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub page_number: u32,

    /// In-page table index (0-based).
    pub table_index: usize,

    /// Header cells; the first non-empty row with at least two cells.
    pub header: Vec<String>,

    /// Data rows aligned to the header.
    pub rows: Vec<Vec<String>>,

    /// Row-as-record view: each row keyed by its header cell.
    pub records: Vec<BTreeMap<String, String>>,

    pub row_count: usize,
    pub column_count: usize,

    /// True when at least 30% of data cells contain digits.
    #[serde(default)]
    pub is_numerical: bool,
}

/// A detected section: a contiguous page range plus optional extracted content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionInfo {
    /// First page of the section (1-based, inclusive).
    pub start_page: u32,

    /// Last page of the section (inclusive; `start_page <= end_page`).
    pub end_page: u32,

    /// Total characters across the section's pages, recomputed from the
    /// page records rather than taken from model output.
    pub char_count: usize,

    /// Detection confidence in [0, 1].
    pub confidence: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<ExtractedContent>,
}

impl SectionInfo {
    /// Page numbers covered by this section.
    pub fn page_numbers(&self) -> impl Iterator<Item = u32> {
        self.start_page..=self.end_page
    }

    /// Render the page range as "start-end" for display.
    pub fn page_range(&self) -> String {
        format!("{}-{}", self.start_page, self.end_page)
    }
}

/// Complete structured payload of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredData {
    /// Concatenated text of all pages.
    pub full_text: String,

    pub pages: Vec<Page>,

    #[serde(default)]
    pub tables: Vec<Table>,

    /// Section name -> section info; BTreeMap for deterministic iteration.
    #[serde(default)]
    pub sections: BTreeMap<String, SectionInfo>,
}

impl StructuredData {
    /// Concatenated text of the given section's pages, joined by newlines.
    ///
    /// Out-of-range page numbers are skipped rather than erroring; the
    /// section detector may legitimately reference pages the text extractor
    /// could not read.
    pub fn section_text(&self, section: &SectionInfo) -> String {
        section
            .page_numbers()
            .filter_map(|n| self.pages.iter().find(|p| p.page_number == n))
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tables whose page falls inside the given section.
    pub fn section_tables(&self, section: &SectionInfo) -> Vec<&Table> {
        self.tables
            .iter()
            .filter(|t| t.page_number >= section.start_page && t.page_number <= section.end_page)
            .collect()
    }

    /// Verify page numbers are 1..N dense and strictly increasing, and that
    /// every section's range is within bounds.
    pub fn validate(&self) -> Result<(), String> {
        for (idx, page) in self.pages.iter().enumerate() {
            let expected = idx as u32 + 1;
            if page.page_number != expected {
                return Err(format!(
                    "page numbers must be dense: expected {expected}, found {}",
                    page.page_number
                ));
            }
        }
        let total = self.pages.len() as u32;
        for (name, section) in &self.sections {
            if section.start_page < 1
                || section.start_page > section.end_page
                || section.end_page > total
            {
                return Err(format!(
                    "section {name:?} has invalid range {}-{} (total pages {total})",
                    section.start_page, section.end_page
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Extracted content buckets
// =============================================================================

/// The four typed buckets extracted verbatim from one section.
///
/// Nothing here is computed: every value, unit and period is sourced from the
/// section text exactly as written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    #[serde(default)]
    pub financial_data: Vec<FinancialFact>,

    #[serde(default)]
    pub accounting_notes: Vec<AccountingNote>,

    #[serde(default)]
    pub factual_info: Vec<FactualItem>,

    #[serde(default)]
    pub messages: Vec<MessageItem>,
}

impl ExtractedContent {
    pub fn is_empty(&self) -> bool {
        self.financial_data.is_empty()
            && self.accounting_notes.is_empty()
            && self.factual_info.is_empty()
            && self.messages.is_empty()
    }
}

/// A financial figure quoted from the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialFact {
    pub item: String,
    pub value: FactValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// An accounting-policy note or estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountingNote {
    pub topic: String,
    pub content: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub note_type: Option<String>,
}

/// A factual statement (company profile, organization, dates).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactualItem {
    pub category: String,
    pub item: String,
    pub value: FactValue,
}

/// A management message, strategy or risk statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageItem {
    #[serde(rename = "type")]
    pub message_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
}

/// A value quoted from the document: a scalar, or a period -> scalar mapping
/// when the source states the same item for several periods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    Scalar(ScalarValue),
    ByPeriod(BTreeMap<String, ScalarValue>),
}

/// A scalar quoted from the document, numeric or textual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Number(f64),
    Text(String),
}

impl ScalarValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScalarValue::Number(n) => Some(*n),
            ScalarValue::Text(_) => None,
        }
    }
}

impl FactValue {
    /// The scalar numeric value, if this fact is a plain number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FactValue::Scalar(s) => s.as_number(),
            FactValue::ByPeriod(_) => None,
        }
    }
}

/// Tone label used in messages and tone analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Positive,
    Neutral,
    Negative,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fact_value_parses_scalar_and_mapping() {
        let scalar: FactValue = serde_json::from_str("1234.5").unwrap();
        assert_eq!(scalar.as_number(), Some(1234.5));

        let mapped: FactValue =
            serde_json::from_str(r#"{"2023年3月期": 100, "2024年3月期": 120}"#).unwrap();
        assert!(mapped.as_number().is_none());
        match mapped {
            FactValue::ByPeriod(map) => assert_eq!(map.len(), 2),
            FactValue::Scalar(_) => panic!("expected period mapping"),
        }
    }

    #[test]
    fn validate_rejects_sparse_page_numbers() {
        let data = StructuredData {
            pages: vec![Page::new(1, "a", false), Page::new(3, "b", false)],
            ..Default::default()
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_sections() {
        let mut data = StructuredData {
            pages: vec![Page::new(1, "a", false), Page::new(2, "b", false)],
            ..Default::default()
        };
        data.sections.insert(
            "overview".into(),
            SectionInfo {
                start_page: 1,
                end_page: 5,
                char_count: 0,
                confidence: 1.0,
                extracted_content: None,
            },
        );
        assert!(data.validate().is_err());
    }

    #[test]
    fn section_text_joins_pages_in_order() {
        let data = StructuredData {
            pages: vec![
                Page::new(1, "first", false),
                Page::new(2, "second", false),
                Page::new(3, "third", false),
            ],
            ..Default::default()
        };
        let section = SectionInfo {
            start_page: 2,
            end_page: 3,
            char_count: 0,
            confidence: 1.0,
            extracted_content: None,
        };
        assert_eq!(data.section_text(&section), "second\nthird");
    }
}
