//! Comparison artifacts: mode, mappings, differences and per-section analyses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::ProgressRecord;
use super::structured::Tone;

/// Schema version written into every persisted comparison artifact.
pub const COMPARISON_SCHEMA_VERSION: u32 = 1;

/// How two documents are being compared. A pure function of the document
/// profiles; see the comparison orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    /// Same company, different document types.
    ConsistencyCheck,
    /// Same company and type, different fiscal years.
    DiffAnalysisYear,
    /// Different companies, same document type.
    DiffAnalysisCompany,
    /// More than two inputs.
    MultiDocument,
}

/// Iterative re-exploration policy for a comparison run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterativeSearchMode {
    #[default]
    Off,
    /// Re-explore only sections whose first-pass importance is high.
    HighOnly,
    /// Re-explore every analyzed section.
    All,
}

/// Snapshot of one input document, copied into the artifact so that
/// post-comparison document deletion does not corrupt it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub document_id: String,
    pub filename: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type_label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiscal_year: Option<i32>,

    /// Confidence of the company/fiscal-year extraction, in [0, 1].
    #[serde(default)]
    pub extraction_confidence: f32,
}

/// How a section pair was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    /// Identical canonical names; confidence is always 1.0.
    Exact,
    /// Embedding cosine similarity; confidence is the similarity in [0.7, 1.0].
    Embedding,
}

/// A pair of sections believed to cover the same content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionMapping {
    pub doc1_section: String,
    pub doc2_section: String,
    pub confidence_score: f32,
    pub mapping_method: MappingMethod,
}

/// A numeric delta between matched financial items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericalDifference {
    pub section: String,
    pub item_name: String,
    pub value1: f64,
    pub value2: f64,
    pub difference: f64,

    /// `difference / |value1|`; absent when value1 is zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difference_pct: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_unit: Option<String>,

    pub is_significant: bool,
}

/// Coarse line-level text delta for summary statistics. Not a substitute for
/// the per-section model analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDifference {
    pub section: String,

    /// Ratcliff/Obershelp match ratio in [0, 1].
    pub match_ratio: f64,

    #[serde(default)]
    pub added_text: Vec<String>,
    #[serde(default)]
    pub removed_text: Vec<String>,
    #[serde(default)]
    pub changed_text: Vec<(String, String)>,
}

/// A before/after pair reported by the year-over-year analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifiedItem {
    pub before: String,
    pub after: String,
}

/// Diverging treatment of one aspect, reported by the cross-company analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApproachDifference {
    pub aspect: String,
    pub company1_approach: String,
    pub company2_approach: String,
}

/// Mode-specific text findings for one section pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TextChanges {
    /// Consistency-check findings (same company, different document types).
    Consistency {
        #[serde(default)]
        contradictions: Vec<String>,
        #[serde(default)]
        normal_differences: Vec<String>,
        #[serde(default)]
        complementary_info: Vec<String>,
        /// 1 (inconsistent) to 5 (fully consistent).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consistency_score: Option<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consistency_reason: Option<String>,
    },
    /// Year-over-year findings.
    Year {
        #[serde(default)]
        added: Vec<String>,
        #[serde(default)]
        removed: Vec<String>,
        #[serde(default)]
        modified: Vec<ModifiedItem>,
    },
    /// Cross-company findings.
    Company {
        #[serde(default)]
        only_in_company1: Vec<String>,
        #[serde(default)]
        only_in_company2: Vec<String>,
        #[serde(default)]
        different_approaches: Vec<ApproachDifference>,
    },
}

impl TextChanges {
    /// Empty findings for the given mode.
    pub fn empty_for(mode: ComparisonMode) -> Self {
        match mode {
            ComparisonMode::ConsistencyCheck => TextChanges::Consistency {
                contradictions: Vec::new(),
                normal_differences: Vec::new(),
                complementary_info: Vec::new(),
                consistency_score: None,
                consistency_reason: None,
            },
            ComparisonMode::DiffAnalysisYear => TextChanges::Year {
                added: Vec::new(),
                removed: Vec::new(),
                modified: Vec::new(),
            },
            ComparisonMode::DiffAnalysisCompany | ComparisonMode::MultiDocument => {
                TextChanges::Company {
                    only_in_company1: Vec::new(),
                    only_in_company2: Vec::new(),
                    different_approaches: Vec::new(),
                }
            }
        }
    }

    /// Contradictions from a consistency analysis; empty for other modes.
    pub fn contradictions(&self) -> &[String] {
        match self {
            TextChanges::Consistency { contradictions, .. } => contradictions,
            _ => &[],
        }
    }

    /// Modified items from a year-over-year analysis; empty for other modes.
    pub fn modified(&self) -> &[ModifiedItem] {
        match self {
            TextChanges::Year { modified, .. } => modified,
            _ => &[],
        }
    }
}

/// A numeric change reported inside a per-section analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NumericalChange {
    #[serde(default, alias = "metric")]
    pub item: String,

    #[serde(default, alias = "company1_value", skip_serializing_if = "Option::is_none")]
    pub value1: Option<f64>,
    #[serde(default, alias = "company2_value", skip_serializing_if = "Option::is_none")]
    pub value2: Option<f64>,

    #[serde(default, alias = "difference_pct", skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_significant: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Tone and disclosure-style observations for one section pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToneAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone1: Option<Tone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone2: Option<Tone>,

    /// 1.0 (neutral) to 5.0 (strongly negative).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negativity_score1: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negativity_score2: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_level1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_level2: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difference: Option<String>,
}

/// Importance label of an analyzed section pair. `High` is reserved for
/// material contradictions or changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    High,
    Medium,
    Low,
}

/// A passage pulled in by one iterative re-exploration round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoundPassage {
    /// Which document the passage came from: 1 or 2.
    pub side: u8,
    pub section: String,
    pub excerpt: String,
    pub similarity: f32,
}

/// One iterative re-exploration round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditionalSearch {
    pub iteration: u32,
    pub search_keywords: Vec<String>,
    pub found_sections: Vec<FoundPassage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

/// The detailed model analysis of one mapped section pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionDetailedComparison {
    pub section_name: String,

    /// "start-end" display ranges.
    pub doc1_page_range: String,
    pub doc2_page_range: String,

    pub doc1_section_name: String,
    pub doc2_section_name: String,
    pub mapping_confidence: f32,
    pub mapping_method: MappingMethod,

    pub text_changes: TextChanges,

    #[serde(default)]
    pub numerical_changes: Vec<NumericalChange>,

    #[serde(default)]
    pub tone_analysis: ToneAnalysis,

    pub importance: Importance,
    pub importance_reason: String,
    pub summary: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_searches: Option<Vec<AdditionalSearch>>,

    #[serde(default)]
    pub has_additional_context: bool,
}

/// The persisted comparison artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub schema_version: u32,

    pub comparison_id: String,
    pub mode: ComparisonMode,

    pub document_ids: Vec<String>,
    pub document_infos: Vec<DocumentInfo>,

    #[serde(default)]
    pub section_mappings: Vec<SectionMapping>,
    #[serde(default)]
    pub numerical_differences: Vec<NumericalDifference>,
    #[serde(default)]
    pub text_differences: Vec<TextDifference>,
    #[serde(default)]
    pub section_detailed_comparisons: Vec<SectionDetailedComparison>,

    /// Highest importance among the analyzed sections.
    pub priority: Importance,

    pub created_at: DateTime<Utc>,

    pub progress: ProgressRecord,
}

impl ComparisonRecord {
    /// Generate a fresh opaque comparison identifier.
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn new(
        comparison_id: impl Into<String>,
        mode: ComparisonMode,
        document_infos: Vec<DocumentInfo>,
    ) -> Self {
        Self {
            schema_version: COMPARISON_SCHEMA_VERSION,
            comparison_id: comparison_id.into(),
            mode,
            document_ids: document_infos.iter().map(|d| d.document_id.clone()).collect(),
            document_infos,
            section_mappings: Vec::new(),
            numerical_differences: Vec::new(),
            text_differences: Vec::new(),
            section_detailed_comparisons: Vec::new(),
            priority: Importance::Medium,
            created_at: Utc::now(),
            progress: ProgressRecord::queued(),
        }
    }

    /// Lightweight descriptor for history listings.
    pub fn descriptor(&self) -> ComparisonDescriptor {
        ComparisonDescriptor {
            comparison_id: self.comparison_id.clone(),
            created_at: self.created_at,
            mode: self.mode,
            filenames: self.document_infos.iter().map(|d| d.filename.clone()).collect(),
            section_count: self.section_detailed_comparisons.len(),
        }
    }
}

/// History entry returned by the comparison list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonDescriptor {
    pub comparison_id: String,
    pub created_at: DateTime<Utc>,
    pub mode: ComparisonMode,
    pub filenames: Vec<String>,
    pub section_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_changes_round_trips_with_kind_tag() {
        let changes = TextChanges::Year {
            added: vec!["new risk factor".into()],
            removed: vec![],
            modified: vec![ModifiedItem {
                before: "revenue 1,100".into(),
                after: "revenue 1,200".into(),
            }],
        };

        let json = serde_json::to_value(&changes).unwrap();
        assert_eq!(json["kind"], "year");

        let back: TextChanges = serde_json::from_value(json).unwrap();
        assert_eq!(back, changes);
        assert_eq!(back.modified().len(), 1);
        assert!(back.contradictions().is_empty());
    }

    #[test]
    fn numerical_change_accepts_company_aliases() {
        let change: NumericalChange = serde_json::from_str(
            r#"{"metric": "売上高", "company1_value": 100.0, "company2_value": 250.0, "difference_pct": 1.5}"#,
        )
        .unwrap();
        assert_eq!(change.item, "売上高");
        assert_eq!(change.value1, Some(100.0));
        assert_eq!(change.change_pct, Some(1.5));
    }
}
