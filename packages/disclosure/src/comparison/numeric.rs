//! Numerical diffing over the financial_data buckets of mapped sections.
//!
//! Items are matched by canonical name (lowercased, punctuation stripped),
//! units are normalized through a small factor table, and significance is a
//! boolean threshold, not a ranking.

use std::sync::OnceLock;

use regex::Regex;
use tracing::info;

use crate::types::{
    FactValue, FinancialFact, NumericalDifference, ScalarValue, SectionMapping, StructuredData,
};

/// Relative change at or above which a difference is significant.
const SIGNIFICANCE_PCT: f64 = 0.05;

/// Unit factor table: everything normalizes to yen. Longer units first so
/// 十億円 is not swallowed by the 億円 rule.
const UNIT_FACTORS: &[(&str, f64)] = &[
    ("十億円", 1_000_000_000.0),
    ("十億", 1_000_000_000.0),
    ("百万円", 1_000_000.0),
    ("百万", 1_000_000.0),
    ("億円", 100_000_000.0),
    ("億", 100_000_000.0),
    ("千円", 1_000.0),
];

/// Compute numerical differences across all mapped sections.
pub fn diff_financial_data(
    doc1: &StructuredData,
    doc2: &StructuredData,
    mappings: &[SectionMapping],
) -> Vec<NumericalDifference> {
    let mut differences = Vec::new();

    for mapping in mappings {
        let facts1 = financial_facts(doc1, &mapping.doc1_section);
        let facts2 = financial_facts(doc2, &mapping.doc2_section);
        if facts1.is_empty() || facts2.is_empty() {
            continue;
        }

        for fact1 in &facts1 {
            let canonical = canonical_item_name(&fact1.item);
            if canonical.is_empty() {
                continue;
            }

            let Some(fact2) = facts2
                .iter()
                .find(|f| canonical_item_name(&f.item) == canonical)
            else {
                continue;
            };

            if let Some(difference) =
                diff_pair(&mapping.doc1_section, fact1, fact2)
            {
                differences.push(difference);
            }
        }
    }

    info!(count = differences.len(), "numerical differences computed");
    differences
}

fn financial_facts<'a>(data: &'a StructuredData, section: &str) -> Vec<&'a FinancialFact> {
    data.sections
        .get(section)
        .and_then(|info| info.extracted_content.as_ref())
        .map(|content| content.financial_data.iter().collect())
        .unwrap_or_default()
}

/// Diff two matched facts. Items are matched before units are normalized;
/// the normalized unit is recorded so unit-mismatch regressions stay visible.
fn diff_pair(
    section: &str,
    fact1: &FinancialFact,
    fact2: &FinancialFact,
) -> Option<NumericalDifference> {
    let (raw1, unit1) = numeric_value(fact1)?;
    let (raw2, unit2) = numeric_value(fact2)?;
    if !raw1.is_finite() || !raw2.is_finite() {
        return None;
    }

    let (value1, normalized_unit) = normalize_unit(raw1, unit1.as_deref());
    let (value2, _) = normalize_unit(raw2, unit2.as_deref());

    let difference = value2 - value1;
    let difference_pct = if value1 != 0.0 {
        Some(difference / value1.abs())
    } else {
        None
    };

    let is_significant = difference_pct
        .map(|pct| pct.abs() >= SIGNIFICANCE_PCT)
        .unwrap_or(false)
        || order_of_magnitude_differs(value1, value2);

    Some(NumericalDifference {
        section: section.to_string(),
        item_name: fact1.item.clone(),
        value1: raw1,
        value2: raw2,
        difference,
        difference_pct,
        unit1,
        unit2,
        normalized_unit,
        is_significant,
    })
}

/// Numeric value plus unit of one fact. Numbers use the declared unit; a
/// textual value like "1,234百万円" is parsed, with any trailing unit text
/// filling in when the fact carries no explicit unit.
fn numeric_value(fact: &FinancialFact) -> Option<(f64, Option<String>)> {
    if let Some(value) = fact.value.as_number() {
        return Some((value, fact.unit.clone()));
    }

    match &fact.value {
        FactValue::Scalar(ScalarValue::Text(text)) => {
            let (value, embedded_unit) = extract_number_and_unit(text)?;
            Some((value, fact.unit.clone().or(embedded_unit)))
        }
        _ => None,
    }
}

/// Pull the first number (comma-tolerant) and the text after it out of a
/// quoted value string.
pub fn extract_number_and_unit(text: &str) -> Option<(f64, Option<String>)> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let number = NUMBER.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap());

    let compact: String = text.chars().filter(|c| *c != ',').collect();
    let found = number.find(&compact)?;
    let value: f64 = found.as_str().parse().ok()?;

    let unit_text = compact[found.end()..].trim();
    let unit = if unit_text.is_empty() {
        None
    } else {
        Some(unit_text.to_string())
    };

    Some((value, unit))
}

/// Canonical item name: case-folded with punctuation and whitespace removed,
/// so "売上高（連結）" and "売上高(連結)" match.
pub fn canonical_item_name(item: &str) -> String {
    item.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Apply the unit factor table; unknown units pass through unchanged.
pub fn normalize_unit(value: f64, unit: Option<&str>) -> (f64, Option<String>) {
    let Some(unit) = unit else {
        return (value, None);
    };

    let compact: String = unit.chars().filter(|c| !c.is_whitespace()).collect();
    for (pattern, factor) in UNIT_FACTORS {
        if compact.contains(pattern) {
            return (value * factor, Some("円".to_string()));
        }
    }

    if compact.contains('円') {
        return (value, Some("円".to_string()));
    }

    (value, Some(unit.to_string()))
}

/// Whether two normalized values sit in different decimal orders of
/// magnitude (a unit-mismatch symptom even when the ratio test is quiet).
fn order_of_magnitude_differs(value1: f64, value2: f64) -> bool {
    if value1 == 0.0 || value2 == 0.0 {
        return value1 != value2;
    }
    let magnitude1 = value1.abs().log10().floor();
    let magnitude2 = value2.abs().log10().floor();
    (magnitude1 - magnitude2).abs() >= 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ExtractedContent, FactValue, MappingMethod, ScalarValue, SectionInfo,
    };

    fn fact(item: &str, value: f64, unit: Option<&str>) -> FinancialFact {
        FinancialFact {
            item: item.into(),
            value: FactValue::Scalar(ScalarValue::Number(value)),
            unit: unit.map(String::from),
            period: None,
            context: None,
        }
    }

    fn doc_with_facts(section: &str, facts: Vec<FinancialFact>) -> StructuredData {
        let mut data = StructuredData::default();
        data.sections.insert(
            section.to_string(),
            SectionInfo {
                start_page: 1,
                end_page: 2,
                char_count: 100,
                confidence: 1.0,
                extracted_content: Some(ExtractedContent {
                    financial_data: facts,
                    ..Default::default()
                }),
            },
        );
        data
    }

    fn mapping(section: &str) -> SectionMapping {
        SectionMapping {
            doc1_section: section.into(),
            doc2_section: section.into(),
            confidence_score: 1.0,
            mapping_method: MappingMethod::Exact,
        }
    }

    #[test]
    fn canonical_names_ignore_case_and_punctuation() {
        assert_eq!(canonical_item_name("売上高（連結）"), "売上高連結");
        assert_eq!(canonical_item_name("ROE (%)"), "roe");
        assert_eq!(canonical_item_name("Net Sales"), "netsales");
    }

    #[test]
    fn units_normalize_to_yen() {
        assert_eq!(normalize_unit(5.0, Some("千円")), (5_000.0, Some("円".into())));
        assert_eq!(
            normalize_unit(1.5, Some("百万円")),
            (1_500_000.0, Some("円".into()))
        );
        assert_eq!(
            normalize_unit(2.0, Some("億円")),
            (200_000_000.0, Some("円".into()))
        );
        assert_eq!(
            normalize_unit(3.0, Some("十億円")),
            (3_000_000_000.0, Some("円".into()))
        );
        assert_eq!(normalize_unit(7.0, Some("人")), (7.0, Some("人".into())));
        assert_eq!(normalize_unit(7.0, None), (7.0, None));
    }

    #[test]
    fn difference_pct_matches_the_definition() {
        let doc1 = doc_with_facts("経営成績", vec![fact("売上高", 1100.0, Some("百万円"))]);
        let doc2 = doc_with_facts("経営成績", vec![fact("売上高", 1200.0, Some("百万円"))]);

        let diffs = diff_financial_data(&doc1, &doc2, &[mapping("経営成績")]);
        assert_eq!(diffs.len(), 1);

        let diff = &diffs[0];
        let expected_pct = (1_200_000_000.0f64 - 1_100_000_000.0) / 1_100_000_000.0f64;
        assert!((diff.difference_pct.unwrap() - expected_pct).abs() < 1e-9);
        assert!(diff.is_significant); // ~9.1% >= 5%
        assert_eq!(diff.normalized_unit.as_deref(), Some("円"));
    }

    #[test]
    fn units_are_normalized_before_differencing() {
        // 1,200百万円 vs 12億円 are the same amount in different units.
        let doc1 = doc_with_facts("経営成績", vec![fact("売上高", 1200.0, Some("百万円"))]);
        let doc2 = doc_with_facts("経営成績", vec![fact("売上高", 12.0, Some("億円"))]);

        let diffs = diff_financial_data(&doc1, &doc2, &[mapping("経営成績")]);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].difference, 0.0);
        assert!(!diffs[0].is_significant);
    }

    #[test]
    fn small_changes_are_not_significant() {
        let doc1 = doc_with_facts("経営成績", vec![fact("総資産", 1000.0, Some("百万円"))]);
        let doc2 = doc_with_facts("経営成績", vec![fact("総資産", 1010.0, Some("百万円"))]);

        let diffs = diff_financial_data(&doc1, &doc2, &[mapping("経営成績")]);
        assert_eq!(diffs.len(), 1);
        assert!(!diffs[0].is_significant); // 1% < 5%
    }

    #[test]
    fn order_of_magnitude_gap_is_significant_even_via_zero_pct_path() {
        assert!(order_of_magnitude_differs(100.0, 5000.0));
        assert!(!order_of_magnitude_differs(100.0, 120.0));
        assert!(order_of_magnitude_differs(0.0, 5.0));
        assert!(!order_of_magnitude_differs(0.0, 0.0));
    }

    #[test]
    fn textual_values_are_parsed_with_embedded_units() {
        assert_eq!(
            extract_number_and_unit("1,234.5百万円"),
            Some((1234.5, Some("百万円".into())))
        );
        assert_eq!(extract_number_and_unit("△500"), Some((500.0, None)));
        assert_eq!(extract_number_and_unit("-500"), Some((-500.0, None)));
        assert_eq!(extract_number_and_unit("該当なし"), None);

        let fact_text = FinancialFact {
            item: "売上高".into(),
            value: FactValue::Scalar(ScalarValue::Text("1,200百万円".into())),
            unit: None,
            period: None,
            context: None,
        };
        assert_eq!(numeric_value(&fact_text), Some((1200.0, Some("百万円".into()))));
    }

    #[test]
    fn unmatched_items_are_skipped() {
        let doc1 = doc_with_facts("経営成績", vec![fact("売上高", 1000.0, None)]);
        let doc2 = doc_with_facts("経営成績", vec![fact("営業利益", 300.0, None)]);
        assert!(diff_financial_data(&doc1, &doc2, &[mapping("経営成績")]).is_empty());
    }
}
