//! Coarse Ratcliff/Obershelp text diffing for summary statistics.
//!
//! This feeds the artifact's `text_differences` list only; the per-section
//! model analysis is computed independently.

use similar::{ChangeTag, DiffOp, TextDiff};

use crate::types::{SectionMapping, StructuredData, TextDifference};

/// Characters of each side fed into the matcher.
const DIFF_TEXT_CAP: usize = 5_000;

/// Line-level deltas kept per list.
const MAX_DELTAS: usize = 10;

/// Compute coarse text differences for every mapped section pair.
pub fn diff_mapped_sections(
    doc1: &StructuredData,
    doc2: &StructuredData,
    mappings: &[SectionMapping],
) -> Vec<TextDifference> {
    mappings
        .iter()
        .filter_map(|mapping| {
            let info1 = doc1.sections.get(&mapping.doc1_section)?;
            let info2 = doc2.sections.get(&mapping.doc2_section)?;
            let text1 = doc1.section_text(info1);
            let text2 = doc2.section_text(info2);
            Some(diff_texts(&mapping.doc1_section, &text1, &text2))
        })
        .collect()
}

/// Diff two section texts: match ratio plus line-level deltas.
pub fn diff_texts(section: &str, text1: &str, text2: &str) -> TextDifference {
    let capped1 = cap(text1);
    let capped2 = cap(text2);

    let diff = TextDiff::from_lines(&capped1, &capped2);
    let match_ratio = diff.ratio() as f64;

    let collect_side = |op: &DiffOp, tag: ChangeTag| -> String {
        diff.iter_changes(op)
            .filter(|change| change.tag() == tag)
            .map(|change| change.value())
            .collect::<String>()
            .trim_end_matches('\n')
            .to_string()
    };

    let mut added_text = Vec::new();
    let mut removed_text = Vec::new();
    let mut changed_text = Vec::new();

    for op in diff.ops() {
        match op {
            DiffOp::Insert { .. } => {
                if added_text.len() < MAX_DELTAS {
                    added_text.push(collect_side(op, ChangeTag::Insert));
                }
            }
            DiffOp::Delete { .. } => {
                if removed_text.len() < MAX_DELTAS {
                    removed_text.push(collect_side(op, ChangeTag::Delete));
                }
            }
            DiffOp::Replace { .. } => {
                if changed_text.len() < MAX_DELTAS {
                    changed_text.push((
                        collect_side(op, ChangeTag::Delete),
                        collect_side(op, ChangeTag::Insert),
                    ));
                }
            }
            DiffOp::Equal { .. } => {}
        }
    }

    TextDifference {
        section: section.to_string(),
        match_ratio,
        added_text,
        removed_text,
        changed_text,
    }
}

fn cap(text: &str) -> String {
    text.chars().take(DIFF_TEXT_CAP).collect()
}
