//! Section mapping between two structured documents.
//!
//! Exact-name matches are consumed first; the remainder is paired by
//! embedding similarity over a compact projection of each section. Sections
//! that fail the similarity threshold stay unmapped and are dropped.

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::Result;
use crate::structuring::embedding_text;
use crate::traits::{cosine_similarity, Embedder};
use crate::types::{MappingMethod, SectionMapping, StructuredData};

/// Minimum cosine similarity for an embedding-based mapping.
pub const EMBEDDING_THRESHOLD: f32 = 0.7;

/// Map sections of `doc1` onto sections of `doc2`.
pub async fn map_sections(
    doc1: &StructuredData,
    doc2: &StructuredData,
    embedder: &dyn Embedder,
) -> Result<Vec<SectionMapping>> {
    let mut mappings = Vec::new();

    if doc1.sections.is_empty() || doc2.sections.is_empty() {
        info!("one side has no sections; mapping skipped");
        return Ok(mappings);
    }

    // 1. Exact canonical-name matches, confidence pinned at 1.0.
    let names1: BTreeSet<&String> = doc1.sections.keys().collect();
    let names2: BTreeSet<&String> = doc2.sections.keys().collect();

    for name in names1.intersection(&names2) {
        mappings.push(SectionMapping {
            doc1_section: (*name).clone(),
            doc2_section: (*name).clone(),
            confidence_score: 1.0,
            mapping_method: MappingMethod::Exact,
        });
    }

    let unmapped1: Vec<&String> = names1.difference(&names2).cloned().collect();
    let unmapped2: Vec<&String> = names2.difference(&names1).cloned().collect();

    debug!(
        exact = mappings.len(),
        unmapped1 = unmapped1.len(),
        unmapped2 = unmapped2.len(),
        "exact mapping done"
    );

    if unmapped1.is_empty() || unmapped2.is_empty() {
        return Ok(mappings);
    }

    // 2. Embed the remainder: section name plus a compact projection of its
    //    extracted content, when available.
    let texts1: Vec<String> = unmapped1
        .iter()
        .map(|name| projection(doc1, name.as_str()))
        .collect();
    let texts2: Vec<String> = unmapped2
        .iter()
        .map(|name| projection(doc2, name.as_str()))
        .collect();

    let vectors1 = embedder.embed(&texts1).await?;
    let vectors2 = embedder.embed(&texts2).await?;

    // 3. Best match per doc1 section; kept only above the threshold. A doc2
    //    section may be selected by several doc1 sections (1:N is allowed).
    for (i, name1) in unmapped1.iter().enumerate() {
        let Some(vector1) = vectors1.get(i) else {
            continue;
        };

        let mut best: Option<(usize, f32)> = None;
        for (j, vector2) in vectors2.iter().enumerate() {
            let similarity = cosine_similarity(vector1, vector2);
            if best.map(|(_, s)| similarity > s).unwrap_or(true) {
                best = Some((j, similarity));
            }
        }

        if let Some((j, similarity)) = best {
            if similarity >= EMBEDDING_THRESHOLD {
                mappings.push(SectionMapping {
                    doc1_section: (*name1).clone(),
                    doc2_section: unmapped2[j].clone(),
                    confidence_score: similarity,
                    mapping_method: MappingMethod::Embedding,
                });
            } else {
                debug!(section = %name1, similarity, "below mapping threshold, dropped");
            }
        }
    }

    info!(total = mappings.len(), "section mapping complete");
    Ok(mappings)
}

fn projection(data: &StructuredData, name: &str) -> String {
    let content = data
        .sections
        .get(name)
        .and_then(|info| info.extracted_content.as_ref());
    embedding_text(name, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEmbedder;
    use crate::types::SectionInfo;

    fn doc(sections: &[&str]) -> StructuredData {
        let mut data = StructuredData::default();
        for (i, name) in sections.iter().enumerate() {
            data.sections.insert(
                name.to_string(),
                SectionInfo {
                    start_page: i as u32 * 2 + 1,
                    end_page: i as u32 * 2 + 2,
                    char_count: 100,
                    confidence: 0.9,
                    extracted_content: None,
                },
            );
        }
        data
    }

    #[tokio::test]
    async fn exact_matches_have_confidence_one() {
        let doc1 = doc(&["事業等のリスク", "経営成績"]);
        let doc2 = doc(&["事業等のリスク", "経営成績"]);
        let embedder = MockEmbedder::new(8);

        let mappings = map_sections(&doc1, &doc2, &embedder).await.unwrap();
        assert_eq!(mappings.len(), 2);
        for mapping in &mappings {
            assert_eq!(mapping.mapping_method, MappingMethod::Exact);
            assert_eq!(mapping.confidence_score, 1.0);
            assert_eq!(mapping.doc1_section, mapping.doc2_section);
        }
    }

    #[tokio::test]
    async fn similar_names_map_via_embedding_above_threshold() {
        let doc1 = doc(&["事業等のリスク"]);
        let doc2 = doc(&["リスク情報"]);

        let embedder = MockEmbedder::new(4)
            .with_vector("セクション名: 事業等のリスク", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("セクション名: リスク情報", vec![0.9, 0.1, 0.0, 0.0]);

        let mappings = map_sections(&doc1, &doc2, &embedder).await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].mapping_method, MappingMethod::Embedding);
        assert!(mappings[0].confidence_score >= EMBEDDING_THRESHOLD);
        assert_eq!(mappings[0].doc2_section, "リスク情報");
    }

    #[tokio::test]
    async fn dissimilar_sections_are_dropped() {
        let doc1 = doc(&["事業等のリスク"]);
        let doc2 = doc(&["株式の状況"]);

        let embedder = MockEmbedder::new(4)
            .with_vector("セクション名: 事業等のリスク", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("セクション名: 株式の状況", vec![0.0, 1.0, 0.0, 0.0]);

        let mappings = map_sections(&doc1, &doc2, &embedder).await.unwrap();
        assert!(mappings.is_empty());
    }
}
