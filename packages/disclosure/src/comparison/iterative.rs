//! Iterative keyword-guided re-exploration.
//!
//! For a section whose first-pass analysis qualifies, the model proposes
//! search phrases for what remains unexplained. Both documents' structured
//! text is searched for those phrases (case-folded substring, minimum length
//! 4), hits are filtered by embedding similarity against the section under
//! analysis, and the surviving passages feed a fresh analysis round.

use tracing::{debug, info};

use crate::error::Result;
use crate::traits::{
    cosine_similarity, DisclosureModel, Embedder, SectionAnalysis, SectionAnalysisRequest,
};
use crate::types::{AdditionalSearch, FoundPassage, StructuredData};

/// Tunables for re-exploration.
#[derive(Debug, Clone)]
pub struct IterativeConfig {
    /// Additional rounds per section.
    pub max_rounds: usize,
    /// Keywords requested per round.
    pub max_keywords: usize,
    /// Case-folded keywords shorter than this are discarded.
    pub min_keyword_len: usize,
    /// Minimum similarity between a hit passage and the section under analysis.
    pub similarity_threshold: f32,
    /// Characters of context kept around a substring hit.
    pub excerpt_chars: usize,
}

impl Default for IterativeConfig {
    fn default() -> Self {
        Self {
            max_rounds: 2,
            max_keywords: 5,
            min_keyword_len: 4,
            similarity_threshold: 0.5,
            excerpt_chars: 300,
        }
    }
}

/// Outcome of the re-exploration rounds for one section.
pub struct IterativeOutcome {
    pub rounds: Vec<AdditionalSearch>,
    /// The latest analysis, when any round re-analyzed with new context.
    pub final_analysis: Option<SectionAnalysis>,
    pub has_additional_context: bool,
}

/// Run up to `config.max_rounds` re-exploration rounds for one section pair.
pub async fn explore_section(
    model: &dyn DisclosureModel,
    embedder: &dyn Embedder,
    config: &IterativeConfig,
    request: &SectionAnalysisRequest,
    first_analysis: &SectionAnalysis,
    doc1: &StructuredData,
    doc2: &StructuredData,
) -> Result<IterativeOutcome> {
    let mut rounds = Vec::new();
    let mut has_additional_context = false;
    let mut final_analysis: Option<SectionAnalysis> = None;
    let mut current_summary = first_analysis.summary.clone();

    for round in 0..config.max_rounds {
        let keywords = model
            .propose_search_keywords(&request.section_name, &current_summary, config.max_keywords)
            .await?;

        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| k.chars().count() >= config.min_keyword_len)
            .collect();

        if keywords.is_empty() {
            debug!(section = %request.section_name, round, "no usable keywords, stopping");
            break;
        }

        let mut passages = search_passages(doc1, 1, &keywords, config.excerpt_chars);
        passages.extend(search_passages(doc2, 2, &keywords, config.excerpt_chars));

        let found = filter_by_similarity(embedder, config, request, passages).await?;

        if found.is_empty() {
            rounds.push(AdditionalSearch {
                iteration: round as u32 + 1,
                search_keywords: keywords,
                found_sections: Vec::new(),
                analysis: None,
            });
            break;
        }

        has_additional_context = true;

        // Feed the surviving passages back into a fresh analysis call.
        let context = found
            .iter()
            .map(|p| format!("[資料{} {}] {}", p.side, p.section, p.excerpt))
            .collect::<Vec<_>>()
            .join("\n");

        let augmented = SectionAnalysisRequest {
            additional_context: Some(context),
            ..request.clone()
        };
        let analysis = model.analyze_section(&augmented).await?;
        current_summary = analysis.summary.clone();

        rounds.push(AdditionalSearch {
            iteration: round as u32 + 1,
            search_keywords: keywords,
            found_sections: found,
            analysis: Some(analysis.summary.clone()),
        });
        final_analysis = Some(analysis);
    }

    info!(
        section = %request.section_name,
        rounds = rounds.len(),
        has_additional_context,
        "re-exploration finished"
    );

    Ok(IterativeOutcome {
        rounds,
        final_analysis,
        has_additional_context,
    })
}

/// Case-folded substring search over every section of one document.
fn search_passages(
    data: &StructuredData,
    side: u8,
    keywords: &[String],
    excerpt_chars: usize,
) -> Vec<FoundPassage> {
    let mut passages = Vec::new();

    for (name, info) in &data.sections {
        let text = data.section_text(info);
        let folded = text.to_lowercase();

        for keyword in keywords {
            if let Some(byte_pos) = folded.find(keyword.as_str()) {
                let char_pos = folded[..byte_pos].chars().count();
                passages.push(FoundPassage {
                    side,
                    section: name.clone(),
                    excerpt: excerpt_around(&text, char_pos, excerpt_chars),
                    similarity: 0.0,
                });
                break; // one passage per section per round
            }
        }
    }

    passages
}

/// A window of `max_chars` characters centered on the hit.
fn excerpt_around(text: &str, char_pos: usize, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let half = max_chars / 2;
    let start = char_pos.saturating_sub(half);
    let end = (char_pos + half).min(chars.len());
    chars[start..end].iter().collect()
}

/// Keep passages whose embedding is close enough to the section under
/// analysis.
async fn filter_by_similarity(
    embedder: &dyn Embedder,
    config: &IterativeConfig,
    request: &SectionAnalysisRequest,
    mut passages: Vec<FoundPassage>,
) -> Result<Vec<FoundPassage>> {
    if passages.is_empty() {
        return Ok(passages);
    }

    let mut texts = vec![request.side1.rendered_content.clone()];
    texts.extend(passages.iter().map(|p| p.excerpt.clone()));

    let vectors = embedder.embed(&texts).await?;
    let Some((reference, rest)) = vectors.split_first() else {
        return Ok(Vec::new());
    };

    for (passage, vector) in passages.iter_mut().zip(rest.iter()) {
        passage.similarity = cosine_similarity(reference, vector);
    }

    passages.retain(|p| p.similarity >= config.similarity_threshold);
    Ok(passages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SectionInfo;

    fn doc(section: &str, text: &str) -> StructuredData {
        let mut data = StructuredData {
            pages: vec![crate::types::Page::new(1, text, false)],
            ..Default::default()
        };
        data.sections.insert(
            section.to_string(),
            SectionInfo {
                start_page: 1,
                end_page: 1,
                char_count: text.chars().count(),
                confidence: 1.0,
                extracted_content: None,
            },
        );
        data
    }

    #[test]
    fn substring_search_is_case_folded() {
        let data = doc("経営成績", "当期のRevenue Growthは堅調に推移した");
        let hits = search_passages(&data, 1, &["revenue growth".to_string()], 50);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].section, "経営成績");
        assert!(hits[0].excerpt.contains("Revenue Growth"));
    }

    #[test]
    fn one_passage_per_section_per_round() {
        let data = doc("経営成績", "売上高の増加と売上高の改善について");
        let hits = search_passages(
            &data,
            1,
            &["売上高の増加".to_string(), "売上高の改善".to_string()],
            30,
        );
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn excerpt_is_a_window_around_the_hit() {
        let text = "前".repeat(100) + "キーワード" + &"後".repeat(100);
        let data = doc("s", &text);
        let hits = search_passages(&data, 2, &["キーワード".to_string()], 20);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].excerpt.contains("キーワード"));
        assert!(hits[0].excerpt.chars().count() <= 21);
    }
}
