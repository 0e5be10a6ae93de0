//! LLM prompts for structuring and comparison.
//!
//! Prompts mirror the tone of the documents they process: the pipeline
//! handles Japanese corporate disclosure filings, so instructions and
//! examples are in Japanese. Placeholders in `{braces}` are substituted by
//! the builder functions below.

use crate::traits::{BatchContext, SectionAnalysisRequest, SectionDetectRequest};
use crate::types::ComparisonMode;

/// System prompt for vision page reads.
pub const VISION_SYSTEM_PROMPT: &str = "あなたは日本語の企業開示資料（有価証券報告書、統合報告書、決算短信等）から\
正確にテキストを抽出するアシスタントです。画像から全ての文字を読み取り、\
元のレイアウトや表構造を可能な限り保持してください。要約や省略はしないでください。";

/// User prompt for one vision page; carry-over context is appended when present.
pub const VISION_PAGE_PROMPT: &str = "ページ {page_number} の内容を抽出してください。\
読み取ったテキストのみを元の順序のまま出力してください。";

/// System prompt for section detection.
pub const SECTION_DETECT_SYSTEM_PROMPT: &str =
    "あなたは企業開示資料のセクション検出エキスパートです。";

/// Prompt for one section-detection batch.
pub const SECTION_DETECT_PROMPT: &str = r#"以下は「{doc_type_label}」のページ{batch_start}～{batch_end}のテキストです。
各ページがどのセクションに属するか判定してください。
{context_info}
【{doc_type_label}の標準的なセクション構成】
（⭐は必須セクションを示します）

{section_tree}

【セクション名の指定方法】
- 階層構造の場合は「親セクション - 子セクション」形式で指定してください
  例: "企業情報 - 企業の概況"
- トップレベルのセクションはそのまま指定してください
  例: "表紙"、"企業情報"

【ページテキスト】
{batch_text}

【出力形式】
以下のJSON形式で回答してください：
{
  "sections": [
    {
      "section_name": "表紙",
      "start_page": 1,
      "end_page": 1,
      "confidence": 1.0,
      "is_continuing": false
    }
  ],
  "notes": "特記事項があれば記載"
}

【注意事項】
1. 標準的な構成（上記の木構造）に基づいて判定してください
2. セクション名は階層構造を「-」で結合した形式で指定してください
3. セクションがこのバッチの範囲を超えて続く場合は、end_pageを{batch_end}にして is_continuing: true を設定してください
4. 前回の処理結果と矛盾がないように継続性を保ってください
5. 見出しや書式から判断し、confidenceスコアを付与してください
6. ⭐マークの必須セクションは優先的に検出してください"#;

/// System prompt for section content extraction.
pub const CONTENT_EXTRACT_SYSTEM_PROMPT: &str = "あなたは企業開示資料から情報を抽出するエキスパートです。\
要約せず、原文の情報を可能な限り保持してください。";

/// Prompt for extracting the four content buckets from one section.
pub const CONTENT_EXTRACT_PROMPT: &str = r#"以下は企業開示資料の「{section_name}」セクションです。
このセクションから構造化情報を抽出してください。

【重要な指示】
- 要約せず、原文の表現をできるだけそのまま保持してください
- 数値は必ず単位と期間を含めて抽出してください
- 比率や成長率などの派生指標を計算してはいけません（原文に書かれた値のみ）

【セクションテキスト】
{section_text}

【テーブルデータ】
{tables_summary}

【抽出タスク】
以下の4種類の情報を抽出してください：

1. **財務指標・数値情報** (financial_data)
   - 売上高、利益、資産、負債、キャッシュフローなどの財務数値
   - 各数値には、項目名(item)、数値(value)、単位(unit)、期間(period)、文脈(context)を含める
   - 例: {"item": "売上高", "value": 1234567, "unit": "百万円", "period": "2024年3月期", "context": "前年同期比10%増加"}

2. **会計処理上のコメント** (accounting_notes)
   - 会計方針、会計基準の変更、注記、重要な会計上の見積もりなど
   - トピック(topic)、内容(content)、種類(type)を含める

3. **事実情報** (factual_info)
   - 会社基本情報、組織情報、事業内容、日付、固有名詞
   - カテゴリ(category)、項目(item)、値(value)を含める

4. **主張・メッセージ** (messages)
   - 経営方針、戦略、リスク認識、ステークホルダーへのメッセージ
   - 種類(type)、内容(content)、トーン(tone: positive/neutral/negative)を含める
   - 原文の表現をできるだけそのまま記載（要約禁止）

【出力形式】
JSON形式で回答してください：
{
  "financial_data": [],
  "accounting_notes": [],
  "factual_info": [],
  "messages": []
}

該当する情報がない場合は、空の配列 [] を返してください。"#;

/// System prompt for document profile extraction.
pub const PROFILE_SYSTEM_PROMPT: &str = "あなたは企業開示資料の分析エキスパートです。";

/// Prompt for extracting company name and fiscal year from a head sample.
pub const PROFILE_PROMPT: &str = r#"以下は日本の企業開示資料の冒頭部分です。

【タスク】
1. 会社名を抽出してください（正式名称）
2. 対象年度（西暦）を抽出してください

【テキスト】
{text_sample}

【出力形式】
JSON形式で以下のフォーマットで回答してください：
{
  "company_name": "株式会社〇〇",
  "fiscal_year": 2024,
  "confidence": 0.95
}

会社名または年度が見つからない場合は、該当フィールドをnullにしてください。
confidenceは抽出の信頼度を0.0～1.0で示してください。"#;

/// Consistency-check analysis prompt (same company, different document types).
pub const CONSISTENCY_ANALYSIS_PROMPT: &str = r#"以下は同一企業の異なる開示資料における「{section_name}」セクションの構造化情報です。
両資料の記載内容の整合性を検証してください。

【資料1（{doc_type_label}）】
ページ範囲: {doc1_page_range}
{content1}

【資料2】
ページ範囲: {doc2_page_range}
{content2}
{additional_context}
【分析タスク】
1. **矛盾** (contradictions): 両資料で食い違う記載（数値の不一致、相反する説明）を列挙
2. **通常の差異** (normal_differences): 資料の性質上自然な記載の違い
3. **補完情報** (complementary_info): 一方にのみあり他方を補完する情報
4. **整合性スコア** (consistency_score): 1（重大な矛盾あり）～5（完全に整合）
5. **数値データの違い** (numerical_changes)
6. **トーン分析** (tone_analysis)
7. **重要度判定** (importance: high/medium/low) とその理由
8. **サマリー** (summary): 1-2文

【出力形式】
JSON形式で回答してください：
{
  "text_changes": {
    "contradictions": [],
    "normal_differences": [],
    "complementary_info": [],
    "consistency_score": 5,
    "consistency_reason": "理由"
  },
  "numerical_changes": [
    {"item": "項目名", "value1": 0, "value2": 0, "change_pct": 0, "is_significant": false}
  ],
  "tone_analysis": {
    "tone1": "positive/neutral/negative",
    "tone2": "positive/neutral/negative",
    "negativity_score1": 1.0,
    "negativity_score2": 1.0,
    "difference": "トーンの違いの説明"
  },
  "importance": "high/medium/low",
  "importance_reason": "重要度の理由",
  "summary": "整合性検証の要約"
}"#;

/// Year-over-year analysis prompt (same company and type, different years).
pub const YEAR_ANALYSIS_PROMPT: &str = r#"以下は同一企業の「{doc_type_label}」の異なる年度における「{section_name}」セクションの構造化情報です。
年度間の変化を詳細に比較してください。

【前年度】
ページ範囲: {doc1_page_range}
{content1}

【当年度】
ページ範囲: {doc2_page_range}
{content2}
{additional_context}
【分析タスク】
1. **追加された内容** (added): 当年度に新たに記載された重要な内容（最大5個）
2. **削除された内容** (removed): 当年度に記載されなくなった重要な内容（最大5個）
3. **変更された内容** (modified): 変更前後のペア（最大5個）
4. **数値データの違い** (numerical_changes): 重要な増減とその割合
5. **トーン分析** (tone_analysis)
6. **重要度判定** (importance: high/medium/low) とその理由
7. **サマリー** (summary): 1-2文

【出力形式】
JSON形式で回答してください：
{
  "text_changes": {
    "added": [],
    "removed": [],
    "modified": [
      {"before": "変更前の内容", "after": "変更後の内容"}
    ]
  },
  "numerical_changes": [
    {"item": "項目名", "value1": 0, "value2": 0, "change_pct": 0, "is_significant": false}
  ],
  "tone_analysis": {
    "tone1": "positive/neutral/negative",
    "tone2": "positive/neutral/negative",
    "negativity_score1": 1.0,
    "negativity_score2": 1.0,
    "difference": "トーンの違いの説明"
  },
  "importance": "high/medium/low",
  "importance_reason": "重要度の理由",
  "summary": "このセクションの差異の要約"
}"#;

/// Cross-company analysis prompt (different companies, same document type).
pub const COMPANY_ANALYSIS_PROMPT: &str = r#"以下は異なる2社の「{doc_type_label}」における「{section_name}」セクションの構造化情報です。
企業間の開示内容の違いを分析してください。

【{company1}】
ページ範囲: {doc1_page_range}
{content1}

【{company2}】
ページ範囲: {doc2_page_range}
{content2}
{additional_context}
【分析タスク】
1. **{company1}のみに記載されている重要な内容** (only_in_company1)（最大5個）
2. **{company2}のみに記載されている重要な内容** (only_in_company2)（最大5個）
3. **両社で異なる記載や方針の違い** (different_approaches)（最大5個）
4. **数値データの比較** (numerical_changes)
5. **開示姿勢とトーンの違い** (tone_analysis): 詳細度、トーン、ネガティブ度スコア（1-5）
6. **重要度判定** (importance: high/medium/low): 投資家や利害関係者にとっての意義
7. **サマリー** (summary): 1-2文

【出力形式】
JSON形式で回答してください：
{
  "text_changes": {
    "only_in_company1": [],
    "only_in_company2": [],
    "different_approaches": [
      {"aspect": "側面", "company1_approach": "方針1", "company2_approach": "方針2"}
    ]
  },
  "numerical_changes": [
    {"metric": "指標名", "company1_value": 0, "company2_value": 0, "difference_pct": 0, "context": "この違いの意味"}
  ],
  "tone_analysis": {
    "company1_detail_level": "詳細/標準/簡潔",
    "company2_detail_level": "詳細/標準/簡潔",
    "company1_tone": "positive/neutral/negative",
    "company2_tone": "positive/neutral/negative",
    "company1_negativity_score": 1.0,
    "company2_negativity_score": 1.0,
    "style_difference": "開示スタイルの違いの説明"
  },
  "importance": "high/medium/low",
  "importance_reason": "重要度の理由",
  "summary": "2社の違いの要約"
}"#;

/// Prompt asking for re-exploration keywords.
pub const KEYWORD_PROMPT: &str = r#"「{section_name}」セクションの差分分析の結果は以下の通りです：

{analysis_summary}

この分析で説明しきれていない点を解明するため、両資料の本文を検索するための
検索フレーズを最大{max_keywords}個提案してください。

【出力形式】
JSON形式で回答してください：
{
  "keywords": ["検索フレーズ1", "検索フレーズ2"]
}

各フレーズは4文字以上の具体的な語句にしてください。"#;

/// System prompt for document classification.
pub const CLASSIFY_SYSTEM_PROMPT: &str =
    "あなたは日本の企業開示資料の分類エキスパートです。";

/// Prompt for the single classifier call.
pub const CLASSIFY_PROMPT: &str = r#"以下のファイル名とテキストから、資料の種類を判定してください。

【ファイル名】
{filename}

【候補】
{options}

【テキスト（冒頭部分）】
{text_sample}

【出力形式】
JSON形式で回答してください：
{
  "document_type": "候補のid",
  "confidence": 0.95,
  "reason": "判定根拠"
}

どの候補にも明確に該当しない場合は "unknown" を選んでください。"#;

/// Build the user prompt for one vision page.
pub fn build_vision_prompt(page_number: u32, carry_over: &str) -> String {
    let mut prompt = VISION_PAGE_PROMPT.replace("{page_number}", &page_number.to_string());
    if !carry_over.is_empty() {
        prompt.push_str("\n\n直前のページの文脈: ");
        prompt.push_str(carry_over);
    }
    prompt
}

/// Build the prompt for one section-detection batch.
pub fn build_section_detect_prompt(request: &SectionDetectRequest) -> String {
    let context_info = match &request.previous_context {
        Some(context) => format_batch_context(context),
        None => String::new(),
    };

    SECTION_DETECT_PROMPT
        .replace("{doc_type_label}", &request.document_type_label)
        .replace("{batch_start}", &request.batch_start.to_string())
        .replace("{batch_end}", &request.batch_end.to_string())
        .replace("{context_info}", &context_info)
        .replace("{section_tree}", &request.section_tree)
        .replace("{batch_text}", &request.batch_text)
}

fn format_batch_context(context: &BatchContext) -> String {
    format!(
        "\n【前回の処理結果】\n- 前回の最終ページ（{}）で検出されていたセクション: {}\n- 継続中のセクション: {}\n",
        context.last_page,
        context.last_section,
        context.ongoing_sections.join(", ")
    )
}

/// Build the content-extraction prompt for one section.
pub fn build_content_extract_prompt(
    section_name: &str,
    section_text: &str,
    tables_summary: &str,
) -> String {
    CONTENT_EXTRACT_PROMPT
        .replace("{section_name}", section_name)
        .replace("{section_text}", section_text)
        .replace("{tables_summary}", tables_summary)
}

/// Build the profile-extraction prompt.
pub fn build_profile_prompt(text_sample: &str) -> String {
    PROFILE_PROMPT.replace("{text_sample}", text_sample)
}

/// Build the mode-specific analysis prompt for one section pair.
pub fn build_analysis_prompt(request: &SectionAnalysisRequest) -> String {
    let template = match request.mode {
        ComparisonMode::ConsistencyCheck => CONSISTENCY_ANALYSIS_PROMPT,
        ComparisonMode::DiffAnalysisYear => YEAR_ANALYSIS_PROMPT,
        ComparisonMode::DiffAnalysisCompany | ComparisonMode::MultiDocument => {
            COMPANY_ANALYSIS_PROMPT
        }
    };

    let additional_context = match &request.additional_context {
        Some(context) => format!("\n【追加で見つかった関連情報】\n{context}\n"),
        None => String::new(),
    };

    template
        .replace("{doc_type_label}", &request.document_type_label)
        .replace("{section_name}", &request.section_name)
        .replace("{doc1_page_range}", &request.side1.page_range)
        .replace("{doc2_page_range}", &request.side2.page_range)
        .replace("{content1}", &request.side1.rendered_content)
        .replace("{content2}", &request.side2.rendered_content)
        .replace("{company1}", request.company1.as_deref().unwrap_or("会社A"))
        .replace("{company2}", request.company2.as_deref().unwrap_or("会社B"))
        .replace("{additional_context}", &additional_context)
}

/// System prompt for the analysis call, adjusted per mode.
pub fn analysis_system_prompt(mode: ComparisonMode, doc_type_label: &str) -> String {
    match mode {
        ComparisonMode::DiffAnalysisCompany | ComparisonMode::MultiDocument => format!(
            "あなたは「{doc_type_label}」の分析エキスパートです。異なる企業間の開示内容の違いを正確に検出し、投資家や利害関係者にとっての重要度を判定してください。"
        ),
        _ => format!(
            "あなたは「{doc_type_label}」の分析エキスパートです。差異を正確に検出し、重要度を判定してください。"
        ),
    }
}

/// Build the keyword-proposal prompt.
pub fn build_keyword_prompt(
    section_name: &str,
    analysis_summary: &str,
    max_keywords: usize,
) -> String {
    KEYWORD_PROMPT
        .replace("{section_name}", section_name)
        .replace("{analysis_summary}", analysis_summary)
        .replace("{max_keywords}", &max_keywords.to_string())
}

/// Build the classification prompt.
pub fn build_classify_prompt(filename: &str, text_sample: &str, options_json: &str) -> String {
    CLASSIFY_PROMPT
        .replace("{filename}", filename)
        .replace("{options}", options_json)
        .replace("{text_sample}", text_sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::AnalysisSide;

    #[test]
    fn vision_prompt_appends_carry_over_only_when_present() {
        let bare = build_vision_prompt(3, "");
        assert!(bare.contains("ページ 3"));
        assert!(!bare.contains("直前のページ"));

        let with_context = build_vision_prompt(4, "前ページ末尾");
        assert!(with_context.contains("直前のページの文脈: 前ページ末尾"));
    }

    #[test]
    fn analysis_prompt_switches_template_by_mode() {
        let request = SectionAnalysisRequest {
            mode: ComparisonMode::DiffAnalysisCompany,
            document_type_label: "有価証券報告書".into(),
            section_name: "事業等のリスク".into(),
            side1: AnalysisSide {
                section_name: "事業等のリスク".into(),
                page_range: "10-15".into(),
                rendered_content: "内容1".into(),
            },
            side2: AnalysisSide {
                section_name: "事業等のリスク".into(),
                page_range: "12-18".into(),
                rendered_content: "内容2".into(),
            },
            company1: Some("A社".into()),
            company2: Some("B社".into()),
            additional_context: None,
        };

        let prompt = build_analysis_prompt(&request);
        assert!(prompt.contains("only_in_company1"));
        assert!(prompt.contains("【A社】"));
        assert!(prompt.contains("ページ範囲: 12-18"));

        let year = SectionAnalysisRequest {
            mode: ComparisonMode::DiffAnalysisYear,
            ..request
        };
        let prompt = build_analysis_prompt(&year);
        assert!(prompt.contains("\"modified\""));
        assert!(!prompt.contains("only_in_company1"));
    }
}
