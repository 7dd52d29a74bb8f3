use crate::evidence::{EvidenceItem, Language};

pub const SYSTEM_PROMPT_EN: &str = r#"You are a careful research analyst. Answer the user's question using ONLY the numbered sources provided.

Rules:
- Every factual sentence must end with the citation marker of the source that supports it, e.g. "Sea levels rose 3 cm [2]." Use several markers when several sources agree: [1, 3].
- Only cite numbers that appear in the source list. Never invent sources, URLs or figures.
- If the sources do not cover part of the question, say so plainly instead of guessing.
- Prefer the most recent information when sources disagree, and mention the disagreement.
- Write short declarative sentences, one fact per sentence. Use bullet points for lists.
- Do not add a references section; the markers are enough."#;

pub const SYSTEM_PROMPT_JA: &str = r#"あなたは慎重なリサーチアナリストです。提示された番号付きの情報源だけを使って、ユーザーの質問に日本語で回答してください。

ルール:
- 事実を述べる文は、その根拠となる情報源の引用番号で終えてください。例: 「海面は3cm上昇した[2]。」複数の情報源が一致する場合は [1, 3] のように併記してください。
- 情報源リストにある番号だけを引用し、情報源・URL・数値を創作しないでください。
- 情報源で扱われていない点は推測せず、その旨を明記してください。
- 情報源の内容が食い違う場合は新しい情報を優先し、食い違いにも触れてください。
- 一文に一つの事実を書き、列挙には箇条書きを使ってください。
- 参考文献の節は不要です。引用番号だけで十分です。"#;

pub fn system_prompt(language: Language) -> &'static str {
    match language {
        Language::Ja => SYSTEM_PROMPT_JA,
        Language::En => SYSTEM_PROMPT_EN,
    }
}

pub fn user_prompt(question: &str, context: &str, language: Language) -> String {
    match language {
        Language::Ja => format!("情報源:\n\n{}\n\n質問: {}", context, question),
        Language::En => format!("Sources:\n\n{}\n\nQuestion: {}", context, question),
    }
}

/// Number every evidence item by its position and render it for the prompt.
/// Bodies (or summaries when there is no body) are cut at `max_chars`.
pub fn evidence_context(evidence: &[EvidenceItem], max_chars: usize) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let text = if item.has_body() {
                &item.body
            } else {
                &item.summary
            };
            let count = text.chars().count();
            let excerpt: String = text.chars().take(max_chars).collect();
            let ellipsis = if count > max_chars { "..." } else { "" };
            format!(
                "[{}] {} ({})\n{}{}",
                i + 1,
                item.title,
                item.url,
                excerpt.trim(),
                ellipsis
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
