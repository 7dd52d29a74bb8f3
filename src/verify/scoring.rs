use std::collections::BTreeSet;

use crate::evidence::types::is_japanese_char;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "of", "to", "in", "on", "for", "by", "at", "as", "is",
    "are", "was", "were", "be", "been", "being", "it", "its", "this", "that", "these", "those",
    "with", "from", "about", "into", "than", "then", "there", "their", "they", "them", "has",
    "have", "had", "not", "no", "so", "such", "also", "which", "who", "whom", "what", "when",
    "where", "how", "will", "would", "could", "should", "can", "may", "might", "do", "does",
    "did", "more", "most", "very", "some", "many", "much", "only", "over", "under", "we", "our",
    "you", "your", "he", "she", "his", "her", "i", "if", "while", "per", "via",
];

fn is_hiragana(c: char) -> bool {
    ('\u{3040}'..='\u{309f}').contains(&c)
}

/// Lowercased tokens. Latin runs become words; kanji/katakana runs become
/// character bigrams (hiragana acts as a separator, it is mostly particles).
pub fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();
    let mut cjk: Vec<char> = Vec::new();

    for c in text.chars() {
        if is_japanese_char(c) && !is_hiragana(c) {
            flush_word(&mut word, &mut out);
            cjk.push(c);
        } else if c.is_alphanumeric() && !is_hiragana(c) {
            flush_cjk(&mut cjk, &mut out);
            word.extend(c.to_lowercase());
        } else {
            flush_word(&mut word, &mut out);
            flush_cjk(&mut cjk, &mut out);
        }
    }
    flush_word(&mut word, &mut out);
    flush_cjk(&mut cjk, &mut out);
    out
}

fn flush_word(word: &mut String, out: &mut Vec<String>) {
    if !word.is_empty() {
        out.push(std::mem::take(word));
    }
}

fn flush_cjk(run: &mut Vec<char>, out: &mut Vec<String>) {
    match run.len() {
        0 => {}
        1 => out.push(run[0].to_string()),
        _ => out.extend(run.windows(2).map(|w| w.iter().collect::<String>())),
    }
    run.clear();
}

/// Tokens worth comparing: stopwords and single Latin characters dropped.
pub fn significant_terms(text: &str) -> BTreeSet<String> {
    tokens(text)
        .into_iter()
        .filter(|t| {
            let cjk = t.chars().any(is_japanese_char);
            (cjk || t.chars().count() > 1) && !STOP_WORDS.contains(&t.as_str())
        })
        .collect()
}

/// Share of `claim` terms present in `evidence`, in [0, 1].
pub fn overlap(claim: &BTreeSet<String>, evidence: &BTreeSet<String>) -> f64 {
    if claim.is_empty() {
        return 0.0;
    }
    let shared = claim.iter().filter(|t| evidence.contains(*t)).count();
    (shared as f64 / claim.len() as f64).clamp(0.0, 1.0)
}
