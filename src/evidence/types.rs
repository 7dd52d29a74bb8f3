use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ja,
    En,
}

impl Language {
    /// Any kana or CJK ideograph marks the text as Japanese.
    pub fn detect(text: &str) -> Self {
        if text.chars().any(is_japanese_char) {
            Language::Ja
        } else {
            Language::En
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::Ja => "ja",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ja" | "jp" | "japanese" => Ok(Language::Ja),
            "en" | "english" => Ok(Language::En),
            other => Err(anyhow::anyhow!("unknown language '{}'", other)),
        }
    }
}

pub(crate) fn is_japanese_char(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30ff}'   // hiragana, katakana
        | '\u{3400}'..='\u{4dbf}' // CJK extension A
        | '\u{4e00}'..='\u{9fff}' // CJK unified ideographs
        | '\u{ff66}'..='\u{ff9f}' // half-width katakana
    )
}

/// How an evidence item entered the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    PrimarySearch,
    FollowUpSearch,
    TargetedFetch,
}

/// One retrieved source. `url` is normalized and is the item's identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub url: String,
    pub title: String,
    pub summary: String,
    /// Empty when only a snippet was retrieved.
    #[serde(default)]
    pub body: String,
    pub language: Language,
    pub retrieved_at: DateTime<Utc>,
    pub origin: Origin,
}

impl EvidenceItem {
    pub fn from_hit(hit: SearchHit, url: String, language: Language, origin: Origin) -> Self {
        Self {
            url,
            title: hit.title,
            summary: hit.snippet,
            body: hit.body.unwrap_or_default(),
            language,
            retrieved_at: Utc::now(),
            origin,
        }
    }

    pub fn has_body(&self) -> bool {
        !self.body.trim().is_empty()
    }
}

/// Result row returned by a search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub body: Option<String>,
}

impl SearchHit {
    pub fn is_enriched(&self) -> bool {
        self.body.as_deref().is_some_and(|b| !b.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDepth {
    /// Ask the provider for full page bodies.
    Full,
    /// Titles and snippets only. Cheaper, used as a fallback.
    SummaryOnly,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub depth: SearchDepth,
}
