pub mod collector;
pub mod normalize;
pub mod types;

use async_trait::async_trait;

use crate::call::Failure;

pub use collector::{Collection, CollectorSettings, EvidenceCollector};
pub use normalize::normalize_url;
pub use types::{EvidenceItem, Language, Origin, SearchDepth, SearchHit, SearchRequest};

/// Web search backend. Implementations classify their own failures.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, Failure>;

    /// Fetch a single page and return its readable text.
    async fn fetch_page(&self, url: &str) -> Result<String, Failure>;
}

/// Query shaping and follow-up stance words, per language.
#[derive(Debug, Clone)]
pub struct QueryHeuristics {
    pub recency_en: String,
    pub recency_ja: String,
    pub follow_ups_en: Vec<String>,
    pub follow_ups_ja: Vec<String>,
}

impl Default for QueryHeuristics {
    fn default() -> Self {
        Self {
            recency_en: "latest".to_string(),
            recency_ja: "最新".to_string(),
            follow_ups_en: vec![
                "supporting evidence".to_string(),
                "case study".to_string(),
                "official regulation".to_string(),
            ],
            follow_ups_ja: vec![
                "根拠".to_string(),
                "事例".to_string(),
                "公式 規制".to_string(),
            ],
        }
    }
}

impl QueryHeuristics {
    pub fn recency(&self, language: Language) -> &str {
        match language {
            Language::Ja => &self.recency_ja,
            Language::En => &self.recency_en,
        }
    }

    pub fn stances(&self, language: Language) -> &[String] {
        match language {
            Language::Ja => &self.follow_ups_ja,
            Language::En => &self.follow_ups_en,
        }
    }

    /// Append the recency qualifier unless the query already carries it.
    pub fn shape(&self, query: &str, language: Language) -> String {
        let query = query.trim();
        let token = self.recency(language);
        if token.is_empty() || query.to_lowercase().contains(&token.to_lowercase()) {
            query.to_string()
        } else {
            format!("{} {}", query, token)
        }
    }

    pub fn follow_ups(&self, query: &str, language: Language, max: usize) -> Vec<String> {
        let query = query.trim();
        self.stances(language)
            .iter()
            .filter(|s| !s.trim().is_empty())
            .take(max)
            .map(|stance| format!("{} {}", query, stance))
            .collect()
    }
}
