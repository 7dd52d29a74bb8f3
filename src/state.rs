use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::call::CallBudget;
use crate::evidence::{CollectorSettings, Language, QueryHeuristics};
use crate::research::LoopSettings;
use crate::verify::{Thresholds, VerifierSettings};

/// Tunable research parameters, read once at startup.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub min_loops: u32,
    pub max_loops: u32,
    pub result_limit: usize,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub call_timeout: Duration,
    pub pass_threshold: f64,
    pub review_threshold: f64,
    pub min_confidence: f64,
    pub min_claim_tokens: usize,
    pub refetch_sources: bool,
    /// `None` means detect from the query.
    pub language: Option<Language>,
    pub data_dir: PathBuf,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            min_loops: 1,
            max_loops: 3,
            result_limit: 5,
            concurrency: 4,
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            call_timeout: Duration::from_secs(30),
            pass_threshold: 0.6,
            review_threshold: 0.3,
            min_confidence: 0.5,
            min_claim_tokens: 3,
            refetch_sources: false,
            language: None,
            data_dir: PathBuf::from("./data/sessions"),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid {}='{}'", key, raw)),
        None => Ok(default),
    }
}

fn parse_language(raw: Option<String>) -> Result<Option<Language>> {
    match raw.as_deref().map(str::trim) {
        None | Some("") | Some("auto") => Ok(None),
        Some(code) => code
            .parse::<Language>()
            .map(Some)
            .with_context(|| format!("Invalid RESEARCH_LANGUAGE='{}'", code)),
    }
}

impl ResearchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let config = Self {
            min_loops: parse_or(&lookup, "RESEARCH_MIN_LOOPS", d.min_loops)?,
            max_loops: parse_or(&lookup, "RESEARCH_MAX_LOOPS", d.max_loops)?,
            result_limit: parse_or(&lookup, "RESEARCH_RESULT_LIMIT", d.result_limit)?,
            concurrency: parse_or(&lookup, "RESEARCH_CONCURRENCY", d.concurrency)?,
            max_attempts: parse_or(&lookup, "RESEARCH_MAX_ATTEMPTS", d.max_attempts)?,
            base_delay: Duration::from_millis(parse_or(
                &lookup,
                "RESEARCH_BASE_DELAY_MS",
                d.base_delay.as_millis() as u64,
            )?),
            call_timeout: Duration::from_secs(parse_or(
                &lookup,
                "RESEARCH_CALL_TIMEOUT_SECS",
                d.call_timeout.as_secs(),
            )?),
            pass_threshold: parse_or(&lookup, "RESEARCH_PASS_THRESHOLD", d.pass_threshold)?,
            review_threshold: parse_or(&lookup, "RESEARCH_REVIEW_THRESHOLD", d.review_threshold)?,
            min_confidence: parse_or(&lookup, "RESEARCH_MIN_CONFIDENCE", d.min_confidence)?,
            min_claim_tokens: parse_or(&lookup, "RESEARCH_MIN_CLAIM_TOKENS", d.min_claim_tokens)?,
            refetch_sources: parse_or(&lookup, "RESEARCH_REFETCH_SOURCES", d.refetch_sources)?,
            language: parse_language(lookup("RESEARCH_LANGUAGE"))?,
            data_dir: lookup("RESEARCH_DATA_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("RESEARCH_MAX_ATTEMPTS must be at least 1");
        }
        if self.result_limit == 0 {
            anyhow::bail!("RESEARCH_RESULT_LIMIT must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.review_threshold)
            || !(0.0..=1.0).contains(&self.pass_threshold)
            || self.review_threshold > self.pass_threshold
        {
            anyhow::bail!(
                "thresholds must satisfy 0 <= review ({}) <= pass ({}) <= 1",
                self.review_threshold,
                self.pass_threshold
            );
        }
        Ok(())
    }

    /// Explicit language if configured, otherwise detected from the query.
    pub fn language_for(&self, query: &str) -> Language {
        self.language.unwrap_or_else(|| Language::detect(query))
    }

    pub fn budget(&self) -> CallBudget {
        CallBudget {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            timeout: self.call_timeout,
        }
    }

    pub fn collector(&self) -> CollectorSettings {
        CollectorSettings {
            result_limit: self.result_limit,
            concurrency: self.concurrency.max(1),
            budget: self.budget(),
            heuristics: QueryHeuristics::default(),
            ..CollectorSettings::default()
        }
    }

    pub fn verifier(&self) -> VerifierSettings {
        VerifierSettings {
            thresholds: Thresholds {
                pass: self.pass_threshold,
                review: self.review_threshold,
            },
            min_confidence: self.min_confidence,
            min_claim_tokens: self.min_claim_tokens,
            refetch_sources: self.refetch_sources,
            budget: self.budget(),
        }
    }

    pub fn loops(&self) -> LoopSettings {
        LoopSettings {
            min_loops: self.min_loops,
            max_loops: self.max_loops,
            // completions run much longer than searches
            draft_budget: CallBudget {
                timeout: self.call_timeout.saturating_mul(4),
                ..self.budget()
            },
            ..LoopSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ResearchConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ResearchConfig::from_lookup(move |key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.min_loops, 1);
        assert_eq!(config.max_loops, 3);
        assert_eq!(config.result_limit, 5);
        assert_eq!(config.budget().max_attempts, 3);
        assert_eq!(config.budget().base_delay, Duration::from_millis(500));
        assert_eq!(config.verifier().thresholds.pass, 0.6);
        assert!(!config.refetch_sources);
        assert_eq!(config.language, None);
        assert_eq!(config.data_dir, PathBuf::from("./data/sessions"));
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("RESEARCH_MAX_LOOPS", "5"),
            ("RESEARCH_PASS_THRESHOLD", "0.8"),
            ("RESEARCH_REFETCH_SOURCES", "true"),
            ("RESEARCH_LANGUAGE", "ja"),
            ("RESEARCH_CALL_TIMEOUT_SECS", "10"),
        ])
        .unwrap();
        assert_eq!(config.loops().max_loops, 5);
        assert_eq!(config.loops().draft_budget.timeout, Duration::from_secs(40));
        assert_eq!(config.verifier().thresholds.pass, 0.8);
        assert!(config.verifier().refetch_sources);
        assert_eq!(config.language_for("sea level"), Language::Ja);
    }

    #[test]
    fn test_extreme_values_do_not_overflow() {
        let config = from_pairs(&[
            ("RESEARCH_MAX_LOOPS", "4294967295"),
            ("RESEARCH_CALL_TIMEOUT_SECS", "18446744073709551615"),
        ])
        .unwrap();
        let loops = config.loops();
        assert_eq!(loops.max_loops, u32::MAX);
        assert_eq!(loops.draft_budget.timeout, Duration::MAX);
    }

    #[test]
    fn test_language_auto_detects() {
        let config = from_pairs(&[("RESEARCH_LANGUAGE", "auto")]).unwrap();
        assert_eq!(config.language_for("海面上昇の最新データ"), Language::Ja);
        assert_eq!(config.language_for("sea level rise"), Language::En);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = from_pairs(&[("RESEARCH_MAX_LOOPS", "three")]).unwrap_err();
        assert!(err.to_string().contains("RESEARCH_MAX_LOOPS"));
        assert!(from_pairs(&[("RESEARCH_LANGUAGE", "fr")]).is_err());
        assert!(from_pairs(&[("RESEARCH_REVIEW_THRESHOLD", "0.9")]).is_err());
        assert!(from_pairs(&[("RESEARCH_MAX_ATTEMPTS", "0")]).is_err());
    }
}
