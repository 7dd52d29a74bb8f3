//! Claim extraction and evidence-backed scoring of a draft answer.

pub mod citations;
pub mod scoring;
pub mod sentences;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::call::{call, CallBudget};
use crate::evidence::{EvidenceItem, SearchProvider};

pub use citations::{citation_ids, resolve_citations};
use citations::strip_markers;
use scoring::{overlap, significant_terms, tokens};
use sentences::split_sentences;

/// Confidence assigned to a claim whose source could not be re-fetched.
const DEGRADED_CONFIDENCE: f64 = 0.5;
/// Corpus-matched claims list at most this many supporting sources.
const MAX_SUPPORTING: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Unchecked,
    Pass,
    Review,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    pub source_citation_ids: BTreeSet<u32>,
    pub status: ClaimStatus,
    pub confidence: f64,
    pub supporting_evidence_urls: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub pass_count: usize,
    pub review_count: usize,
    pub fail_count: usize,
    pub average_confidence: f64,
    pub needs_additional_search: bool,
}

impl VerificationSummary {
    pub fn from_claims(claims: &[Claim], min_confidence: f64) -> Self {
        let count = |status| claims.iter().filter(|c| c.status == status).count();
        let pass_count = count(ClaimStatus::Pass);
        let review_count = count(ClaimStatus::Review);
        let fail_count = count(ClaimStatus::Fail);

        let average_confidence = if claims.is_empty() {
            0.0
        } else {
            claims.iter().map(|c| c.confidence).sum::<f64>() / claims.len() as f64
        };

        Self {
            total: pass_count + review_count + fail_count,
            pass_count,
            review_count,
            fail_count,
            average_confidence,
            needs_additional_search: fail_count > 0 || average_confidence < min_confidence,
        }
    }

    /// Summary of a pass that produced no claims at all.
    pub fn empty() -> Self {
        Self::from_claims(&[], f64::INFINITY)
    }

    /// Claims that did not reach `pass`.
    pub fn unverified(&self) -> usize {
        self.review_count + self.fail_count
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub pass: f64,
    pub review: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pass: 0.6,
            review: 0.3,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, confidence: f64) -> ClaimStatus {
        if confidence >= self.pass {
            ClaimStatus::Pass
        } else if confidence >= self.review {
            ClaimStatus::Review
        } else {
            ClaimStatus::Fail
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub thresholds: Thresholds,
    /// Average confidence below this asks for more evidence.
    pub min_confidence: f64,
    /// Sentences with fewer tokens are treated as noise.
    pub min_claim_tokens: usize,
    /// Re-fetch cited sources that only have a snippet before scoring.
    pub refetch_sources: bool,
    pub budget: CallBudget,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            min_confidence: 0.5,
            min_claim_tokens: 3,
            refetch_sources: false,
            budget: CallBudget::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub claims: Vec<Claim>,
    pub summary: VerificationSummary,
    pub errors: Vec<String>,
}

pub struct ClaimVerifier {
    search: Option<Arc<dyn SearchProvider>>,
    settings: VerifierSettings,
}

impl ClaimVerifier {
    pub fn new(settings: VerifierSettings) -> Self {
        Self {
            search: None,
            settings,
        }
    }

    /// Provider used for live re-fetching when `refetch_sources` is on.
    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    /// Score every claim in `draft` against the evidence.
    ///
    /// Deterministic for a given input unless re-fetching is enabled, and
    /// never aborts: a failed re-fetch downgrades the claim to `review`.
    pub async fn verify(
        &self,
        draft: &str,
        citations: &BTreeMap<u32, String>,
        evidence: &[EvidenceItem],
    ) -> Verification {
        let by_url: HashMap<&str, &EvidenceItem> =
            evidence.iter().map(|e| (e.url.as_str(), e)).collect();
        let item_terms: Vec<BTreeSet<String>> = evidence
            .iter()
            .map(|e| significant_terms(&format!("{} {} {}", e.title, e.summary, e.body)))
            .collect();
        let corpus: BTreeSet<String> = item_terms.iter().flatten().cloned().collect();

        let mut fetched: HashMap<String, Result<String, String>> = HashMap::new();
        let mut claims = Vec::new();
        let mut errors = Vec::new();

        for sentence in split_sentences(draft) {
            let text = strip_markers(&sentence);
            if tokens(&text).len() < self.settings.min_claim_tokens {
                continue;
            }
            let marker_ids: BTreeSet<u32> = citation_ids(&sentence).into_iter().collect();
            let claim_terms = significant_terms(&text);

            let cited: Vec<&EvidenceItem> = marker_ids
                .iter()
                .filter_map(|id| citations.get(id))
                .filter_map(|url| by_url.get(url.as_str()).copied())
                .collect();
            if cited.len() < marker_ids.len() {
                debug!(claim = %text, "claim cites unknown ids");
            }

            let (confidence, supporting) = if cited.is_empty() {
                score_against_corpus(&claim_terms, &corpus, &item_terms, evidence)
            } else {
                match self.cited_terms(&cited, &mut fetched).await {
                    Ok(terms) => {
                        let confidence = overlap(&claim_terms, &terms);
                        let supporting = cited
                            .iter()
                            .filter(|item| {
                                let own = significant_terms(&format!("{} {}", item.summary, item.body));
                                overlap(&claim_terms, &own) > 0.0
                            })
                            .map(|item| item.url.clone())
                            .collect::<BTreeSet<String>>();
                        (confidence, supporting)
                    }
                    Err(message) => {
                        errors.push(format!("claim \"{}\": {}", text, message));
                        claims.push(Claim {
                            text,
                            source_citation_ids: marker_ids,
                            status: ClaimStatus::Review,
                            confidence: DEGRADED_CONFIDENCE,
                            supporting_evidence_urls: BTreeSet::new(),
                        });
                        continue;
                    }
                }
            };

            claims.push(Claim {
                text,
                source_citation_ids: marker_ids,
                status: self.settings.thresholds.classify(confidence),
                confidence,
                supporting_evidence_urls: supporting,
            });
        }

        let summary = VerificationSummary::from_claims(&claims, self.settings.min_confidence);
        info!(
            total = summary.total,
            pass = summary.pass_count,
            review = summary.review_count,
            fail = summary.fail_count,
            average_confidence = summary.average_confidence,
            "verification pass complete"
        );

        Verification {
            claims,
            summary,
            errors,
        }
    }

    /// Terms of the cited items, re-fetching snippet-only sources when enabled.
    async fn cited_terms(
        &self,
        cited: &[&EvidenceItem],
        fetched: &mut HashMap<String, Result<String, String>>,
    ) -> Result<BTreeSet<String>, String> {
        let mut terms = BTreeSet::new();

        for item in cited {
            let mut text = format!("{} {}", item.summary, item.body);

            if !item.has_body() && self.settings.refetch_sources {
                if let Some(search) = &self.search {
                    if !fetched.contains_key(&item.url) {
                        let search = search.as_ref();
                        let url = item.url.as_str();
                        let outcome =
                            call("refetch_source", &self.settings.budget, || search.fetch_page(url))
                                .await
                                .map_err(|e| e.to_string());
                        if let Err(e) = &outcome {
                            warn!(url, error = %e, "source re-fetch failed");
                        }
                        fetched.insert(item.url.clone(), outcome);
                    }
                    match &fetched[&item.url] {
                        Ok(body) => {
                            text.push(' ');
                            text.push_str(body);
                        }
                        Err(e) => return Err(format!("re-fetch of {} failed: {}", item.url, e)),
                    }
                }
            }

            terms.extend(significant_terms(&text));
        }

        Ok(terms)
    }
}

/// Uncited claims: overlap with the whole corpus, best-matching items as support.
fn score_against_corpus(
    claim_terms: &BTreeSet<String>,
    corpus: &BTreeSet<String>,
    item_terms: &[BTreeSet<String>],
    evidence: &[EvidenceItem],
) -> (f64, BTreeSet<String>) {
    let confidence = overlap(claim_terms, corpus);

    let mut ranked: Vec<(usize, f64)> = item_terms
        .iter()
        .enumerate()
        .map(|(idx, terms)| (idx, overlap(claim_terms, terms)))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    // stable sort keeps evidence order among ties
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let supporting = ranked
        .into_iter()
        .take(MAX_SUPPORTING)
        .map(|(idx, _)| evidence[idx].url.clone())
        .collect();
    (confidence, supporting)
}
