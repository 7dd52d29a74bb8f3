use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::{stream, StreamExt};
use tracing::{debug, info, warn};

use super::normalize::normalize_url;
use super::types::{EvidenceItem, Language, Origin, SearchDepth, SearchHit, SearchRequest};
use super::{QueryHeuristics, SearchProvider};
use crate::call::{call, CallBudget, CallError};

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub result_limit: usize,
    /// Worker pool size for concurrent sub-queries and page fetches.
    pub concurrency: usize,
    pub max_follow_ups: usize,
    /// How many body-less items get a targeted page fetch.
    pub max_backfill: usize,
    pub budget: CallBudget,
    pub heuristics: QueryHeuristics,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            result_limit: 5,
            concurrency: 4,
            max_follow_ups: 3,
            max_backfill: 3,
            budget: CallBudget::default(),
            heuristics: QueryHeuristics::default(),
        }
    }
}

/// Output of one collection pass. Partial failures leave items and errors side by side.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub items: Vec<EvidenceItem>,
    pub errors: Vec<String>,
    /// Every search sub-query failed; `errors` holds the single collapsed entry.
    pub all_failed: bool,
}

impl Collection {
    pub fn is_partial(&self) -> bool {
        !self.items.is_empty() && !self.errors.is_empty()
    }
}

struct SubQuery {
    label: &'static str,
    query: String,
    depth: SearchDepth,
    origin: Origin,
}

pub struct EvidenceCollector {
    search: Arc<dyn SearchProvider>,
    settings: CollectorSettings,
}

impl EvidenceCollector {
    pub fn new(search: Arc<dyn SearchProvider>, settings: CollectorSettings) -> Self {
        Self { search, settings }
    }

    /// Gather new evidence for `query`, skipping URLs in `existing`.
    ///
    /// Never fails: whatever could be gathered is returned together with
    /// the errors met on the way.
    pub async fn collect(
        &self,
        query: &str,
        language: Language,
        existing: &HashSet<String>,
    ) -> Collection {
        let heuristics = &self.settings.heuristics;
        let shaped = heuristics.shape(query, language);

        let mut plans = vec![SubQuery {
            label: "primary",
            query: shaped.clone(),
            depth: SearchDepth::Full,
            origin: Origin::PrimarySearch,
        }];
        for follow_up in heuristics.follow_ups(query, language, self.settings.max_follow_ups) {
            plans.push(SubQuery {
                label: "follow_up",
                query: follow_up,
                depth: SearchDepth::Full,
                origin: Origin::FollowUpSearch,
            });
        }

        let mut outcomes = self.run_searches(&plans).await;

        let enriched = match &outcomes[0] {
            Ok(hits) => hits.iter().filter(|h| h.is_enriched()).count(),
            Err(_) => 0,
        };
        if enriched < self.settings.result_limit {
            debug!(enriched, limit = self.settings.result_limit, "issuing summary fallback");
            let fallback = SubQuery {
                label: "fallback",
                query: shaped,
                depth: SearchDepth::SummaryOnly,
                origin: Origin::PrimarySearch,
            };
            let outcome = self.search_once(&fallback).await;
            plans.insert(1, fallback);
            outcomes.insert(1, outcome);
        }

        let mut collection = merge(&plans, outcomes, language, existing);
        self.backfill(&mut collection).await;

        info!(
            query,
            new_items = collection.items.len(),
            errors = collection.errors.len(),
            "evidence collected"
        );
        collection
    }

    /// Issue every sub-query through the worker pool; results come back in dispatch order.
    async fn run_searches(&self, plans: &[SubQuery]) -> Vec<Result<Vec<SearchHit>, CallError>> {
        stream::iter(plans.iter().map(|plan| self.search_once(plan)))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    async fn search_once(&self, plan: &SubQuery) -> Result<Vec<SearchHit>, CallError> {
        let request = SearchRequest {
            query: plan.query.clone(),
            limit: self.settings.result_limit,
            depth: plan.depth,
        };
        let request = &request;
        let search = self.search.as_ref();
        let operation = format!("search:{}", plan.label);

        let mut hits = call(&operation, &self.settings.budget, || search.search(request)).await?;
        hits.truncate(self.settings.result_limit);
        Ok(hits)
    }

    /// Targeted fetches for the first items that still lack a body.
    async fn backfill(&self, collection: &mut Collection) {
        let targets: Vec<(usize, String)> = collection
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.has_body())
            .take(self.settings.max_backfill)
            .map(|(idx, item)| (idx, item.url.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let search = self.search.as_ref();
        let budget = &self.settings.budget;
        let fetched: Vec<_> = stream::iter(targets.into_iter().map(|(idx, url)| async move {
            let target = url.as_str();
            let outcome = call("fetch_page", budget, || search.fetch_page(target)).await;
            (idx, url, outcome)
        }))
        .buffered(self.settings.concurrency.max(1))
        .collect()
        .await;

        for (idx, url, outcome) in fetched {
            match outcome {
                Ok(body) if !body.trim().is_empty() => {
                    let item = &mut collection.items[idx];
                    item.body = body;
                    item.origin = Origin::TargetedFetch;
                    item.retrieved_at = Utc::now();
                }
                Ok(_) => collection
                    .errors
                    .push(format!("fetch {} returned an empty page; keeping snippet", url)),
                Err(err) => {
                    warn!(url, error = %err, "backfill fetch failed; keeping snippet");
                    collection.errors.push(format!("fetch {}: {}", url, err));
                }
            }
        }
    }
}

/// Fold sub-query results in dispatch order; the first occurrence of a URL wins.
fn merge(
    plans: &[SubQuery],
    outcomes: Vec<Result<Vec<SearchHit>, CallError>>,
    language: Language,
    existing: &HashSet<String>,
) -> Collection {
    let mut collection = Collection::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut failed = 0usize;
    let mut last_error = None;

    for (plan, outcome) in plans.iter().zip(outcomes) {
        match outcome {
            Ok(hits) => {
                for hit in hits {
                    let url = normalize_url(&hit.url);
                    if url.is_empty() || existing.contains(&url) || !seen.insert(url.clone()) {
                        continue;
                    }
                    collection
                        .items
                        .push(EvidenceItem::from_hit(hit, url, language, plan.origin));
                }
            }
            Err(err) => {
                failed += 1;
                collection
                    .errors
                    .push(format!("{} search '{}': {}", plan.label, plan.query, err));
                last_error = Some(err);
            }
        }
    }

    if failed == plans.len() {
        if let Some(err) = last_error {
            collection.errors = vec![format!("all {} search queries failed: {}", failed, err)];
            collection.all_failed = true;
        }
    }

    collection
}
