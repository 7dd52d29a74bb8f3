pub mod prompts;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::call::{call, CallBudget, Failure};
use crate::convergence::{decide, finish_outcome, Decision};
use crate::evidence::{EvidenceCollector, Language};
use crate::verify::{citation_ids, resolve_citations, ClaimVerifier, VerificationSummary};

pub use state::{ErrorKind, ErrorRecord, RunState, Stage};

/// Fatal errors. Everything else is recorded into `RunState.errors`.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("transition to {stage} invoked on terminal run {run_id}")]
    TerminalState { run_id: String, stage: Stage },
    #[error("run {run_id} exceeded its budget of {limit} transitions")]
    StepBudgetExceeded { run_id: String, limit: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRequest {
    pub prompt: String,
    /// Numbered evidence, built only from `RunState.evidence`.
    pub context: String,
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    pub citations_used: Vec<u32>,
}

/// Language model that writes the answer.
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    async fn draft(&self, request: &DraftRequest) -> Result<Draft, Failure>;
}

/// Turns a terminal run into the user-facing document.
pub trait ReportAssembler: Send + Sync {
    fn assemble(&self, state: &RunState) -> anyhow::Result<String>;
}

/// One state transition, broadcast for live progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub run_id: String,
    pub from: Stage,
    pub to: Stage,
    pub loop_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub min_loops: u32,
    pub max_loops: u32,
    pub draft_budget: CallBudget,
    /// Per-item character cap in the drafting context.
    pub context_chars: usize,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            min_loops: 1,
            max_loops: 3,
            draft_budget: CallBudget {
                timeout: Duration::from_secs(120),
                ..CallBudget::default()
            },
            context_chars: 2000,
        }
    }
}

/// Final run state plus the assembled report, when assembly succeeded.
#[derive(Debug)]
pub struct Completion {
    pub state: RunState,
    pub report: Option<String>,
}

const EVENT_CAPACITY: usize = 64;

pub struct Orchestrator {
    collector: EvidenceCollector,
    drafter: Arc<dyn DraftGenerator>,
    verifier: ClaimVerifier,
    assembler: Arc<dyn ReportAssembler>,
    settings: LoopSettings,
    events: broadcast::Sender<TransitionEvent>,
}

impl Orchestrator {
    pub fn new(
        collector: EvidenceCollector,
        drafter: Arc<dyn DraftGenerator>,
        verifier: ClaimVerifier,
        assembler: Arc<dyn ReportAssembler>,
        settings: LoopSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            collector,
            drafter,
            verifier,
            assembler,
            settings,
            events,
        }
    }

    /// Live transition events. Slow subscribers lag; they never block the run.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    /// Four transitions per loop, plus finalizing and one spare.
    pub fn max_steps(&self) -> u32 {
        self.settings
            .max_loops
            .saturating_add(1)
            .saturating_mul(4)
            .saturating_add(2)
    }

    pub async fn run(
        &self,
        query: &str,
        language: Language,
        cancel: &CancellationToken,
    ) -> Result<Completion, WorkflowError> {
        self.run_from(RunState::new(query, language), cancel).await
    }

    /// Drive a (possibly resumed) run to completion, starting at collection.
    pub async fn run_from(
        &self,
        mut state: RunState,
        cancel: &CancellationToken,
    ) -> Result<Completion, WorkflowError> {
        state.ensure_live(Stage::Collecting)?;
        info!(
            run_id = %state.id,
            query = %state.query,
            language = %state.language,
            loop_count = state.loop_count,
            "research run started"
        );

        let mut stage = Stage::Collecting;
        let mut steps = 0u32;
        let mut report = None;

        while stage != Stage::Done {
            if stage != Stage::Finalizing && cancel.is_cancelled() {
                warn!(run_id = %state.id, %stage, "cancellation requested");
                state.mark_cancelled(stage);
                self.emit(&state, stage, Stage::Finalizing);
                stage = Stage::Finalizing;
                continue;
            }

            steps += 1;
            if steps > self.max_steps() {
                return Err(WorkflowError::StepBudgetExceeded {
                    run_id: state.id.clone(),
                    limit: self.max_steps(),
                });
            }

            let next = match stage {
                Stage::Collecting => {
                    state = self.collect(state).await?;
                    Stage::Drafting
                }
                Stage::Drafting => {
                    state = self.draft(state).await?;
                    Stage::Verifying
                }
                Stage::Verifying => {
                    state = self.verify(state).await?;
                    Stage::Routing
                }
                Stage::Routing => {
                    let (routed, next) = self.route(state)?;
                    state = routed;
                    next
                }
                Stage::Finalizing => {
                    report = self.finalize(&state);
                    Stage::Done
                }
                Stage::Done => break,
            };

            self.emit(&state, stage, next);
            stage = next;
        }

        info!(
            run_id = %state.id,
            loop_count = state.loop_count,
            evidence = state.evidence.len(),
            errors = state.errors.len(),
            outcome = ?state.outcome,
            "research run finished"
        );
        Ok(Completion { state, report })
    }

    async fn collect(&self, mut state: RunState) -> Result<RunState, WorkflowError> {
        state.ensure_live(Stage::Collecting)?;

        let existing = state.complete_urls();
        let collection = self
            .collector
            .collect(&state.query, state.language, &existing)
            .await;

        let kind = if collection.all_failed {
            ErrorKind::CollectionFailed
        } else {
            ErrorKind::PartialCollectionFailure
        };
        if collection.is_partial() {
            debug!(run_id = %state.id, errors = collection.errors.len(), "collection partially failed");
        }
        for message in collection.errors {
            state.record_error(Stage::Collecting, kind, message);
        }

        let changed = state.merge_evidence(collection.items);
        if changed == 0 {
            warn!(run_id = %state.id, loop_count = state.loop_count, "no new evidence this pass");
        }
        debug!(run_id = %state.id, changed, total = state.evidence.len(), "evidence merged");
        Ok(state)
    }

    async fn draft(&self, mut state: RunState) -> Result<RunState, WorkflowError> {
        state.ensure_live(Stage::Drafting)?;

        if state.evidence.is_empty() {
            warn!(run_id = %state.id, "no evidence yet; keeping previous draft");
            return Ok(state);
        }

        let request = DraftRequest {
            prompt: state.query.clone(),
            context: prompts::evidence_context(&state.evidence, self.settings.context_chars),
            language: state.language,
        };
        let request = &request;
        let drafter = self.drafter.as_ref();

        match call("draft", &self.settings.draft_budget, || drafter.draft(request)).await {
            Ok(draft) => {
                let mut ids = citation_ids(&draft.text);
                for id in draft.citations_used {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                let (citations, unresolved) = resolve_citations(&ids, &state.evidence);
                if !unresolved.is_empty() {
                    warn!(run_id = %state.id, ?unresolved, "draft cites unknown sources");
                }
                state.draft = draft.text;
                state.citations = citations;
                state.unresolved_citations = unresolved;
            }
            Err(err) => {
                warn!(run_id = %state.id, class = ?err.class(), "drafting failed; keeping previous draft");
                state.record_error(Stage::Drafting, ErrorKind::DraftFailed, err.to_string());
            }
        }
        Ok(state)
    }

    async fn verify(&self, mut state: RunState) -> Result<RunState, WorkflowError> {
        state.ensure_live(Stage::Verifying)?;

        let verification = self
            .verifier
            .verify(&state.draft, &state.citations, &state.evidence)
            .await;
        for message in verification.errors {
            state.record_error(Stage::Verifying, ErrorKind::VerificationDegraded, message);
        }
        state.claims = verification.claims;
        state.verification = Some(verification.summary);
        Ok(state)
    }

    fn route(&self, mut state: RunState) -> Result<(RunState, Stage), WorkflowError> {
        state.ensure_live(Stage::Routing)?;

        let summary = state
            .verification
            .clone()
            .unwrap_or_else(VerificationSummary::empty);
        let decision = decide(
            state.loop_count,
            &summary,
            self.settings.min_loops,
            self.settings.max_loops,
        );
        info!(
            run_id = %state.id,
            loop_count = state.loop_count,
            ?decision,
            fail = summary.fail_count,
            average_confidence = summary.average_confidence,
            "routing"
        );

        match decision {
            Decision::Continue => {
                state.loop_count += 1;
                state.verification = None;
                state.claims.clear();
                Ok((state, Stage::Collecting))
            }
            Decision::Finish => {
                state.outcome = Some(finish_outcome(&summary));
                state.terminal = true;
                Ok((state, Stage::Finalizing))
            }
        }
    }

    fn finalize(&self, state: &RunState) -> Option<String> {
        match self.assembler.assemble(state) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(run_id = %state.id, error = %e, "report assembly failed");
                None
            }
        }
    }

    fn emit(&self, state: &RunState, from: Stage, to: Stage) {
        debug!(run_id = %state.id, %from, %to, loop_count = state.loop_count, "transition");
        // no subscriber is fine
        let _ = self.events.send(TransitionEvent {
            run_id: state.id.clone(),
            from,
            to,
            loop_count: state.loop_count,
            timestamp: Utc::now(),
        });
    }
}
