use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::WorkflowError;
use crate::convergence::Outcome;
use crate::evidence::{EvidenceItem, Language};
use crate::verify::{Claim, VerificationSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collecting,
    Drafting,
    Verifying,
    Routing,
    Finalizing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Collecting => "collecting",
            Stage::Drafting => "drafting",
            Stage::Verifying => "verifying",
            Stage::Routing => "routing",
            Stage::Finalizing => "finalizing",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Some sub-queries failed; the evidence gathered is still usable.
    PartialCollectionFailure,
    /// Every sub-query failed; nothing new this pass.
    CollectionFailed,
    DraftFailed,
    /// A supplemental fetch failed and a claim was downgraded.
    VerificationDegraded,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything one research run knows. Owned by the orchestrator and passed
/// by value through each transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub id: String,
    pub query: String,
    pub language: Language,
    pub started_at: DateTime<Utc>,
    /// Unique by normalized URL; append or replace-in-place only.
    pub evidence: Vec<EvidenceItem>,
    pub draft: String,
    /// Citation id (1-based evidence position) → evidence URL.
    pub citations: BTreeMap<u32, String>,
    /// Ids the draft cites that match no evidence item.
    pub unresolved_citations: Vec<u32>,
    pub claims: Vec<Claim>,
    pub verification: Option<VerificationSummary>,
    pub loop_count: u32,
    pub errors: Vec<ErrorRecord>,
    pub terminal: bool,
    pub outcome: Option<Outcome>,
}

impl RunState {
    pub fn new(query: &str, language: Language) -> Self {
        let started_at = Utc::now();
        let mut hasher = blake3::Hasher::new();
        hasher.update(query.as_bytes());
        hasher.update(started_at.to_rfc3339().as_bytes());
        let id = hasher.finalize().to_hex().as_str()[..16].to_string();

        Self {
            id,
            query: query.trim().to_string(),
            language,
            started_at,
            evidence: Vec::new(),
            draft: String::new(),
            citations: BTreeMap::new(),
            unresolved_citations: Vec::new(),
            claims: Vec::new(),
            verification: None,
            loop_count: 0,
            errors: Vec::new(),
            terminal: false,
            outcome: None,
        }
    }

    /// Guard for every transition: a terminal run must not change.
    pub fn ensure_live(&self, stage: Stage) -> Result<(), WorkflowError> {
        if self.terminal {
            return Err(WorkflowError::TerminalState {
                run_id: self.id.clone(),
                stage,
            });
        }
        Ok(())
    }

    pub fn record_error(&mut self, stage: Stage, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            stage,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// URLs the collector should not bring back. Snippet-only items are left
    /// out so a later pass can supersede them with a full copy.
    pub fn complete_urls(&self) -> HashSet<String> {
        self.evidence
            .iter()
            .filter(|e| e.has_body())
            .map(|e| e.url.clone())
            .collect()
    }

    /// Append new items; a full copy of a URL held only as a stub replaces
    /// the stub in place. Returns how many items were appended or replaced.
    pub fn merge_evidence(&mut self, items: Vec<EvidenceItem>) -> usize {
        let mut changed = 0;
        for item in items {
            match self.evidence.iter().position(|e| e.url == item.url) {
                Some(idx) => {
                    if !self.evidence[idx].has_body() && item.has_body() {
                        self.evidence[idx] = item;
                        changed += 1;
                    }
                }
                None => {
                    self.evidence.push(item);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Terminate the run early, keeping everything gathered so far.
    pub fn mark_cancelled(&mut self, stage: Stage) {
        self.record_error(
            stage,
            ErrorKind::Cancelled,
            format!("run cancelled before {}", stage),
        );
        self.terminal = true;
        self.outcome = Some(Outcome::Cancelled);
    }

    /// Claims that could not be fully verified (review or fail).
    pub fn unverified_claims(&self) -> usize {
        self.verification.as_ref().map_or(0, |v| v.unverified())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::evidence;

    #[test]
    fn test_merge_appends_unique_urls() {
        let mut state = RunState::new("coral bleaching", Language::En);
        state.merge_evidence(vec![
            evidence("https://a.example", "A", "alpha"),
            evidence("https://b.example", "B", "beta"),
        ]);
        state.merge_evidence(vec![
            evidence("https://a.example", "A again", "alpha two"),
            evidence("https://c.example", "C", "gamma"),
        ]);

        let urls: Vec<&str> = state.evidence.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.example", "https://b.example", "https://c.example"]);
        assert_eq!(state.evidence[0].title, "A");
    }

    #[test]
    fn test_full_copy_replaces_stub_in_place() {
        let mut state = RunState::new("coral", Language::En);
        state.merge_evidence(vec![
            evidence("https://a.example", "A stub", ""),
            evidence("https://b.example", "B", "beta"),
        ]);
        assert_eq!(state.complete_urls(), HashSet::from(["https://b.example".to_string()]));

        let changed = state.merge_evidence(vec![evidence("https://a.example", "A full", "alpha")]);

        assert_eq!(changed, 1);
        assert_eq!(state.evidence.len(), 2);
        assert_eq!(state.evidence[0].title, "A full");
    }

    #[test]
    fn test_terminal_guard() {
        let mut state = RunState::new("coral", Language::En);
        assert!(state.ensure_live(Stage::Collecting).is_ok());
        state.mark_cancelled(Stage::Drafting);
        assert!(state.terminal);
        assert_eq!(state.outcome, Some(Outcome::Cancelled));
        assert_eq!(state.errors[0].kind, ErrorKind::Cancelled);
        assert!(matches!(
            state.ensure_live(Stage::Verifying),
            Err(WorkflowError::TerminalState { stage: Stage::Verifying, .. })
        ));
    }

    #[test]
    fn test_run_ids_differ_per_run() {
        let a = RunState::new("coral", Language::En);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = RunState::new("coral", Language::En);
        assert_eq!(a.id.len(), 16);
        assert_ne!(a.id, b.id);
    }
}
