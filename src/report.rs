use std::fmt::Write as _;

use anyhow::Result;

use crate::convergence::Outcome;
use crate::evidence::Language;
use crate::research::{ReportAssembler, RunState};
use crate::verify::ClaimStatus;

/// Renders a terminal run as a Markdown document.
pub struct MarkdownReport;

struct Labels {
    answer: &'static str,
    no_answer: &'static str,
    sources: &'static str,
    verification: &'static str,
    unresolved: &'static str,
    errors: &'static str,
    run: &'static str,
}

fn labels(language: Language) -> Labels {
    match language {
        Language::Ja => Labels {
            answer: "回答",
            no_answer: "回答を作成できませんでした。",
            sources: "情報源",
            verification: "検証",
            unresolved: "解決できない引用",
            errors: "エラー",
            run: "実行情報",
        },
        Language::En => Labels {
            answer: "Answer",
            no_answer: "No answer could be drafted.",
            sources: "Sources",
            verification: "Verification",
            unresolved: "Unresolved citations",
            errors: "Errors",
            run: "Run",
        },
    }
}

fn status_label(status: ClaimStatus) -> &'static str {
    match status {
        ClaimStatus::Unchecked => "unchecked",
        ClaimStatus::Pass => "pass",
        ClaimStatus::Review => "review",
        ClaimStatus::Fail => "fail",
    }
}

fn outcome_label(outcome: Option<Outcome>) -> &'static str {
    match outcome {
        Some(Outcome::Converged) => "converged",
        Some(Outcome::BudgetExhausted) => "loop budget exhausted",
        Some(Outcome::Cancelled) => "cancelled",
        None => "unfinished",
    }
}

/// Keep table rows on one line.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

impl ReportAssembler for MarkdownReport {
    fn assemble(&self, state: &RunState) -> Result<String> {
        let l = labels(state.language);
        let mut out = String::new();

        writeln!(out, "# {}", state.query)?;
        writeln!(out)?;

        writeln!(out, "## {}", l.answer)?;
        writeln!(out)?;
        if state.draft.trim().is_empty() {
            writeln!(out, "_{}_", l.no_answer)?;
        } else {
            writeln!(out, "{}", state.draft.trim())?;
        }
        writeln!(out)?;

        if !state.evidence.is_empty() {
            writeln!(out, "## {}", l.sources)?;
            writeln!(out)?;
            for (i, item) in state.evidence.iter().enumerate() {
                let title = if item.title.trim().is_empty() {
                    item.url.as_str()
                } else {
                    item.title.trim()
                };
                writeln!(out, "{}. [{}]({})", i + 1, title, item.url)?;
            }
            writeln!(out)?;
        }

        writeln!(out, "## {}", l.verification)?;
        writeln!(out)?;
        match &state.verification {
            Some(summary) => {
                writeln!(
                    out,
                    "{} of {} claims could not be fully verified.",
                    summary.unverified(),
                    summary.total
                )?;
                writeln!(
                    out,
                    "pass: {}, review: {}, fail: {}, average confidence: {:.2}",
                    summary.pass_count,
                    summary.review_count,
                    summary.fail_count,
                    summary.average_confidence
                )?;
                if !state.claims.is_empty() {
                    writeln!(out)?;
                    writeln!(out, "| Claim | Status | Confidence | Sources |")?;
                    writeln!(out, "|---|---|---|---|")?;
                    for claim in &state.claims {
                        let ids = claim
                            .source_citation_ids
                            .iter()
                            .map(|id| format!("[{}]", id))
                            .collect::<Vec<_>>()
                            .join(" ");
                        writeln!(
                            out,
                            "| {} | {} | {:.2} | {} |",
                            cell(&claim.text),
                            status_label(claim.status),
                            claim.confidence,
                            ids
                        )?;
                    }
                }
            }
            None => writeln!(out, "Not verified.")?,
        }
        writeln!(out)?;

        if !state.unresolved_citations.is_empty() {
            writeln!(out, "## {}", l.unresolved)?;
            writeln!(out)?;
            let ids = state
                .unresolved_citations
                .iter()
                .map(|id| format!("[{}]", id))
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(out, "{}", ids)?;
            writeln!(out)?;
        }

        if !state.errors.is_empty() {
            writeln!(out, "## {}", l.errors)?;
            writeln!(out)?;
            for err in &state.errors {
                writeln!(
                    out,
                    "- `{}` {}: {}",
                    err.timestamp.format("%H:%M:%S"),
                    err.stage,
                    err.message
                )?;
            }
            writeln!(out)?;
        }

        writeln!(out, "## {}", l.run)?;
        writeln!(out)?;
        writeln!(out, "- id: `{}`", state.id)?;
        writeln!(out, "- loops: {}", state.loop_count + 1)?;
        writeln!(out, "- outcome: {}", outcome_label(state.outcome))?;

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{ErrorKind, Stage};
    use crate::testing::evidence;
    use crate::verify::{Claim, VerificationSummary};
    use std::collections::BTreeSet;

    fn claim(text: &str, status: ClaimStatus, confidence: f64, ids: &[u32]) -> Claim {
        Claim {
            text: text.to_string(),
            source_citation_ids: ids.iter().copied().collect(),
            status,
            confidence,
            supporting_evidence_urls: BTreeSet::new(),
        }
    }

    #[test]
    fn test_report_sections() {
        let mut state = RunState::new("Is sea level rising?", Language::En);
        state.evidence = vec![
            evidence("https://a.example/sea", "Sea report", "body"),
            evidence("https://b.example", "", "body"),
        ];
        state.draft = "Sea levels rose 3cm [1]. Coral bleaching tripled [2].".to_string();
        state.claims = vec![
            claim("Sea levels rose 3cm", ClaimStatus::Pass, 0.75, &[1]),
            claim("Coral bleaching tripled", ClaimStatus::Fail, 0.0, &[2]),
        ];
        state.verification = Some(VerificationSummary::from_claims(&state.claims, 0.5));
        state.unresolved_citations = vec![7];
        state.record_error(
            Stage::Collecting,
            ErrorKind::PartialCollectionFailure,
            "search:follow_up failed",
        );
        state.loop_count = 2;
        state.outcome = Some(Outcome::BudgetExhausted);

        let md = MarkdownReport.assemble(&state).unwrap();

        assert!(md.starts_with("# Is sea level rising?\n"));
        assert!(md.contains("Sea levels rose 3cm [1]."));
        assert!(md.contains("1. [Sea report](https://a.example/sea)"));
        assert!(md.contains("2. [https://b.example](https://b.example)"));
        assert!(md.contains("1 of 2 claims could not be fully verified."));
        assert!(md.contains("| Coral bleaching tripled | fail | 0.00 | [2] |"));
        assert!(md.contains("## Unresolved citations\n\n[7]"));
        assert!(md.contains("collecting: search:follow_up failed"));
        assert!(md.contains("- loops: 3"));
        assert!(md.contains("- outcome: loop budget exhausted"));
    }

    #[test]
    fn test_report_for_empty_run() {
        let mut state = RunState::new("海面上昇は加速しているか", Language::Ja);
        state.mark_cancelled(Stage::Collecting);

        let md = MarkdownReport.assemble(&state).unwrap();

        assert!(md.contains("## 回答"));
        assert!(md.contains("回答を作成できませんでした。"));
        assert!(!md.contains("## 情報源"));
        assert!(md.contains("Not verified."));
        assert!(md.contains("- outcome: cancelled"));
    }

    #[test]
    fn test_cell_escapes_pipes() {
        assert_eq!(cell("a | b\nc"), "a \\| b c");
    }
}
