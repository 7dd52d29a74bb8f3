//! Loop control: decide whether another collect/draft/verify round is worth it.

use serde::{Deserialize, Serialize};

use crate::verify::VerificationSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Loop back and collect more evidence.
    Continue,
    Finish,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Converged,
    /// The loop ceiling stopped the run while claims still needed evidence.
    BudgetExhausted,
    Cancelled,
}

/// Rules apply in order; the ceiling always beats quality signals.
/// A floor above the ceiling is read as the ceiling.
pub fn decide(
    loop_count: u32,
    summary: &VerificationSummary,
    min_loops: u32,
    max_loops: u32,
) -> Decision {
    if loop_count < min_loops.min(max_loops) {
        Decision::Continue
    } else if loop_count >= max_loops {
        Decision::Finish
    } else if summary.needs_additional_search {
        Decision::Continue
    } else {
        Decision::Finish
    }
}

/// Classify a `Finish` decision.
pub fn finish_outcome(summary: &VerificationSummary) -> Outcome {
    if summary.needs_additional_search {
        Outcome::BudgetExhausted
    } else {
        Outcome::Converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(fail_count: usize, average_confidence: f64, needs: bool) -> VerificationSummary {
        VerificationSummary {
            total: fail_count + 2,
            pass_count: 2,
            review_count: 0,
            fail_count,
            average_confidence,
            needs_additional_search: needs,
        }
    }

    #[test]
    fn test_min_loops_forces_continue() {
        let perfect = summary(0, 1.0, false);
        assert_eq!(decide(0, &perfect, 1, 3), Decision::Continue);
        let awful = summary(5, 0.0, true);
        assert_eq!(decide(0, &awful, 1, 3), Decision::Continue);
    }

    #[test]
    fn test_ceiling_beats_quality() {
        let failing = summary(5, 0.1, true);
        assert_eq!(decide(3, &failing, 1, 3), Decision::Finish);
        assert_eq!(decide(7, &failing, 1, 3), Decision::Finish);
        assert_eq!(finish_outcome(&failing), Outcome::BudgetExhausted);
    }

    #[test]
    fn test_quality_decides_between_bounds() {
        assert_eq!(decide(1, &summary(1, 0.7, true), 1, 3), Decision::Continue);
        let good = summary(0, 0.9, false);
        assert_eq!(decide(1, &good, 1, 3), Decision::Finish);
        assert_eq!(finish_outcome(&good), Outcome::Converged);
    }

    #[test]
    fn test_never_continues_at_or_past_ceiling() {
        for needs in [true, false] {
            let s = summary(if needs { 1 } else { 0 }, 0.5, needs);
            for max_loops in 0..5u32 {
                for min_loops in 0..max_loops + 3 {
                    for loop_count in max_loops..max_loops + 3 {
                        assert_eq!(
                            decide(loop_count, &s, min_loops, max_loops),
                            Decision::Finish
                        );
                    }
                }
            }
        }
    }
}
