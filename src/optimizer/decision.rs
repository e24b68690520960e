//! Gating rules for the optimization loop
//!
//! Every branch the controller takes is decided here by pure functions of
//! the configuration and the numbers recorded so far.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::OptimizationState;
use crate::config::OptimizerConfig;

/// Controller state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Evaluating,
    Deciding,
    RefiningSystem,
    MetaEvaluating,
    RefiningCritique,
    CheckStop,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Evaluating => "evaluating",
            Self::Deciding => "deciding",
            Self::RefiningSystem => "refining_system",
            Self::MetaEvaluating => "meta_evaluating",
            Self::RefiningCritique => "refining_critique",
            Self::CheckStop => "check_stop",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why a run stopped on its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    TargetReached { score: u32, target: u32 },
    MaxIterations { limit: u32 },
    Plateau { patience: u32 },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetReached { score, target } => {
                write!(f, "Target score reached ({score} >= {target})")
            }
            Self::MaxIterations { limit } => write!(f, "Maximum iterations ({limit}) reached"),
            Self::Plateau { patience } => {
                write!(f, "No improvement for {patience} iterations")
            }
        }
    }
}

/// What one loop pass does after its evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationPlan {
    pub meta_evaluate: bool,
    pub refine_system: bool,
    pub stop: Option<StopReason>,
}

impl IterationPlan {
    pub fn decide(config: &OptimizerConfig, state: &OptimizationState) -> Self {
        let stop = check_stop(
            config,
            state.iteration_count,
            state.latest_score(),
            state.iterations_since_improvement,
        );

        Self {
            meta_evaluate: should_meta_evaluate(config, state.iteration_count),
            // A refined prompt on a final pass would never be evaluated
            refine_system: config.enable_system_prompt_improvement && stop.is_none(),
            stop,
        }
    }
}

/// Meta-evaluate on every `improve_critique_every`-th iteration, whatever the score
pub fn should_meta_evaluate(config: &OptimizerConfig, iteration: u32) -> bool {
    config.enable_critique_improvement
        && config.improve_critique_every > 0
        && iteration % config.improve_critique_every == 0
}

/// Stop conditions in priority order: target, iteration cap, plateau
pub fn check_stop(
    config: &OptimizerConfig,
    iteration: u32,
    latest_score: Option<u32>,
    iterations_since_improvement: u32,
) -> Option<StopReason> {
    if let Some(score) = latest_score {
        if score >= config.target_score {
            return Some(StopReason::TargetReached {
                score,
                target: config.target_score,
            });
        }
    }

    if iteration >= config.max_iterations {
        return Some(StopReason::MaxIterations {
            limit: config.max_iterations,
        });
    }

    if let Some(patience) = config.early_stop_patience.limit() {
        if iterations_since_improvement >= patience {
            return Some(StopReason::Plateau { patience });
        }
    }

    None
}

/// Outcome of a meta-evaluation for the critique track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CritiqueDecision {
    Refine,
    Keep,
}

impl CritiqueDecision {
    pub fn for_meta_score(meta_score: u32, threshold: u32) -> Self {
        if meta_score < threshold {
            Self::Refine
        } else {
            Self::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Patience;
    use crate::providers::CritiqueResult;
    use std::collections::BTreeMap;

    fn config() -> OptimizerConfig {
        OptimizerConfig {
            target_score: 95,
            max_iterations: 10,
            improve_critique_every: 3,
            critique_improvement_threshold: 85,
            early_stop_patience: Patience::after(3),
            ..OptimizerConfig::default()
        }
    }

    fn state_with(scores: &[u32]) -> OptimizationState {
        let mut state = OptimizationState::new("task", "sys", "crit");
        for score in scores {
            state.begin_iteration();
            state.record_evaluation(
                CritiqueResult {
                    score: *score,
                    critique_text: String::new(),
                    dimension_breakdown: BTreeMap::new(),
                },
                String::new(),
            );
        }
        state
    }

    #[test]
    fn test_meta_evaluation_cadence() {
        let config = config();
        let hits: Vec<u32> = (1..=9)
            .filter(|i| should_meta_evaluate(&config, *i))
            .collect();
        assert_eq!(hits, [3, 6, 9]);
    }

    #[test]
    fn test_meta_evaluation_every_iteration_when_cadence_is_one() {
        let config = OptimizerConfig {
            improve_critique_every: 1,
            ..config()
        };
        assert!((1..=5).all(|i| should_meta_evaluate(&config, i)));
    }

    #[test]
    fn test_meta_evaluation_disabled() {
        let config = OptimizerConfig {
            enable_critique_improvement: false,
            ..config()
        };
        assert!(!should_meta_evaluate(&config, 3));
    }

    #[test]
    fn test_target_reached_blocks_refinement() {
        let plan = IterationPlan::decide(&config(), &state_with(&[60, 96]));
        assert!(!plan.refine_system);
        assert_eq!(
            plan.stop,
            Some(StopReason::TargetReached {
                score: 96,
                target: 95
            })
        );
    }

    #[test]
    fn test_meta_evaluation_ignores_score() {
        let plan = IterationPlan::decide(&config(), &state_with(&[60, 70, 99]));
        assert!(plan.meta_evaluate);
        assert!(!plan.refine_system);
    }

    #[test]
    fn test_below_target_refines_and_continues() {
        let plan = IterationPlan::decide(&config(), &state_with(&[60, 70]));
        assert_eq!(
            plan,
            IterationPlan {
                meta_evaluate: false,
                refine_system: true,
                stop: None
            }
        );
    }

    #[test]
    fn test_max_iterations_stop() {
        let config = OptimizerConfig {
            max_iterations: 2,
            ..config()
        };
        let plan = IterationPlan::decide(&config, &state_with(&[60, 70]));
        assert_eq!(plan.stop, Some(StopReason::MaxIterations { limit: 2 }));
        assert!(!plan.refine_system);
    }

    #[test]
    fn test_plateau_stop_and_disabled_patience() {
        let config = OptimizerConfig {
            early_stop_patience: Patience::after(2),
            ..config()
        };
        let state = state_with(&[70, 68, 69]);
        assert_eq!(
            IterationPlan::decide(&config, &state).stop,
            Some(StopReason::Plateau { patience: 2 })
        );

        let config = OptimizerConfig {
            early_stop_patience: Patience::disabled(),
            ..config
        };
        assert_eq!(IterationPlan::decide(&config, &state).stop, None);
    }

    #[test]
    fn test_target_takes_priority_over_cap() {
        let config = OptimizerConfig {
            max_iterations: 1,
            ..config()
        };
        assert!(matches!(
            check_stop(&config, 1, Some(99), 0),
            Some(StopReason::TargetReached { .. })
        ));
    }

    #[test]
    fn test_critique_decision_is_pure() {
        for meta_score in [1, 50, 84, 85, 86, 100] {
            let first = CritiqueDecision::for_meta_score(meta_score, 85);
            let second = CritiqueDecision::for_meta_score(meta_score, 85);
            assert_eq!(first, second);
        }
        assert_eq!(CritiqueDecision::for_meta_score(84, 85), CritiqueDecision::Refine);
        assert_eq!(CritiqueDecision::for_meta_score(85, 85), CritiqueDecision::Keep);
    }
}
