//! Run outcome and its human-readable summary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::decision::{Phase, StopReason};
use super::prompt::PromptCandidate;
use super::records::{EvaluationRecord, MetaEvaluationRecord};
use super::state::OptimizationState;
use crate::config::OptimizerConfig;

/// Number of trailing evaluations the stability assessment looks at
pub const STABILITY_WINDOW: usize = 3;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Termination {
    Completed { stop: StopReason },
    Aborted { phase: Phase },
    Failed { phase: Phase, error: String },
}

impl Termination {
    pub fn describe(&self) -> String {
        match self {
            Self::Completed { stop } => stop.to_string(),
            Self::Aborted { phase } => format!("Aborted before {phase}"),
            Self::Failed { phase, error } => format!("Failed during {phase}: {error}"),
        }
    }
}

/// Everything a run produced, handed back by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub termination: Termination,
    /// Set when the run did not complete on its own
    pub partial: bool,
    pub summary: RunSummary,
    pub state: OptimizationState,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(state: OptimizationState, termination: Termination, config: &OptimizerConfig) -> Self {
        let partial = !matches!(termination, Termination::Completed { .. });
        let summary = RunSummary::from_state(&state, config);

        Self {
            termination,
            partial,
            summary,
            state,
            finished_at: Utc::now(),
        }
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    pub fn best_system_prompt(&self) -> &PromptCandidate {
        &self.state.best_system_prompt
    }

    pub fn final_system_prompt(&self) -> &PromptCandidate {
        &self.state.system_prompt.current
    }

    pub fn final_critique_prompt(&self) -> &PromptCandidate {
        &self.state.critique_prompt.current
    }

    pub fn history(&self) -> &[EvaluationRecord] {
        &self.state.history
    }

    pub fn meta_history(&self) -> &[MetaEvaluationRecord] {
        &self.state.meta_history
    }

    /// Markdown report written next to the prompt artifacts
    pub fn summary_markdown(&self) -> String {
        SummaryMarkdown(self).to_string()
    }
}

struct SummaryMarkdown<'a>(&'a RunReport);

impl fmt::Display for SummaryMarkdown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        let s = &report.summary;

        writeln!(f, "# Dual Prompt Improvement Summary\n")?;
        writeln!(f, "- Run: `{}`", report.state.run_id)?;
        writeln!(
            f,
            "- Started: {}",
            report.state.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(
            f,
            "- Finished: {}",
            report.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(f, "- Outcome: {}", report.termination.describe())?;
        if report.partial {
            writeln!(f, "- **Partial run**: results cover completed iterations only")?;
        }

        writeln!(f, "\n## Scores\n")?;
        writeln!(f, "| Metric | Value |")?;
        writeln!(f, "|---|---|")?;
        writeln!(f, "| Target score | {} |", s.target_score)?;
        writeln!(f, "| Final score | {} |", display_score(s.final_score))?;
        writeln!(f, "| Best score | {} |", display_score(s.best_score))?;
        writeln!(
            f,
            "| Target reached | {} |",
            if s.target_reached { "yes" } else { "no" }
        )?;
        writeln!(f, "| Iterations run | {} |", s.iterations)?;
        if let Some(iteration) = s.best_iteration {
            writeln!(f, "| Best score at iteration | {iteration} |")?;
        }
        if let Some(delta) = s.score_improvement {
            writeln!(f, "| Improvement since first evaluation | {delta:+} |")?;
        }

        writeln!(f, "\n## Prompt evolution\n")?;
        writeln!(f, "- System prompt refinements: {}", s.system_refinements)?;
        writeln!(f, "- Critique meta-evaluations: {}", s.meta_evaluations)?;
        writeln!(f, "- Critique prompt refinements: {}", s.critique_refinements)?;

        if !report.state.history.is_empty() {
            writeln!(f, "\n## Score history\n")?;
            writeln!(f, "| Iteration | Score | Critique revision |")?;
            writeln!(f, "|---|---|---|")?;
            for record in &report.state.history {
                writeln!(
                    f,
                    "| {} | {} | {} |",
                    record.iteration, record.score, record.critique_revision
                )?;
            }
        }

        if !report.state.meta_history.is_empty() {
            writeln!(f, "\n## Critique meta-evaluations\n")?;
            writeln!(f, "| Iteration | Meta-score | Refined |")?;
            writeln!(f, "|---|---|---|")?;
            for record in &report.state.meta_history {
                writeln!(
                    f,
                    "| {} | {} | {} |",
                    record.iteration,
                    record.meta_score,
                    if record.refined { "yes" } else { "no" }
                )?;
            }
        }

        writeln!(f, "\n## Stability\n")?;
        match &s.stability {
            Some(stability) => {
                writeln!(f, "- Confidence: {:.0}%", stability.confidence)?;
                writeln!(f, "- Score consistency: {:.0}", stability.consistency)?;
                writeln!(f, "- Score trend: {:.0}", stability.trend)?;
                writeln!(f, "- Meta-score stability: {:.0}", stability.meta_stability)?;
            }
            None => writeln!(f, "Not enough evaluations to assess stability.")?,
        }

        writeln!(f, "\n## Best system prompt\n")?;
        writeln!(f, "```text\n{}\n```", report.state.best_system_prompt.text)
    }
}

fn display_score(score: Option<u32>) -> String {
    score.map_or_else(|| "n/a".to_string(), |s| s.to_string())
}

/// Headline numbers derived from the final state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub target_score: u32,
    pub final_score: Option<u32>,
    pub best_score: Option<u32>,
    pub target_reached: bool,
    pub iterations: u32,
    /// Iteration whose evaluation set the best score
    pub best_iteration: Option<u32>,
    /// Best score minus the first evaluation's score
    pub score_improvement: Option<i64>,
    pub system_refinements: usize,
    pub meta_evaluations: usize,
    pub critique_refinements: usize,
    pub stability: Option<StabilityAssessment>,
}

impl RunSummary {
    pub fn from_state(state: &OptimizationState, config: &OptimizerConfig) -> Self {
        let best_score = state.best_score();
        let best_iteration = best_score.and_then(|best| {
            state
                .history
                .iter()
                .find(|r| r.score == best)
                .map(|r| r.iteration)
        });
        let score_improvement = match (state.history.first(), best_score) {
            (Some(first), Some(best)) => Some(i64::from(best) - i64::from(first.score)),
            _ => None,
        };

        Self {
            target_score: config.target_score,
            final_score: state.latest_score(),
            best_score,
            target_reached: best_score.is_some_and(|b| b >= config.target_score),
            iterations: state.iteration_count,
            best_iteration,
            score_improvement,
            system_refinements: state.system_refinements(),
            meta_evaluations: state.meta_history.len(),
            critique_refinements: state.critique_refinements(),
            stability: StabilityAssessment::assess(
                &state.history,
                &state.meta_history,
                config.critique_improvement_threshold,
            ),
        }
    }
}

/// Diagnostic view of how settled the last few scores are.
///
/// Reported only; never feeds back into the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityAssessment {
    /// 100 minus twice the sample standard deviation, floored at 0
    pub consistency: f64,
    /// 50 plus twice the rise across the window, clamped to 0..=100
    pub trend: f64,
    /// 100 when recent meta-scores average at or above the threshold
    pub meta_stability: f64,
    pub confidence: f64,
}

impl StabilityAssessment {
    /// None until at least two evaluations exist
    pub fn assess(
        history: &[EvaluationRecord],
        meta_history: &[MetaEvaluationRecord],
        threshold: u32,
    ) -> Option<Self> {
        if history.len() < 2 {
            return None;
        }

        let window = &history[history.len().saturating_sub(STABILITY_WINDOW)..];
        let scores: Vec<f64> = window.iter().map(|r| f64::from(r.score)).collect();

        let consistency = (100.0 - 2.0 * sample_stdev(&scores)).max(0.0);

        let (first, last) = (scores[0], scores[scores.len() - 1]);
        let trend = (50.0 + 2.0 * (last - first)).clamp(0.0, 100.0);

        let recent_meta = &meta_history[meta_history.len().saturating_sub(STABILITY_WINDOW)..];
        let meta_mean = if recent_meta.is_empty() {
            0.0
        } else {
            recent_meta.iter().map(|m| f64::from(m.meta_score)).sum::<f64>()
                / recent_meta.len() as f64
        };
        let meta_stability = if meta_mean >= f64::from(threshold) {
            100.0
        } else {
            meta_mean
        };

        Some(Self {
            consistency,
            trend,
            meta_stability,
            confidence: 0.4 * consistency + 0.4 * trend + 0.2 * meta_stability,
        })
    }
}

fn sample_stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{evaluation, meta_evaluation, state_with_scores};

    #[test]
    fn test_stability_needs_two_evaluations() {
        assert!(StabilityAssessment::assess(&[evaluation(1, 70)], &[], 85).is_none());
    }

    #[test]
    fn test_stability_of_flat_rising_scores() {
        let history = vec![evaluation(1, 60), evaluation(2, 70), evaluation(3, 80)];
        let meta = vec![meta_evaluation(3, 90)];
        let stability = StabilityAssessment::assess(&history, &meta, 85).unwrap();

        // stdev of [60, 70, 80] is 10
        assert!((stability.consistency - 80.0).abs() < 1e-9);
        assert!((stability.trend - 90.0).abs() < 1e-9);
        assert!((stability.meta_stability - 100.0).abs() < 1e-9);
        assert!((stability.confidence - 88.0).abs() < 1e-9);
    }

    #[test]
    fn test_stability_uses_last_three_scores() {
        let history = vec![
            evaluation(1, 10),
            evaluation(2, 80),
            evaluation(3, 80),
            evaluation(4, 80),
        ];
        let stability = StabilityAssessment::assess(&history, &[], 85).unwrap();
        assert!((stability.consistency - 100.0).abs() < 1e-9);
        assert!((stability.trend - 50.0).abs() < 1e-9);
        assert!(stability.meta_stability.abs() < 1e-9);
    }

    #[test]
    fn test_summary_numbers() {
        let state = state_with_scores(&[60, 88, 75]);
        let report = RunReport::new(
            state,
            Termination::Completed {
                stop: StopReason::MaxIterations { limit: 3 },
            },
            &OptimizerConfig::default(),
        );

        assert!(!report.is_partial());
        assert_eq!(report.summary.final_score, Some(75));
        assert_eq!(report.summary.best_score, Some(88));
        assert_eq!(report.summary.best_iteration, Some(2));
        assert_eq!(report.summary.score_improvement, Some(28));
        assert!(!report.summary.target_reached);
    }

    #[test]
    fn test_summary_markdown_sections() {
        let report = RunReport::new(
            state_with_scores(&[60, 88, 75]),
            Termination::Completed {
                stop: StopReason::MaxIterations { limit: 3 },
            },
            &OptimizerConfig::default(),
        );
        let markdown = report.summary_markdown();

        assert!(markdown.starts_with("# Dual Prompt Improvement Summary\n"));
        for heading in [
            "## Scores",
            "## Prompt evolution",
            "## Score history",
            "## Stability",
            "## Best system prompt",
        ] {
            assert!(markdown.contains(heading), "missing {heading}");
        }
        assert!(!markdown.contains("## Critique meta-evaluations"));
        assert!(!markdown.contains("Partial run"));
        assert!(markdown.contains("| Best score | 88 |"));
        assert!(markdown.contains("| Improvement since first evaluation | +28 |"));
        assert!(markdown.contains("| 2 | 88 |"));
        assert!(markdown.contains("- Confidence:"));
        assert!(markdown.ends_with("```\n"));
    }

    #[test]
    fn test_failed_run_is_partial() {
        let report = RunReport::new(
            state_with_scores(&[50]),
            Termination::Failed {
                phase: Phase::MetaEvaluating,
                error: "Provider error: 500".to_string(),
            },
            &OptimizerConfig::default(),
        );
        assert!(report.is_partial());

        let markdown = report.summary_markdown();
        assert!(markdown.contains("Failed during meta_evaluating"));
        assert!(markdown.contains("Partial run"));
    }

    #[test]
    fn test_report_json_tags() {
        let report = RunReport::new(
            state_with_scores(&[96]),
            Termination::Completed {
                stop: StopReason::TargetReached {
                    score: 96,
                    target: 95,
                },
            },
            &OptimizerConfig::default(),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["partial"], false);
        assert_eq!(json["termination"]["status"], "completed");
        assert_eq!(json["termination"]["stop"]["reason"], "target_reached");
    }
}
