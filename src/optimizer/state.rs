//! Run context for one optimization
//!
//! `OptimizationState` is created when a run starts and handed back inside
//! the `RunReport` when it ends. Nothing else holds it, so concurrent runs
//! never share state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::prompt::{EvolvingPrompt, PromptCandidate, PromptRole};
use super::records::{EvaluationRecord, MetaEvaluationRecord};
use crate::providers::{CritiqueResult, MetaCritiqueResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationState {
    pub run_id: Uuid,
    pub task: String,
    pub system_prompt: EvolvingPrompt,
    pub critique_prompt: EvolvingPrompt,
    pub best_system_prompt: PromptCandidate,
    pub history: Vec<EvaluationRecord>,
    pub meta_history: Vec<MetaEvaluationRecord>,
    pub iterations_since_improvement: u32,
    pub iteration_count: u32,
    pub started_at: DateTime<Utc>,
}

impl OptimizationState {
    pub fn new(
        task: impl Into<String>,
        system_prompt: impl Into<String>,
        critique_prompt: impl Into<String>,
    ) -> Self {
        let system_prompt = EvolvingPrompt::new(PromptRole::System, system_prompt);
        let best_system_prompt = system_prompt.current.clone();

        Self {
            run_id: Uuid::new_v4(),
            task: task.into(),
            system_prompt,
            critique_prompt: EvolvingPrompt::new(PromptRole::Critique, critique_prompt),
            best_system_prompt,
            history: Vec::new(),
            meta_history: Vec::new(),
            iterations_since_improvement: 0,
            iteration_count: 0,
            started_at: Utc::now(),
        }
    }

    /// Start the next loop pass and return its iteration number
    pub fn begin_iteration(&mut self) -> u32 {
        self.iteration_count += 1;
        self.iteration_count
    }

    /// Append a critic verdict for the live system prompt.
    ///
    /// Returns true when the verdict set a new best score.
    pub fn record_evaluation(&mut self, verdict: CritiqueResult, output: String) -> bool {
        let record = EvaluationRecord {
            iteration: self.iteration_count,
            score: verdict.score,
            critique_text: verdict.critique_text,
            dimension_breakdown: verdict.dimension_breakdown,
            system_prompt: self.system_prompt.current.text.clone(),
            output,
            critique_revision: self.critique_prompt.revision(),
            evaluated_at: Utc::now(),
        };

        self.system_prompt
            .record_verdict(record.score, record.critique_text.clone());

        let improved = self.best_system_prompt.is_beaten_by(record.score);
        if improved {
            self.best_system_prompt = self.system_prompt.current.clone();
            self.iterations_since_improvement = 0;
        } else {
            self.iterations_since_improvement += 1;
        }

        self.history.push(record);
        improved
    }

    /// Append a meta-critic verdict for the live critique prompt
    pub fn record_meta_evaluation(
        &mut self,
        verdict: MetaCritiqueResult,
        sample_iterations: Vec<u32>,
    ) -> &MetaEvaluationRecord {
        self.critique_prompt
            .record_verdict(verdict.meta_score, verdict.feedback.clone());

        self.meta_history.push(MetaEvaluationRecord {
            iteration: self.iteration_count,
            meta_score: verdict.meta_score,
            dimension_breakdown: verdict.dimension_breakdown,
            feedback: verdict.feedback,
            sample_iterations,
            critique_revision: self.critique_prompt.revision(),
            refined: false,
            evaluated_at: Utc::now(),
        });

        // Just pushed
        &self.meta_history[self.meta_history.len() - 1]
    }

    pub fn latest_evaluation(&self) -> Option<&EvaluationRecord> {
        self.history.last()
    }

    pub fn latest_score(&self) -> Option<u32> {
        self.history.last().map(|r| r.score)
    }

    pub fn best_score(&self) -> Option<u32> {
        self.best_system_prompt.score
    }

    /// Evaluations handed to the meta-critic.
    ///
    /// With a size, the most recent `size` records. Without one, every record
    /// scored since the critique prompt was last replaced.
    pub fn meta_sample(&self, size: Option<usize>) -> &[EvaluationRecord] {
        match size {
            Some(size) => {
                let start = self.history.len().saturating_sub(size);
                &self.history[start..]
            }
            None => {
                let since = self.critique_prompt.last_replaced_at().unwrap_or(0);
                let start = self
                    .history
                    .iter()
                    .position(|r| r.iteration > since)
                    .unwrap_or(self.history.len());
                &self.history[start..]
            }
        }
    }

    pub fn replace_system_prompt(&mut self, text: impl Into<String>) {
        let iteration = self.iteration_count;
        self.system_prompt.replace(text, iteration);
    }

    /// Swap in a refined critique prompt and flag the meta verdict that asked for it
    pub fn replace_critique_prompt(&mut self, text: impl Into<String>) {
        let iteration = self.iteration_count;
        self.critique_prompt.replace(text, iteration);
        if let Some(last) = self.meta_history.last_mut() {
            if last.iteration == iteration {
                last.refined = true;
            }
        }
    }

    pub fn critique_refinements(&self) -> usize {
        self.critique_prompt.revision()
    }

    pub fn system_refinements(&self) -> usize {
        self.system_prompt.revision()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn verdict(score: u32) -> CritiqueResult {
        CritiqueResult {
            score,
            critique_text: format!("critique for {score}"),
            dimension_breakdown: BTreeMap::new(),
        }
    }

    fn evaluate(state: &mut OptimizationState, score: u32) -> bool {
        state.begin_iteration();
        state.record_evaluation(verdict(score), "output".to_string())
    }

    #[test]
    fn test_first_evaluation_always_improves() {
        let mut state = OptimizationState::new("task", "sys", "crit");
        assert!(evaluate(&mut state, 10));
        assert_eq!(state.best_score(), Some(10));
        assert_eq!(state.iterations_since_improvement, 0);
    }

    #[test]
    fn test_ties_count_as_no_improvement() {
        let mut state = OptimizationState::new("task", "sys", "crit");
        evaluate(&mut state, 70);
        state.replace_system_prompt("sys v1");
        assert!(!evaluate(&mut state, 70));
        assert_eq!(state.iterations_since_improvement, 1);
        assert_eq!(state.best_system_prompt.text, "sys");
    }

    #[test]
    fn test_best_tracks_the_evaluated_text() {
        let mut state = OptimizationState::new("task", "sys", "crit");
        evaluate(&mut state, 60);
        state.replace_system_prompt("sys v1");
        evaluate(&mut state, 80);
        state.replace_system_prompt("sys v2");
        evaluate(&mut state, 75);

        assert_eq!(state.best_system_prompt.text, "sys v1");
        assert_eq!(state.best_system_prompt.score, Some(80));
        assert_eq!(state.best_system_prompt.iteration, 1);
        assert_eq!(state.iterations_since_improvement, 1);
        assert_eq!(state.history[1].system_prompt, "sys v1");
    }

    #[test]
    fn test_meta_sample_defaults_to_records_since_last_refinement() {
        let mut state = OptimizationState::new("task", "sys", "crit");
        for score in [50, 55, 60] {
            evaluate(&mut state, score);
        }
        assert_eq!(state.meta_sample(None).len(), 3);

        state.replace_critique_prompt("crit v1");
        for score in [62, 64] {
            evaluate(&mut state, score);
        }
        let sample: Vec<u32> = state.meta_sample(None).iter().map(|r| r.iteration).collect();
        assert_eq!(sample, [4, 5]);

        let sized: Vec<u32> = state.meta_sample(Some(4)).iter().map(|r| r.iteration).collect();
        assert_eq!(sized, [2, 3, 4, 5]);
        assert_eq!(state.meta_sample(Some(10)).len(), 5);
    }

    #[test]
    fn test_critique_revision_is_stamped_on_evaluations() {
        let mut state = OptimizationState::new("task", "sys", "crit");
        evaluate(&mut state, 50);
        state.replace_critique_prompt("crit v1");
        evaluate(&mut state, 55);

        assert_eq!(state.history[0].critique_revision, 0);
        assert_eq!(state.history[1].critique_revision, 1);
    }
}
