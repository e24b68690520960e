//! Test data builders

use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{InputFiles, OptimizerConfig};
use crate::optimizer::records::{Dimension, EvaluationRecord, MetaEvaluationRecord};
use crate::optimizer::state::OptimizationState;
use crate::providers::{CritiqueResult, MetaCritiqueResult};

pub const TASK: &str = "Summarize the quarterly sales data for an executive audience.";
pub const SYSTEM_PROMPT: &str = "You are a helpful analyst.";
pub const CRITIQUE_PROMPT: &str = "Score the response from 1 to 100 and explain the score.";

pub fn critique(score: u32) -> CritiqueResult {
    CritiqueResult {
        score,
        critique_text: format!("Scored {score}: add concrete figures."),
        dimension_breakdown: BTreeMap::new(),
    }
}

/// Meta verdict whose breakdown spreads `meta_score` over the dimensions
pub fn meta_critique(meta_score: u32) -> MetaCritiqueResult {
    let mut dimension_breakdown = BTreeMap::new();
    dimension_breakdown.insert(Dimension::IssueIdentification, meta_score / 4);
    MetaCritiqueResult {
        meta_score,
        dimension_breakdown,
        feedback: format!("Meta-score {meta_score}: calibrate harder."),
    }
}

pub fn evaluation(iteration: u32, score: u32) -> EvaluationRecord {
    EvaluationRecord {
        iteration,
        score,
        critique_text: format!("critique {iteration}"),
        dimension_breakdown: BTreeMap::new(),
        system_prompt: SYSTEM_PROMPT.to_string(),
        output: format!("output {iteration}"),
        critique_revision: 0,
        evaluated_at: Utc::now(),
    }
}

pub fn meta_evaluation(iteration: u32, meta_score: u32) -> MetaEvaluationRecord {
    MetaEvaluationRecord {
        iteration,
        meta_score,
        dimension_breakdown: BTreeMap::new(),
        feedback: String::new(),
        sample_iterations: (1..=iteration).collect(),
        critique_revision: 0,
        refined: false,
        evaluated_at: Utc::now(),
    }
}

/// A state that has evaluated the initial prompt once per score, with a
/// system refinement between evaluations
pub fn state_with_scores(scores: &[u32]) -> OptimizationState {
    let mut state = OptimizationState::new(TASK, SYSTEM_PROMPT, CRITIQUE_PROMPT);
    for (index, score) in scores.iter().enumerate() {
        if index > 0 {
            state.replace_system_prompt(format!("{SYSTEM_PROMPT} (revision {index})"));
        }
        state.begin_iteration();
        state.record_evaluation(critique(*score), format!("output {}", index + 1));
    }
    state
}

/// Defaults with retries that do not sleep noticeably and no snapshots
pub fn fast_config() -> OptimizerConfig {
    let mut config = OptimizerConfig::default();
    config.retry_delay_ms = 1;
    config.output.save_intermediate = false;
    config
}

/// Paths of the three input files written by [`write_inputs`]
pub struct InputSet {
    pub task: PathBuf,
    pub system_prompt: PathBuf,
    pub critique_prompt: PathBuf,
}

impl InputSet {
    pub fn as_input_files(&self) -> InputFiles {
        InputFiles {
            task: self.task.clone(),
            system_prompt: self.system_prompt.clone(),
            critique_prompt: self.critique_prompt.clone(),
        }
    }
}

/// Write the default-named input files into `dir`
pub fn write_inputs(dir: &Path) -> std::io::Result<InputSet> {
    let defaults = InputFiles::default();
    let set = InputSet {
        task: dir.join(&defaults.task),
        system_prompt: dir.join(&defaults.system_prompt),
        critique_prompt: dir.join(&defaults.critique_prompt),
    };
    std::fs::write(&set.task, TASK)?;
    std::fs::write(&set.system_prompt, SYSTEM_PROMPT)?;
    std::fs::write(&set.critique_prompt, CRITIQUE_PROMPT)?;
    Ok(set)
}
