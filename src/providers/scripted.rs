//! Deterministic collaborator driven by a canned score trajectory
//!
//! Backs `dualprompt simulate` and the test suite. Every call is recorded so
//! tests can assert on exactly what the controller asked for.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::{Critic, CritiqueResult, MetaCritic, MetaCritiqueResult, Refiner, Responder};
use crate::optimizer::prompt::PromptRole;
use crate::optimizer::records::{EvaluationRecord, MetaWeights};
use crate::{Error, Result};

/// Score used once a queue runs dry and nothing was ever queued
const FALLBACK_SCORE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Respond,
    Critique,
    MetaCritique,
    RefineSystem,
    RefineCritique,
}

/// One recorded collaborator call
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedCall {
    pub kind: CallKind,
    /// The prompt the call was made with (system prompt for responses and
    /// system refinements, critique prompt otherwise)
    pub prompt: String,
    /// Iterations of the records sampled, for meta-critique calls
    pub sample: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Retryable provider fault, like a 503
    Transient,
    /// Non-retryable provider fault, like a 401
    Permanent,
    /// Unparseable reply
    Parse,
}

impl Failure {
    fn to_error(self, kind: CallKind) -> Error {
        match self {
            Self::Transient => Error::transient(format!("scripted {kind:?} failure (503)")),
            Self::Permanent => Error::permanent(format!("scripted {kind:?} failure (401)")),
            Self::Parse => Error::parse(format!("scripted {kind:?} reply was not JSON")),
        }
    }
}

#[derive(Debug, Clone)]
struct FailurePlan {
    kind: CallKind,
    /// Successful calls of this kind before failures start
    after: usize,
    failure: Failure,
    times: usize,
}

#[derive(Debug, Default)]
struct Script {
    scores: VecDeque<u32>,
    last_score: Option<u32>,
    meta_scores: VecDeque<u32>,
    last_meta_score: Option<u32>,
    calls: Vec<ScriptedCall>,
}

impl Script {
    fn next_score(&mut self) -> u32 {
        if let Some(score) = self.scores.pop_front() {
            self.last_score = Some(score);
        }
        self.last_score.unwrap_or(FALLBACK_SCORE)
    }

    fn next_meta_score(&mut self) -> u32 {
        if let Some(score) = self.meta_scores.pop_front() {
            self.last_meta_score = Some(score);
        }
        self.last_meta_score.unwrap_or(FALLBACK_SCORE)
    }

    fn count(&self, kind: CallKind) -> usize {
        self.calls.iter().filter(|c| c.kind == kind).count()
    }
}

pub struct ScriptedProvider {
    script: Mutex<Script>,
    failures: Vec<FailurePlan>,
    refinement: Option<String>,
    weights: MetaWeights,
}

impl ScriptedProvider {
    pub fn builder() -> ScriptedProviderBuilder {
        ScriptedProviderBuilder::default()
    }

    /// Every call made so far, including failed ones
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.lock().count(kind)
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and decide whether it should fail
    fn record(&self, call: ScriptedCall) -> Result<()> {
        let mut script = self.lock();
        let index = script.count(call.kind);
        let kind = call.kind;
        script.calls.push(call);

        let planned = self.failures.iter().find(|plan| {
            plan.kind == kind && index >= plan.after && index < plan.after + plan.times
        });
        match planned {
            Some(plan) => Err(plan.failure.to_error(kind)),
            None => Ok(()),
        }
    }

    fn refined_text(&self, prompt_text: &str, feedback: &str) -> String {
        match &self.refinement {
            Some(text) => text.clone(),
            None => {
                let note = feedback.lines().next().unwrap_or_default();
                format!("{prompt_text}\n- Address: {note}")
            }
        }
    }
}

#[async_trait]
impl Responder for ScriptedProvider {
    async fn respond(&self, system_prompt: &str, task: &str) -> Result<String> {
        self.record(ScriptedCall {
            kind: CallKind::Respond,
            prompt: system_prompt.to_string(),
            sample: Vec::new(),
        })?;
        let n = self.count(CallKind::Respond);
        Ok(format!("Response {n} to: {task}"))
    }
}

#[async_trait]
impl Critic for ScriptedProvider {
    async fn critique(
        &self,
        critique_prompt: &str,
        _system_prompt: &str,
        _task: &str,
        _output: &str,
    ) -> Result<CritiqueResult> {
        self.record(ScriptedCall {
            kind: CallKind::Critique,
            prompt: critique_prompt.to_string(),
            sample: Vec::new(),
        })?;
        let score = self.lock().next_score();

        let mut dimension_breakdown = BTreeMap::new();
        dimension_breakdown.insert("overall".to_string(), score);
        Ok(CritiqueResult {
            score,
            critique_text: format!("Scored {score}/100. Be more specific and quantify findings."),
            dimension_breakdown,
        })
    }
}

#[async_trait]
impl MetaCritic for ScriptedProvider {
    async fn meta_critique(
        &self,
        critique_prompt: &str,
        sample: &[EvaluationRecord],
    ) -> Result<MetaCritiqueResult> {
        self.record(ScriptedCall {
            kind: CallKind::MetaCritique,
            prompt: critique_prompt.to_string(),
            sample: sample.iter().map(|r| r.iteration).collect(),
        })?;
        let meta_score = self.lock().next_meta_score();

        let dimension_breakdown = self
            .weights
            .iter()
            .map(|(dimension, weight)| (dimension, weight * meta_score / 100))
            .collect();
        Ok(MetaCritiqueResult {
            meta_score,
            dimension_breakdown,
            feedback: format!(
                "Meta-score {meta_score}/100. Anchor scores to explicit rubric levels."
            ),
        })
    }
}

#[async_trait]
impl Refiner for ScriptedProvider {
    async fn refine(&self, role: PromptRole, prompt_text: &str, feedback: &str) -> Result<String> {
        let kind = match role {
            PromptRole::System => CallKind::RefineSystem,
            PromptRole::Critique => CallKind::RefineCritique,
        };
        self.record(ScriptedCall {
            kind,
            prompt: prompt_text.to_string(),
            sample: Vec::new(),
        })?;
        Ok(self.refined_text(prompt_text, feedback))
    }
}

#[derive(Default)]
pub struct ScriptedProviderBuilder {
    scores: Vec<u32>,
    meta_scores: Vec<u32>,
    failures: Vec<FailurePlan>,
    refinement: Option<String>,
    weights: Option<MetaWeights>,
}

impl ScriptedProviderBuilder {
    /// Critic scores in call order. The last one repeats once exhausted.
    pub fn scores(mut self, scores: impl IntoIterator<Item = u32>) -> Self {
        self.scores.extend(scores);
        self
    }

    /// Meta-critic scores in call order. The last one repeats once exhausted.
    pub fn meta_scores(mut self, scores: impl IntoIterator<Item = u32>) -> Self {
        self.meta_scores.extend(scores);
        self
    }

    /// Fail the next `times` calls of `kind`
    pub fn fail(self, kind: CallKind, failure: Failure, times: usize) -> Self {
        self.fail_after(kind, 0, failure, times)
    }

    /// Let `after` calls of `kind` succeed, then fail the next `times`
    pub fn fail_after(mut self, kind: CallKind, after: usize, failure: Failure, times: usize) -> Self {
        self.failures.push(FailurePlan {
            kind,
            after,
            failure,
            times,
        });
        self
    }

    /// Return this text from every refinement instead of the default edit
    pub fn refinement(mut self, text: impl Into<String>) -> Self {
        self.refinement = Some(text.into());
        self
    }

    pub fn weights(mut self, weights: MetaWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn build(self) -> ScriptedProvider {
        ScriptedProvider {
            script: Mutex::new(Script {
                scores: self.scores.into(),
                meta_scores: self.meta_scores.into(),
                ..Script::default()
            }),
            failures: self.failures,
            refinement: self.refinement,
            weights: self.weights.unwrap_or_default(),
        }
    }
}
