//! Collaborators the optimizer calls out to
//!
//! Each LLM role is a trait with a single async operation so the controller
//! can be driven by the real API client or by a scripted stand-in.
//!
//! - `anthropic` - Messages API client implementing every role
//! - `parse` - turning free-form model replies into structured verdicts
//! - `templates` - default instructions for the meta-critic and refiners
//! - `scripted` - deterministic provider for simulations and tests

pub mod anthropic;
pub mod parse;
pub mod scripted;
pub mod templates;

pub use anthropic::AnthropicProvider;
pub use scripted::{CallKind, Failure, ScriptedProvider, ScriptedProviderBuilder};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::optimizer::prompt::PromptRole;
use crate::optimizer::records::{Dimension, EvaluationRecord};
use crate::Result;

/// Structured verdict from the critic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueResult {
    /// 1-100
    pub score: u32,
    pub critique_text: String,
    pub dimension_breakdown: BTreeMap<String, u32>,
}

/// Structured verdict from the meta-critic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaCritiqueResult {
    /// 1-100
    pub meta_score: u32,
    /// Weighted sub-scores, each within its dimension's weight
    pub dimension_breakdown: BTreeMap<Dimension, u32>,
    /// Analysis and suggestions, handed to the refiner verbatim
    pub feedback: String,
}

#[async_trait]
pub trait Responder: Send + Sync {
    /// Produce a candidate output for `task` under `system_prompt`
    async fn respond(&self, system_prompt: &str, task: &str) -> Result<String>;
}

#[async_trait]
pub trait Critic: Send + Sync {
    /// Score an output produced under `system_prompt`, using `critique_prompt`
    async fn critique(
        &self,
        critique_prompt: &str,
        system_prompt: &str,
        task: &str,
        output: &str,
    ) -> Result<CritiqueResult>;
}

#[async_trait]
pub trait MetaCritic: Send + Sync {
    /// Judge how well `critique_prompt` performed over `sample`
    async fn meta_critique(
        &self,
        critique_prompt: &str,
        sample: &[EvaluationRecord],
    ) -> Result<MetaCritiqueResult>;
}

#[async_trait]
pub trait Refiner: Send + Sync {
    /// Rewrite a prompt of the given role to address `feedback`
    async fn refine(&self, role: PromptRole, prompt_text: &str, feedback: &str) -> Result<String>;
}

/// The four roles bundled for the controller
#[derive(Clone)]
pub struct Collaborators {
    pub responder: Arc<dyn Responder>,
    pub critic: Arc<dyn Critic>,
    pub meta_critic: Arc<dyn MetaCritic>,
    pub refiner: Arc<dyn Refiner>,
}

impl Collaborators {
    /// Use one provider for every role
    pub fn single<P>(provider: Arc<P>) -> Self
    where
        P: Responder + Critic + MetaCritic + Refiner + 'static,
    {
        Self {
            responder: provider.clone(),
            critic: provider.clone(),
            meta_critic: provider.clone(),
            refiner: provider,
        }
    }
}
