//! Dual prompt optimization
//!
//! The system prompt and the critique prompt that grades it evolve side by
//! side. Each loop pass scores the live system prompt, refines it from the
//! critique, and every few passes asks a meta-critic how well the critique
//! prompt itself is doing, refining it when it falls below threshold.
//!
//! - `prompt` - prompt candidates and the tracks that hold them
//! - `records` - evaluation and meta-evaluation records
//! - `state` - per-run context
//! - `decision` - pure gating rules (cadence, refinement, stop conditions)
//! - `retry` - backoff for transient collaborator faults
//! - `controller` - the loop itself
//! - `report` - run outcome and summary

pub mod controller;
pub mod decision;
pub mod prompt;
pub mod records;
pub mod report;
pub mod retry;
pub mod state;

pub use controller::{AbortSignal, OptimizationController, RunObserver};
pub use decision::{CritiqueDecision, IterationPlan, Phase, StopReason};
pub use prompt::{EvolvingPrompt, PromptCandidate, PromptRole};
pub use records::{Dimension, EvaluationRecord, MetaEvaluationRecord, MetaWeights};
pub use report::{RunReport, RunSummary, StabilityAssessment, Termination};
pub use retry::RetryPolicy;
pub use state::OptimizationState;
