//! The dual optimization loop
//!
//! One pass evaluates the live system prompt, decides what to do with the
//! verdict, optionally refines the system prompt, optionally meta-evaluates
//! and refines the critique prompt, then checks whether to stop. Calls to
//! collaborators are awaited one at a time.

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use super::decision::{CritiqueDecision, IterationPlan, Phase};
use super::prompt::PromptRole;
use super::report::{RunReport, Termination};
use super::retry::{call_with_retry, RetryPolicy};
use super::state::OptimizationState;
use crate::config::OptimizerConfig;
use crate::providers::Collaborators;
use crate::Result;

/// Characters of prompt or critique text shown in log lines
const LOG_PREVIEW_CHARS: usize = 200;

/// Shared flag that asks a running controller to stop.
///
/// Checked between phases, never in the middle of a collaborator call.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise this signal on SIGINT or SIGTERM.
    ///
    /// The first signal lets the run stop at the next phase boundary; a
    /// second one exits immediately with 130.
    pub fn install_signal_handlers(&self) -> Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let flag = self.clone();

        thread::spawn(move || {
            for sig in signals.forever() {
                if flag.is_raised() {
                    std::process::exit(130);
                }
                warn!(
                    "Received signal {sig}, stopping after the current step (repeat to force quit)"
                );
                flag.raise();
            }
        });

        Ok(())
    }
}

/// Read-only hooks into a running optimization
pub trait RunObserver: Send + Sync {
    /// Called on every phase transition
    fn on_phase(&self, _iteration: u32, _phase: Phase) {}

    /// Called once each loop pass has finished all of its steps
    fn on_iteration(&self, _state: &OptimizationState) {}
}

pub struct OptimizationController {
    config: OptimizerConfig,
    collaborators: Collaborators,
    retry: RetryPolicy,
    abort: AbortSignal,
    observers: Vec<Box<dyn RunObserver>>,
}

/// Stop the pass if an abort was requested, otherwise move to `$next`
macro_rules! checkpoint {
    ($self:ident, $state:ident, $phase:ident, $next:expr) => {
        if let Some(aborted) = $self.enter($state, $phase, $next) {
            return Ok(aborted);
        }
    };
}

impl OptimizationController {
    /// Validate `config` and build a controller around `collaborators`
    pub fn new(config: OptimizerConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            retry: RetryPolicy::from_config(&config),
            config,
            collaborators,
            abort: AbortSignal::new(),
            observers: Vec::new(),
        })
    }

    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Co-optimize `system_prompt` and `critique_prompt` for `task`.
    ///
    /// Always returns a report. Failures and aborts are recorded in its
    /// termination and leave it flagged partial.
    pub async fn run(
        &self,
        task: impl Into<String>,
        system_prompt: impl Into<String>,
        critique_prompt: impl Into<String>,
    ) -> RunReport {
        let mut state = OptimizationState::new(task, system_prompt, critique_prompt);
        let mut phase = Phase::Init;

        info!("🚀 Starting dual prompt optimization (run {})", state.run_id);
        info!(
            "🎯 Target score: {} | max iterations: {} | critique check every {} iterations",
            self.config.target_score,
            self.config.max_iterations,
            self.config.improve_critique_every
        );

        let termination = match self.drive(&mut state, &mut phase).await {
            Ok(termination) => termination,
            Err(e) => {
                error!("Run failed during {phase}: {e}");
                Termination::Failed {
                    phase,
                    error: e.to_string(),
                }
            }
        };

        self.notify_phase(state.iteration_count, Phase::Terminated);
        info!(
            "🏁 {} after {} iterations (best score: {})",
            termination.describe(),
            state.iteration_count,
            state
                .best_score()
                .map_or_else(|| "n/a".to_string(), |s| s.to_string())
        );

        RunReport::new(state, termination, &self.config)
    }

    async fn drive(&self, state: &mut OptimizationState, phase: &mut Phase) -> Result<Termination> {
        loop {
            checkpoint!(self, state, phase, Phase::Evaluating);
            let iteration = state.begin_iteration();
            info!("🔄 Iteration {} of {}", iteration, self.config.max_iterations);
            self.evaluate(state).await?;

            checkpoint!(self, state, phase, Phase::Deciding);
            let plan = IterationPlan::decide(&self.config, state);
            debug!("Iteration {iteration} plan: {plan:?}");

            if plan.refine_system {
                checkpoint!(self, state, phase, Phase::RefiningSystem);
                self.refine_system(state).await?;
            }

            if plan.meta_evaluate {
                checkpoint!(self, state, phase, Phase::MetaEvaluating);
                if self.meta_evaluate(state).await? == CritiqueDecision::Refine {
                    checkpoint!(self, state, phase, Phase::RefiningCritique);
                    self.refine_critique(state).await?;
                }
            }

            checkpoint!(self, state, phase, Phase::CheckStop);
            for observer in &self.observers {
                observer.on_iteration(state);
            }

            if let Some(stop) = plan.stop {
                info!("🛑 {stop}");
                return Ok(Termination::Completed { stop });
            }
        }
    }

    fn enter(&self, state: &OptimizationState, phase: &mut Phase, next: Phase) -> Option<Termination> {
        if self.abort.is_raised() {
            warn!("Abort requested, stopping before {next}");
            return Some(Termination::Aborted { phase: next });
        }
        *phase = next;
        self.notify_phase(state.iteration_count, next);
        None
    }

    fn notify_phase(&self, iteration: u32, phase: Phase) {
        for observer in &self.observers {
            observer.on_phase(iteration, phase);
        }
    }

    async fn evaluate(&self, state: &mut OptimizationState) -> Result<()> {
        let system_prompt = state.system_prompt.current.text.clone();
        let critique_prompt = state.critique_prompt.current.text.clone();
        let task = state.task.clone();

        let responder = &self.collaborators.responder;
        let (system, task_text) = (system_prompt.as_str(), task.as_str());
        let output = call_with_retry(self.retry, "respond", move || {
            responder.respond(system, task_text)
        })
        .await?;
        debug!("Response: {}", preview(&output));

        let critic = &self.collaborators.critic;
        let (critique, response) = (critique_prompt.as_str(), output.as_str());
        let verdict = call_with_retry(self.retry, "critique", move || {
            critic.critique(critique, system, task_text, response)
        })
        .await?;

        info!("📊 Score: {}/100", verdict.score);
        debug!("Critique: {}", preview(&verdict.critique_text));

        if state.record_evaluation(verdict, output) {
            info!("🏆 New best score: {}", state.best_score().unwrap_or_default());
        } else {
            debug!(
                "No improvement for {} iterations",
                state.iterations_since_improvement
            );
        }
        Ok(())
    }

    async fn refine_system(&self, state: &mut OptimizationState) -> Result<()> {
        let Some(latest) = state.latest_evaluation() else {
            return Ok(());
        };
        let feedback = latest.critique_text.clone();
        let current = state.system_prompt.current.text.clone();

        if let Some(text) = self.refine(PromptRole::System, &current, &feedback).await? {
            info!("🔧 System prompt refined: {}", preview(&text));
            state.replace_system_prompt(text);
        }
        Ok(())
    }

    async fn meta_evaluate(&self, state: &mut OptimizationState) -> Result<CritiqueDecision> {
        let sample = state.meta_sample(self.config.meta_sample_size).to_vec();
        let sample_iterations: Vec<u32> = sample.iter().map(|r| r.iteration).collect();
        debug!(
            "Meta-evaluating critique prompt over iterations {:?}",
            sample_iterations
        );

        let critique_prompt = state.critique_prompt.current.text.clone();
        let meta_critic = &self.collaborators.meta_critic;
        let (prompt, records) = (critique_prompt.as_str(), sample.as_slice());
        let verdict = call_with_retry(self.retry, "meta-critique", move || {
            meta_critic.meta_critique(prompt, records)
        })
        .await?;

        let threshold = self.config.critique_improvement_threshold;
        let meta_score = state
            .record_meta_evaluation(verdict, sample_iterations)
            .meta_score;
        info!("🔍 Critique meta-score: {meta_score}/100 (threshold: {threshold})");

        Ok(CritiqueDecision::for_meta_score(meta_score, threshold))
    }

    async fn refine_critique(&self, state: &mut OptimizationState) -> Result<()> {
        let Some(latest) = state.meta_history.last() else {
            return Ok(());
        };
        let feedback = latest.feedback.clone();
        let current = state.critique_prompt.current.text.clone();

        if let Some(text) = self.refine(PromptRole::Critique, &current, &feedback).await? {
            info!("🧪 Critique prompt refined: {}", preview(&text));
            state.replace_critique_prompt(text);
        }
        Ok(())
    }

    /// Ask the refiner for a new prompt. `None` means the reply was rejected
    /// and the current prompt stays live.
    async fn refine(&self, role: PromptRole, current: &str, feedback: &str) -> Result<Option<String>> {
        let refiner = &self.collaborators.refiner;
        let operation = format!("refine {role} prompt");
        let text = call_with_retry(self.retry, &operation, move || {
            refiner.refine(role, current, feedback)
        })
        .await?;

        Ok(self.accept_refinement(role, text))
    }

    fn accept_refinement(&self, role: PromptRole, text: String) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            warn!("Rejected empty {role} prompt refinement, keeping the current prompt");
            return None;
        }

        let length = text.chars().count();
        if length > self.config.max_prompt_length {
            warn!(
                "Rejected {role} prompt refinement of {length} characters (limit {}), keeping the current prompt",
                self.config.max_prompt_length
            );
            return None;
        }

        Some(text.to_string())
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(LOG_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::decision::StopReason;
    use crate::providers::ScriptedProvider;
    use crate::testing::fixtures::{fast_config, CRITIQUE_PROMPT, SYSTEM_PROMPT, TASK};
    use std::sync::Mutex;

    fn controller(config: OptimizerConfig, provider: &Arc<ScriptedProvider>) -> OptimizationController {
        OptimizationController::new(config, Collaborators::single(provider.clone())).unwrap()
    }

    #[derive(Default)]
    struct PhaseLog(Arc<Mutex<Vec<(u32, Phase)>>>);

    impl RunObserver for PhaseLog {
        fn on_phase(&self, iteration: u32, phase: Phase) {
            self.0.lock().unwrap().push((iteration, phase));
        }
    }

    #[test]
    fn test_invalid_config_is_rejected_before_running() {
        let provider = Arc::new(ScriptedProvider::builder().build());
        let mut config = fast_config();
        config.meta_evaluation_weights.consistency = 0;
        assert!(OptimizationController::new(config, Collaborators::single(provider)).is_err());
    }

    #[tokio::test]
    async fn test_phase_order_of_a_meta_iteration() {
        let provider = Arc::new(
            ScriptedProvider::builder()
                .scores([60])
                .meta_scores([70])
                .build(),
        );
        let mut config = fast_config();
        config.max_iterations = 1;
        config.improve_critique_every = 1;

        let log = PhaseLog::default();
        let phases = log.0.clone();
        let report = controller(config, &provider)
            .with_observer(Box::new(log))
            .run(TASK, SYSTEM_PROMPT, CRITIQUE_PROMPT)
            .await;

        assert_eq!(
            report.termination,
            Termination::Completed {
                stop: StopReason::MaxIterations { limit: 1 }
            }
        );
        let seen: Vec<Phase> = phases.lock().unwrap().iter().map(|(_, p)| *p).collect();
        assert_eq!(
            seen,
            [
                Phase::Evaluating,
                Phase::Deciding,
                Phase::MetaEvaluating,
                Phase::RefiningCritique,
                Phase::CheckStop,
                Phase::Terminated
            ]
        );
    }

    #[tokio::test]
    async fn test_oversized_refinement_is_rejected() {
        let provider = Arc::new(
            ScriptedProvider::builder()
                .scores([50, 55])
                .refinement("x".repeat(64))
                .build(),
        );
        let mut config = fast_config();
        config.max_iterations = 2;
        config.max_prompt_length = 32;
        config.enable_critique_improvement = false;

        let report = controller(config, &provider)
            .run(TASK, SYSTEM_PROMPT, CRITIQUE_PROMPT)
            .await;

        assert_eq!(report.state.system_refinements(), 0);
        assert_eq!(report.final_system_prompt().text, SYSTEM_PROMPT);
        assert!(report.history().iter().all(|r| r.system_prompt == SYSTEM_PROMPT));
    }

    #[tokio::test]
    async fn test_empty_refinement_is_rejected() {
        let provider = Arc::new(
            ScriptedProvider::builder()
                .scores([50, 55])
                .refinement("   ")
                .build(),
        );
        let mut config = fast_config();
        config.max_iterations = 2;

        let report = controller(config, &provider)
            .run(TASK, SYSTEM_PROMPT, CRITIQUE_PROMPT)
            .await;
        assert_eq!(report.state.system_refinements(), 0);
    }

    #[tokio::test]
    async fn test_abort_before_first_pass_makes_no_calls() {
        let provider = Arc::new(ScriptedProvider::builder().scores([50]).build());
        let abort = AbortSignal::new();
        abort.raise();

        let report = controller(fast_config(), &provider)
            .with_abort_signal(abort)
            .run(TASK, SYSTEM_PROMPT, CRITIQUE_PROMPT)
            .await;

        assert_eq!(
            report.termination,
            Termination::Aborted {
                phase: Phase::Evaluating
            }
        );
        assert!(report.is_partial());
        assert!(provider.calls().is_empty());
        assert_eq!(report.state.iteration_count, 0);
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "é".repeat(250);
        let shown = preview(&long);
        assert_eq!(shown.chars().count(), LOG_PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
