//! Optimizer configuration
//!
//! Values are layered: built-in defaults, then a TOML file, then
//! `DUALPROMPT_*` environment variables, then command-line flags. The result
//! is validated once, before any iteration runs.

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::path::PathBuf;

pub mod loader;
pub mod validator;

pub use loader::ConfigLoader;
pub use validator::ConfigValidator;

use crate::optimizer::records::MetaWeights;
use crate::Result;

/// Valid log levels for configuration validation.
pub const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Score (1-100) at which the system prompt is considered done
    pub target_score: u32,
    /// Hard cap on loop passes. Always set, so every run is bounded.
    pub max_iterations: u32,
    /// Meta-evaluate the critique prompt every N iterations
    pub improve_critique_every: u32,
    /// Meta-scores below this trigger a critique refinement
    pub critique_improvement_threshold: u32,
    pub early_stop_patience: Patience,
    pub meta_evaluation_weights: MetaWeights,
    /// How many recent evaluations the meta-critic sees. Unset means every
    /// evaluation since the critique prompt last changed.
    pub meta_sample_size: Option<usize>,
    pub enable_critique_improvement: bool,
    pub enable_system_prompt_improvement: bool,
    /// Refinements longer than this many characters are rejected
    pub max_prompt_length: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub log_level: String,
    pub inputs: InputFiles,
    pub output: OutputSettings,
    pub provider: ProviderSettings,
    pub models: ModelSettings,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            target_score: 95,
            max_iterations: 15,
            improve_critique_every: 3,
            critique_improvement_threshold: 85,
            early_stop_patience: Patience::after(3),
            meta_evaluation_weights: MetaWeights::default(),
            meta_sample_size: None,
            enable_critique_improvement: true,
            enable_system_prompt_improvement: true,
            max_prompt_length: 200_000,
            max_retries: 3,
            retry_delay_ms: 1000,
            log_level: "info".to_string(),
            inputs: InputFiles::default(),
            output: OutputSettings::default(),
            provider: ProviderSettings::default(),
            models: ModelSettings::default(),
        }
    }
}

impl OptimizerConfig {
    /// Check every rule and report all violations together
    pub fn validate(&self) -> Result<()> {
        ConfigValidator::validate_config(self)
    }

    /// Apply command-line overrides on top of file and environment values
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(target) = overrides.target_score {
            self.target_score = target;
        }
        if let Some(max) = overrides.max_iterations {
            self.max_iterations = max;
        }
        if let Some(every) = overrides.improve_critique_every {
            self.improve_critique_every = every;
        }
        if let Some(patience) = overrides.early_stop_patience {
            self.early_stop_patience = patience;
        }
        if let Some(task) = &overrides.task_file {
            self.inputs.task = task.clone();
        }
        if let Some(system) = &overrides.system_prompt_file {
            self.inputs.system_prompt = system.clone();
        }
        if let Some(critique) = &overrides.critique_prompt_file {
            self.inputs.critique_prompt = critique.clone();
        }
        if let Some(dir) = &overrides.output_dir {
            self.output.directory = dir.clone();
        }
    }
}

/// Command-line values that take precedence over every other source
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub target_score: Option<u32>,
    pub max_iterations: Option<u32>,
    pub improve_critique_every: Option<u32>,
    pub early_stop_patience: Option<Patience>,
    pub task_file: Option<PathBuf>,
    pub system_prompt_file: Option<PathBuf>,
    pub critique_prompt_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Plateau patience: a number of non-improving iterations, or disabled.
///
/// Written in TOML as an integer or the string `"disabled"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PatienceRepr", into = "PatienceRepr")]
pub struct Patience(Option<u32>);

impl Patience {
    pub fn after(iterations: u32) -> Self {
        Self(Some(iterations))
    }

    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn limit(&self) -> Option<u32> {
        self.0
    }
}

impl std::str::FromStr for Patience {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().parse::<u32>() {
            Ok(n) => Ok(Self::after(n)),
            Err(_) => Patience::try_from(PatienceRepr::Keyword(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum PatienceRepr {
    Iterations(u32),
    Keyword(String),
}

impl TryFrom<PatienceRepr> for Patience {
    type Error = String;

    fn try_from(repr: PatienceRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            PatienceRepr::Iterations(n) => Ok(Self::after(n)),
            PatienceRepr::Keyword(word) => match word.trim().to_lowercase().as_str() {
                "disabled" | "off" | "none" => Ok(Self::disabled()),
                other => Err(format!(
                    "early_stop_patience must be an integer or \"disabled\", got \"{other}\""
                )),
            },
        }
    }
}

impl From<Patience> for PatienceRepr {
    fn from(patience: Patience) -> Self {
        match patience.0 {
            Some(n) => PatienceRepr::Iterations(n),
            None => PatienceRepr::Keyword("disabled".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputFiles {
    pub task: PathBuf,
    pub system_prompt: PathBuf,
    pub critique_prompt: PathBuf,
}

impl Default for InputFiles {
    fn default() -> Self {
        Self {
            task: PathBuf::from("user_input.txt"),
            system_prompt: PathBuf::from("initial_system_prompt.txt"),
            critique_prompt: PathBuf::from("critique_system_prompt.txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub prefix: String,
    /// Write a snapshot after every loop pass
    pub save_intermediate: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            prefix: "dual_improvement".to_string(),
            save_intermediate: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_url: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Falls back to `ANTHROPIC_API_KEY` when unset
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            max_tokens: 8000,
            timeout_secs: 120,
            api_key: None,
        }
    }
}

impl ProviderSettings {
    pub fn effective_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub generation: String,
    pub critique: String,
    pub refinement: String,
    /// Used for meta-evaluation and critique refinement
    pub critique_refinement: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            generation: DEFAULT_MODEL.to_string(),
            critique: DEFAULT_MODEL.to_string(),
            refinement: DEFAULT_MODEL.to_string(),
            critique_refinement: DEFAULT_MODEL.to_string(),
        }
    }
}
