//! Environment readiness checks for `dualprompt check`

use std::fmt;
use std::fs;
use std::path::Path;

use crate::config::{InputFiles, OptimizerConfig};
use crate::providers::AnthropicProvider;
use crate::Result;

/// Anthropic keys start with this; anything else is suspicious but allowed
const EXPECTED_KEY_PREFIX: &str = "sk-ant-";
const MIN_KEY_LENGTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "✅ PASS"),
            Self::Warn => write!(f, "⚠️  WARN"),
            Self::Fail => write!(f, "❌ FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReadinessReport {
    pub checks: Vec<CheckResult>,
}

impl ReadinessReport {
    /// True when no check failed. Warnings do not count against readiness.
    pub fn is_ready(&self) -> bool {
        self.checks.iter().all(|c| c.status != CheckStatus::Fail)
    }

    pub fn render(&self) -> String {
        let width = self
            .checks
            .iter()
            .map(|c| c.name.chars().count())
            .max()
            .unwrap_or(0);

        let mut out = String::from("🔍 dualprompt readiness\n\n");
        for check in &self.checks {
            out.push_str(&format!(
                "{}  {:<width$}  {}\n",
                check.status, check.name, check.detail
            ));
        }
        out.push('\n');
        if self.is_ready() {
            out.push_str("🎉 Ready to run: dualprompt run\n");
        } else {
            let failed = self
                .checks
                .iter()
                .filter(|c| c.status == CheckStatus::Fail)
                .count();
            out.push_str(&format!("{failed} check(s) failed. Fix them before running.\n"));
        }
        out
    }
}

pub fn check_api_key(key: Option<&str>) -> CheckResult {
    const NAME: &str = "API key";
    match key {
        None => CheckResult::new(
            NAME,
            CheckStatus::Fail,
            "ANTHROPIC_API_KEY is not set (or set provider.api_key)",
        ),
        Some(key) if key.len() < MIN_KEY_LENGTH => CheckResult::new(
            NAME,
            CheckStatus::Warn,
            "key looks too short, it may be invalid",
        ),
        Some(key) if !key.starts_with(EXPECTED_KEY_PREFIX) => CheckResult::new(
            NAME,
            CheckStatus::Warn,
            format!("key does not start with '{EXPECTED_KEY_PREFIX}', it may be invalid"),
        ),
        Some(key) => {
            let shown: String = key.chars().take(10).collect();
            CheckResult::new(NAME, CheckStatus::Pass, format!("found ({shown}...)"))
        }
    }
}

fn check_file(name: &str, path: &Path) -> CheckResult {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("{} is empty", path.display()),
        ),
        Ok(content) => CheckResult::new(
            name,
            CheckStatus::Pass,
            format!("{} ({} bytes)", path.display(), content.len()),
        ),
        Err(e) => CheckResult::new(
            name,
            CheckStatus::Fail,
            format!("cannot read {}: {e}", path.display()),
        ),
    }
}

pub fn check_input_files(inputs: &InputFiles) -> Vec<CheckResult> {
    vec![
        check_file("Task file", &inputs.task),
        check_file("System prompt file", &inputs.system_prompt),
        check_file("Critique prompt file", &inputs.critique_prompt),
    ]
}

/// Report configuration loading and validation together
pub fn check_config(config: &Result<OptimizerConfig>) -> CheckResult {
    const NAME: &str = "Configuration";
    match config {
        Ok(config) => match config.validate() {
            Ok(()) => CheckResult::new(
                NAME,
                CheckStatus::Pass,
                format!(
                    "target {}, up to {} iterations, critique check every {}",
                    config.target_score, config.max_iterations, config.improve_critique_every
                ),
            ),
            Err(e) => CheckResult::new(NAME, CheckStatus::Fail, e.to_string()),
        },
        Err(e) => CheckResult::new(NAME, CheckStatus::Fail, e.to_string()),
    }
}

pub fn check_output_dir(dir: &Path) -> CheckResult {
    const NAME: &str = "Output directory";
    if dir.is_dir() {
        CheckResult::new(NAME, CheckStatus::Pass, dir.display().to_string())
    } else if dir.exists() {
        CheckResult::new(
            NAME,
            CheckStatus::Fail,
            format!("{} exists but is not a directory", dir.display()),
        )
    } else {
        CheckResult::new(
            NAME,
            CheckStatus::Warn,
            format!("{} will be created", dir.display()),
        )
    }
}

pub async fn check_connection(config: &OptimizerConfig) -> CheckResult {
    const NAME: &str = "API connection";
    let provider = match AnthropicProvider::new(config) {
        Ok(provider) => provider,
        Err(e) => return CheckResult::new(NAME, CheckStatus::Fail, e.to_string()),
    };
    match provider.ping().await {
        Ok(_) => CheckResult::new(
            NAME,
            CheckStatus::Pass,
            format!("{} responded", config.models.generation),
        ),
        Err(e) => CheckResult::new(NAME, CheckStatus::Fail, e.to_string()),
    }
}

/// Run every check. `ping` adds one tiny API call.
pub async fn run_checks(config: Result<OptimizerConfig>, ping: bool) -> ReadinessReport {
    let mut report = ReadinessReport::default();
    report.checks.push(check_config(&config));

    let Ok(config) = config else {
        // Without a configuration the file paths are unknown
        report
            .checks
            .extend(check_input_files(&InputFiles::default()));
        report
            .checks
            .push(check_api_key(std::env::var("ANTHROPIC_API_KEY").ok().as_deref()));
        return report;
    };

    report.checks.extend(check_input_files(&config.inputs));
    report.checks.push(check_output_dir(&config.output.directory));

    let key = config.provider.effective_api_key();
    report.checks.push(check_api_key(key.as_deref()));

    if ping && key.is_some() {
        report.checks.push(check_connection(&config).await);
    }
    report
}
