use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{OptimizerConfig, Patience};
use crate::{Error, Result};

/// File looked up in the working directory when no `--config` is given
pub const LOCAL_CONFIG_FILE: &str = "dualprompt.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load defaults, then the config file, then `DUALPROMPT_*` variables.
    ///
    /// The result is not validated; callers apply CLI overrides first.
    pub fn load(explicit: Option<&Path>) -> Result<OptimizerConfig> {
        let mut config = match Self::resolve_path(explicit)? {
            Some(path) => Self::load_file(&path)?,
            None => {
                debug!("No configuration file found, using defaults");
                OptimizerConfig::default()
            }
        };

        Self::merge_env_vars(&mut config)?;
        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<OptimizerConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: OptimizerConfig = toml::from_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// An explicit path must exist; otherwise try the working directory,
    /// then the per-user config directory.
    fn resolve_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Ok(Some(local));
        }

        Ok(user_config_path().filter(|p| p.exists()))
    }

    pub fn merge_env_vars(config: &mut OptimizerConfig) -> Result<()> {
        Self::merge_env_from(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Every unparseable value is reported, not just the first.
    pub fn merge_env_from<F>(config: &mut OptimizerConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut problems = Vec::new();

        let mut number = |key: &str, slot: &mut u32| {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<u32>() {
                    Ok(value) => *slot = value,
                    Err(_) => problems.push(format!("{key} must be a whole number, got \"{raw}\"")),
                }
            }
        };

        number("DUALPROMPT_TARGET_SCORE", &mut config.target_score);
        number("DUALPROMPT_MAX_ITERATIONS", &mut config.max_iterations);
        number(
            "DUALPROMPT_IMPROVE_CRITIQUE_EVERY",
            &mut config.improve_critique_every,
        );
        number(
            "DUALPROMPT_CRITIQUE_THRESHOLD",
            &mut config.critique_improvement_threshold,
        );

        if let Some(raw) = lookup("DUALPROMPT_EARLY_STOP_PATIENCE") {
            match raw.parse::<Patience>() {
                Ok(patience) => config.early_stop_patience = patience,
                Err(e) => problems.push(format!("DUALPROMPT_EARLY_STOP_PATIENCE: {e}")),
            }
        }

        if let Some(level) = lookup("DUALPROMPT_LOG_LEVEL") {
            config.log_level = level.trim().to_lowercase();
        }

        if let Some(dir) = lookup("DUALPROMPT_OUTPUT_DIR") {
            config.output.directory = PathBuf::from(dir);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Configuration(problems))
        }
    }
}

/// `config.toml` in the platform config directory for dualprompt
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "dualprompt", "dualprompt")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
