use super::{OptimizerConfig, VALID_LOG_LEVELS};
use crate::{Error, Result};

pub struct ConfigValidator;

impl ConfigValidator {
    /// Reject the configuration if any rule fails, listing all failures
    pub fn validate_config(config: &OptimizerConfig) -> Result<()> {
        let problems = Self::collect_problems(config);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Configuration(problems))
        }
    }

    pub fn collect_problems(config: &OptimizerConfig) -> Vec<String> {
        let mut problems = Vec::new();

        if !(1..=100).contains(&config.target_score) {
            problems.push(format!(
                "target_score must be between 1 and 100, got {}",
                config.target_score
            ));
        }

        if config.max_iterations == 0 {
            problems.push("max_iterations must be at least 1".to_string());
        }

        if config.improve_critique_every == 0 {
            problems.push("improve_critique_every must be at least 1".to_string());
        }

        if !(1..=100).contains(&config.critique_improvement_threshold) {
            problems.push(format!(
                "critique_improvement_threshold must be between 1 and 100, got {}",
                config.critique_improvement_threshold
            ));
        }

        if config.early_stop_patience.limit() == Some(0) {
            problems.push(
                "early_stop_patience must be at least 1 (use \"disabled\" to turn it off)"
                    .to_string(),
            );
        }

        for (dimension, weight) in config.meta_evaluation_weights.iter() {
            if weight > 100 {
                problems.push(format!(
                    "meta_evaluation_weights.{dimension} must be at most 100, got {weight}"
                ));
            }
        }

        let total = config.meta_evaluation_weights.total();
        if total != 100 {
            problems.push(format!(
                "meta_evaluation_weights must sum to 100, got {total}"
            ));
        }

        if config.meta_sample_size == Some(0) {
            problems.push("meta_sample_size must be at least 1 when set".to_string());
        }

        if config.max_prompt_length == 0 {
            problems.push("max_prompt_length must be greater than 0".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&config.log_level.as_str()) {
            problems.push(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.log_level, VALID_LOG_LEVELS
            ));
        }

        if config.output.prefix.trim().is_empty() {
            problems.push("output.prefix cannot be empty".to_string());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Patience;
    use crate::optimizer::records::MetaWeights;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigValidator::validate_config(&OptimizerConfig::default()).is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_100() {
        let config = OptimizerConfig {
            meta_evaluation_weights: MetaWeights {
                issue_identification: 30,
                ..MetaWeights::default()
            },
            ..OptimizerConfig::default()
        };
        let problems = ConfigValidator::collect_problems(&config);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("sum to 100, got 105"));
    }

    #[test]
    fn test_oversized_weights_do_not_wrap_to_100() {
        // u32::MAX + 101 wraps to exactly 100 in 32-bit arithmetic
        let config = OptimizerConfig {
            meta_evaluation_weights: MetaWeights {
                issue_identification: u32::MAX,
                scoring_calibration: 101,
                actionability: 0,
                comprehensiveness: 0,
                consistency: 0,
            },
            ..OptimizerConfig::default()
        };

        let problems = match ConfigValidator::validate_config(&config) {
            Err(Error::Configuration(problems)) => problems,
            other => panic!("expected configuration error, got {other:?}"),
        };
        let expected_total = u64::from(u32::MAX) + 101;
        assert!(problems
            .iter()
            .any(|p| p.contains(&format!("sum to 100, got {expected_total}"))));
        assert!(problems
            .iter()
            .any(|p| p.starts_with("meta_evaluation_weights.issue_identification must be at most 100")));
        assert!(problems
            .iter()
            .any(|p| p.starts_with("meta_evaluation_weights.scoring_calibration must be at most 100")));
        assert_eq!(problems.len(), 3);
    }

    #[test]
    fn test_all_problems_are_accumulated() {
        let config = OptimizerConfig {
            target_score: 0,
            improve_critique_every: 0,
            critique_improvement_threshold: 101,
            early_stop_patience: Patience::after(0),
            log_level: "loud".to_string(),
            ..OptimizerConfig::default()
        };
        assert_eq!(ConfigValidator::collect_problems(&config).len(), 5);
    }

    #[test]
    fn test_disabled_patience_is_valid() {
        let config = OptimizerConfig {
            early_stop_patience: Patience::disabled(),
            ..OptimizerConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
