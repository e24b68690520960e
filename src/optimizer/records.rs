use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The fixed dimensions a critique prompt is meta-evaluated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    IssueIdentification,
    ScoringCalibration,
    Actionability,
    Comprehensiveness,
    Consistency,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::IssueIdentification,
        Dimension::ScoringCalibration,
        Dimension::Actionability,
        Dimension::Comprehensiveness,
        Dimension::Consistency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IssueIdentification => "issue_identification",
            Self::ScoringCalibration => "scoring_calibration",
            Self::Actionability => "actionability",
            Self::Comprehensiveness => "comprehensiveness",
            Self::Consistency => "consistency",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::IssueIdentification => "Issue Identification Accuracy",
            Self::ScoringCalibration => "Scoring Calibration",
            Self::Actionability => "Actionability & Specificity",
            Self::Comprehensiveness => "Comprehensiveness",
            Self::Consistency => "Consistency & Logic",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("Unknown meta-evaluation dimension: {s}"))
    }
}

/// Point budget of each meta-evaluation dimension. Must total 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetaWeights {
    pub issue_identification: u32,
    pub scoring_calibration: u32,
    pub actionability: u32,
    pub comprehensiveness: u32,
    pub consistency: u32,
}

impl Default for MetaWeights {
    fn default() -> Self {
        Self {
            issue_identification: 25,
            scoring_calibration: 20,
            actionability: 25,
            comprehensiveness: 15,
            consistency: 15,
        }
    }
}

impl MetaWeights {
    pub fn weight(&self, dimension: Dimension) -> u32 {
        match dimension {
            Dimension::IssueIdentification => self.issue_identification,
            Dimension::ScoringCalibration => self.scoring_calibration,
            Dimension::Actionability => self.actionability,
            Dimension::Comprehensiveness => self.comprehensiveness,
            Dimension::Consistency => self.consistency,
        }
    }

    /// Sum of all five weights, widened so oversized values cannot wrap.
    pub fn total(&self) -> u64 {
        Dimension::ALL
            .iter()
            .map(|d| u64::from(self.weight(*d)))
            .sum()
    }

    /// Clamp each reported sub-score into `[0, weight]`.
    ///
    /// Dimensions the meta-critic did not report are left out rather than
    /// guessed.
    pub fn apply(&self, raw: &BTreeMap<Dimension, u32>) -> BTreeMap<Dimension, u32> {
        raw.iter()
            .map(|(dimension, score)| (*dimension, (*score).min(self.weight(*dimension))))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, u32)> + '_ {
        Dimension::ALL.into_iter().map(|d| (d, self.weight(d)))
    }
}

/// One critic verdict on the system prompt's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub iteration: u32,
    pub score: u32,
    pub critique_text: String,
    #[serde(default)]
    pub dimension_breakdown: BTreeMap<String, u32>,
    /// The system prompt text that was evaluated
    pub system_prompt: String,
    /// What the responder produced with that prompt
    pub output: String,
    /// Revision of the critique prompt that produced this verdict
    pub critique_revision: usize,
    pub evaluated_at: DateTime<Utc>,
}

/// One meta-critic verdict on the critique prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEvaluationRecord {
    pub iteration: u32,
    pub meta_score: u32,
    pub dimension_breakdown: BTreeMap<Dimension, u32>,
    pub feedback: String,
    pub sample_iterations: Vec<u32>,
    pub critique_revision: usize,
    /// Whether this verdict triggered a critique refinement
    pub refined: bool,
    pub evaluated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_total_100() {
        assert_eq!(MetaWeights::default().total(), 100);
    }

    #[test]
    fn test_apply_clamps_to_weight() {
        let weights = MetaWeights::default();
        let mut raw = BTreeMap::new();
        raw.insert(Dimension::IssueIdentification, 40);
        raw.insert(Dimension::Consistency, 10);

        let applied = weights.apply(&raw);
        assert_eq!(applied[&Dimension::IssueIdentification], 25);
        assert_eq!(applied[&Dimension::Consistency], 10);
        assert!(!applied.contains_key(&Dimension::Actionability));
    }

    #[test]
    fn test_dimension_parse() {
        assert_eq!(
            "Scoring_Calibration".parse::<Dimension>().unwrap(),
            Dimension::ScoringCalibration
        );
        assert!("clarity".parse::<Dimension>().is_err());
    }

    #[test]
    fn test_weights_reject_unknown_keys() {
        let toml_str = r#"
            issue_identification = 20
            scoring_calibration = 20
            actionability = 20
            comprehensiveness = 20
            consistency = 10
            clarity = 10
        "#;
        assert!(toml::from_str::<MetaWeights>(toml_str).is_err());
    }

    #[test]
    fn test_meta_breakdown_serializes_with_snake_case_keys() {
        let mut breakdown = BTreeMap::new();
        breakdown.insert(Dimension::IssueIdentification, 20);
        let json = serde_json::to_string(&breakdown).unwrap();
        assert_eq!(json, r#"{"issue_identification":20}"#);
    }
}
