//! Turning model replies into structured verdicts
//!
//! Replies are expected to be JSON, but models wrap it in code fences or
//! surround it with prose often enough that parsing is forgiving: fences are
//! stripped and the outermost object is located before decoding.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{CritiqueResult, MetaCritiqueResult};
use crate::optimizer::records::{Dimension, MetaWeights};
use crate::{Error, Result};

static FENCE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*(.*?)\s*```$").expect("Invalid regex pattern"));

static SCORE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)"?score"?\s*[:=]\s*(\d+(?:\.\d+)?)"#,
        r"(\d+(?:\.\d+)?)\s*/\s*100",
        r"(?i)(\d+(?:\.\d+)?)\s*out\s*of\s*100",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex pattern"))
    .collect()
});

/// Clamp any numeric score into 1..=100
pub fn clamp_score(raw: f64) -> u32 {
    if raw.is_nan() {
        return 1;
    }
    raw.round().clamp(1.0, 100.0) as u32
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    FENCE_REGEX
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str())
}

/// Decode the outermost JSON object in `text`
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let body = strip_code_fences(text);
    if let Ok(Value::Object(map)) = serde_json::from_str(body) {
        return Some(map);
    }

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&body[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Pull a score out of free text such as "Score: 85" or "85/100"
pub fn extract_score_from_text(text: &str) -> Option<u32> {
    SCORE_PATTERNS.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(clamp_score)
    })
}

/// Interpret a critic reply.
///
/// JSON with `score` and `critique` is preferred. Otherwise a score is
/// pattern-matched from the text and the whole reply becomes the critique.
pub fn parse_critique(reply: &str) -> Result<CritiqueResult> {
    if let Some(json) = extract_json_object(reply) {
        if let Some(score) = json.get("score").and_then(number) {
            let critique_text = ["critique", "critique_text", "feedback"]
                .iter()
                .find_map(|key| json.get(*key).map(text))
                .unwrap_or_default();

            let dimension_breakdown = ["dimension_scores", "dimension_breakdown", "breakdown"]
                .iter()
                .find_map(|key| json.get(*key).and_then(Value::as_object))
                .map(|dims| {
                    dims.iter()
                        .filter_map(|(name, value)| {
                            number(value).map(|n| (name.clone(), n.round().max(0.0) as u32))
                        })
                        .collect()
                })
                .unwrap_or_default();

            return Ok(CritiqueResult {
                score: clamp_score(score),
                critique_text,
                dimension_breakdown,
            });
        }
    }

    let score = extract_score_from_text(reply)
        .ok_or_else(|| Error::parse("critique reply contains no score"))?;
    Ok(CritiqueResult {
        score,
        critique_text: reply.trim().to_string(),
        dimension_breakdown: BTreeMap::new(),
    })
}

/// Interpret a meta-critic reply against the configured weights.
///
/// Sub-scores are clamped to their weight. A missing `meta_score` is the sum
/// of the sub-scores; a reply with neither is a parse error.
pub fn parse_meta_critique(reply: &str, weights: &MetaWeights) -> Result<MetaCritiqueResult> {
    let json = extract_json_object(reply)
        .ok_or_else(|| Error::parse("meta-critique reply is not a JSON object"))?;

    let dims_source = ["dimension_scores", "dimension_breakdown", "dimensions"]
        .iter()
        .find_map(|key| json.get(*key).and_then(Value::as_object))
        .unwrap_or(&json);

    let raw: BTreeMap<Dimension, u32> = Dimension::ALL
        .into_iter()
        .filter_map(|dimension| {
            dims_source
                .get(dimension.as_str())
                .and_then(number)
                .map(|n| (dimension, n.round().max(0.0) as u32))
        })
        .collect();
    let dimension_breakdown = weights.apply(&raw);

    let meta_score = match json.get("meta_score").and_then(number) {
        Some(score) => clamp_score(score),
        None if !dimension_breakdown.is_empty() => {
            clamp_score(f64::from(dimension_breakdown.values().sum::<u32>()))
        }
        None => return Err(Error::parse("meta-critique reply has no meta_score")),
    };

    Ok(MetaCritiqueResult {
        meta_score,
        dimension_breakdown,
        feedback: meta_feedback(&json),
    })
}

/// Analysis plus suggestions, in the order a refiner should read them
fn meta_feedback(json: &Map<String, Value>) -> String {
    let sections = [
        ("meta_critique", None),
        ("improvement_suggestions", Some("Improvement suggestions")),
        ("identified_issues", Some("Real issues identified")),
        ("critique_accuracy", Some("Critique accuracy")),
    ];

    sections
        .iter()
        .filter_map(|(key, heading)| {
            let body = text(json.get(*key)?);
            if body.trim().is_empty() {
                return None;
            }
            Some(match heading {
                Some(heading) => format!("{heading}:\n{body}"),
                None => body,
            })
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches("/100").trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| format!("- {}", text(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("```\nplain\n```"), "plain");
        assert_eq!(strip_code_fences("  no fence  "), "no fence");
    }

    #[test]
    fn test_parse_critique_json_in_prose() {
        let reply = "Here is my evaluation:\n{\"score\": 82, \"critique\": \"Needs numbers.\", \
                     \"dimension_scores\": {\"clarity\": 20, \"depth\": \"15\"}}\nThanks!";
        let verdict = parse_critique(reply).unwrap();
        assert_eq!(verdict.score, 82);
        assert_eq!(verdict.critique_text, "Needs numbers.");
        assert_eq!(verdict.dimension_breakdown["depth"], 15);
    }

    #[test]
    fn test_parse_critique_clamps() {
        assert_eq!(parse_critique(r#"{"score": 140, "critique": "x"}"#).unwrap().score, 100);
        assert_eq!(parse_critique(r#"{"score": 0, "critique": "x"}"#).unwrap().score, 1);
        assert_eq!(parse_critique(r#"{"score": 87.6, "critique": "x"}"#).unwrap().score, 88);
    }

    #[test]
    fn test_parse_critique_falls_back_to_text() {
        let verdict = parse_critique("Overall this earns 72/100. Tighten the intro.").unwrap();
        assert_eq!(verdict.score, 72);
        assert!(verdict.critique_text.contains("Tighten the intro"));

        assert_eq!(parse_critique("Score: 64\nGood").unwrap().score, 64);
    }

    #[test]
    fn test_parse_critique_without_score_is_an_error() {
        assert!(matches!(
            parse_critique("I liked it a lot."),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_parse_meta_critique_clamps_dimensions() {
        let reply = r#"```json
        {
            "meta_score": 78,
            "dimension_scores": {
                "issue_identification": 40,
                "scoring_calibration": 15,
                "actionability": 20,
                "comprehensiveness": 10,
                "consistency": 12
            },
            "meta_critique": "Scores run high.",
            "improvement_suggestions": ["Add a rubric", "Cite evidence"]
        }
        ```"#;
        let verdict = parse_meta_critique(reply, &MetaWeights::default()).unwrap();

        assert_eq!(verdict.meta_score, 78);
        assert_eq!(verdict.dimension_breakdown[&Dimension::IssueIdentification], 25);
        assert!(verdict.feedback.starts_with("Scores run high."));
        assert!(verdict.feedback.contains("- Add a rubric"));
    }

    #[test]
    fn test_parse_meta_critique_sums_missing_score() {
        let reply = r#"{"issue_identification": 20, "scoring_calibration": 18,
                        "actionability": 22, "comprehensiveness": 10, "consistency": 30}"#;
        let verdict = parse_meta_critique(reply, &MetaWeights::default()).unwrap();
        // consistency is capped at 15
        assert_eq!(verdict.meta_score, 85);
    }

    #[test]
    fn test_parse_meta_critique_requires_a_score() {
        assert!(parse_meta_critique(r#"{"meta_critique": "fine"}"#, &MetaWeights::default()).is_err());
        assert!(parse_meta_critique("not json", &MetaWeights::default()).is_err());
    }
}
