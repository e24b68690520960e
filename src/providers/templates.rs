//! Default instructions for the LLM roles
//!
//! Templates live in `prompts/` and are compiled into the binary. Only the
//! meta-critic instructions and the call inputs take variables; the refiner
//! instructions are static.

use serde::Serialize;
use tera::{Context, Tera};

use crate::optimizer::prompt::PromptRole;
use crate::optimizer::records::{EvaluationRecord, MetaWeights};
use crate::Result;

const META_CRITIC: &str = include_str!("../../prompts/meta_critic.md");
const META_CRITIC_INPUT: &str = include_str!("../../prompts/meta_critic_input.md");
const CRITIQUE_INPUT: &str = include_str!("../../prompts/critique_input.md");
const REFINE_INPUT: &str = include_str!("../../prompts/refine_input.md");
const REFINE_SYSTEM: &str = include_str!("../../prompts/refine_system.md");
const REFINE_CRITIQUE: &str = include_str!("../../prompts/refine_critique.md");

/// Follow-up sent when a structured reply could not be parsed
pub const STRICT_JSON_REMINDER: &str = include_str!("../../prompts/strict_json.md");

/// System prompt used for the responder when none is given
pub const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

#[derive(Serialize)]
struct DimensionView {
    key: &'static str,
    title: &'static str,
    weight: u32,
}

pub struct PromptTemplates {
    tera: Tera,
}

impl PromptTemplates {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]); // prompts are plain text
        tera.add_raw_templates(vec![
            ("meta_critic", META_CRITIC),
            ("meta_critic_input", META_CRITIC_INPUT),
            ("critique_input", CRITIQUE_INPUT),
            ("refine_input", REFINE_INPUT),
        ])?;
        Ok(Self { tera })
    }

    /// Meta-critic instructions with the configured point budget per dimension
    pub fn meta_critic_instructions(&self, weights: &MetaWeights) -> Result<String> {
        let dimensions: Vec<DimensionView> = weights
            .iter()
            .map(|(dimension, weight)| DimensionView {
                key: dimension.as_str(),
                title: dimension.title(),
                weight,
            })
            .collect();

        let mut context = Context::new();
        context.insert("dimensions", &dimensions);
        Ok(self.tera.render("meta_critic", &context)?)
    }

    pub fn meta_critic_input(
        &self,
        critique_prompt: &str,
        sample: &[EvaluationRecord],
    ) -> Result<String> {
        let mut context = Context::new();
        context.insert("critique_prompt", critique_prompt);
        context.insert("sample", sample);
        Ok(self.tera.render("meta_critic_input", &context)?)
    }

    pub fn critique_input(&self, task: &str, system_prompt: &str, output: &str) -> Result<String> {
        let mut context = Context::new();
        context.insert("task", task);
        context.insert("system_prompt", system_prompt);
        context.insert("output", output);
        Ok(self.tera.render("critique_input", &context)?)
    }

    pub fn refiner_instructions(&self, role: PromptRole) -> &'static str {
        match role {
            PromptRole::System => REFINE_SYSTEM,
            PromptRole::Critique => REFINE_CRITIQUE,
        }
    }

    pub fn refiner_input(&self, role: PromptRole, prompt: &str, feedback: &str) -> Result<String> {
        let (label, feedback_label) = match role {
            PromptRole::System => ("SYSTEM PROMPT", "CRITIQUE TO ADDRESS"),
            PromptRole::Critique => ("CRITIQUE PROMPT", "META-EVALUATION FEEDBACK"),
        };

        let mut context = Context::new();
        context.insert("label", label);
        context.insert("feedback_label", feedback_label);
        context.insert("prompt", prompt);
        context.insert("feedback", feedback);
        Ok(self.tera.render("refine_input", &context)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::evaluation;

    #[test]
    fn test_meta_critic_instructions_embed_weights() {
        let templates = PromptTemplates::new().unwrap();
        let weights = MetaWeights {
            issue_identification: 40,
            scoring_calibration: 15,
            actionability: 15,
            comprehensiveness: 15,
            consistency: 15,
        };
        let text = templates.meta_critic_instructions(&weights).unwrap();

        assert!(text.contains("**Issue Identification Accuracy** (40 points)"));
        assert!(text.contains("\"issue_identification\": <0-40>"));
        assert!(text.contains("\"consistency\": <0-15> }"));
    }

    #[test]
    fn test_meta_critic_input_lists_sample() {
        let templates = PromptTemplates::new().unwrap();
        let sample = vec![evaluation(2, 61), evaluation(3, 67)];
        let text = templates.meta_critic_input("Grade it.", &sample).unwrap();

        assert!(text.contains("--- Iteration 2 ---"));
        assert!(text.contains("Score: 67"));
        assert!(text.starts_with("CRITIQUE PROMPT BEING EVALUATED:\nGrade it."));
    }

    #[test]
    fn test_prompt_text_is_not_interpreted() {
        let templates = PromptTemplates::new().unwrap();
        let text = templates
            .refiner_input(PromptRole::Critique, "Use {{ braces }} & <tags>", "ok")
            .unwrap();
        assert!(text.contains("CURRENT CRITIQUE PROMPT:\nUse {{ braces }} & <tags>"));
        assert!(text.contains("META-EVALUATION FEEDBACK:\nok"));
    }
}
