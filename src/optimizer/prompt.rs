use serde::{Deserialize, Serialize};
use std::fmt;

/// Which of the two co-evolving prompts a track holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    Critique,
}

impl fmt::Display for PromptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::Critique => write!(f, "critique"),
        }
    }
}

/// A single version of a prompt together with the verdict it earned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptCandidate {
    pub text: String,
    pub score: Option<u32>,
    pub critique: Option<String>,
    /// Iteration that produced this text (0 for the initial prompt)
    pub iteration: u32,
}

impl PromptCandidate {
    pub fn new(text: impl Into<String>, iteration: u32) -> Self {
        Self {
            text: text.into(),
            score: None,
            critique: None,
            iteration,
        }
    }

    /// True when `score` beats this candidate's score. Unscored loses to anything.
    pub fn is_beaten_by(&self, score: u32) -> bool {
        match self.score {
            Some(current) => score > current,
            None => true,
        }
    }
}

/// One optimization track: the live candidate plus every candidate it replaced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolvingPrompt {
    pub role: PromptRole,
    pub current: PromptCandidate,
    pub history: Vec<PromptCandidate>,
}

impl EvolvingPrompt {
    pub fn new(role: PromptRole, initial_text: impl Into<String>) -> Self {
        Self {
            role,
            current: PromptCandidate::new(initial_text, 0),
            history: Vec::new(),
        }
    }

    /// Attach a verdict to the live candidate
    pub fn record_verdict(&mut self, score: u32, critique: impl Into<String>) {
        self.current.score = Some(score);
        self.current.critique = Some(critique.into());
    }

    /// Replace the live candidate, retiring the old one into history
    pub fn replace(&mut self, text: impl Into<String>, iteration: u32) -> &PromptCandidate {
        let next = PromptCandidate::new(text, iteration);
        let previous = std::mem::replace(&mut self.current, next);
        self.history.push(previous);
        &self.current
    }

    /// Zero-based revision number of the live candidate
    pub fn revision(&self) -> usize {
        self.history.len()
    }

    /// Iteration of the most recent replacement, if any happened
    pub fn last_replaced_at(&self) -> Option<u32> {
        if self.history.is_empty() {
            None
        } else {
            Some(self.current.iteration)
        }
    }
}
