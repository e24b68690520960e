//! Anthropic Messages API client implementing every collaborator role

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::parse::{parse_critique, parse_meta_critique};
use super::templates::{PromptTemplates, FALLBACK_SYSTEM_PROMPT, STRICT_JSON_REMINDER};
use super::{Critic, CritiqueResult, MetaCritic, MetaCritiqueResult, Refiner, Responder};
use crate::config::{ModelSettings, OptimizerConfig};
use crate::optimizer::prompt::PromptRole;
use crate::optimizer::records::{EvaluationRecord, MetaWeights};
use crate::{Error, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API request
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

impl Message {
    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

// Internal API response structures
#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<Content>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: usize,
    output_tokens: usize,
}

pub struct AnthropicProvider {
    client: Client,
    api_url: String,
    api_key: String,
    max_tokens: u32,
    models: ModelSettings,
    weights: MetaWeights,
    templates: PromptTemplates,
}

impl AnthropicProvider {
    /// Build a client from the configuration, reading the key from
    /// `provider.api_key` or `ANTHROPIC_API_KEY`
    pub fn new(config: &OptimizerConfig) -> Result<Self> {
        Self::with_api_key(config, config.provider.effective_api_key())
    }

    pub fn with_api_key(config: &OptimizerConfig, api_key: Option<String>) -> Result<Self> {
        let api_key = api_key.ok_or_else(|| {
            Error::config("No API key: set ANTHROPIC_API_KEY or provider.api_key")
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.provider.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.provider.api_url.clone(),
            api_key,
            max_tokens: config.provider.max_tokens,
            models: config.models.clone(),
            weights: config.meta_evaluation_weights,
            templates: PromptTemplates::new()?,
        })
    }

    /// One tiny request to confirm the key and endpoint work
    pub async fn ping(&self) -> Result<String> {
        self.complete(
            &self.models.generation,
            FALLBACK_SYSTEM_PROMPT,
            vec![Message::user("Reply with the single word: ready")],
        )
        .await
    }

    /// Make a single API request and return the concatenated text blocks
    async fn complete(&self, model: &str, system: &str, messages: Vec<Message>) -> Result<String> {
        let request = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            system: if system.trim().is_empty() {
                FALLBACK_SYSTEM_PROMPT
            } else {
                system
            },
            messages,
        };

        let response = self
            .client
            .post(self.api_url.as_str())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let api_response: ApiResponse = response.json().await?;
        if let Some(usage) = &api_response.usage {
            debug!(
                "{model}: {} input / {} output tokens",
                usage.input_tokens, usage.output_tokens
            );
        }

        let text = api_response
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string();

        if text.is_empty() {
            return Err(Error::transient(format!("{model} returned an empty reply")));
        }
        Ok(text)
    }

    /// Request a structured reply, re-prompting once with a stricter
    /// instruction when the first reply does not parse
    async fn complete_structured<T, F>(
        &self,
        model: &str,
        system: &str,
        input: String,
        parse: F,
    ) -> Result<T>
    where
        F: Fn(&str) -> Result<T>,
    {
        with_strict_reprompt(
            model,
            input,
            |messages| self.complete(model, system, messages),
            parse,
        )
        .await
    }
}

/// Run one exchange through `complete` and parse the reply.
///
/// A parse failure earns exactly one follow-up turn carrying the rejected
/// reply and [`STRICT_JSON_REMINDER`]. A second parse failure is returned
/// as-is. Provider errors are never re-prompted.
async fn with_strict_reprompt<T, C, Fut, P>(
    model: &str,
    input: String,
    mut complete: C,
    parse: P,
) -> Result<T>
where
    C: FnMut(Vec<Message>) -> Fut,
    Fut: Future<Output = Result<String>>,
    P: Fn(&str) -> Result<T>,
{
    let first = Message::user(input);
    let reply = complete(vec![first.clone()]).await?;

    match parse(&reply) {
        Err(Error::Parse(reason)) => {
            warn!("Unparseable reply from {model} ({reason}), asking again for strict JSON");
            let retry = vec![
                first,
                Message::assistant(reply),
                Message::user(STRICT_JSON_REMINDER),
            ];
            let strict = complete(retry).await?;
            parse(&strict)
        }
        other => other,
    }
}

/// Map a non-success status to a provider error
fn classify_status(status: StatusCode, body: &str) -> Error {
    let detail = body.chars().take(300).collect::<String>();
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::transient(format!("Rate limit exceeded (429): {detail}")),
        StatusCode::UNAUTHORIZED => Error::permanent("Invalid API key (401)"),
        StatusCode::FORBIDDEN => Error::permanent(format!("Access denied (403): {detail}")),
        StatusCode::BAD_REQUEST => Error::permanent(format!("Bad request (400): {detail}")),
        StatusCode::REQUEST_TIMEOUT => Error::transient(format!("Request timeout (408): {detail}")),
        // includes 529 "overloaded"
        s if s.is_server_error() => {
            Error::transient(format!("API error {s}: {detail}"))
        }
        s => Error::permanent(format!("API error {s}: {detail}")),
    }
}

#[async_trait]
impl Responder for AnthropicProvider {
    async fn respond(&self, system_prompt: &str, task: &str) -> Result<String> {
        self.complete(
            &self.models.generation,
            system_prompt,
            vec![Message::user(task)],
        )
        .await
    }
}

#[async_trait]
impl Critic for AnthropicProvider {
    async fn critique(
        &self,
        critique_prompt: &str,
        system_prompt: &str,
        task: &str,
        output: &str,
    ) -> Result<CritiqueResult> {
        let input = self.templates.critique_input(task, system_prompt, output)?;
        self.complete_structured(&self.models.critique, critique_prompt, input, parse_critique)
            .await
    }
}

#[async_trait]
impl MetaCritic for AnthropicProvider {
    async fn meta_critique(
        &self,
        critique_prompt: &str,
        sample: &[EvaluationRecord],
    ) -> Result<MetaCritiqueResult> {
        let instructions = self.templates.meta_critic_instructions(&self.weights)?;
        let input = self.templates.meta_critic_input(critique_prompt, sample)?;
        let weights = self.weights;
        self.complete_structured(
            &self.models.critique_refinement,
            &instructions,
            input,
            move |reply| parse_meta_critique(reply, &weights),
        )
        .await
    }
}

#[async_trait]
impl Refiner for AnthropicProvider {
    async fn refine(&self, role: PromptRole, prompt_text: &str, feedback: &str) -> Result<String> {
        let model = match role {
            PromptRole::System => &self.models.refinement,
            PromptRole::Critique => &self.models.critique_refinement,
        };
        let input = self.templates.refiner_input(role, prompt_text, feedback)?;
        self.complete(
            model,
            self.templates.refiner_instructions(role),
            vec![Message::user(input)],
        )
        .await
    }
}
