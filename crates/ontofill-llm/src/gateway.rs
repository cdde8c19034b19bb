//! OpenAI-compatible model gateway
//!
//! One chat completions request per chunk, asking for `n` independent
//! samples. The composed prompt is `"{task_prompt}\n{chunk}"`; the system
//! instruction travels as its own message.
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ontofill_core::{
    LlmConfig, ModelGateway, NoopObserver, Observer, OntofillError, PipelineEvent, Result,
    TokenCounter,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::tokens::{available_budget, token_counter_for_model};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f32,
    n: u32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    index: usize,
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

// ============================================================================
// Gateway
// ============================================================================

/// Chat completions client that samples `n` completions per chunk
pub struct OpenAiGateway {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    system_message: String,
    task_prompt: String,
    temperature: f32,
    num_samples: u32,
    context_size: usize,
    counter: Arc<dyn TokenCounter>,
    observer: Arc<dyn Observer>,
    budget: usize,
}

impl OpenAiGateway {
    /// Create a gateway from the LLM settings and the task prompt
    pub fn from_config(config: &LlmConfig, task_prompt: impl Into<String>) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            OntofillError::ConfigError(
                "OpenAI API key required (set OPENAI_API_KEY or llm.api_key)".to_string(),
            )
        })?;

        let mut builder = Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| OntofillError::ConfigError(format!("HTTP client: {e}")))?;

        let mut gateway = Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            system_message: config.system_message.clone(),
            task_prompt: task_prompt.into(),
            temperature: config.temperature,
            num_samples: config.num_samples,
            context_size: config.context_size,
            counter: token_counter_for_model(&config.model),
            observer: Arc::new(NoopObserver),
            budget: 0,
        };
        gateway.budget = gateway.compute_budget();
        Ok(gateway)
    }

    /// Use a different token counter; the budget is recomputed with it
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self.budget = self.compute_budget();
        self
    }

    /// Report composed prompts to an observer
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn compute_budget(&self) -> usize {
        available_budget(
            self.context_size,
            &self.system_message,
            &self.task_prompt,
            self.counter.as_ref(),
        )
    }

    fn compose_prompt(&self, chunk: &str) -> String {
        format!("{}\n{}", self.task_prompt, chunk)
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: &self.system_message,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            n: self.num_samples,
        }
    }
}

impl TokenCounter for OpenAiGateway {
    fn count_tokens(&self, text: &str) -> usize {
        self.counter.count_tokens(text)
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn respond(&self, chunk: &str) -> Result<Vec<String>> {
        let prompt = self.compose_prompt(chunk);
        self.observer.notify(PipelineEvent::ModelRequest {
            prompt: prompt.clone(),
        });

        let request = self.build_request(&prompt);
        tracing::debug!(model = %self.model, n = self.num_samples, "Sending chat completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OntofillError::Gateway(format!("Request timed out: {e}"))
                } else {
                    OntofillError::Gateway(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => {
                    OntofillError::Gateway(format!("Rate limited: {error_text}"))
                }
                _ => OntofillError::Gateway(format!("API error {status}: {error_text}")),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| OntofillError::Gateway(format!("Failed to read response: {e}")))?;

        parse_samples(&body, self.num_samples as usize)
    }

    fn available_budget(&self) -> usize {
        self.budget
    }
}

/// Pull exactly `expected` sample texts, in choice order, out of a
/// chat completions response body
fn parse_samples(body: &str, expected: usize) -> Result<Vec<String>> {
    let mut response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| OntofillError::Gateway(format!("Failed to parse response: {e}")))?;

    if response.choices.len() != expected {
        return Err(OntofillError::Gateway(format!(
            "Expected {expected} completions, got {}",
            response.choices.len()
        )));
    }

    response.choices.sort_by_key(|c| c.index);
    Ok(response
        .choices
        .into_iter()
        .map(|c| c.message.content.unwrap_or_default())
        .collect())
}

// ============================================================================
// Tests
// ============================================================================
