//! Model agents: the network boundary between the refinement loop and LLM backends.
//!
//! All roles (attacker, target, refiner, guard) share one capability contract.
//! Failures never cross this boundary as errors: [`Agent::probe`] answers with a
//! plain `bool` and [`Agent::generate`] answers with an empty string, which every
//! caller treats as "no usable output".

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Short timeout for the reachability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Long timeout for generation calls; large local models are slow.
const GENERATE_TIMEOUT: Duration = Duration::from_secs(180);

/// Sampling options forwarded verbatim to the backend with every request.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub num_predict: u32,
}

impl Default for GenerationOptions {
    /// Creative sampling, used for attacker, refiner and target models.
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.9,
            num_predict: 2048,
        }
    }
}

impl GenerationOptions {
    /// Deterministic sampling for guard/classifier models. With temperature 0
    /// the nucleus threshold does not matter, but the backend expects it.
    pub fn deterministic() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.9,
            num_predict: 2048,
        }
    }
}

/// A model endpoint that can be probed and prompted.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Model identifier, used in reports and log lines.
    fn model_name(&self) -> &str;

    /// Lightweight reachability check. Returns `false` on any network error
    /// or non-success status; never fails.
    async fn probe(&self) -> bool;

    /// Sends a prompt and returns the trimmed response text.
    ///
    /// Returns an empty string on any failure (network error, bad status,
    /// malformed body). Callers must treat an empty string as "no usable
    /// output", never as a valid empty response. No retries happen here;
    /// retry policy belongs to the caller.
    async fn generate(&self, prompt: &str) -> String;
}

/// An agent speaking the Ollama generate protocol.
pub struct OllamaAgent {
    http: reqwest::Client,
    base_url: String,
    model: String,
    options: GenerationOptions,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: &'a GenerationOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaAgent {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        options: GenerationOptions,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            options,
        }
    }
}

#[async_trait]
impl Agent for OllamaAgent {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn probe(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.http.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn generate(&self, prompt: &str) -> String {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: &self.options,
        };

        let response = match self
            .http
            .post(&url)
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(_) => return String::new(),
        };

        if !response.status().is_success() {
            return String::new();
        }

        match response.json::<GenerateResponse>().await {
            Ok(body) => body.response.trim().to_string(),
            Err(_) => String::new(),
        }
    }
}

/// An agent backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiAgent {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiAgent {
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    /// Points the agent at a custom base URL. Used for mocking and for
    /// non-OpenAI endpoints that speak the same protocol.
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl Agent for OpenAiAgent {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn probe(&self) -> bool {
        self.client.models().list().await.is_ok()
    }

    async fn generate(&self, prompt: &str) -> String {
        let user_msg = match ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
        {
            Ok(m) => ChatCompletionRequestMessage::User(m),
            Err(_) => return String::new(),
        };

        let request = match CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![user_msg])
            .build()
        {
            Ok(r) => r,
            Err(_) => return String::new(),
        };

        match self.client.chat().create(request).await {
            Ok(response) => response
                .choices
                .first()
                .and_then(|c| c.message.content.clone())
                .unwrap_or_default()
                .trim()
                .to_string(),
            Err(_) => String::new(),
        }
    }
}

/// A leaky-bucket pacer shared across concurrent goal workers.
///
/// Backend calls are spaced at least `min_interval` apart regardless of how
/// many sessions run in parallel. This replaces a per-loop sleep as the
/// politeness throttle toward the backend.
pub struct Pacer {
    min_interval: Duration,
    next_slot: Mutex<Instant>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    async fn wait(&self) {
        let deadline = {
            let mut slot = self.next_slot.lock().await;
            let deadline = (*slot).max(Instant::now());
            *slot = deadline + self.min_interval;
            deadline
        };
        tokio::time::sleep_until(deadline).await;
    }
}

/// Decorates an agent so that every generation call first claims a slot from
/// a shared [`Pacer`]. Probes are not paced.
pub struct PacedAgent {
    inner: Arc<dyn Agent>,
    pacer: Arc<Pacer>,
}

impl PacedAgent {
    pub fn new(inner: Arc<dyn Agent>, pacer: Arc<Pacer>) -> Self {
        Self { inner, pacer }
    }
}

#[async_trait]
impl Agent for PacedAgent {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn probe(&self) -> bool {
        self.inner.probe().await
    }

    async fn generate(&self, prompt: &str) -> String {
        self.pacer.wait().await;
        self.inner.generate(prompt).await
    }
}
