//! Provider fallback client.
//!
//! [`FallbackClient`] hides one or two hosted model backends behind the
//! [`CompletionModel`] contract. Each call walks the configured chain in order
//! and returns the first success; provider errors are logged and the next
//! entry is tried.

pub mod anthropic;
pub mod openai;
pub mod sse;

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::{Client, Response};
use tracing::{debug, instrument, warn};

use crate::core::types::Message;
use crate::io::config::{LlmConfig, ProviderKind};

use self::anthropic::AnthropicApi;
use self::openai::OpenAiApi;

/// Lazy, finite, non-restartable sequence of text fragments.
pub type TextStream = Box<dyn Iterator<Item = Result<String>> + Send>;

/// One completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Message],
    pub system: Option<&'a str>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl<'a> CompletionRequest<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        Self {
            messages,
            system: None,
            max_tokens: 8192,
            temperature: 0.2,
        }
    }

    pub fn with_system(mut self, system: &'a str) -> Self {
        self.system = Some(system);
        self
    }
}

/// Text in, text out. Implemented by [`FallbackClient`] and by test doubles.
pub trait CompletionModel: Send + Sync {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String>;

    fn stream(&self, request: &CompletionRequest<'_>) -> Result<TextStream>;
}

/// Where a provider lives and how to authenticate to it.
///
/// The HTTP connection is built on first use and then reused for every call.
#[derive(Debug)]
pub(crate) struct Endpoint {
    base_url: String,
    api_key_env: String,
    timeout: Duration,
    conn: OnceLock<Connection>,
}

#[derive(Debug)]
pub(crate) struct Connection {
    pub http: Client,
    pub api_key: String,
}

impl Endpoint {
    pub(crate) fn new(base_url: &str, api_key_env: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key_env: api_key_env.to_string(),
            timeout,
            conn: OnceLock::new(),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.conn.get().is_some()
    }

    /// The shared connection, opened on first use. A missing key is not cached.
    pub(crate) fn connection(&self) -> Result<&Connection> {
        if let Some(conn) = self.conn.get() {
            return Ok(conn);
        }
        let api_key = std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("{} is not set", self.api_key_env))?;
        let http = http_client(self.timeout, &self.base_url)?;
        debug!(base_url = %self.base_url, "opened provider connection");
        Ok(self.conn.get_or_init(|| Connection { http, api_key }))
    }
}

pub(crate) fn is_loopback_base_url(base_url: &str) -> bool {
    base_url.contains("://127.0.0.1")
        || base_url.contains("://localhost")
        || base_url.contains("://[::1]")
}

pub(crate) fn http_client(timeout: Duration, base_url: &str) -> Result<Client> {
    let mut builder = Client::builder().timeout(timeout.max(Duration::from_secs(1)));
    if is_loopback_base_url(base_url) {
        builder = builder.no_proxy();
    }
    builder.build().context("build provider HTTP client")
}

/// Fail with status and a short body excerpt unless the response is a success.
pub(crate) fn ensure_success(response: Response, provider: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(anyhow!(
        "{provider} API request failed: HTTP {status} {}",
        crate::core::text::truncate_chars(body.trim(), 300)
    ))
}

#[derive(Debug)]
enum Backend {
    Anthropic(AnthropicApi),
    OpenAi(OpenAiApi),
}

/// One `(provider, model)` pair of the fallback chain.
#[derive(Debug)]
pub struct ProviderEntry {
    kind: ProviderKind,
    model: String,
    backend: Backend,
}

impl ProviderEntry {
    fn new(config: &LlmConfig, kind: ProviderKind, model: &str) -> Self {
        let endpoint = Endpoint::new(
            config.base_url(kind),
            config.api_key_env(kind),
            Duration::from_secs(config.request_timeout_secs),
        );
        let backend = match kind {
            ProviderKind::Anthropic => Backend::Anthropic(AnthropicApi::new(endpoint)),
            ProviderKind::OpenAi => Backend::OpenAi(OpenAiApi::new(endpoint)),
        };
        Self {
            kind,
            model: model.to_string(),
            backend,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_connected(&self) -> bool {
        match &self.backend {
            Backend::Anthropic(api) => api.endpoint().is_connected(),
            Backend::OpenAi(api) => api.endpoint().is_connected(),
        }
    }

    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        match &self.backend {
            Backend::Anthropic(api) => api.complete(&self.model, request),
            Backend::OpenAi(api) => api.complete(&self.model, request),
        }
    }

    fn stream(&self, request: &CompletionRequest<'_>) -> Result<TextStream> {
        match &self.backend {
            Backend::Anthropic(api) => api.stream(&self.model, request),
            Backend::OpenAi(api) => api.stream(&self.model, request),
        }
    }
}

/// Ordered provider chain: primary, then the optional fallback.
#[derive(Debug)]
pub struct FallbackClient {
    chain: Vec<ProviderEntry>,
}

impl FallbackClient {
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut chain = vec![ProviderEntry::new(config, config.provider, &config.model)];
        if let Some((kind, model)) = config.fallback() {
            chain.push(ProviderEntry::new(config, kind, model));
        }
        Self { chain }
    }

    pub fn chain(&self) -> &[ProviderEntry] {
        &self.chain
    }

    fn try_each<T>(
        &self,
        op: &str,
        mut call: impl FnMut(&ProviderEntry) -> Result<T>,
    ) -> Result<T> {
        let mut last_error = None;
        for entry in &self.chain {
            match call(entry) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        provider = %entry.kind,
                        model = %entry.model,
                        err = %format!("{err:#}"),
                        "{op} failed, trying next provider"
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("no LLM provider available")))
    }
}

impl CompletionModel for FallbackClient {
    #[instrument(skip_all, fields(messages = request.messages.len()))]
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
        self.try_each("completion", |entry| entry.complete(request))
    }

    #[instrument(skip_all, fields(messages = request.messages.len()))]
    fn stream(&self, request: &CompletionRequest<'_>) -> Result<TextStream> {
        self.try_each("stream", |entry| entry.stream(request))
    }
}
