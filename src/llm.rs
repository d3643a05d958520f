use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    #[default]
    OpenAi,
    OpenRouter,
}

impl Provider {
    fn default_key_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    fn default_url(&self) -> &'static str {
        match self {
            Self::Anthropic => ANTHROPIC_URL,
            Self::OpenAi => OPENAI_URL,
            Self::OpenRouter => OPENROUTER_URL,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::OpenRouter => write!(f, "openrouter"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(Error::config(format!("unknown llm provider '{other}'"))),
        }
    }
}

/// Opaque text generation, mocked in tests.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

pub struct LlmClient {
    provider: Provider,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    url: String,
    http: HttpClient,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl LlmClient {
    /// `Ok(None)` when the provider's API key is not set, so callers can skip
    /// generation instead of failing.
    pub fn from_config(cfg: &LlmConfig, http: HttpClient) -> Result<Option<Self>> {
        let key_env = cfg
            .api_key_env
            .clone()
            .unwrap_or_else(|| cfg.provider.default_key_env().to_string());
        let api_key = match std::env::var(&key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => {
                debug!(env = %key_env, "no llm api key configured");
                return Ok(None);
            }
        };
        if cfg.model.trim().is_empty() {
            return Err(Error::config("llm.model must not be empty"));
        }
        Ok(Some(Self {
            provider: cfg.provider,
            api_key,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
            url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| cfg.provider.default_url().to_string()),
            http,
        }))
    }

    fn request_body(&self, system: &str, prompt: &str) -> Result<String> {
        let body = match self.provider {
            Provider::Anthropic => serde_json::to_string(&AnthropicRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                system,
                messages: vec![Message {
                    role: "user",
                    content: prompt,
                }],
            }),
            Provider::OpenAi | Provider::OpenRouter => serde_json::to_string(&ChatRequest {
                model: &self.model,
                max_tokens: self.max_tokens,
                temperature: self.temperature,
                messages: vec![
                    Message {
                        role: "system",
                        content: system,
                    },
                    Message {
                        role: "user",
                        content: prompt,
                    },
                ],
            }),
        };
        body.map_err(|e| Error::parse(format!("serialize llm request: {e}")))
    }
}

fn response_text(provider: Provider, body: &str) -> Result<String> {
    let text = match provider {
        Provider::Anthropic => {
            let resp: AnthropicResponse = serde_json::from_str(body)
                .map_err(|e| Error::parse(format!("parse anthropic response: {e}")))?;
            resp.content
                .into_iter()
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n")
        }
        Provider::OpenAi | Provider::OpenRouter => {
            let resp: ChatResponse = serde_json::from_str(body)
                .map_err(|e| Error::parse(format!("parse chat completion: {e}")))?;
            resp.choices
                .into_iter()
                .find_map(|c| c.message.content)
                .unwrap_or_default()
        }
    };
    if text.trim().is_empty() {
        return Err(Error::api("llm", "empty completion"));
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let body = self.request_body(system, prompt)?;
        let bearer = format!("Bearer {}", self.api_key);
        let headers: Vec<(&str, &str)> = match self.provider {
            Provider::Anthropic => vec![
                ("x-api-key", self.api_key.as_str()),
                ("anthropic-version", "2023-06-01"),
            ],
            Provider::OpenAi | Provider::OpenRouter => vec![("authorization", bearer.as_str())],
        };

        debug!(provider = ?self.provider, model = %self.model, "sending llm request");
        let raw = self
            .http
            .post_json_raw(&self.url, &body, &headers)
            .await
            .inspect_err(|e| warn!(error = %e, "llm request failed"))?;
        response_text(self.provider, &raw)
    }
}
