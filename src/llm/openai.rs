use std::{path::Path, time::Duration};

use anyhow::Context;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{Content, GenerateError, GeneratedLine, TextGenerator};

pub const SYSTEM_PROMPT: &str = "You are a helpful NPC in a farming simulation game. \
Keep responses brief, friendly, and appropriate for all ages.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub base_url: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(rename = "OPENAI_API_KEY")]
    api_key: Option<String>,
    base_url: Option<String>,
}

impl Credentials {
    /// Key from `key_env` first, then from the JSON credentials file.
    ///
    /// `Ok(None)` means no key is configured and the game should stay on
    /// scripted lines.
    pub fn resolve(
        key_env: &str,
        default_base_url: &str,
        file: Option<&Path>,
    ) -> anyhow::Result<Option<Self>> {
        if let Ok(api_key) = std::env::var(key_env) {
            if !api_key.trim().is_empty() {
                return Ok(Some(Self {
                    api_key,
                    base_url: default_base_url.to_string(),
                }));
            }
        }

        let Some(path) = file else {
            return Ok(None);
        };
        if !path.exists() {
            log::warn!("credentials file `{}` not found", path.display());
            return Ok(None);
        }

        let source = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read credentials `{}`", path.display()))?;
        let file: CredentialsFile = serde_json::from_str(&source)
            .with_context(|| format!("invalid JSON in credentials `{}`", path.display()))?;

        match file.api_key {
            Some(api_key) if !api_key.trim().is_empty() => Ok(Some(Self {
                api_key,
                base_url: file.base_url.unwrap_or_else(|| default_base_url.to_string()),
            })),
            _ => {
                log::warn!("credentials `{}` have no OPENAI_API_KEY", path.display());
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: "llama-3.1-8b-instruct".to_string(),
            max_tokens: 100,
            temperature: 0.8,
        }
    }
}

/// Client for any OpenAI compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    client: reqwest::blocking::Client,
    credentials: Credentials,
    options: ChatOptions,
}

impl OpenAiClient {
    pub fn new(credentials: Credentials, options: ChatOptions) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            credentials,
            options,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.credentials.base_url.trim_end_matches('/')
        )
    }
}

impl TextGenerator for OpenAiClient {
    fn generate(&mut self, prompt: &str, timeout: Duration) -> Result<GeneratedLine, GenerateError> {
        let messages = [Content::system(SYSTEM_PROMPT), Content::user(prompt)];
        let body = serde_json::json!({
            "model": self.options.model,
            "messages": messages,
            "max_tokens": self.options.max_tokens,
            "temperature": self.options.temperature,
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.credentials.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(|e| transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let text = response.text().map_err(|e| transport_error(e, timeout))?;
        parse_completion(&text)
    }

    fn name(&self) -> &str {
        &self.options.model
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> GenerateError {
    if err.is_timeout() {
        GenerateError::Timeout(timeout)
    } else if err.is_decode() {
        GenerateError::MalformedResponse(err.to_string())
    } else {
        GenerateError::ServiceUnavailable(err.to_string())
    }
}

pub fn status_error(status: StatusCode) -> GenerateError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => GenerateError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            GenerateError::ServiceUnavailable(format!("upstream timeout ({status})"))
        }
        status => GenerateError::ServiceUnavailable(format!("HTTP {status}")),
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Extract the NPC line from a chat-completions response body.
///
/// The content is taken as plain text, unless it is a JSON object carrying a
/// `text` or `line` field.
pub fn parse_completion(body: &str) -> Result<GeneratedLine, GenerateError> {
    let completion: Completion =
        serde_json::from_str(body).map_err(|e| GenerateError::MalformedResponse(e.to_string()))?;

    let content = completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .ok_or_else(|| GenerateError::MalformedResponse("no message content".to_string()))?;

    let content = content.trim();
    let text = match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(object)) => object
            .get("text")
            .or_else(|| object.get("line"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                GenerateError::MalformedResponse("JSON content without `text`".to_string())
            })?,
        _ => content.to_string(),
    };

    let text = strip_quotes(text.trim());
    if text.is_empty() {
        return Err(GenerateError::MalformedResponse("empty line".to_string()));
    }
    Ok(GeneratedLine::new(text))
}

fn strip_quotes(text: &str) -> &str {
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}')] {
        if let Some(inner) = text.strip_prefix(open).and_then(|t| t.strip_suffix(close)) {
            return inner.trim();
        }
    }
    text
}
