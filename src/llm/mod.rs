use std::time::Duration;

pub mod openai;
pub mod worker;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "user")]
    User,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Content {
    pub role: Role,
    #[serde(rename = "content")]
    pub message: String,
}

impl Content {
    pub fn system(message: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            message: message.into(),
        }
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            message: message.into(),
        }
    }
}

/// A line written by the model for the NPC to say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedLine(String);

impl GeneratedLine {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

pub trait TextGenerator: Send {
    fn generate(&mut self, prompt: &str, timeout: Duration) -> Result<GeneratedLine, GenerateError>;

    fn name(&self) -> &str;
}
