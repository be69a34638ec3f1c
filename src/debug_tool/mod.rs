use std::time::Duration;

use crate::llm::{GenerateError, GeneratedLine, TextGenerator};

/// Offline generator: the NPC says the prompt it would have sent.
///
/// Handy for tuning prompt templates in-game without an API key. `delay`
/// simulates network latency; a delay past the timeout reports `Timeout`.
pub struct EchoGenerator {
    delay: Duration,
}

impl EchoGenerator {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl TextGenerator for EchoGenerator {
    fn generate(&mut self, prompt: &str, timeout: Duration) -> Result<GeneratedLine, GenerateError> {
        if self.delay > timeout {
            std::thread::sleep(timeout);
            return Err(GenerateError::Timeout(timeout));
        }
        std::thread::sleep(self.delay);

        let text = prompt.trim();
        if text.is_empty() {
            return Err(GenerateError::MalformedResponse("empty prompt".to_string()));
        }
        Ok(GeneratedLine::new(text))
    }

    fn name(&self) -> &str {
        "echo"
    }
}
