use handlebars::Handlebars;
use serde::Serialize;

use super::{dialogue::DialogueNode, expression::ExpressionLabel};

const TEMPLATE_NAME: &str = "npc_line";

/// Default prompt. Rendered with Handlebars, HTML escaping disabled.
pub const DEFAULT_TEMPLATE: &str = "\
You are {{name}}, a {{role}} in a cozy farming village game.
Stay in character. Answer with one or two short sentences that are friendly and suitable for all ages.
Do not add stage directions, quotes or a speaker name.

{{#if situation}}Player situation: {{situation}}
{{/if}}Player's current emotion: {{emotion}}
Emotional guidance: {{guidance}}
{{#if history}}
Earlier in this conversation you said:
{{#each history}}- {{this}}
{{/each}}{{/if}}
Your scripted line for this moment is:
\"{{line}}\"

Rewrite the scripted line in your own words so that it clearly reflects the player's {{emotion}} state. \
Keep its meaning, because the player's answers were written for it.

Line:";

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("invalid prompt template: {0}")]
    Template(String),
    #[error("prompt render failed: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// Who the NPC is. Fixed for the lifetime of a builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    pub role: String,
    pub situation: Option<String>,
}

/// Everything a prompt is built from, besides the persona.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub line: String,
    pub label: ExpressionLabel,
    pub history: Vec<String>,
}

#[derive(Serialize)]
struct PromptData<'a> {
    name: &'a str,
    role: &'a str,
    situation: Option<&'a str>,
    emotion: &'a str,
    guidance: &'a str,
    line: &'a str,
    history: &'a [String],
}

pub fn emotion_guidance(label: ExpressionLabel) -> &'static str {
    match label {
        ExpressionLabel::Happy => {
            "The player seems cheerful and upbeat. Match their positive energy and share in their good mood."
        }
        ExpressionLabel::Sad => {
            "The player appears down or disappointed. Be comforting, encouraging, and offer gentle support."
        }
        ExpressionLabel::Angry => {
            "The player seems frustrated or upset. Be calming, understanding, and help them feel better."
        }
        ExpressionLabel::Surprised => {
            "The player looks amazed or shocked. Share in their wonder and excitement about what's happening."
        }
        ExpressionLabel::Fearful => {
            "The player appears worried or anxious. Be reassuring, supportive, and help them feel safe."
        }
        ExpressionLabel::Neutral => {
            "The player seems calm and focused. Be friendly and helpful in a straightforward way."
        }
        ExpressionLabel::Unknown => {
            "You cannot tell how the player feels. Be warm and friendly without guessing their mood."
        }
    }
}

pub struct PromptBuilder {
    persona: Persona,
    registry: Handlebars<'static>,
}

impl PromptBuilder {
    pub fn new(persona: Persona, template: Option<&str>) -> Result<Self, PromptError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry.register_escape_fn(handlebars::no_escape);
        registry
            .register_template_string(TEMPLATE_NAME, template.unwrap_or(DEFAULT_TEMPLATE))
            .map_err(|e| PromptError::Template(e.to_string()))?;

        // Render once with sample data so a template that names an unknown
        // field fails at load time instead of during play.
        let builder = Self { persona, registry };
        builder.build_context(&PromptContext {
            line: "Hello.".to_string(),
            label: ExpressionLabel::Neutral,
            history: vec!["Welcome.".to_string()],
        })?;
        Ok(builder)
    }

    pub fn build(
        &self,
        node: &DialogueNode,
        label: ExpressionLabel,
        history: &[String],
    ) -> Result<String, PromptError> {
        self.render(&node.text, label, history)
    }

    pub fn build_context(&self, context: &PromptContext) -> Result<String, PromptError> {
        self.render(&context.line, context.label, &context.history)
    }

    fn render(
        &self,
        line: &str,
        label: ExpressionLabel,
        history: &[String],
    ) -> Result<String, PromptError> {
        let data = PromptData {
            name: &self.persona.name,
            role: &self.persona.role,
            situation: self.persona.situation.as_deref(),
            emotion: label.as_ref(),
            guidance: emotion_guidance(label),
            line,
            history,
        };
        let prompt = self.registry.render(TEMPLATE_NAME, &data)?;
        log::debug!("prompt for {}:\n{prompt}", self.persona.name);
        Ok(prompt)
    }
}
