use std::sync::Arc;

use crate::llm::{GenerateError, GeneratedLine};

use super::{
    dialogue::{DialogueError, DialogueNode, DialogueOption, DialogueStore},
    expression::ExpressionLabel,
    prompt::PromptContext,
};

/// Stamp of one visit of one node inside one session.
///
/// A generated line is only accepted for the visit it was requested for, so a
/// reply that arrives after the player moved on is never shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Visit(u64);

#[derive(Debug, Clone)]
pub struct DialogueSession {
    current: String,
    history: Vec<String>,
    visit: u64,
}

impl DialogueSession {
    fn new(entry: &str) -> Self {
        Self {
            current: entry.to_string(),
            history: Vec::new(),
            visit: 0,
        }
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    /// Node ids left so far, oldest first. Append-only.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn visit(&self) -> Visit {
        Visit(self.visit)
    }
}

/// Drives one conversation over a shared, immutable [`DialogueStore`].
#[derive(Debug, Clone)]
pub struct DialogueEngine {
    store: Arc<DialogueStore>,
    session: DialogueSession,
    generated: Option<(Visit, GeneratedLine)>,
}

impl DialogueEngine {
    pub fn start(store: Arc<DialogueStore>, entry: &str) -> Result<Self, DialogueError> {
        store.get(entry)?;
        Ok(Self {
            store,
            session: DialogueSession::new(entry),
            generated: None,
        })
    }

    pub fn session(&self) -> &DialogueSession {
        &self.session
    }

    pub fn store(&self) -> &Arc<DialogueStore> {
        &self.store
    }

    pub fn current_node(&self) -> &DialogueNode {
        // start() and choose() only ever move to ids that resolved.
        self.store
            .get(&self.session.current)
            .unwrap_or_else(|_| unreachable!("session points at a node outside its store"))
    }

    pub fn options(&self) -> &[DialogueOption] {
        &self.current_node().options
    }

    pub fn is_terminal(&self) -> bool {
        self.current_node().is_terminal()
    }

    pub fn visit(&self) -> Visit {
        self.session.visit()
    }

    /// The line to show: the generated line for this visit, or the script.
    pub fn current_line(&self) -> &str {
        match &self.generated {
            Some((visit, line)) if *visit == self.session.visit() => line.text(),
            _ => &self.current_node().text,
        }
    }

    pub fn is_generated(&self) -> bool {
        matches!(&self.generated, Some((visit, _)) if *visit == self.session.visit())
    }

    pub fn choose(&mut self, index: usize) -> Result<&DialogueNode, DialogueError> {
        let options = self.options();
        let option = options.get(index).ok_or(DialogueError::InvalidChoice {
            index,
            available: options.len(),
        })?;
        let target = option.target.clone();
        self.store.get(&target)?;

        log::info!("dialogue: {} -> {} (option {index})", self.session.current, target);

        let previous = std::mem::replace(&mut self.session.current, target);
        self.session.history.push(previous);
        self.session.visit += 1;
        self.generated = None;

        Ok(self.current_node())
    }

    /// Show `line` instead of the script, if `visit` is still the current one.
    pub fn inject(&mut self, visit: Visit, line: GeneratedLine) -> bool {
        if visit != self.session.visit() {
            log::debug!("dropping generated line for stale visit {visit:?}");
            return false;
        }
        self.generated = Some((visit, line));
        true
    }

    /// Apply the outcome of a generation request. Failures keep the script.
    pub fn apply(&mut self, visit: Visit, result: Result<GeneratedLine, GenerateError>) -> bool {
        match result {
            Ok(line) => self.inject(visit, line),
            Err(err) => {
                log::warn!(
                    "keeping scripted line for `{}`: {err}",
                    self.session.current
                );
                false
            }
        }
    }

    pub fn prompt_context(&self, label: ExpressionLabel, window: usize) -> PromptContext {
        let history = self.session.history[self.session.history.len().saturating_sub(window)..]
            .iter()
            .filter_map(|id| self.store.get(id).ok())
            .map(|node| node.text.clone())
            .collect();

        PromptContext {
            line: self.current_node().text.clone(),
            label,
            history,
        }
    }
}
