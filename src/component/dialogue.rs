use crossterm::event::{KeyCode, KeyEvent};
use ratatui::{
    layout::Rect,
    style::{Color, Style, Stylize},
    text::{Line, Text},
    widgets::{Block, Paragraph},
    Frame,
};

use crate::sys::engine::DialogueEngine;

pub const LINES_PER_PAGE: usize = 4;

fn char_width(c: char) -> usize {
    if c.is_ascii() {
        1
    } else {
        2
    }
}

/// Word-wrap `text` to `width` columns and group the lines into pages.
///
/// Words wider than a whole line are split. Always yields at least one page.
pub fn wrap_pages(text: &str, width: usize, lines_per_page: usize) -> Vec<Vec<String>> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for paragraph in text.trim().lines() {
        let mut line = String::with_capacity(width);
        let mut len = 0;
        for word in paragraph.split_whitespace() {
            let word_len: usize = word.chars().map(char_width).sum();
            if len > 0 && len + 1 + word_len > width {
                lines.push(std::mem::take(&mut line));
                len = 0;
            }
            if word_len > width {
                for c in word.chars() {
                    let w = char_width(c);
                    if len > 0 && len + w > width {
                        lines.push(std::mem::take(&mut line));
                        len = 0;
                    }
                    line.push(c);
                    len += w;
                }
                continue;
            }
            if len > 0 {
                line.push(' ');
                len += 1;
            }
            line.push_str(word);
            len += word_len;
        }
        lines.push(line);
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
        .chunks(lines_per_page.max(1))
        .map(|page| page.to_vec())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueAction {
    None,
    Choose(usize),
    Close,
}

pub struct DialogueBox {
    page: usize,
    selected: usize,
    width: usize,
}

impl Default for DialogueBox {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogueBox {
    pub fn new() -> Self {
        Self {
            page: 0,
            selected: 0,
            width: 60,
        }
    }

    /// Back to the first page. Called whenever the shown line changes.
    pub fn reset(&mut self) {
        self.page = 0;
        self.selected = 0;
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    fn pages(&self, engine: &DialogueEngine) -> Vec<Vec<String>> {
        wrap_pages(engine.current_line(), self.width, LINES_PER_PAGE)
    }

    pub fn on_last_page(&self, engine: &DialogueEngine) -> bool {
        self.page + 1 >= self.pages(engine).len()
    }

    pub fn handler_input(&mut self, key: KeyEvent, engine: &DialogueEngine) -> DialogueAction {
        let last_page = self.on_last_page(engine);
        let options = engine.options().len();

        match key.code {
            KeyCode::Enter | KeyCode::Char(' ') => {
                if !last_page {
                    self.page += 1;
                    DialogueAction::None
                } else if options == 0 {
                    DialogueAction::Close
                } else {
                    DialogueAction::Choose(self.selected.min(options - 1))
                }
            }
            KeyCode::Char(c @ '1'..='9') if last_page => {
                let index = c as usize - '1' as usize;
                if index < options {
                    DialogueAction::Choose(index)
                } else {
                    DialogueAction::None
                }
            }
            KeyCode::Up if last_page && options > 0 => {
                self.selected = (self.selected + options - 1) % options;
                DialogueAction::None
            }
            KeyCode::Down if last_page && options > 0 => {
                self.selected = (self.selected + 1) % options;
                DialogueAction::None
            }
            _ => DialogueAction::None,
        }
    }

    pub fn render(
        &mut self,
        engine: &DialogueEngine,
        speaker: &str,
        thinking: bool,
        frame: &mut Frame,
        area: Rect,
    ) {
        let width = (area.width.max(4) - 4) as usize;
        if width != self.width {
            self.width = width;
        }
        let pages = self.pages(engine);
        self.page = self.page.min(pages.len() - 1);
        let last_page = self.page + 1 == pages.len();

        let mut text = Text::default();
        for line in &pages[self.page] {
            text.extend([Line::raw(line.clone())]);
        }

        if last_page {
            text.extend([Line::raw("")]);
            for (i, option) in engine.options().iter().enumerate() {
                let style = if i == self.selected {
                    Style::new().bg(Color::Yellow).fg(Color::Black)
                } else {
                    Style::new()
                };
                text.extend([Line::styled(format!("{}. {}", i + 1, option.label), style)]);
            }
            if engine.is_terminal() {
                text.extend([Line::raw("[Enter] goodbye").dark_gray()]);
            }
        } else {
            text.extend([Line::raw(format!("[Enter] more ({}/{})", self.page + 1, pages.len())).dark_gray()]);
        }

        let mut title = speaker.to_string();
        if thinking {
            title.push_str(" (thinking...)");
        } else if engine.is_generated() {
            title.push_str(" *");
        }

        let paragraph = Paragraph::new(text).block(Block::bordered().title(title).gray());
        frame.render_widget(paragraph, area);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crossterm::event::KeyModifiers;

    use super::*;
    use crate::sys::dialogue::{DialogueStore, DocumentFormat};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn engine(text: &str) -> DialogueEngine {
        let source = format!(
            r#"
[nodes.start]
text = "{text}"
options = [{{ label = "Buy", target = "end" }}, {{ label = "Leave", target = "end" }}]
[nodes.end]
text = "Bye."
"#
        );
        let store = DialogueStore::parse(&source, DocumentFormat::Toml, "test.toml").unwrap();
        DialogueEngine::start(Arc::new(store), "start").unwrap()
    }

    #[test]
    fn wraps_on_word_boundaries() {
        assert_eq!(wrap_pages("one two three", 7, 4), vec![vec!["one two", "three"]]);
    }

    #[test]
    fn splits_into_pages_of_four() {
        let pages = wrap_pages("a b c d e f g h i", 1, LINES_PER_PAGE);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], ["a", "b", "c", "d"]);
        assert_eq!(pages[2], ["i"]);
    }

    #[test]
    fn splits_long_words_and_wide_chars() {
        assert_eq!(wrap_pages("abcdefghij", 4, 4), vec![vec!["abcd", "efgh", "ij"]]);
        assert_eq!(wrap_pages("你好世界", 4, 4), vec![vec!["你好", "世界"]]);
    }

    #[test]
    fn empty_text_is_one_blank_page() {
        assert_eq!(wrap_pages("   ", 10, 4), vec![vec![String::new()]]);
    }

    #[test]
    fn enter_pages_then_chooses() {
        let engine = engine("aaaa bbbb cccc dddd eeee");
        let mut dialogue = DialogueBox::new();
        dialogue.width = 4;

        assert!(!dialogue.on_last_page(&engine));
        // Options are not reachable before the last page.
        assert_eq!(dialogue.handler_input(key(KeyCode::Char('1')), &engine), DialogueAction::None);
        assert_eq!(dialogue.handler_input(key(KeyCode::Enter), &engine), DialogueAction::None);
        assert!(dialogue.on_last_page(&engine));

        assert_eq!(dialogue.handler_input(key(KeyCode::Down), &engine), DialogueAction::None);
        assert_eq!(dialogue.handler_input(key(KeyCode::Enter), &engine), DialogueAction::Choose(1));
        assert_eq!(dialogue.handler_input(key(KeyCode::Char('1')), &engine), DialogueAction::Choose(0));
        assert_eq!(dialogue.handler_input(key(KeyCode::Char('3')), &engine), DialogueAction::None);
    }

    #[test]
    fn selection_wraps_around() {
        let engine = engine("Hi");
        let mut dialogue = DialogueBox::new();
        dialogue.handler_input(key(KeyCode::Up), &engine);
        assert_eq!(dialogue.selected(), 1);
        dialogue.handler_input(key(KeyCode::Down), &engine);
        assert_eq!(dialogue.selected(), 0);
    }

    #[test]
    fn enter_on_terminal_closes() {
        let mut engine = engine("Hi");
        engine.choose(0).unwrap();
        let mut dialogue = DialogueBox::new();
        assert_eq!(dialogue.handler_input(key(KeyCode::Enter), &engine), DialogueAction::Close);
    }
}
