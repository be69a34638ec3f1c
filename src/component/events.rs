use std::collections::VecDeque;

use chrono::{DateTime, Local};
use crossterm::event::{Event, KeyCode, MouseEventKind};
use ratatui::{
    layout::Rect,
    style::Stylize,
    text::{Line, Text},
    widgets::{Block, Paragraph},
    Frame,
};

const CAPACITY: usize = 500;

/// Timestamped game events shown on the Log tab.
pub struct EventLog {
    entries: VecDeque<(DateTime<Local>, String)>,
    cursor: u16,
    lock_on_bottom: bool,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(CAPACITY),
            cursor: 0,
            lock_on_bottom: true,
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        if self.entries.len() == CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((Local::now(), message.into()));
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.back().map(|(_, message)| message.as_str())
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, message)| message.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn handler_input(&mut self, event: &Event) {
        match event {
            Event::Key(key) if key.code == KeyCode::Up => {
                self.cursor = self.cursor.saturating_sub(1);
                self.lock_on_bottom = false;
            }
            Event::Key(key) if key.code == KeyCode::Down => self.cursor += 1,
            Event::Key(key) if key.code == KeyCode::End => self.lock_on_bottom = true,
            Event::Mouse(mouse) => match mouse.kind {
                MouseEventKind::ScrollDown => self.cursor += 3,
                MouseEventKind::ScrollUp => {
                    self.cursor = self.cursor.saturating_sub(3);
                    self.lock_on_bottom = false;
                }
                _ => {}
            },
            _ => {}
        }
    }

    pub fn render(&mut self, frame: &mut Frame, area: Rect) {
        let mut text = Text::default();
        for (at, message) in &self.entries {
            text.extend([Line::raw(format!("[{}] {message}", at.format("%H:%M:%S")))]);
        }

        let line_n = text.lines.len();
        let max_line = area.height.saturating_sub(2) as usize;
        if line_n > max_line {
            let max_cursor = (line_n - max_line) as u16;
            if self.cursor >= max_cursor {
                self.lock_on_bottom = true;
            }
            if self.lock_on_bottom {
                self.cursor = max_cursor;
            }
        } else {
            self.cursor = 0;
        }

        let paragraph = Paragraph::new(text)
            .block(Block::bordered().title("Log").gray())
            .scroll((self.cursor, 0));
        frame.render_widget(paragraph, area);
    }
}
