use std::path::PathBuf;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::Rect,
    style::{Color, Style, Stylize},
    text::{Line, Text},
    widgets::{Block, Paragraph},
    Frame,
};

use crate::project::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    AiDialogue,
    Camera,
}

impl Field {
    const ALL: [Field; 2] = [Field::AiDialogue, Field::Camera];

    fn label(&self) -> &'static str {
        match self {
            Field::AiDialogue => "AI dialogue",
            Field::Camera => "Camera",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOutput {
    Normal,
    Changed(Field),
    Saved,
}

pub struct SettingsComponent {
    pub settings: Settings,
    pub path: PathBuf,
    selected: usize,
    dirty: bool,
}

impl SettingsComponent {
    pub fn new(settings: Settings, path: PathBuf) -> Self {
        Self {
            settings,
            path,
            selected: 0,
            dirty: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn value(&self, field: Field) -> bool {
        match field {
            Field::AiDialogue => self.settings.enable_ai_dialogue,
            Field::Camera => self.settings.enable_camera,
        }
    }

    pub fn toggle(&mut self, field: Field) {
        match field {
            Field::AiDialogue => self.settings.enable_ai_dialogue ^= true,
            Field::Camera => self.settings.enable_camera ^= true,
        }
        self.dirty = true;
    }

    pub fn handler_input(&mut self, key: KeyEvent) -> anyhow::Result<SettingsOutput> {
        match key.code {
            KeyCode::Char('s') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.settings.save(&self.path)?;
                self.dirty = false;
                Ok(SettingsOutput::Saved)
            }
            KeyCode::Up | KeyCode::Char('w') => {
                self.selected = self.selected.max(1) - 1;
                Ok(SettingsOutput::Normal)
            }
            KeyCode::Down | KeyCode::Char('s') => {
                self.selected = (self.selected + 1).min(Field::ALL.len() - 1);
                Ok(SettingsOutput::Normal)
            }
            KeyCode::Enter | KeyCode::Char(' ') => {
                let field = Field::ALL[self.selected];
                self.toggle(field);
                Ok(SettingsOutput::Changed(field))
            }
            _ => Ok(SettingsOutput::Normal),
        }
    }

    pub fn render(&mut self, frame: &mut Frame, area: Rect) {
        let mut text = Text::default();
        for (i, field) in Field::ALL.iter().enumerate() {
            let mark = if self.value(*field) { "[x]" } else { "[ ]" };
            let style = if i == self.selected {
                Style::new().bg(Color::Yellow).fg(Color::Black)
            } else {
                Style::new()
            };
            text.extend([Line::styled(format!("{mark} {}", field.label()), style)]);
        }
        text.extend([Line::raw("")]);
        let state = if self.dirty { "unsaved" } else { "saved" };
        text.extend([Line::raw(format!("{} ({state})", self.path.display())).dark_gray()]);

        let paragraph = Paragraph::new(text).block(Block::bordered().title("Settings").gray());
        frame.render_widget(paragraph, area);
    }
}
