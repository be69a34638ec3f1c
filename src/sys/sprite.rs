use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use ratatui::style::Color;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("asset `{}` not found", .0.display())]
    Missing(PathBuf),
    #[error("asset `{}` is invalid: {reason}", .path.display())]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, serde::Deserialize)]
struct SpriteFile {
    glyph: String,
    #[serde(default)]
    color: Option<String>,
}

/// A one-cell sprite: the glyph drawn on the map and its color.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sprite {
    pub glyph: char,
    pub color: Color,
}

impl Sprite {
    pub fn new(glyph: char, color: Color) -> Self {
        Self { glyph, color }
    }

    pub fn load(path: &Path) -> Result<Self, AssetError> {
        let source = std::fs::read_to_string(path).map_err(|_| AssetError::Missing(path.to_path_buf()))?;
        let invalid = |reason: String| AssetError::Invalid {
            path: path.to_path_buf(),
            reason,
        };

        let file: SpriteFile = toml::from_str(&source).map_err(|e| invalid(e.to_string()))?;

        let mut chars = file.glyph.chars();
        let glyph = match (chars.next(), chars.next()) {
            (Some(c), None) if !c.is_control() => c,
            _ => return Err(invalid(format!("glyph `{}` must be one character", file.glyph))),
        };

        let color = match file.color {
            Some(name) => Color::from_str(&name).map_err(|_| invalid(format!("unknown color `{name}`")))?,
            None => Color::Reset,
        };

        Ok(Self { glyph, color })
    }
}
