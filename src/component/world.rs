use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Paragraph},
    Frame,
};

use crate::sys::{Position, Tile, World};

fn tile_style(tile: Tile) -> Style {
    match tile {
        Tile::Void => Style::new(),
        Tile::Grass => Style::new().fg(Color::Green),
        Tile::Path => Style::new().fg(Color::Yellow),
        Tile::Floor => Style::new().fg(Color::Gray),
        Tile::Water => Style::new().fg(Color::Blue),
        Tile::Tree => Style::new().fg(Color::Green).add_modifier(Modifier::BOLD),
        Tile::Fence => Style::new().fg(Color::Rgb(160, 110, 60)),
        Tile::Wall => Style::new().fg(Color::White),
    }
}

/// Top-left map cell of a `view` sized window centered on `focus` and
/// clamped so it never shows past the map edge.
pub fn viewport(map: (u16, u16), view: (u16, u16), focus: Position) -> Position {
    let axis = |map: u16, view: u16, focus: u16| -> u16 {
        if map <= view {
            0
        } else {
            focus.saturating_sub(view / 2).min(map - view)
        }
    };
    Position::new(axis(map.0, view.0, focus.x), axis(map.1, view.1, focus.y))
}

pub struct WorldView {
    /// NPC to highlight, normally the one in reach.
    pub highlight: Option<usize>,
}

impl WorldView {
    pub fn new() -> Self {
        Self { highlight: None }
    }

    pub fn render(&mut self, world: &World, title: &str, frame: &mut Frame, area: Rect) {
        let view = (area.width.saturating_sub(2), area.height.saturating_sub(2));
        let origin = viewport((world.map.width(), world.map.height()), view, world.player);

        let mut text = Text::default();
        for y in origin.y..(origin.y + view.1).min(world.map.height()) {
            let mut spans = Vec::with_capacity(view.0 as usize);
            for x in origin.x..(origin.x + view.0).min(world.map.width()) {
                let pos = Position::new(x, y);
                let span = if pos == world.player {
                    let sprite = &world.player_sprite;
                    Span::styled(sprite.glyph.to_string(), Style::new().fg(sprite.color).add_modifier(Modifier::BOLD))
                } else if let Some(i) = world.npc_at(pos) {
                    let sprite = &world.npcs[i].sprite;
                    let mut style = Style::new().fg(sprite.color);
                    if self.highlight == Some(i) {
                        style = style.add_modifier(Modifier::REVERSED);
                    }
                    Span::styled(sprite.glyph.to_string(), style)
                } else {
                    let tile = world.map.tile(pos).unwrap_or(Tile::Void);
                    Span::styled(tile.glyph().to_string(), tile_style(tile))
                };
                spans.push(span);
            }
            text.extend([Line::from(spans)]);
        }

        let paragraph = Paragraph::new(text).block(Block::bordered().title(title.to_string()));
        frame.render_widget(paragraph, area);
    }
}

impl Default for WorldView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_map_is_not_scrolled() {
        assert_eq!(viewport((10, 5), (20, 10), Position::new(9, 4)), Position::new(0, 0));
    }

    #[test]
    fn follows_and_clamps() {
        let map = (100, 50);
        let view = (20, 10);
        assert_eq!(viewport(map, view, Position::new(3, 2)), Position::new(0, 0));
        assert_eq!(viewport(map, view, Position::new(50, 25)), Position::new(40, 20));
        assert_eq!(viewport(map, view, Position::new(99, 49)), Position::new(80, 40));
    }
}
