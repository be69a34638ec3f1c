use std::path::Path;

use prompt::Persona;
use sprite::{AssetError, Sprite};

pub mod camera;
pub mod dialogue;
pub mod engine;
pub mod expression;
pub mod mood;
pub mod prompt;
pub mod sprite;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: u16,
    pub y: u16,
}

impl Position {
    pub fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Chebyshev distance: diagonal neighbours are one step away.
    pub fn distance(&self, other: Position) -> u16 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    pub fn step(&self, direction: Direction) -> Option<Position> {
        let (x, y) = match direction {
            Direction::Up => (Some(self.x), self.y.checked_sub(1)),
            Direction::Down => (Some(self.x), self.y.checked_add(1)),
            Direction::Left => (self.x.checked_sub(1), Some(self.y)),
            Direction::Right => (self.x.checked_add(1), Some(self.y)),
        };
        Some(Position::new(x?, y?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Void,
    Grass,
    Path,
    Floor,
    Water,
    Tree,
    Fence,
    Wall,
}

impl Tile {
    pub fn from_glyph(glyph: char) -> Option<Tile> {
        Some(match glyph {
            ' ' => Tile::Void,
            '.' => Tile::Grass,
            ',' => Tile::Path,
            '+' => Tile::Floor,
            '~' => Tile::Water,
            'T' => Tile::Tree,
            '=' => Tile::Fence,
            '#' => Tile::Wall,
            _ => return None,
        })
    }

    pub fn glyph(&self) -> char {
        match self {
            Tile::Void => ' ',
            Tile::Grass => '.',
            Tile::Path => ',',
            Tile::Floor => '+',
            Tile::Water => '~',
            Tile::Tree => 'T',
            Tile::Fence => '=',
            Tile::Wall => '#',
        }
    }

    pub fn blocks(&self) -> bool {
        !matches!(self, Tile::Grass | Tile::Path | Tile::Floor)
    }
}

pub struct Map {
    pub name: String,
    tiles: Vec<Vec<Tile>>,
    width: u16,
}

impl Map {
    pub fn load(path: &Path) -> Result<Self, AssetError> {
        let source =
            std::fs::read_to_string(path).map_err(|_| AssetError::Missing(path.to_path_buf()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::parse(&name, &source).map_err(|reason| AssetError::Invalid {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Rows shorter than the widest one are padded with [`Tile::Void`].
    pub fn parse(name: &str, source: &str) -> Result<Self, String> {
        let mut tiles = Vec::new();
        for (row, line) in source.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            let mut cells = Vec::with_capacity(line.len());
            for (col, glyph) in line.chars().enumerate() {
                let tile = Tile::from_glyph(glyph)
                    .ok_or_else(|| format!("unknown tile `{glyph}` at line {}, column {}", row + 1, col + 1))?;
                cells.push(tile);
            }
            tiles.push(cells);
        }
        while tiles.last().is_some_and(|row| row.is_empty()) {
            tiles.pop();
        }

        let width = tiles.iter().map(Vec::len).max().unwrap_or(0);
        if width == 0 {
            return Err("map is empty".to_string());
        }
        if width > u16::MAX as usize || tiles.len() > u16::MAX as usize {
            return Err("map is too large".to_string());
        }
        for row in &mut tiles {
            row.resize(width, Tile::Void);
        }

        Ok(Self {
            name: name.to_string(),
            tiles,
            width: width as u16,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.tiles.len() as u16
    }

    pub fn tile(&self, pos: Position) -> Option<Tile> {
        self.tiles
            .get(pos.y as usize)
            .and_then(|row| row.get(pos.x as usize))
            .copied()
    }
}

pub struct Npc {
    pub id: String,
    pub persona: Persona,
    pub entry: String,
    pub position: Position,
    pub sprite: Sprite,
}

pub struct World {
    pub map: Map,
    pub npcs: Vec<Npc>,
    pub player: Position,
    pub player_sprite: Sprite,
    pub interact_radius: u16,
}

impl World {
    pub fn npc_at(&self, pos: Position) -> Option<usize> {
        self.npcs.iter().position(|npc| npc.position == pos)
    }

    pub fn is_free(&self, pos: Position) -> bool {
        self.map.tile(pos).is_some_and(|tile| !tile.blocks()) && self.npc_at(pos).is_none()
    }

    pub fn move_player(&mut self, direction: Direction) -> bool {
        match self.player.step(direction) {
            Some(next) if self.is_free(next) => {
                self.player = next;
                true
            }
            _ => false,
        }
    }

    pub fn in_reach(&self, npc: usize) -> bool {
        self.npcs
            .get(npc)
            .is_some_and(|npc| npc.position.distance(self.player) <= self.interact_radius)
    }

    /// Closest NPC within the interaction radius. Ties go to the first listed.
    pub fn npc_in_reach(&self) -> Option<usize> {
        self.npcs
            .iter()
            .enumerate()
            .filter(|(i, _)| self.in_reach(*i))
            .min_by_key(|(_, npc)| npc.position.distance(self.player))
            .map(|(i, _)| i)
    }
}
