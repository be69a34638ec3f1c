use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context};
use crossbeam::channel::Sender;

use crate::{
    debug_tool::EchoGenerator,
    llm::{
        openai::{ChatOptions, Credentials, OpenAiClient},
        TextGenerator,
    },
    sys::{
        camera::{CommandFrames, DirectoryFrames, FrameSource},
        dialogue::DialogueStore,
        expression::{ExpressionClassifier, ExpressionLabel, FixedExpressionModel, HttpExpressionModel},
        mood::MoodSampler,
        prompt::{Persona, PromptBuilder},
        sprite::Sprite,
        Map, Npc, Position, World,
    },
};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Project {
    #[serde(default = "default_title")]
    pub title: String,
    pub map: PathBuf,
    #[serde(default)]
    pub run: RunOptions,
    pub player: PlayerConfig,
    #[serde(default)]
    pub npcs: Vec<NpcConfig>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub expression: ExpressionConfig,
    #[serde(default = "default_settings_path")]
    pub settings: PathBuf,

    /// Directory of the project file. Relative paths resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_title() -> String {
    "Valley Talk".to_string()
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("settings.toml")
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub tick_ms: u64,
    #[serde(default)]
    pub interact_radius: u16,
    #[serde(default)]
    pub history_window: usize,
}

impl RunOptions {
    fn fill_default_value(&mut self) {
        if self.tick_ms == 0 {
            self.tick_ms = 50;
        }
        if self.interact_radius == 0 {
            self.interact_radius = 1;
        }
        if self.history_window == 0 {
            self.history_window = 3;
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PlayerConfig {
    pub sprite: PathBuf,
    pub start: [u16; 2],
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NpcConfig {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub situation: Option<String>,
    pub dialogue: PathBuf,
    #[serde(default)]
    pub entry: Option<String>,
    pub sprite: PathBuf,
    pub position: [u16; 2],
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default)]
    pub credentials: Option<PathBuf>,
    #[serde(default)]
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub prompt_template: Option<PathBuf>,
}

impl LlmConfig {
    fn fill_default_value(&mut self) {
        let defaults = ChatOptions::default();
        if self.base_url.is_empty() {
            self.base_url = "https://api.openai.com/v1".to_string();
        }
        if self.model.is_empty() {
            self.model = defaults.model;
        }
        if self.api_key_env.is_empty() {
            self.api_key_env = "OPENAI_API_KEY".to_string();
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = 4000;
        }
        if self.max_tokens == 0 {
            self.max_tokens = defaults.max_tokens;
        }
        if self.temperature.is_none() {
            self.temperature = Some(defaults.temperature);
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FrameSourceConfig {
    #[default]
    None,
    Directory {
        path: PathBuf,
    },
    Command {
        command: Vec<String>,
        #[serde(default = "default_media_type")]
        media_type: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

fn default_media_type() -> String {
    "image/jpeg".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelConfig {
    Fixed {
        label: ExpressionLabel,
    },
    Http {
        url: String,
        #[serde(default)]
        timeout_ms: u64,
    },
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::Fixed {
            label: ExpressionLabel::Neutral,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ExpressionConfig {
    #[serde(default)]
    pub source: FrameSourceConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub min_confidence: Option<f32>,
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub window: usize,
}

impl ExpressionConfig {
    fn fill_default_value(&mut self) {
        if self.min_confidence.is_none() {
            self.min_confidence = Some(ExpressionClassifier::DEFAULT_MIN_CONFIDENCE);
        }
        if self.interval_ms == 0 {
            self.interval_ms = 500;
        }
        if self.window == 0 {
            self.window = 5;
        }
        if let ModelConfig::Http { timeout_ms, .. } = &mut self.model {
            if *timeout_ms == 0 {
                *timeout_ms = 1000;
            }
        }
    }
}

/// Per-NPC conversation data, aligned by index with `World::npcs`.
pub struct Cast {
    pub stores: Vec<Arc<DialogueStore>>,
    pub prompts: Vec<PromptBuilder>,
}

impl Project {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|_| anyhow!("project file `{}` not found", path.display()))?;
        let mut project: Project = toml::from_str(&source)
            .with_context(|| format!("invalid project file `{}`", path.display()))?;
        project.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        project.fill_default_value();
        Ok(project)
    }

    pub fn fill_default_value(&mut self) {
        self.run.fill_default_value();
        self.llm.fill_default_value();
        self.expression.fill_default_value();
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.resolve(&self.settings)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.run.tick_ms)
    }

    /// Load map, sprites and every dialogue. Any bad asset aborts the load.
    pub fn build_world(&self) -> anyhow::Result<(World, Cast)> {
        let map = Map::load(&self.resolve(&self.map))?;
        let player_sprite = Sprite::load(&self.resolve(&self.player.sprite))?;

        let mut npcs = Vec::with_capacity(self.npcs.len());
        let mut cast = Cast {
            stores: Vec::with_capacity(self.npcs.len()),
            prompts: Vec::with_capacity(self.npcs.len()),
        };
        let template = match &self.llm.prompt_template {
            Some(path) => {
                let path = self.resolve(path);
                let text = std::fs::read_to_string(&path)
                    .map_err(|_| anyhow!("prompt template `{}` not found", path.display()))?;
                Some((path, text))
            }
            None => None,
        };

        let mut ids = HashSet::new();
        for config in &self.npcs {
            if !ids.insert(config.id.as_str()) {
                anyhow::bail!("duplicate npc id `{}`", config.id);
            }

            let store = DialogueStore::load(self.resolve(&config.dialogue))?;
            log::debug!(
                "npc `{}` talks from `{}` ({} nodes)",
                config.id,
                store.path().display(),
                store.len()
            );
            let entry = config
                .entry
                .clone()
                .or_else(|| store.entry().map(str::to_string))
                .ok_or_else(|| anyhow!("npc `{}` has no dialogue entry", config.id))?;
            store
                .get(&entry)
                .with_context(|| format!("entry of npc `{}`", config.id))?;

            let persona = Persona {
                name: config.name.clone(),
                role: config.role.clone(),
                situation: config.situation.clone(),
            };
            let prompt = PromptBuilder::new(persona.clone(), template.as_ref().map(|(_, text)| text.as_str()))
                .with_context(|| match &template {
                    Some((path, _)) => format!("prompt template `{}` for npc `{}`", path.display(), config.id),
                    None => format!("prompt template for npc `{}`", config.id),
                })?;

            let [x, y] = config.position;
            let position = Position::new(x, y);
            match map.tile(position) {
                Some(tile) if !tile.blocks() => {}
                _ => anyhow::bail!("npc `{}` stands outside the walkable map at {x},{y}", config.id),
            }

            npcs.push(Npc {
                id: config.id.clone(),
                persona,
                entry,
                position,
                sprite: Sprite::load(&self.resolve(&config.sprite))?,
            });
            cast.stores.push(Arc::new(store));
            cast.prompts.push(prompt);
        }

        let [x, y] = self.player.start;
        let world = World {
            map,
            npcs,
            player: Position::new(x, y),
            player_sprite,
            interact_radius: self.run.interact_radius,
        };
        if !world.is_free(world.player) {
            anyhow::bail!("player start {x},{y} is not a free tile");
        }

        log::info!(
            "world `{}` loaded: {}x{} tiles, {} npc(s)",
            world.map.name,
            world.map.width(),
            world.map.height(),
            world.npcs.len()
        );
        Ok((world, cast))
    }

    /// The text generator to use, or `None` when no API key is configured.
    pub fn generator(&self, debug_llm: bool) -> anyhow::Result<Option<Box<dyn TextGenerator>>> {
        if debug_llm {
            log::info!("using echo generator");
            return Ok(Some(Box::new(EchoGenerator::new(Duration::from_millis(300)))));
        }

        let credentials = Credentials::resolve(
            &self.llm.api_key_env,
            &self.llm.base_url,
            self.llm.credentials.as_ref().map(|p| self.resolve(p)).as_deref(),
        )?;
        let Some(credentials) = credentials else {
            log::warn!("no API key in `{}` or credentials file, AI dialogue disabled", self.llm.api_key_env);
            return Ok(None);
        };

        let options = ChatOptions {
            model: self.llm.model.clone(),
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature.unwrap_or(0.8),
        };
        Ok(Some(Box::new(OpenAiClient::new(credentials, options)?)))
    }

    pub fn frame_source(&self) -> anyhow::Result<Option<Box<dyn FrameSource>>> {
        let source: Box<dyn FrameSource> = match &self.expression.source {
            FrameSourceConfig::None => return Ok(None),
            FrameSourceConfig::Directory { path } => Box::new(DirectoryFrames::open(self.resolve(path))?),
            FrameSourceConfig::Command {
                command,
                media_type,
                timeout_ms,
            } => {
                let timeout = timeout_ms.map_or(CommandFrames::DEFAULT_TIMEOUT, Duration::from_millis);
                Box::new(CommandFrames::new(command, media_type.clone())?.with_timeout(timeout))
            }
        };
        Ok(Some(source))
    }

    pub fn classifier(&self) -> anyhow::Result<ExpressionClassifier> {
        let min_confidence = self
            .expression
            .min_confidence
            .unwrap_or(ExpressionClassifier::DEFAULT_MIN_CONFIDENCE);
        let classifier = match &self.expression.model {
            ModelConfig::Fixed { label } => {
                ExpressionClassifier::new(Box::new(FixedExpressionModel::new(*label)), min_confidence)
            }
            ModelConfig::Http { url, timeout_ms } => ExpressionClassifier::new(
                Box::new(HttpExpressionModel::new(url.clone(), Duration::from_millis(*timeout_ms))?),
                min_confidence,
            ),
        };
        Ok(classifier)
    }

    /// Start sampling moods, or `None` when no frame source is configured.
    pub fn mood_sampler(&self, tx: Sender<ExpressionLabel>) -> anyhow::Result<Option<MoodSampler>> {
        let Some(source) = self.frame_source()? else {
            return Ok(None);
        };
        let sampler = MoodSampler::spawn(
            source,
            self.classifier()?,
            Duration::from_millis(self.expression.interval_ms),
            tx,
        );
        Ok(Some(sampler))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enable_ai_dialogue: bool,
    pub enable_camera: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_ai_dialogue: true,
            enable_camera: true,
        }
    }
}

impl Settings {
    /// Missing keys take their defaults; an unreadable file gives defaults.
    pub fn load(path: &Path) -> Self {
        let Ok(source) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&source) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("ignoring invalid settings `{}`: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("toml::to_string_pretty err:{e}"))?;
        std::fs::write(path, contents)
            .map_err(|e| anyhow::anyhow!("save to `{}` err:{e}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn project_dir(dialogue: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "map.txt", "#####\n#...#\n#...#\n#####\n");
        write(dir.path(), "sprites/player.toml", "glyph = \"@\"\ncolor = \"white\"");
        write(dir.path(), "sprites/pete.toml", "glyph = \"P\"\ncolor = \"yellow\"");
        write(dir.path(), "dialogue/pete.toml", dialogue);
        write(
            dir.path(),
            "project.toml",
            r#"
map = "map.txt"

[player]
sprite = "sprites/player.toml"
start = [1, 1]

[[npcs]]
id = "trader"
name = "Merchant Pete"
role = "friendly trader"
dialogue = "dialogue/pete.toml"
sprite = "sprites/pete.toml"
position = [3, 2]

[expression.model]
kind = "fixed"
label = "happy"
"#,
        );
        dir
    }

    const PETE: &str = r#"
entry = "hello"
[nodes.hello]
text = "Hello!"
"#;

    #[test]
    fn defaults_are_filled() {
        let dir = project_dir(PETE);
        let project = Project::load(&dir.path().join("project.toml")).unwrap();
        assert_eq!(project.title, "Valley Talk");
        assert_eq!(project.run.tick_ms, 50);
        assert_eq!(project.run.interact_radius, 1);
        assert_eq!(project.run.history_window, 3);
        assert_eq!(project.llm.timeout(), Duration::from_secs(4));
        assert_eq!(project.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(project.expression.window, 5);
        assert_eq!(project.settings_path(), dir.path().join("settings.toml"));
        assert!(matches!(project.expression.source, FrameSourceConfig::None));
    }

    #[test]
    fn builds_world_and_cast() {
        let dir = project_dir(PETE);
        let project = Project::load(&dir.path().join("project.toml")).unwrap();
        let (world, cast) = project.build_world().unwrap();
        assert_eq!(world.npcs.len(), 1);
        assert_eq!(world.npcs[0].entry, "hello");
        assert_eq!(world.npcs[0].persona.name, "Merchant Pete");
        assert_eq!(cast.stores.len(), 1);
        assert_eq!(world.player, Position::new(1, 1));
    }

    #[test]
    fn malformed_dialogue_halts_loading() {
        let dir = project_dir(
            r#"
[nodes.hello]
text = "Hello!"
options = [{ label = "Shop", target = "shop" }]
"#,
        );
        let project = Project::load(&dir.path().join("project.toml")).unwrap();
        let err = project.build_world().err().unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("pete.toml"), "{message}");
        assert!(message.contains("node `hello`"), "{message}");
    }

    #[test]
    fn broken_prompt_template_halts_loading() {
        let dir = project_dir(PETE);
        write(dir.path(), "prompt.hbs", "{{#if persona.situation}}Situation: {{persona.situation}}");
        let mut config = std::fs::read_to_string(dir.path().join("project.toml")).unwrap();
        config.push_str("\n[llm]\nprompt_template = \"prompt.hbs\"\n");
        write(dir.path(), "project.toml", &config);

        let project = Project::load(&dir.path().join("project.toml")).unwrap();
        let err = project.build_world().err().unwrap();
        let message = format!("{err:#}");
        assert!(message.contains("prompt.hbs"), "{message}");
        assert!(message.contains("npc `trader`"), "{message}");
    }

    #[test]
    fn missing_prompt_template_halts_loading() {
        let dir = project_dir(PETE);
        let mut config = std::fs::read_to_string(dir.path().join("project.toml")).unwrap();
        config.push_str("\n[llm]\nprompt_template = \"nowhere.hbs\"\n");
        write(dir.path(), "project.toml", &config);

        let project = Project::load(&dir.path().join("project.toml")).unwrap();
        let err = project.build_world().err().unwrap();
        assert!(format!("{err:#}").contains("nowhere.hbs"));
    }

    #[test]
    fn missing_sprite_halts_loading() {
        let dir = project_dir(PETE);
        std::fs::remove_file(dir.path().join("sprites/pete.toml")).unwrap();
        let project = Project::load(&dir.path().join("project.toml")).unwrap();
        let err = project.build_world().err().unwrap();
        assert!(format!("{err:#}").contains("pete.toml"));
    }

    #[test]
    fn no_frame_source_means_no_sampler() {
        let dir = project_dir(PETE);
        let project = Project::load(&dir.path().join("project.toml")).unwrap();
        let (tx, _rx) = crate::sys::mood::mood_channel();
        assert!(project.mood_sampler(tx).unwrap().is_none());
    }

    #[test]
    fn debug_generator_needs_no_key() {
        let dir = project_dir(PETE);
        let project = Project::load(&dir.path().join("project.toml")).unwrap();
        let generator = project.generator(true).unwrap().unwrap();
        assert_eq!(generator.name(), "echo");
    }

    #[test]
    fn settings_default_and_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        assert_eq!(Settings::load(&path), Settings::default());

        std::fs::write(&path, "enable_camera = false\n").unwrap();
        let settings = Settings::load(&path);
        assert!(settings.enable_ai_dialogue);
        assert!(!settings.enable_camera);

        let changed = Settings {
            enable_ai_dialogue: false,
            enable_camera: true,
        };
        changed.save(&path).unwrap();
        assert_eq!(Settings::load(&path), changed);

        std::fs::write(&path, "enable_camera = \"maybe\"").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }
}
