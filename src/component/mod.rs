use std::time::{Duration, Instant};

use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout},
    widgets::{Block, Paragraph, Tabs},
    Frame, Terminal,
};

use crate::{
    llm::worker::{GenerateReply, GenerateRequest, LlmWorker},
    project::Cast,
    sys::{
        engine::{DialogueEngine, Visit},
        expression::ExpressionLabel,
        mood::{MoodFeed, MoodWindow},
        Direction, World,
    },
};

pub mod dialogue;
pub mod events;
pub mod settings;
pub mod world;

use dialogue::{DialogueAction, DialogueBox, LINES_PER_PAGE};
use events::EventLog;
use settings::{Field, SettingsComponent, SettingsOutput};
use world::WorldView;

#[derive(Debug)]
pub enum Input {
    Event(Event),
    Generated(GenerateReply),
    Mood(ExpressionLabel),
    Tick(Instant),
}

#[derive(Debug)]
pub enum Output {
    Exit,
    Normal,
    Generate(GenerateRequest),
    Camera(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    World,
    Settings,
    Log,
}

impl Tab {
    const TITLES: [&'static str; 3] = ["World", "Settings", "Log"];

    fn next(self) -> Self {
        match self {
            Tab::World => Tab::Settings,
            Tab::Settings => Tab::Log,
            Tab::Log => Tab::World,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub tick: Duration,
    pub llm_timeout: Duration,
    pub history_window: usize,
    pub mood_window: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            llm_timeout: Duration::from_secs(4),
            history_window: 3,
            mood_window: 5,
        }
    }
}

/// A generation the conversation is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub ticket: u64,
    pub visit: Visit,
    pub deadline: Instant,
}

pub struct Conversation {
    pub npc: usize,
    pub engine: DialogueEngine,
    pub pending: Option<Pending>,
}

fn walk_direction(code: KeyCode) -> Option<Direction> {
    match code {
        KeyCode::Char('w') | KeyCode::Char('W') => Some(Direction::Up),
        KeyCode::Char('s') | KeyCode::Char('S') => Some(Direction::Down),
        KeyCode::Char('a') | KeyCode::Char('A') => Some(Direction::Left),
        KeyCode::Char('d') | KeyCode::Char('D') => Some(Direction::Right),
        _ => None,
    }
}

fn arrow_direction(code: KeyCode) -> Option<Direction> {
    match code {
        KeyCode::Up => Some(Direction::Up),
        KeyCode::Down => Some(Direction::Down),
        KeyCode::Left => Some(Direction::Left),
        KeyCode::Right => Some(Direction::Right),
        _ => None,
    }
}

pub struct App {
    pub title: String,
    world: World,
    cast: Cast,
    pub settings: SettingsComponent,
    dialogue: DialogueBox,
    view: WorldView,
    events: EventLog,
    moods: MoodWindow,
    conversation: Option<Conversation>,
    tab: Tab,
    options: AppOptions,
    ai_available: bool,
    next_ticket: u64,
    now: Instant,
    exit_n: u8,
}

impl App {
    pub fn new(
        title: impl Into<String>,
        world: World,
        cast: Cast,
        settings: SettingsComponent,
        options: AppOptions,
        ai_available: bool,
    ) -> Self {
        Self {
            title: title.into(),
            world,
            cast,
            settings,
            dialogue: DialogueBox::new(),
            view: WorldView::new(),
            events: EventLog::new(),
            moods: MoodWindow::new(options.mood_window),
            conversation: None,
            tab: Tab::World,
            options,
            ai_available,
            next_ticket: 0,
            now: Instant::now(),
            exit_n: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    pub fn current_line(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.engine.current_line())
    }

    pub fn is_thinking(&self) -> bool {
        self.conversation.as_ref().is_some_and(|c| c.pending.is_some())
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn moods(&self) -> &MoodWindow {
        &self.moods
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    fn ai_enabled(&self) -> bool {
        self.ai_available && self.settings.settings.enable_ai_dialogue
    }

    pub fn handler_input(&mut self, input: Input) -> Output {
        let is_event = matches!(&input, Input::Event(..));

        let output = match input {
            Input::Tick(now) => {
                self.now = now;
                self.check_deadline();
                Output::Normal
            }
            Input::Generated(reply) => {
                self.on_reply(reply);
                Output::Normal
            }
            Input::Mood(label) => {
                if self.moods.is_empty() || self.moods.latest() != label {
                    self.events.push(format!("player looks {label}"));
                }
                self.moods.push(label);
                Output::Normal
            }
            Input::Event(Event::Key(key)) if key.kind != KeyEventKind::Press => Output::Normal,
            Input::Event(Event::Key(key)) if key.code == KeyCode::Esc => {
                if self.conversation.is_some() && self.tab == Tab::World {
                    self.end_conversation("left the conversation");
                } else {
                    self.exit_n += 2;
                    if self.exit_n >= 3 {
                        return Output::Exit;
                    }
                }
                Output::Normal
            }
            Input::Event(Event::Key(key)) if key.code == KeyCode::Tab => {
                self.tab = self.tab.next();
                Output::Normal
            }
            Input::Event(event) => match self.tab {
                Tab::World => match event {
                    Event::Key(key) => self.world_input(key),
                    _ => Output::Normal,
                },
                Tab::Settings => match event {
                    Event::Key(key) => self.settings_input(key),
                    _ => Output::Normal,
                },
                Tab::Log => {
                    self.events.handler_input(&event);
                    Output::Normal
                }
            },
        };

        if is_event {
            self.exit_n = self.exit_n.max(1) - 1;
        }
        output
    }

    fn world_input(&mut self, key: KeyEvent) -> Output {
        if self.conversation.is_some() {
            return self.conversation_input(key);
        }

        if let Some(direction) = walk_direction(key.code).or(arrow_direction(key.code)) {
            self.world.move_player(direction);
            return Output::Normal;
        }
        match key.code {
            KeyCode::Char('e') | KeyCode::Char('E') | KeyCode::Enter => self.start_conversation(),
            _ => Output::Normal,
        }
    }

    fn conversation_input(&mut self, key: KeyEvent) -> Output {
        if let Some(direction) = walk_direction(key.code) {
            self.world.move_player(direction);
            let npc = self.conversation.as_ref().map(|c| c.npc);
            if npc.is_some_and(|npc| !self.world.in_reach(npc)) {
                self.end_conversation("walked away");
            }
            return Output::Normal;
        }

        let Some(conversation) = &self.conversation else {
            return Output::Normal;
        };
        match self.dialogue.handler_input(key, &conversation.engine) {
            DialogueAction::None => Output::Normal,
            DialogueAction::Close => {
                self.end_conversation("said goodbye");
                Output::Normal
            }
            DialogueAction::Choose(index) => self.choose(index),
        }
    }

    fn start_conversation(&mut self) -> Output {
        let Some(npc) = self.world.npc_in_reach() else {
            return Output::Normal;
        };
        let npc_data = &self.world.npcs[npc];
        match DialogueEngine::start(self.cast.stores[npc].clone(), &npc_data.entry) {
            Ok(engine) => {
                log::info!("talking to `{}` at `{}`", npc_data.id, npc_data.entry);
                self.events.push(format!("talking to {}", npc_data.persona.name));
                self.conversation = Some(Conversation {
                    npc,
                    engine,
                    pending: None,
                });
                self.dialogue.reset();
                self.request_line()
            }
            Err(err) => {
                log::error!("cannot start dialogue for `{}`: {err}", npc_data.id);
                self.events.push(format!("{} has nothing to say", npc_data.persona.name));
                Output::Normal
            }
        }
    }

    fn choose(&mut self, index: usize) -> Output {
        let Some(conversation) = self.conversation.as_mut() else {
            return Output::Normal;
        };
        let label = conversation
            .engine
            .options()
            .get(index)
            .map(|option| option.label.clone())
            .unwrap_or_default();

        if let Err(err) = conversation.engine.choose(index) {
            log::error!("{err}");
            debug_assert!(false, "dialogue box issued a bad choice: {err}");
            return Output::Normal;
        }
        // The old visit is over, so its pending reply can only be stale now.
        conversation.pending = None;
        self.dialogue.reset();
        self.events.push(format!("chose \"{label}\""));
        self.request_line()
    }

    fn end_conversation(&mut self, reason: &str) {
        let Some(conversation) = self.conversation.take() else {
            return;
        };
        if let Some(pending) = conversation.pending {
            log::debug!("abandoning ticket {}", pending.ticket);
        }
        let npc = &self.world.npcs[conversation.npc];
        log::info!("conversation with `{}` ended: {reason}", npc.id);
        self.events.push(format!("{reason} ({})", npc.persona.name));
        self.dialogue.reset();
    }

    /// Ask for a fresh rendition of the current node, if AI dialogue is on.
    fn request_line(&mut self) -> Output {
        if !self.ai_enabled() {
            return Output::Normal;
        }
        let Some(conversation) = self.conversation.as_mut() else {
            return Output::Normal;
        };

        let context = conversation
            .engine
            .prompt_context(self.moods.latest(), self.options.history_window);
        let prompt = match self.cast.prompts[conversation.npc].build_context(&context) {
            Ok(prompt) => prompt,
            Err(err) => {
                log::warn!("prompt failed, keeping the scripted line: {err}");
                return Output::Normal;
            }
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        conversation.pending = Some(Pending {
            ticket,
            visit: conversation.engine.visit(),
            deadline: self.now + self.options.llm_timeout + self.options.tick,
        });
        log::debug!("ticket {ticket} prompt:\n{prompt}");
        Output::Generate(GenerateRequest { ticket, prompt })
    }

    fn on_reply(&mut self, reply: GenerateReply) {
        let Some(conversation) = self.conversation.as_mut() else {
            log::debug!("dropping reply {} for a closed conversation", reply.ticket);
            return;
        };
        let pending = match conversation.pending {
            Some(pending) if pending.ticket == reply.ticket => pending,
            _ => {
                log::debug!("dropping stale reply {}", reply.ticket);
                return;
            }
        };
        conversation.pending = None;

        let name = &self.world.npcs[conversation.npc].persona.name;
        match reply.result {
            Ok(line) => {
                if conversation.engine.apply(pending.visit, Ok(line)) {
                    self.dialogue.reset();
                    self.events.push(format!("{name} improvised a line"));
                }
            }
            Err(err) => {
                self.events.push(format!("generation failed ({err}), scripted line kept"));
                conversation.engine.apply(pending.visit, Err(err));
            }
        }
    }

    fn check_deadline(&mut self) {
        let Some(conversation) = self.conversation.as_mut() else {
            return;
        };
        if let Some(pending) = conversation.pending {
            if self.now >= pending.deadline {
                conversation.pending = None;
                log::warn!("ticket {} passed its deadline, keeping the scripted line", pending.ticket);
                self.events.push("generation timed out, scripted line kept");
            }
        }
    }

    fn settings_input(&mut self, key: KeyEvent) -> Output {
        match self.settings.handler_input(key) {
            Ok(SettingsOutput::Changed(Field::Camera)) => {
                let enabled = self.settings.settings.enable_camera;
                self.events.push(format!("camera {}", if enabled { "on" } else { "off" }));
                if !enabled {
                    self.moods.clear();
                }
                Output::Camera(enabled)
            }
            Ok(SettingsOutput::Changed(Field::AiDialogue)) => {
                let enabled = self.settings.settings.enable_ai_dialogue;
                self.events
                    .push(format!("AI dialogue {}", if enabled { "on" } else { "off" }));
                if !enabled {
                    if let Some(conversation) = self.conversation.as_mut() {
                        conversation.pending = None;
                    }
                }
                Output::Normal
            }
            Ok(SettingsOutput::Saved) => {
                log::info!("settings saved to {}", self.settings.path.display());
                self.events.push("settings saved");
                Output::Normal
            }
            Ok(SettingsOutput::Normal) => Output::Normal,
            Err(err) => {
                log::error!("{err:#}");
                self.events.push(format!("saving settings failed: {err}"));
                Output::Normal
            }
        }
    }

    pub fn render(&mut self, f: &mut Frame) {
        let vertical = Layout::vertical([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(1),
        ]);

        let [tabs_area, main_area, help_area, event_area] = vertical.areas(f.size());

        let tabs = Tabs::new(Tab::TITLES.to_vec())
            .select(self.tab.index())
            .padding("[", "]")
            .block(Block::bordered().title(self.title.clone()));
        f.render_widget(tabs, tabs_area);

        let help_message = match self.tab {
            Tab::World if self.conversation.is_some() => {
                "help: [Enter next/choose] [1-9 choose] [Up/Down select] [WASD walk] [Esc leave]"
            }
            Tab::World => "help: [Arrows/WASD move] [E talk] [Tab switch] [Esc+Esc quit]",
            Tab::Settings => "help: [Up/Down select] [Enter toggle] [Ctrl+S save] [Tab switch]",
            Tab::Log => "help: [Up/Down scroll] [End follow] [Tab switch] [Esc+Esc quit]",
        };

        match self.tab {
            Tab::World => {
                self.view.highlight = self.world.npc_in_reach();
                match &self.conversation {
                    Some(conversation) => {
                        let rows = LINES_PER_PAGE + 2 + conversation.engine.options().len().max(1) + 2;
                        let [map_area, box_area] =
                            Layout::vertical([Constraint::Min(3), Constraint::Length(rows as u16)])
                                .areas(main_area);
                        self.view.render(&self.world, &self.world.map.name, f, map_area);
                        let name = &self.world.npcs[conversation.npc].persona.name;
                        self.dialogue.render(
                            &conversation.engine,
                            name,
                            conversation.pending.is_some(),
                            f,
                            box_area,
                        );
                    }
                    None => self.view.render(&self.world, &self.world.map.name, f, main_area),
                }
            }
            Tab::Settings => self.settings.render(f, main_area),
            Tab::Log => self.events.render(f, main_area),
        }

        f.render_widget(Paragraph::new(help_message), help_area);

        let ai = match (self.ai_available, self.settings.settings.enable_ai_dialogue) {
            (false, _) => "n/a",
            (true, true) => "on",
            (true, false) => "off",
        };
        let status = format!(
            "mood: {} | AI: {ai} | camera: {} | {}",
            self.moods.summary(),
            if self.settings.settings.enable_camera { "on" } else { "off" },
            self.events.last().unwrap_or_default()
        );
        f.render_widget(Paragraph::new(status), event_area);
    }

    pub fn run_loop(mut self, llm: Option<LlmWorker>, mut moods: MoodFeed) -> anyhow::Result<()> {
        // setup terminal
        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        moods.set_enabled(self.settings.settings.enable_camera);
        let tick = self.options.tick;

        let mut main_loop = || -> anyhow::Result<()> {
            loop {
                terminal.draw(|f| self.render(f))?;

                let started = Instant::now();
                self.handler_input(Input::Tick(started));
                if let Some(worker) = &llm {
                    while let Some(reply) = worker.try_recv() {
                        self.handler_input(Input::Generated(reply));
                    }
                }
                for label in moods.drain() {
                    self.handler_input(Input::Mood(label));
                }

                if !event::poll(tick.saturating_sub(started.elapsed()))? {
                    continue;
                }
                match self.handler_input(Input::Event(event::read()?)) {
                    Output::Exit => break,
                    Output::Generate(request) => {
                        let sent = llm.as_ref().is_some_and(|worker| worker.submit(request));
                        if !sent {
                            log::error!("llm worker is gone");
                        }
                    }
                    Output::Camera(enabled) => moods.set_enabled(enabled),
                    Output::Normal => {}
                }
            }
            Ok(())
        };

        let r = main_loop();

        // restore terminal
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            DisableMouseCapture
        )?;
        terminal.show_cursor()?;
        moods.set_enabled(false);
        r
    }
}
