use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use ratatui::{backend::TestBackend, style::Color, Terminal};
use valley_talk::{
    component::{settings::SettingsComponent, App, AppOptions, Input, Output, Tab},
    debug_tool::EchoGenerator,
    llm::{
        worker::{GenerateReply, GenerateRequest, LlmWorker},
        GenerateError, GeneratedLine,
    },
    project::{Cast, Settings},
    sys::{
        dialogue::{DialogueStore, DocumentFormat},
        expression::ExpressionLabel,
        prompt::{Persona, PromptBuilder},
        sprite::Sprite,
        Map, Npc, Position, World,
    },
};

const TRADER: &str = r#"
entry = "welcome"

[nodes.welcome]
text = "Welcome, friend!"
options = [
    { label = "Seeds?", target = "seeds" },
    { label = "Bye.", target = "farewell" },
]

[nodes.seeds]
text = "Parsnips are cheap."
options = [{ label = "I'll take some.", target = "bought" }]

[nodes.bought]
text = "A fine choice!"

[nodes.farewell]
text = "Come back soon."
"#;

fn app(ai_available: bool) -> App {
    let map = Map::parse("test", "#######\n#.....#\n#.....#\n#######").unwrap();
    let store = DialogueStore::parse(TRADER, DocumentFormat::Toml, "trader.toml").unwrap();
    let persona = Persona {
        name: "Merchant Pete".to_string(),
        role: "friendly trader".to_string(),
        situation: None,
    };
    let world = World {
        map,
        npcs: vec![Npc {
            id: "trader".to_string(),
            persona: persona.clone(),
            entry: "welcome".to_string(),
            position: Position::new(3, 1),
            sprite: Sprite::new('P', Color::Yellow),
        }],
        player: Position::new(2, 1),
        player_sprite: Sprite::new('@', Color::White),
        interact_radius: 1,
    };
    let cast = Cast {
        stores: vec![Arc::new(store)],
        prompts: vec![PromptBuilder::new(persona, None).unwrap()],
    };
    let settings = SettingsComponent::new(Settings::default(), PathBuf::from("unused-settings.toml"));
    App::new("test", world, cast, settings, AppOptions::default(), ai_available)
}

fn press(app: &mut App, code: KeyCode) -> Output {
    app.handler_input(Input::Event(Event::Key(KeyEvent::new(code, KeyModifiers::NONE))))
}

fn request(output: Output) -> GenerateRequest {
    match output {
        Output::Generate(request) => request,
        other => panic!("expected a generation request, got {other:?}"),
    }
}

fn reply(ticket: u64, text: &str) -> Input {
    Input::Generated(GenerateReply {
        ticket,
        result: Ok(GeneratedLine::new(text)),
    })
}

#[test]
fn scripted_walkthrough_without_ai() {
    let mut app = app(false);
    assert!(matches!(press(&mut app, KeyCode::Char('e')), Output::Normal));
    assert_eq!(app.current_line(), Some("Welcome, friend!"));

    press(&mut app, KeyCode::Char('1'));
    assert_eq!(app.current_line(), Some("Parsnips are cheap."));
    press(&mut app, KeyCode::Enter);
    assert_eq!(app.current_line(), Some("A fine choice!"));
    assert!(app.conversation().unwrap().engine.is_terminal());

    press(&mut app, KeyCode::Enter);
    assert!(app.conversation().is_none());
}

#[test]
fn nothing_happens_out_of_reach() {
    let mut app = app(true);
    press(&mut app, KeyCode::Left);
    assert_eq!(app.world().player, Position::new(1, 1));
    assert!(matches!(press(&mut app, KeyCode::Char('e')), Output::Normal));
    assert!(app.conversation().is_none());
}

#[test]
fn generated_line_replaces_script() {
    let mut app = app(true);
    let request = request(press(&mut app, KeyCode::Char('e')));
    assert!(request.prompt.contains("Merchant Pete"));
    assert!(request.prompt.contains("\"Welcome, friend!\""));
    assert!(app.is_thinking());
    assert_eq!(app.current_line(), Some("Welcome, friend!"));

    app.handler_input(reply(request.ticket, "Howdy, partner!"));
    assert!(!app.is_thinking());
    assert_eq!(app.current_line(), Some("Howdy, partner!"));
}

#[test]
fn prompt_carries_latest_mood() {
    let mut app = app(true);
    app.handler_input(Input::Mood(ExpressionLabel::Sad));
    app.handler_input(Input::Mood(ExpressionLabel::Happy));
    assert_eq!(app.moods().latest(), ExpressionLabel::Happy);

    let request = request(press(&mut app, KeyCode::Char('e')));
    assert!(request.prompt.contains("Player's current emotion: happy"));
}

#[test]
fn timeout_falls_back_within_one_tick() {
    let mut app = app(true);
    let options = AppOptions::default();
    let t0 = Instant::now();
    app.handler_input(Input::Tick(t0));

    let request = request(press(&mut app, KeyCode::Char('e')));
    app.handler_input(Input::Tick(t0 + options.llm_timeout));
    assert!(app.is_thinking());

    app.handler_input(Input::Tick(t0 + options.llm_timeout + options.tick));
    assert!(!app.is_thinking());
    assert_eq!(app.current_line(), Some("Welcome, friend!"));
    assert_eq!(app.events().last(), Some("generation timed out, scripted line kept"));

    // The late reply is discarded.
    app.handler_input(reply(request.ticket, "Too late!"));
    assert_eq!(app.current_line(), Some("Welcome, friend!"));
}

#[test]
fn failures_keep_scripted_line() {
    let failures = [
        GenerateError::Timeout(Duration::from_secs(4)),
        GenerateError::ServiceUnavailable("503".to_string()),
        GenerateError::RateLimited,
        GenerateError::MalformedResponse("empty".to_string()),
    ];
    for failure in failures {
        let mut app = app(true);
        let request = request(press(&mut app, KeyCode::Char('e')));
        app.handler_input(Input::Generated(GenerateReply {
            ticket: request.ticket,
            result: Err(failure),
        }));
        assert!(!app.is_thinking());
        assert_eq!(app.current_line(), Some("Welcome, friend!"));
    }
}

#[test]
fn reply_for_previous_node_is_discarded() {
    let mut app = app(true);
    let first = request(press(&mut app, KeyCode::Char('e')));
    let second = request(press(&mut app, KeyCode::Char('1')));
    assert_ne!(first.ticket, second.ticket);

    app.handler_input(reply(first.ticket, "Stale welcome"));
    assert_eq!(app.current_line(), Some("Parsnips are cheap."));
    assert!(app.is_thinking());

    app.handler_input(reply(second.ticket, "Parsnips, cheap as dirt!"));
    assert_eq!(app.current_line(), Some("Parsnips, cheap as dirt!"));
}

#[test]
fn walking_away_ends_conversation() {
    let mut app = app(true);
    let first = request(press(&mut app, KeyCode::Char('e')));

    // Arrows pick options while talking, WASD walks.
    press(&mut app, KeyCode::Left);
    assert!(app.conversation().is_some());
    press(&mut app, KeyCode::Char('a'));
    assert!(app.conversation().is_none());

    app.handler_input(reply(first.ticket, "Hello?"));
    assert!(app.conversation().is_none());

    press(&mut app, KeyCode::Char('d'));
    let second = request(press(&mut app, KeyCode::Char('e')));
    app.handler_input(reply(first.ticket, "Hello?"));
    assert_eq!(app.current_line(), Some("Welcome, friend!"));
    app.handler_input(reply(second.ticket, "Back already?"));
    assert_eq!(app.current_line(), Some("Back already?"));
}

#[test]
fn esc_closes_conversation_then_quits_on_double_press() {
    let mut app = app(false);
    press(&mut app, KeyCode::Char('e'));
    assert!(matches!(press(&mut app, KeyCode::Esc), Output::Normal));
    assert!(app.conversation().is_none());

    assert!(matches!(press(&mut app, KeyCode::Esc), Output::Normal));
    assert!(matches!(press(&mut app, KeyCode::Esc), Output::Exit));
}

#[test]
fn esc_count_resets_on_other_keys() {
    let mut app = app(false);
    press(&mut app, KeyCode::Esc);
    press(&mut app, KeyCode::Char('x'));
    assert!(matches!(press(&mut app, KeyCode::Esc), Output::Normal));
}

#[test]
fn disabling_ai_stops_requests() {
    let mut app = app(true);
    press(&mut app, KeyCode::Tab);
    assert_eq!(app.tab(), Tab::Settings);
    assert!(matches!(press(&mut app, KeyCode::Enter), Output::Normal));
    assert!(!app.settings.settings.enable_ai_dialogue);

    press(&mut app, KeyCode::Tab);
    press(&mut app, KeyCode::Tab);
    assert_eq!(app.tab(), Tab::World);
    assert!(matches!(press(&mut app, KeyCode::Char('e')), Output::Normal));
    assert!(!app.is_thinking());
}

#[test]
fn camera_toggle_is_reported() {
    let mut app = app(false);
    press(&mut app, KeyCode::Tab);
    press(&mut app, KeyCode::Down);
    assert!(matches!(press(&mut app, KeyCode::Enter), Output::Camera(false)));
    assert!(matches!(press(&mut app, KeyCode::Enter), Output::Camera(true)));
}

#[test]
fn echo_worker_round_trip() {
    let mut app = app(true);
    let worker = LlmWorker::spawn(Box::new(EchoGenerator::new(Duration::ZERO)), Duration::from_secs(2));

    let request = request(press(&mut app, KeyCode::Char('e')));
    let prompt = request.prompt.clone();
    assert!(worker.submit(request));
    let deadline = Instant::now() + Duration::from_secs(5);
    let reply = loop {
        if let Some(reply) = worker.try_recv() {
            break reply;
        }
        assert!(Instant::now() < deadline, "no reply from worker");
        std::thread::sleep(Duration::from_millis(10));
    };
    app.handler_input(Input::Generated(reply));

    assert_eq!(app.current_line(), Some(prompt.trim()));
    assert!(app.conversation().unwrap().engine.is_generated());
}

#[test]
fn renders_dialogue_box() {
    let mut app = app(false);
    app.handler_input(Input::Mood(ExpressionLabel::Sad));
    app.handler_input(Input::Mood(ExpressionLabel::Neutral));
    app.handler_input(Input::Mood(ExpressionLabel::Happy));
    press(&mut app, KeyCode::Char('e'));

    let mut terminal = Terminal::new(TestBackend::new(80, 30)).unwrap();
    terminal.draw(|f| app.render(f)).unwrap();
    let screen: String = terminal
        .backend()
        .buffer()
        .content
        .iter()
        .map(|cell| cell.symbol())
        .collect();

    assert!(screen.contains("Merchant Pete"));
    assert!(screen.contains("Welcome, friend!"));
    assert!(screen.contains("1. Seeds?"));
    assert!(screen.contains("[World]"));
    assert!(screen.contains("mood: happy (neutral, sad)"));
}
