use std::{error::Error, path::PathBuf};

use clap::Parser;
use valley_talk::{
    component::{settings::SettingsComponent, App, AppOptions},
    llm::worker::LlmWorker,
    project::{Project, Settings},
    sys::mood::MoodFeed,
};

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, short, required = true)]
    project_path: PathBuf,

    /// replace the LLM client with an echo of the prompt
    #[arg(long)]
    debug_llm: bool,

    /// log records go here while the terminal is in raw mode
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logger(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    let env = env_logger::Env::default();
    let mut builder = match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .map_err(|e| anyhow::anyhow!("cannot create log file `{}`: {e}", path.display()))?;
            let mut builder = env_logger::Builder::from_env(env.default_filter_or("info"));
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            builder
        }
        // Nothing may reach stderr under the TUI unless asked for.
        None => env_logger::Builder::from_env(env.default_filter_or("off")),
    };
    builder.init();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Args::parse();
    init_logger(cli.log_file.as_ref())?;

    let project = Project::load(&cli.project_path)?;
    let (world, cast) = project.build_world()?;

    let settings_path = project.settings_path();
    let settings = SettingsComponent::new(Settings::load(&settings_path), settings_path);

    let worker = project
        .generator(cli.debug_llm)?
        .map(|generator| LlmWorker::spawn(generator, project.llm.timeout()));

    let options = AppOptions {
        tick: project.tick(),
        llm_timeout: project.llm.timeout(),
        history_window: project.run.history_window,
        mood_window: project.expression.window,
    };
    let app = App::new(
        project.title.clone(),
        world,
        cast,
        settings,
        options,
        worker.is_some(),
    );

    let sampler_project = project.clone();
    let moods = MoodFeed::new(Box::new(move |tx| sampler_project.mood_sampler(tx)));

    let res = app.run_loop(worker, moods);

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}
