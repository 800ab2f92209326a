//! Live performance runner.
//!
//! Loads a performance file, runs it, and prints the stage as it happens.
//! The operator steers the show by typing `#` commands on stdin:
//!
//! ```bash
//! cargo run -p stage -- --performance demos/museum.json --log-dir runs
//! ```
//!
//! With `--human <name>` one extra actor is played from the keyboard; any
//! line that is not a command is spoken by them.

mod commands;
mod output;

use commands::{Command, Input, HELP};
use llm_client::ChatClient;
use stage_core::actor::HumanPerformer;
use stage_core::{
    CastMember, JsonlPersistence, LlmDirector, PerformanceSpec, StageConfig, StageDeps,
    StageEvent, StageHandle, StageManager,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How long the human actor has to answer before their turn passes.
const HUMAN_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Default)]
struct Options {
    performance: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    director: bool,
    json: bool,
    human: Option<String>,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self, String> {
        let mut options = Options::default();
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--performance" | "-p" => options.performance = Some(value(&mut iter, arg)?.into()),
                "--log-dir" => options.log_dir = Some(value(&mut iter, arg)?.into()),
                "--human" => options.human = Some(value(&mut iter, arg)?),
                "--director" => options.director = true,
                "--json" => options.json = true,
                other if !other.starts_with('-') && options.performance.is_none() => {
                    options.performance = Some(other.into());
                }
                other => return Err(format!("Unknown argument: {other}")),
            }
        }
        Ok(options)
    }
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<String, String> {
    iter.next()
        .cloned()
        .ok_or_else(|| format!("{flag} needs a value"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let options = match Options::parse(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {e}");
            print_help();
            std::process::exit(2);
        }
    };
    let Some(path) = options.performance.clone() else {
        eprintln!("Error: no performance file given.");
        print_help();
        std::process::exit(2);
    };

    let spec = PerformanceSpec::load(&path).await?;
    info!(path = %path.display(), title = %spec.title, "Loaded performance");
    let config = StageConfig::from_env()?;

    let mut deps = StageDeps::new();
    if options.director {
        deps = deps.with_director(LlmDirector::new(ChatClient::from_env()?));
    }
    if let Some(dir) = &options.log_dir {
        deps = deps.with_persistence(Arc::new(JsonlPersistence::new(dir.clone())));
    }

    let mut stage = StageManager::from_spec(spec, config, deps).await?;

    let speech = match &options.human {
        Some(name) => {
            let (performer, tx) = HumanPerformer::channel(name.as_str(), HUMAN_TIMEOUT);
            let member = CastMember::new(
                Arc::new(performer),
                format!("{name} is played live by a member of the audience."),
            );
            if !stage.add_member(member) {
                eprintln!("Error: an actor named {name} already exists.");
                std::process::exit(2);
            }
            Some(tx)
        }
        None => None,
    };

    println!("=== {} ===", stage.title());
    println!("Actors: {}", stage.cast_names().join(", "));
    println!("Events: {}", stage.script().len());
    println!();
    println!("Commands:");
    println!("{HELP}");
    println!();

    let events = stage.subscribe();
    let (handle, task) = stage.spawn();

    let printer = tokio::spawn(print_events(events, options.json));
    let input = tokio::spawn(read_input(handle.clone(), speech));
    let interrupt = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nStopping...");
                handle.stop();
            }
        })
    };

    let (stage, report) = task.await?;
    input.abort();
    interrupt.abort();
    drop(handle);
    drop(stage);
    printer.await.ok();

    println!();
    println!(
        "[DONE] {} ({} scenes played, {} skipped)",
        if report.completed { "Curtain" } else { "Stopped" },
        report.scenes_concluded,
        report.scenes_skipped
    );

    // The stdin reader may still be blocked on a read.
    std::process::exit(0);
}

async fn print_events(mut events: broadcast::Receiver<StageEvent>, json: bool) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let line = if json {
                    output::render_json(&event)
                } else {
                    output::render(&event)
                };
                if let Some(line) = line {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                eprintln!("[WARN] Display fell behind, {missed} events skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn read_input(handle: StageHandle, speech: Option<mpsc::Sender<String>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match commands::parse(&line) {
            Ok(Input::Empty) => {}
            Ok(Input::Speech(text)) => match &speech {
                Some(tx) => {
                    if tx.send(text).await.is_err() {
                        println!("[ERROR] The human actor has left the stage");
                    }
                }
                None => println!("[ERROR] No human actor. Commands start with #, try #help"),
            },
            Ok(Input::Command(command)) => {
                let stop = command == Command::Stop;
                apply(&handle, command);
                if stop {
                    break;
                }
            }
            Err(e) => println!("[ERROR] {e}"),
        }
    }
}

fn apply(handle: &StageHandle, command: Command) {
    match command {
        Command::Pause => handle.pause(),
        Command::Resume => handle.resume(),
        Command::Jump(index) => {
            if let Err(e) = handle.jump(index) {
                println!("[ERROR] {e}");
            }
        }
        Command::Inject { target, content } => handle.inject(content, target.as_deref()),
        Command::Time(when) => handle.time_travel(when),
        Command::Fact(fact) => handle.add_fact(fact, "director"),
        Command::Status => {
            let status = handle.status();
            println!(
                "[STATUS] {} at event {}/{}",
                if status.is_playing { "playing" } else { "paused" },
                (status.current_index + 1).min(status.total_events),
                status.total_events
            );
        }
        Command::Stop => handle.stop(),
        Command::Help => {
            println!("[HELP]");
            println!("{HELP}");
            println!("  (anything else is spoken by the human actor, if any)");
        }
    }
}

fn print_help() {
    println!("stage - live multi-actor performance runner");
    println!();
    println!("Usage: stage [OPTIONS] <performance.json>");
    println!();
    println!("Options:");
    println!("  -p, --performance <path>  Performance file to load");
    println!("  --log-dir <dir>           Write JSONL performance logs under <dir>");
    println!("  --director                Use the model for analysis, adaptation, casting and interventions");
    println!("  --human <name>            Add an actor played from the keyboard");
    println!("  --json                    Print events as JSON lines");
    println!("  -h, --help                Show this help");
    println!();
    println!("Environment:");
    println!("  LLM_API_KEY, LLM_BASE_URL, LLM_MODEL   Default model endpoint");
    println!("  STAGE_MONOPOLY_CAP, STAGE_SHORT_TERM_CAPACITY, STAGE_SPEAK_DELAY_MS,");
    println!("  STAGE_PASS_DELAY_MS, STAGE_TYPE        Engine settings");
    println!("  RUST_LOG                               Log filter (default: info)");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("stage")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_options() {
        let options = Options::parse(&args(&["show.json", "--director", "--human", "Sam"])).unwrap();
        assert_eq!(options.performance, Some(PathBuf::from("show.json")));
        assert!(options.director);
        assert_eq!(options.human.as_deref(), Some("Sam"));
        assert!(!options.json);
    }

    #[test]
    fn test_parse_options_errors() {
        assert!(Options::parse(&args(&["--log-dir"])).is_err());
        assert!(Options::parse(&args(&["--verbose"])).is_err());
    }
}
