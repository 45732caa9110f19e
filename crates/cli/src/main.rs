use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use timeline::codec::{decode_compact, encode_compact, CompactLog, EventLog};
use timeline::{Session, TrackKind};
use tracing::{info, warn};

use playback::testing::FakeBackendFactory;
use playback::{ManualTime, RuntimeConfig, RuntimeEvent, RuntimeStatus, TimelineRuntime};

#[derive(Parser)]
#[command(name = "codetape")]
#[command(about = "Inspect and replay recorded coding sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runtime configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a session log
    Inspect {
        /// Session log (full or compact)
        session: PathBuf,
    },

    /// Replay the workspace to a clock and print every resource
    Project {
        session: PathBuf,

        /// Target clock in seconds
        #[arg(long)]
        clock: f64,

        /// Print document contents
        #[arg(long)]
        contents: bool,
    },

    /// Drive the runtime over a session with simulated media
    Simulate {
        session: PathBuf,

        /// Start clock in seconds
        #[arg(long, default_value = "0")]
        from: f64,

        /// Stop after this many seconds of playback
        #[arg(long)]
        seconds: Option<f64>,
    },

    /// Write a full log as compact JSON
    Encode { input: PathBuf, output: PathBuf },

    /// Write a compact log as full JSON
    Decode { input: PathBuf, output: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Inspect { session } => inspect_command(&session),
        Commands::Project {
            session,
            clock,
            contents,
        } => project_command(&session, clock, contents),
        Commands::Simulate {
            session,
            from,
            seconds,
        } => simulate_command(&session, from, seconds, config),
        Commands::Encode { input, output } => encode_command(&input, &output),
        Commands::Decode { input, output } => decode_command(&input, &output),
    }
}

/// Reads either log flavour; compact logs carry a `uris` table.
fn read_log(path: &Path) -> Result<EventLog> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not JSON", path.display()))?;
    let log = if value.get("uris").is_some() {
        let compact = CompactLog::from_json_str(&text)?;
        decode_compact(&compact)?
    } else {
        EventLog::from_json_str(&text)?
    };
    Ok(log)
}

fn read_session(path: &Path) -> Result<Session> {
    let log = read_log(path)?;
    let session = Session::from_log(log)
        .with_context(|| format!("failed to load session {}", path.display()))?;
    Ok(session)
}

fn inspect_command(path: &Path) -> Result<()> {
    let session = read_session(path)?;
    session.store.verify()?;

    println!("session {}", session.id);
    println!("  format version: {}", session.format_version);
    println!("  duration: {:.1}s", session.duration);
    println!("  events: {}", session.store.len());
    println!("  resources: {}", session.store.uris().count());
    for uri in session.store.uris() {
        println!("    {} ({} events)", uri, session.store.track_len(uri));
    }
    let audio = session.tracks.iter().filter(|t| t.kind == TrackKind::Audio).count();
    println!(
        "  tracks: {} audio, {} video",
        audio,
        session.tracks.len() - audio
    );
    for track in &session.tracks {
        println!(
            "    {:?} {} [{:.1}, {:.1}) {}",
            track.kind, track.id, track.range.start, track.range.end, track.src
        );
    }
    println!("  blobs: {}", session.blobs.len());
    Ok(())
}

fn project_command(path: &Path, clock: f64, contents: bool) -> Result<()> {
    let session = read_session(path)?;
    let mut projector = session.projector();
    let steps = projector
        .seek(&session.store, clock)
        .with_context(|| format!("replay to {clock}s failed"))?;
    info!(clock, steps, "projected workspace");

    let worktree = projector.worktree();
    if let Some(active) = worktree.active_editor() {
        println!("active editor: {active}");
    }
    for (uri, item) in worktree.iter() {
        let file = match &item.file {
            Some(file) => format!("{file:?}"),
            None => "-".to_string(),
        };
        let document = item
            .document
            .as_ref()
            .map(|d| format!("{} lines, {}", d.lines.len(), d.language_id));
        let editor = item
            .editor
            .as_ref()
            .map(|e| format!("{} selections", e.selections.len()));
        println!(
            "{uri}\n  file: {file}\n  document: {}\n  editor: {}",
            document.as_deref().unwrap_or("-"),
            editor.as_deref().unwrap_or("-")
        );
        if contents {
            if let Some(document) = &item.document {
                for line in &document.lines {
                    println!("    | {line}");
                }
            }
        }
    }
    Ok(())
}

fn simulate_command(path: &Path, from: f64, seconds: Option<f64>, config: RuntimeConfig) -> Result<()> {
    let session = read_session(path)?;
    let projector = session.projector();
    let time = ManualTime::new();
    let step = config.tick_interval().as_secs_f64();
    let mut runtime = TimelineRuntime::new(
        session,
        projector,
        time.clone(),
        FakeBackendFactory::new(),
        config,
    );
    let events = runtime.subscribe();

    runtime.load()?;
    runtime.seek(from, true)?;
    runtime.play()?;
    let limit = seconds.unwrap_or(f64::INFINITY);
    let mut elapsed = 0.0;
    while runtime.mode().status == RuntimeStatus::Running && elapsed < limit {
        time.advance(step);
        elapsed += step;
        runtime.tick()?;
    }
    if runtime.mode().status == RuntimeStatus::Running {
        runtime.pause()?;
    }

    for event in events.try_iter() {
        if let RuntimeEvent::Error { source, message } = event {
            warn!(?source, %message, "runtime reported an error");
        }
    }
    println!(
        "stopped at {:.2}s of {:.2}s, {} events applied, {} resources",
        runtime.clock(),
        runtime.duration(),
        runtime.projector().event_index().map_or(0, |i| i + 1),
        runtime.worktree().len()
    );
    Ok(())
}

fn encode_command(input: &Path, output: &Path) -> Result<()> {
    let log = read_log(input)?;
    let compact = encode_compact(&log);
    std::fs::write(output, compact.to_json_string()?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(
        events = compact.events.len(),
        uris = compact.uris.len(),
        "wrote compact log"
    );
    Ok(())
}

fn decode_command(input: &Path, output: &Path) -> Result<()> {
    let log = read_log(input)?;
    std::fs::write(output, log.to_json_string()?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!(events = log.events.len(), "wrote full log");
    Ok(())
}
