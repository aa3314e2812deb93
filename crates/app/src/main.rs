use std::{
    io::Write,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use hum_search_core::{
    session::Controls, view, AppConfig, AudioClip, DeviceSink, HumSearchError, IdentifyClient,
    Library, MatchResult, Microphone, PresentationMode, PreviewAction, PreviewPlayer,
    SessionConfig, SessionController, SessionEpoch, SessionOptions, Status, TrackPlayer, TrackSource,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing_subscriber::EnvFilter;

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const PROGRESS_WIDTH: usize = 40;

type Outcome = (SessionEpoch, hum_search_core::Result<Vec<MatchResult>>);

fn main() -> hum_search_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.command, config))
}

async fn run(command: Commands, config: AppConfig) -> hum_search_core::Result<()> {
    match command {
        Commands::Listen { modal, device } => {
            let microphone = device.map(Microphone::named).unwrap_or_default();
            run_session(config, microphone, modal, None).await
        }
        Commands::Identify { input, modal } => {
            run_session(config, Microphone::new(), modal, Some(input.as_path())).await
        }
        Commands::Songs { search } => list_songs(search.as_deref()),
        Commands::Song { id } => run_song(&config, &id).await,
        Commands::Devices => {
            for name in Microphone::list_devices()? {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Health => {
            let client = IdentifyClient::new(&config.backend)?;
            let health = client.health().await?;
            println!("{} ({}) at {}", health.status, health.service, client.base_url());
            Ok(())
        }
        Commands::Catalog => {
            let client = IdentifyClient::new(&config.backend)?;
            for song in client.catalog().await? {
                println!(
                    "{:<32} {:>7} bpm  {:>4} pitches  {}",
                    song.name.as_deref().unwrap_or("Unknown"),
                    song.tempo.map(|t| format!("{t:.1}")).unwrap_or_else(|| "-".into()),
                    song.pitch_count,
                    song.path
                );
            }
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> hum_search_core::Result<AppConfig> {
    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    match &cli.backend_url {
        Some(url) => config.with_backend_url(url.clone()),
        None => Ok(config),
    }
}

/// Interactive record / identify / preview loop.
async fn run_session(
    config: AppConfig,
    microphone: Microphone,
    modal: bool,
    input: Option<&Path>,
) -> hum_search_core::Result<()> {
    let client = IdentifyClient::new(&config.backend)?;
    let options = session_options(&config.session, modal);
    tracing::info!(
        backend = %client.base_url(),
        presentation = ?options.presentation,
        max_results = options.max_results,
        "session ready"
    );

    let mut session = SessionController::new(microphone, options, config.visualizer.clone())?;
    let mut previews: Option<PreviewPlayer<DeviceSink>> = None;
    let (tx, mut rx) = mpsc::unbounded_channel::<Outcome>();

    if let Some(path) = input {
        session.load_clip(AudioClip::from_file(path)?)?;
        spawn_identify(&mut session, &client, &tx);
    }
    render(&session, None);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut frames = tokio::time::interval(FRAME_INTERVAL);

    loop {
        tokio::select! {
            _ = frames.tick() => {
                let before = session.status();
                if let Err(err) = session.tick(Instant::now()) {
                    tracing::debug!(%err, "frame update failed");
                }
                if session.status() == Status::Listening {
                    draw_meter(&session);
                } else if before != session.status() {
                    println!();
                    render(&session, playing(&previews));
                }
                if previews.as_mut().map(PreviewPlayer::poll).unwrap_or(false) {
                    render(&session, None);
                }
            }
            Some((epoch, outcome)) = rx.recv() => {
                if session.finish_identify(epoch, outcome) {
                    render(&session, None);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = line.trim();
                if command == "q" {
                    break;
                }
                handle_command(command, &mut session, &client, &tx, &mut previews).await;
            }
        }
    }

    if let Some(previews) = previews.as_mut() {
        previews.stop();
    }
    session.reset();
    Ok(())
}

/// `--modal` picks the compact presentation; an explicit `max_results` in the
/// config still sets the count.
fn session_options(config: &SessionConfig, modal: bool) -> SessionOptions {
    let mut options = SessionOptions::from_config(config);
    if modal {
        options.presentation = PresentationMode::Modal;
        options.max_results = config
            .max_results
            .unwrap_or_else(|| PresentationMode::Modal.default_max_results());
    }
    options
}

async fn handle_command(
    command: &str,
    session: &mut SessionController<Microphone>,
    client: &IdentifyClient,
    tx: &mpsc::UnboundedSender<Outcome>,
    previews: &mut Option<PreviewPlayer<DeviceSink>>,
) {
    let controls = session.status().controls();
    let result = match command {
        "" if controls.record => session.start_listening(Instant::now()),
        "" if controls.stop => session.stop_listening(),
        "" if controls.identify => {
            spawn_identify(session, client, tx);
            Ok(())
        }
        "r" if controls.reset => {
            if let Some(previews) = previews.as_mut() {
                previews.stop();
            }
            session.reset();
            Ok(())
        }
        _ if controls.upload && command.starts_with("f ") => {
            let path = PathBuf::from(command[2..].trim());
            AudioClip::from_file(&path).and_then(|clip| session.load_clip(clip))
        }
        _ if controls.previews => match command.parse::<usize>() {
            Ok(rank) => toggle_preview(session, client, previews, rank).await,
            Err(_) => Ok(()),
        },
        _ => Ok(()),
    };

    match result {
        Ok(()) => {}
        Err(HumSearchError::InvalidTransition { .. }) => {}
        Err(err) => println!("{err}"),
    }
    if session.status() != Status::Listening {
        render(session, playing(previews));
    }
}

async fn toggle_preview(
    session: &SessionController<Microphone>,
    client: &IdentifyClient,
    previews: &mut Option<PreviewPlayer<DeviceSink>>,
    rank: usize,
) -> hum_search_core::Result<()> {
    let Some(entry) = rank.checked_sub(1).and_then(|i| session.matches().get(i)) else {
        println!("no match #{rank}");
        return Ok(());
    };

    if previews.is_none() {
        *previews = Some(PreviewPlayer::new(DeviceSink::open()?));
    }
    let Some(player) = previews.as_mut() else {
        return Ok(());
    };
    match player.toggle(entry, client).await? {
        PreviewAction::Started(_) | PreviewAction::Resumed(_) => {
            println!("playing {}", entry.display_title())
        }
        PreviewAction::Paused(_) => println!("paused {}", entry.display_title()),
    }
    Ok(())
}

fn spawn_identify(
    session: &mut SessionController<Microphone>,
    client: &IdentifyClient,
    tx: &mpsc::UnboundedSender<Outcome>,
) {
    let ticket = match session.begin_identify() {
        Ok(ticket) => ticket,
        Err(err) => {
            tracing::debug!(%err, "identify ignored");
            return;
        }
    };

    let client = client.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let outcome = client.identify(&ticket.clip).await;
        // The receiver is gone once the user quit; the result is dropped.
        let _ = tx.send((ticket.epoch, outcome));
    });
}

fn playing(previews: &Option<PreviewPlayer<DeviceSink>>) -> Option<&str> {
    previews.as_ref().and_then(PreviewPlayer::now_playing)
}

fn render(session: &SessionController<Microphone>, playing: Option<&str>) {
    println!("{}", view::status_line(session.status()));
    if session.status() == Status::Results {
        for line in view::result_lines(session.matches(), playing) {
            println!("{line}");
        }
    }
    println!("  {}", hints(session.status().controls()));
}

fn draw_meter(session: &SessionController<Microphone>) {
    let remaining = session
        .remaining(Instant::now())
        .unwrap_or_default()
        .as_secs_f32();
    print!("\r{} {remaining:>4.1}s ", view::bars(session.amplitudes()));
    let _ = std::io::stdout().flush();
}

fn hints(controls: Controls) -> String {
    let mut hints = Vec::new();
    if controls.record {
        hints.push("Enter: record");
    }
    if controls.upload {
        hints.push("f <path>: identify a file");
    }
    if controls.stop {
        hints.push("Enter: stop");
    }
    if controls.identify {
        hints.push("Enter: identify");
    }
    if controls.previews {
        hints.push("<n>: play/pause preview");
    }
    if controls.reset {
        hints.push("r: start over");
    }
    hints.push("q: quit");
    hints.join(" · ")
}

fn list_songs(search: Option<&str>) -> hum_search_core::Result<()> {
    let library = Library::bundled()?;
    for song in library.search(search.unwrap_or_default()) {
        println!(
            "{:<18} {:<32} {:<24} {}",
            song.id, song.title, song.artist, song.duration
        );
    }
    Ok(())
}

/// Song detail view with a full-track player.
async fn run_song(config: &AppConfig, id: &str) -> hum_search_core::Result<()> {
    let library = Library::bundled()?;
    let song = library
        .get(id)
        .ok_or_else(|| HumSearchError::msg(format!("unknown song `{id}`")))?;
    println!("{}", view::song_card(song));

    let client = IdentifyClient::new(&config.backend)?;
    let track = client.fetch_track(&song.audio).await?;
    let mut player = TrackPlayer::new(DeviceSink::open()?);
    player.load(track)?;
    println!("Enter: play/pause · s <percent>: seek · q: quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut frames = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = frames.tick() => {
                if player.is_playing() {
                    draw_progress(&player);
                } else if player.poll() {
                    draw_progress(&player);
                    println!();
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = line.trim();
                let result = match command {
                    "q" => break,
                    "" | "p" => player.toggle().map(|_| ()),
                    _ => match command.strip_prefix("s ").map(|v| v.trim().parse::<f64>()) {
                        Some(Ok(percent)) => player
                            .seek_click(percent, 100.0)
                            .map(|_| ()),
                        _ => Ok(()),
                    },
                };
                if let Err(err) = result {
                    println!("{err}");
                }
                draw_progress(&player);
            }
        }
    }
    println!();
    Ok(())
}

fn draw_progress(player: &TrackPlayer<DeviceSink>) {
    print!(
        "\r{}",
        view::progress_line(
            player.progress(),
            &player.elapsed_text(),
            &player.remaining_text(),
            PROGRESS_WIDTH,
        )
    );
    let _ = std::io::stdout().flush();
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Identify songs by humming them", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "HUM_SEARCH_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// Base URL of the matching backend, e.g. http://localhost:8000.
    #[arg(long, env = "HUM_SEARCH_BACKEND_URL", global = true)]
    backend_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Hum into the microphone and look the tune up.
    Listen {
        /// Show the short result list used by the compact view.
        #[arg(long)]
        modal: bool,
        /// Name of the input device to record from.
        #[arg(long)]
        device: Option<String>,
    },
    /// Look up a recorded audio file.
    Identify {
        /// Audio file to upload.
        input: PathBuf,
        #[arg(long)]
        modal: bool,
    },
    /// List the bundled song library.
    Songs {
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Show a song and play it.
    Song {
        /// Song id as printed by `songs`.
        id: String,
    },
    /// List audio input devices.
    Devices,
    /// Check that the backend is reachable.
    Health,
    /// List the songs indexed by the backend.
    Catalog,
}
