use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use signal_cue::audio_runtime::{Bed, LocalDevice};
use signal_cue::config::Config;
use signal_cue::device::{MediaDevice, MediaState, MemoryDevice};
use signal_cue::engine::{Engine, EngineHandle};
use signal_cue::picker::{self, FilePicker};
use signal_cue::status::StatusSnapshot;
use signal_cue::{http, wav};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{Notify, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "signalcue", about = "Audio injection engine for live rooms", version)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "SIGNALCUE_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and the HTTP control endpoint
    Run {
        /// Port for the control endpoint
        #[arg(short, long, default_value_t = http::DEFAULT_PORT, env = "SIGNALCUE_PORT")]
        port: u16,
        /// Where merged announcements are written
        #[arg(long, env = "SIGNALCUE_TEMP_DIR")]
        temp_dir: Option<PathBuf>,
        /// Sound card to render on (system default when omitted)
        #[arg(long)]
        output_device: Option<String>,
        /// Looping background source, as NAME=PATH (repeatable)
        #[arg(long = "bed", value_parser = Bed::parse)]
        beds: Vec<Bed>,
        /// Render nothing; clips finish as soon as they open
        #[arg(long)]
        dry_run: bool,
    },
    /// Concatenate WAV files into one
    Merge {
        /// Input files, in playback order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Pick random audio files from a folder
    Pick {
        dir: PathBuf,
        /// Number of picks
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Avoid repeats within the configured history size
        #[arg(long)]
        history: bool,
    },
    /// Engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Show current configuration
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_cue=info,signalcue=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Run {
            port,
            temp_dir,
            output_device,
            beds,
            dry_run,
        } => {
            let temp_dir = temp_dir.unwrap_or_else(std::env::temp_dir);
            run(&config_path, port, temp_dir, output_device, beds, dry_run).await
        }
        Commands::Merge { inputs, output } => merge(&inputs, &output),
        Commands::Pick {
            dir,
            count,
            history,
        } => {
            let config = Config::load(&config_path);
            let files = picker::list_audio_files(&dir);
            if files.is_empty() {
                bail!("no audio files in '{}'", dir.display());
            }
            let mut picker = FilePicker::new();
            for _ in 0..count {
                if let Some(file) = picker.pick_from(&dir, &files, history, config.history_size) {
                    println!("{}", file.display());
                }
            }
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigCmd::Show => {
                let config = Config::load(&config_path);
                println!("# {}", config_path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigCmd::Init { force } => {
                if config_path.exists() && !force {
                    bail!(
                        "'{}' already exists (use --force to overwrite)",
                        config_path.display()
                    );
                }
                Config::default()
                    .save(&config_path)
                    .with_context(|| format!("failed to write {}", config_path.display()))?;
                println!("Wrote {}", config_path.display());
                Ok(())
            }
        },
    }
}

async fn run(
    config_path: &Path,
    port: u16,
    temp_dir: PathBuf,
    output_device: Option<String>,
    beds: Vec<Bed>,
    dry_run: bool,
) -> Result<()> {
    let config = Config::load(config_path);
    if config.media_source_name.is_empty() {
        warn!("mediaSourceName is empty; clips will be skipped until it is set");
    }
    fs::create_dir_all(&temp_dir)
        .with_context(|| format!("failed to create temp dir {}", temp_dir.display()))?;

    let device: Arc<dyn MediaDevice> = if dry_run {
        let memory = Arc::new(MemoryDevice::new());
        memory.add_source(&config.media_source_name, 1.0);
        for bed in &beds {
            memory.add_source(&bed.name, 1.0);
        }
        tokio::spawn(finish_dry_run_clips(
            memory.clone(),
            config.media_source_name.clone(),
        ));
        info!("dry run: nothing will be rendered");
        memory
    } else {
        Arc::new(
            LocalDevice::spawn(&config.media_source_name, output_device, beds)
                .context("failed to start audio thread")?,
        )
    };

    let engine = Engine::new(config, device, temp_dir);
    let handle = engine.handle();
    let status = engine.subscribe();
    let engine_task = tokio::spawn(engine.run());
    tokio::spawn(log_status_changes(status.clone()));
    let quit = Arc::new(Notify::new());
    tokio::spawn(operator_console(handle.clone(), status, quit.clone()));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let stop = async move {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = quit.notified() => info!("operator quit"),
        }
    };
    let served = http::serve(handle.clone(), addr, stop).await;

    handle.shutdown();
    engine_task.await.context("engine task panicked")?;
    served.with_context(|| format!("control endpoint on {} failed", addr))?;
    info!("shutdown complete");
    Ok(())
}

fn merge(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let out_dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stamp = chrono::Local::now().timestamp_millis();
    let merged = wav::merge(inputs, &out_dir, stamp).context("merge failed")?;
    if merged != output {
        if inputs.contains(&merged) {
            fs::copy(&merged, output)?;
        } else {
            fs::rename(&merged, output)?;
        }
    }
    println!("Wrote {}", output.display());
    Ok(())
}

/// The in-memory device never ends a clip on its own.
async fn finish_dry_run_clips(device: Arc<MemoryDevice>, name: String) {
    let mut tick = tokio::time::interval(Duration::from_millis(500));
    loop {
        tick.tick().await;
        if device.state(&name).is_ok_and(|s| s == MediaState::Opening) {
            device.set_state(&name, MediaState::Ended);
        }
    }
}

async fn log_status_changes(mut status: watch::Receiver<StatusSnapshot>) {
    let mut last: Option<(String, bool)> = None;
    while status.changed().await.is_ok() {
        let snapshot = status.borrow_and_update().clone();
        let key = (snapshot.message.clone(), snapshot.connected);
        if last.as_ref() != Some(&key) {
            info!(
                state = %snapshot.state,
                connected = snapshot.connected,
                next_time = snapshot.next_time_secs,
                next_noise = snapshot.next_noise_secs,
                "{}",
                snapshot.message
            );
            last = Some(key);
        }
    }
}

/// Line commands on stdin: `time`, `noise`, `status`, `quit`.
async fn operator_console(
    handle: EngineHandle,
    status: watch::Receiver<StatusSnapshot>,
    quit: Arc<Notify>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "" => {}
            "time" => handle.trigger_time_now(),
            "noise" => handle.trigger_noise_now(),
            "status" => {
                let snapshot = status.borrow().clone();
                match serde_json::to_string_pretty(&snapshot) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!(error = %e, "cannot render status"),
                }
            }
            "quit" => {
                quit.notify_one();
                break;
            }
            other => println!("unknown command '{}' (time, noise, status, quit)", other),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
