use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use tealoop::debug::{TapeRecorder, TapeWriter};
use tealoop::demo::{counter, parse_line, CounterMsg, LineProgress};
use tealoop::{
    util, Component, ComponentId, ComponentSettings, Config, DebugSettings, SerdeJsonCodec,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Counter component read from stdin, one command per line")]
struct Args {
    /// Config file (defaults to ~/.tealoop/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Mirror the run to a remote debugger
    #[arg(long)]
    debug: bool,

    /// Debugger address, e.g. localhost:8080
    #[arg(long)]
    url: Option<String>,

    /// Identity reported to the debugger
    #[arg(long)]
    component_id: Option<ComponentId>,

    /// Record every snapshot to a JSONL tape
    #[arg(long)]
    tape: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging to file (~/.tealoop/logs/tealoop.log)
    fs::create_dir_all(util::logs_dir())?;

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(util::log_file_path())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(log_file)
        .with_ansi(false) // Disable ANSI colors in log file
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if args.debug {
        config = config.with_debug_enabled(true);
    }
    if let Some(url) = args.url {
        config = config.with_debug_url(url);
    }
    if let Some(component_id) = args.component_id {
        config = config.with_component_id(component_id);
    }

    let mut env = counter::env();
    if let Some(path) = &args.tape {
        let writer = TapeWriter::create(path)
            .with_context(|| format!("failed to create tape {}", path.display()))?;
        env = env.with_interceptor(TapeRecorder::new(
            Arc::new(writer),
            config.debug.component_id.clone(),
            SerdeJsonCodec,
        ));
    }

    let mut settings = ComponentSettings::default().with_share_options(config.share.options());
    if config.debug.enabled {
        tracing::info!(
            url = %config.debug.url,
            component_id = %config.debug.component_id,
            "Debug mirror enabled"
        );
        settings = settings.with_debugger(
            DebugSettings::new(config.debug.component_id.clone(), SerdeJsonCodec)
                .with_url(config.debug.url.clone()),
        );
    }
    let component = Component::with_settings(env, settings);

    let (tx, rx) = mpsc::channel(16);
    let (eof_tx, mut eof_rx) = oneshot::channel();
    tokio::spawn(read_stdin(tx, eof_tx));

    let mut snapshots = component.snapshots(ReceiverStream::new(rx));
    // With a debugger attached, messages keep arriving after stdin closes.
    let mut progress = LineProgress::new(config.debug.enabled);
    let mut stdin_open = true;

    loop {
        tokio::select! {
            next = snapshots.next() => match next {
                Some(Ok(snapshot)) => {
                    progress.observe(&snapshot);
                    println!("{}", serde_json::to_string(snapshot.current_state())?);
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
            total = &mut eof_rx, if stdin_open => {
                stdin_open = false;
                progress.input_closed(total.unwrap_or(0));
            }
            _ = tokio::signal::ctrl_c() => {
                component.cancel();
                break;
            }
        }

        if progress.is_done() {
            break;
        }
    }

    Ok(())
}

/// Forward parsed stdin lines to the component, reporting how many were sent
/// once stdin closes.
async fn read_stdin(tx: mpsc::Sender<CounterMsg>, eof: oneshot::Sender<usize>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut sent = 0;
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                break;
            }
        };
        match parse_line(&line) {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    break;
                }
                sent += 1;
            }
            Err(counter::ParseLineError::Empty) => {}
            Err(e) => eprintln!("{e}"),
        }
    }
    let _ = eof.send(sent);
}
