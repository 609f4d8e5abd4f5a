use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use streamcall::core::LifecycleManager;
use streamcall::invoker::EchoInvoker;
use streamcall::renderer::LogRenderer;
use streamcall::runner::{SourceEvent, StreamRunner};
use streamcall::tools::{notation, ToolDefinition};
use streamcall::utils::config::StreamConfig;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream recorded model output through the lifecycle pipeline
    Replay {
        /// One source per file
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Bytes per growth event
        #[arg(long, default_value_t = 16)]
        chunk_size: usize,

        #[arg(long, default_value_t = 10)]
        chunk_delay_ms: u64,

        /// JSON file with StreamConfig overrides
        #[arg(long)]
        config: Option<PathBuf>,

        /// JSON array of tool definitions used for validation
        #[arg(long)]
        tools: Option<PathBuf>,

        /// Clamped to 25..=50, 0 disables debouncing
        #[arg(long)]
        debounce_ms: Option<u64>,

        #[arg(long, default_value_t = false)]
        no_auto_execute: bool,
    },
    /// Convert between JSON Schema and the compact notation
    Notation {
        #[command(subcommand)]
        direction: NotationCommand,
    },
}

#[derive(Subcommand, Debug)]
enum NotationCommand {
    /// JSON Schema (file path or inline JSON) to notation
    Encode { input: String },
    /// Notation (file path or inline text) to JSON Schema
    Decode { input: String },
}

fn read_input(input: &str) -> Result<String> {
    let path = Path::new(input);
    if path.is_file() {
        return std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()));
    }
    Ok(input.to_string())
}

/// Split on char boundaries, at least one char per chunk.
fn chunk_ends(text: &str, chunk_size: usize) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut end = 0;
    while end < text.len() {
        end = (end + chunk_size.max(1)).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        ends.push(end);
    }
    ends
}

async fn replay(
    files: Vec<PathBuf>,
    chunk_size: usize,
    chunk_delay: Duration,
    config: StreamConfig,
    tools: Vec<ToolDefinition>,
) -> Result<()> {
    let mut sources = Vec::with_capacity(files.len());
    for path in &files {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        sources.push((path.display().to_string(), text));
    }

    let mut manager = LifecycleManager::new(config, LogRenderer);
    manager.register_tools(&tools);
    let (tx, rx) = mpsc::channel(64);
    let runner = tokio::spawn(StreamRunner::new(manager, EchoInvoker).run(rx));

    for (source_id, text) in sources {
        let tx = tx.clone();
        tokio::spawn(async move {
            for end in chunk_ends(&text, chunk_size) {
                let event = SourceEvent::Growth {
                    source_id: source_id.clone(),
                    snapshot: text[..end].to_string(),
                };
                if tx.send(event).await.is_err() {
                    return;
                }
                tokio::time::sleep(chunk_delay).await;
            }
        });
    }
    drop(tx);

    let mut manager = runner.await.context("runner task failed")?;
    let events = manager.drain_events();
    streamcall::log_info!("{} lifecycle event(s) committed", events.len());
    println!("{}", serde_json::to_string_pretty(&manager.views())?);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    streamcall::utils::init_tracing(&args.log_level);

    match args.command {
        Command::Replay {
            files,
            chunk_size,
            chunk_delay_ms,
            config,
            tools,
            debounce_ms,
            no_auto_execute,
        } => {
            let mut config = match config {
                Some(path) => StreamConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => StreamConfig::default(),
            };
            if let Some(ms) = debounce_ms {
                config = config.with_debounce_ms(ms);
            }
            if no_auto_execute {
                config.auto_execute = false;
            }
            config.validate()?;

            let tools: Vec<ToolDefinition> = match tools {
                Some(path) => serde_json::from_str(&read_input(&path.to_string_lossy())?)
                    .with_context(|| format!("parsing tools {}", path.display()))?,
                None => Vec::new(),
            };
            replay(
                files,
                chunk_size,
                Duration::from_millis(chunk_delay_ms),
                config,
                tools,
            )
            .await
        }
        Command::Notation { direction } => {
            match direction {
                NotationCommand::Encode { input } => {
                    let schema: serde_json::Value = serde_json::from_str(&read_input(&input)?)
                        .context("input is not JSON")?;
                    println!("{}", notation::encode(&schema)?);
                }
                NotationCommand::Decode { input } => {
                    let schema = notation::decode(read_input(&input)?.trim())?;
                    println!("{}", serde_json::to_string_pretty(&schema)?);
                }
            }
            Ok(())
        }
    }
}
