use anyhow::{Context, Result};
use clap::Parser;
use replystream::cli::{Cli, Commands, ConfigAction};
use replystream::config::Config;
use replystream::pipeline::{Collaborators, PipelineConfig, ReplyPipeline};
use replystream::replay::{ReplayRequest, replay};
use std::io::Read;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match cli.command {
        Commands::Replay {
            ref input,
            chunk_size,
            ref message,
            ref speaker,
        } => {
            let config = load_config(cli.config.as_deref(), cli.workers)?;
            let text = read_input(input)?;

            let pipeline = ReplyPipeline::new(
                PipelineConfig::from_config(&config),
                Collaborators::passthrough(),
            );
            let mut stdout = std::io::stdout().lock();
            let units = replay(
                &pipeline,
                ReplayRequest {
                    text: &text,
                    chunk_size,
                    user_message: message,
                    speaker: speaker.as_deref(),
                },
                &mut stdout,
            )
            .await?;
            tracing::debug!(units = units.len(), "replay finished");
        }
        Commands::Config { ref action } => match action {
            ConfigAction::Show => {
                let config = load_config(cli.config.as_deref(), cli.workers)?;
                print!("{}", config.to_toml()?);
            }
            ConfigAction::Path => {
                println!("{}", Config::default_path()?.display());
            }
        },
    }

    Ok(())
}

/// Install the tracing subscriber. `REPLYSTREAM_LOG` wins over `-v`/`-q`.
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_env("REPLYSTREAM_LOG")
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/replystream/config.toml)
/// 3. Built-in defaults
///
/// Environment overrides apply on top, then `--workers`.
fn load_config(custom_path: Option<&Path>, workers: Option<usize>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        let default_path = Config::default_path()?;
        Config::load_or_default(&default_path)?
    };

    let mut config = config.with_env_overrides();
    if let Some(workers) = workers {
        config.pipeline.workers = workers;
    }
    config.validate()?;
    Ok(config)
}

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read reply from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("Failed to read reply from {}", input.display()))
    }
}
