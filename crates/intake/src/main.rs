//! CLI entry point for `intake`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use intake::config::{LoggingConfig, SpamConfig};
use intake::db::{self, SqliteMessageRepository};
use intake::email::{is_spam, SearchMode, SpamClassifier};
use intake::shutdown::{self, ShutdownTrigger};
use intake::{load_config, telemetry, Config, IngestionProcessor, MessageRepository, Pipeline};

#[derive(Parser)]
#[command(name = "intake", version, about = "Mailbox ingestion pipeline")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "INTAKE_CONFIG", global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the mailbox until interrupted
    Run,
    /// Run a single poll cycle and print its report
    Once {
        /// Search the backfill date window instead of unread messages
        #[arg(long)]
        backfill: bool,
    },
    /// Show message counts by status
    Stats,
    /// Score a message with the spam heuristics
    Score {
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = read_config(cli.config.as_deref())?;
            telemetry::init_logging(&config.logging)?;
            run(config).await
        }
        Commands::Once { backfill } => {
            let config = read_config(cli.config.as_deref())?;
            telemetry::init_logging(&config.logging)?;
            let mode = if backfill {
                SearchMode::Backfill
            } else {
                SearchMode::Incremental
            };
            once(config, mode).await
        }
        Commands::Stats => {
            let config = read_config(cli.config.as_deref())?;
            let db = db::open_configured(&config.database)?;
            let stats = SqliteMessageRepository::new(db).get_stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!("total: {}", stats.total());
            Ok(())
        }
        Commands::Score { subject, body } => {
            let spam = match cli.config.as_deref() {
                Some(path) => read_config(Some(path))?.spam,
                None => SpamConfig::default(),
            };
            telemetry::init_logging(&LoggingConfig::default())?;
            score(&spam, &subject, &body)
        }
    }
}

fn read_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        bail!("no configuration file given (use --config or INTAKE_CONFIG)");
    };
    load_config(path).with_context(|| format!("loading {}", path.display()))
}

fn build_processor(config: &Config) -> anyhow::Result<IngestionProcessor> {
    let db = db::open_configured(&config.database)?;
    let pipeline = Pipeline::from_config(config, db)?;
    Ok(IngestionProcessor::new(config, Arc::new(pipeline)))
}

fn install_interrupt_handler(trigger: ShutdownTrigger) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, shutting down");
        trigger.trigger();
    })
    .context("installing Ctrl-C handler")
}

async fn run(config: Config) -> anyhow::Result<()> {
    let processor = build_processor(&config)?;
    let (trigger, mut interrupted) = shutdown::channel();
    install_interrupt_handler(trigger)?;

    processor.start().await?;
    interrupted.triggered().await;
    processor.stop().await;
    Ok(())
}

async fn once(config: Config, mode: SearchMode) -> anyhow::Result<()> {
    let processor = build_processor(&config)?;
    let (trigger, cancel) = shutdown::channel();
    install_interrupt_handler(trigger)?;

    let report = processor.run_once(mode, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn score(spam: &SpamConfig, subject: &str, body: &str) -> anyhow::Result<()> {
    let classifier = SpamClassifier::new(spam.keywords.as_slice(), spam.patterns.as_slice())?;
    let value = classifier.score(subject, body, "");
    println!(
        "score: {:.2} ({})",
        value,
        if is_spam(value, spam.threshold) {
            "spam"
        } else {
            "ok"
        }
    );
    for reason in classifier.explain(subject, body, "") {
        println!("  - {}", reason);
    }
    Ok(())
}
