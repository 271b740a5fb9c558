use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pulse_pipeline::{
    ensure_session_state, FixtureNavigator, Pipeline, PipelineConfig, RunOutcome,
};
use pulse_storage::DocumentStore;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pulse-cli")]
#[command(about = "Pulsefeed command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one harvest and rewrite the three JSON documents.
    Fetch,
    /// Print a summary of the current snapshot and leaderboard.
    Report,
}

const EXIT_SETUP_ERROR: u8 = 1;
const EXIT_BLOCKED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Fetch) {
        Commands::Fetch => match run_fetch().await {
            Ok(RunOutcome::Completed(summary)) => {
                println!(
                    "fetch complete: run_id={} sources={} collected={} selected={} history={} (+{})",
                    summary.run_id,
                    summary.sources,
                    summary.collected,
                    summary.selected,
                    summary.history_len,
                    summary.history_added
                );
                ExitCode::SUCCESS
            }
            Ok(RunOutcome::Blocked) => {
                eprintln!(
                    "session blocked: login or checkpoint detected; documents left untouched"
                );
                ExitCode::from(EXIT_BLOCKED)
            }
            Err(err) => {
                error!(error = ?err, "fetch failed");
                ExitCode::from(EXIT_SETUP_ERROR)
            }
        },
        Commands::Report => match run_report().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!(error = ?err, "report failed");
                ExitCode::from(EXIT_SETUP_ERROR)
            }
        },
    }
}

async fn run_fetch() -> Result<RunOutcome> {
    let config = PipelineConfig::from_env();
    ensure_session_state(&config)?;

    let fixtures_dir =
        std::env::var("PULSE_FIXTURES_DIR").unwrap_or_else(|_| "fixtures".to_string());
    let navigator = FixtureNavigator::new(fixtures_dir);

    let pipeline = Pipeline::new(config)?;
    pipeline.run_once(&navigator).await
}

async fn run_report() -> Result<()> {
    let config = PipelineConfig::from_env();
    let store = DocumentStore::new(config.data_dir.clone());

    let mut lines = vec!["# Pulsefeed Daily".to_string(), String::new()];

    match store.load_snapshot().await? {
        Some(snapshot) => {
            lines.push(format!("## Top posts for {}", snapshot.date));
            lines.push(format!(
                "- candidates collected: {}",
                snapshot.all_posts.len()
            ));
            for (rank, post) in snapshot.posts.iter().enumerate() {
                lines.push(format!(
                    "{}. [{}] {} ({} interactions) - {}",
                    rank + 1,
                    post.language,
                    post.author,
                    post.total,
                    post.keyword_id
                ));
            }
        }
        None => lines.push("no snapshot yet; run `pulse-cli fetch` first".to_string()),
    }

    let board = store.load_leaderboard().await?;
    if !board.is_empty() {
        lines.push(String::new());
        lines.push("## All-time leaderboard".to_string());
        for (rank, post) in board.iter().enumerate() {
            lines.push(format!(
                "{}. {} (score: {} = {} likes + {} comments) - {}",
                rank + 1,
                post.author,
                post.score(),
                post.likes,
                post.comments,
                post.date.map(|d| d.to_string()).unwrap_or_default()
            ));
        }
    }

    println!("{}", lines.join("\n"));
    Ok(())
}
