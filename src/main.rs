//! # Chronicler CLI
//!
//! Two commands:
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chronicler analyze <repository>` | Group history into episodes and print a table |
//! | `chronicler ask <repository> <question>` | Answer a question about the history via RAG |
//!
//! `analyze` needs only a readable repository (local path or cloneable
//! URL). `ask` additionally needs `OPENAI_API_KEY`; `GITHUB_TOKEN` is
//! optional and enriches episodes with issues and pull requests.

use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chronicler::export::export_episodes;
use chronicler::generator::Narrative;
use chronicler::models::Episode;
use chronicler::orchestrator::{analyze_repository, RagConfig, RagPipeline};

/// Chronicler — turn a repository's development history into searchable
/// episodes and ask questions about it.
#[derive(Parser)]
#[command(
    name = "chronicler",
    about = "Turn a repository's development history into searchable episodes and ask questions about it",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a repository and display grouped episodes.
    ///
    /// Accepts a local path or a remote URL. Each row shows the episode
    /// id, unique-author count, commit count, and date range.
    Analyze {
        /// Local path or remote URL of the repository.
        repository: String,

        /// Write episodes to this file as a JSON array.
        #[arg(long)]
        export: Option<PathBuf>,
    },

    /// Ask a natural-language question about a repository using RAG.
    ///
    /// Analyzes the repository, indexes episode summaries into the vector
    /// store, retrieves relevant context for the question, and generates
    /// an answer with the configured LLM.
    Ask {
        /// Local path or remote URL of the repository.
        repository: String,

        /// The question to answer.
        question: String,

        /// Number of similar episodes to retrieve for context.
        #[arg(long, default_value_t = 3)]
        topk: usize,

        /// Maximum number of context chunks carried into the prompt.
        #[arg(long = "max-context", default_value_t = 10)]
        max_context: usize,

        /// Force reindexing of episodes.
        #[arg(long)]
        reindex: bool,

        /// Show detailed progress.
        #[arg(long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = match &cli.command {
        Commands::Ask { verbose: true, .. } => "chronicler=debug",
        _ => "chronicler=warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Analyze { repository, export } => run_analyze(&repository, export).await,
        Commands::Ask {
            repository,
            question,
            topk,
            max_context,
            reindex,
            verbose,
        } => run_ask(&repository, &question, topk, max_context, reindex, verbose).await,
    }
}

async fn run_analyze(repository: &str, export: Option<PathBuf>) -> anyhow::Result<()> {
    let ctx = CancellationToken::new();
    let episodes = analyze_repository(&ctx, repository, None)
        .await
        .context("analysis failed")?;

    if episodes.is_empty() {
        println!("No episodes found in repository");
        return Ok(());
    }

    print_episode_table(&episodes);

    if let Some(path) = export {
        let mut file = File::create(&path)
            .with_context(|| format!("creating export file {}", path.display()))?;
        export_episodes(&episodes, &mut file).context("exporting episodes")?;
        eprintln!("Exported {} episodes to {}", episodes.len(), path.display());
    }

    Ok(())
}

fn print_episode_table(episodes: &[Episode]) {
    const ID_WIDTH: usize = 12;
    const AUTHOR_WIDTH: usize = 8;
    const COMMIT_WIDTH: usize = 8;

    println!(
        "{:<ID_WIDTH$} {:>AUTHOR_WIDTH$} {:>COMMIT_WIDTH$}  {}",
        "EPISODE", "AUTHORS", "COMMITS", "DATE RANGE"
    );
    println!(
        "{} {} {}  {}",
        "-".repeat(ID_WIDTH),
        "-".repeat(AUTHOR_WIDTH),
        "-".repeat(COMMIT_WIDTH),
        "-".repeat(28)
    );

    for episode in episodes {
        let authors = episode.commit_authors();
        let date_range = match (episode.commits.first(), episode.commits.last()) {
            (Some(first), Some(last)) => {
                let start = first.committed_at.format("%b %d, %H:%M");
                if first.committed_at == last.committed_at {
                    start.to_string()
                } else {
                    format!("{start} → {}", last.committed_at.format("%b %d, %H:%M"))
                }
            }
            _ => "No commits".to_string(),
        };

        println!(
            "{:<ID_WIDTH$} {:>AUTHOR_WIDTH$} {:>COMMIT_WIDTH$}  {}",
            episode.id,
            authors.len(),
            episode.commits.len(),
            date_range
        );
    }

    let total_commits: usize = episodes.iter().map(|e| e.commits.len()).sum();
    let unique_authors: HashSet<String> = episodes
        .iter()
        .flat_map(|e| e.commit_authors())
        .map(|a| a.email)
        .collect();
    println!();
    println!(
        "Total: {} episodes, {} commits, {} unique authors",
        episodes.len(),
        total_commits,
        unique_authors.len()
    );
}

async fn run_ask(
    repository: &str,
    question: &str,
    topk: usize,
    max_context: usize,
    reindex: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    let ctx = CancellationToken::new();

    println!();
    println!("Question:");
    println!("{question}");
    println!();

    if verbose {
        eprintln!("-> Analyzing repository...");
    }
    let episodes = analyze_repository(&ctx, repository, None)
        .await
        .context("analysis failed")?;
    if episodes.is_empty() {
        anyhow::bail!("no episodes found in repository");
    }
    if verbose {
        eprintln!("ok Found {} episodes", episodes.len());
    }

    let config = RagConfig {
        top_k: topk,
        max_context_size: max_context,
        reindex_on_demand: reindex,
        ..RagConfig::default()
    };
    let pipeline =
        RagPipeline::with_in_memory_store(config).context("initializing RAG pipeline")?;

    // Run the pipeline, then close the store on every exit path.
    let outcome = ask_with_pipeline(&pipeline, &ctx, question, &episodes, verbose).await;
    let close_outcome = pipeline.close().await;

    let narrative = outcome.context("answering the question")?;
    close_outcome.context("closing the vector store")?;

    println!("Answer:");
    println!();
    println!("{}", narrative.text.trim());
    println!();

    Ok(())
}

async fn ask_with_pipeline(
    pipeline: &RagPipeline,
    ctx: &CancellationToken,
    question: &str,
    episodes: &[Episode],
    verbose: bool,
) -> chronicler::error::Result<Narrative> {
    if verbose {
        eprintln!("-> Indexing episodes...");
    }
    pipeline.index_episodes(ctx, episodes).await?;

    if verbose {
        eprintln!("-> Retrieving context and generating answer...");
    }
    pipeline
        .generate_project_narrative(ctx, question, episodes)
        .await
}
