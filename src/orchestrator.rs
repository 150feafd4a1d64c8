//! End-to-end pipeline orchestration.
//!
//! `analyze_repository` runs ingest → cluster: it detects the platform
//! from the repository argument, opens (or clones) the git repository,
//! parses history, optionally enriches the activity with forge artifacts,
//! and groups everything into episodes.
//!
//! [`RagPipeline`] owns the query side: index episode summaries, retrieve
//! context, assemble prompts, and generate narratives. Project-level
//! questions get a hybrid-search boost: literal `PR #n` / `issue n`
//! references in the question pull the owning episode into the context
//! with a maximal score even when semantic similarity missed it.

use std::sync::Arc;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter;
use crate::cluster::GroupingConfig;
use crate::embedding::{Embedder, OpenAiEmbedder};
use crate::error::{Error, Result};
use crate::generator::{Generator, Llm, LlmConfig, Narrative, OpenAiLlm};
use crate::indexer::{index_episodes, IndexOptions};
use crate::ingest::git;
use crate::ingest::github::GithubClient;
use crate::models::{Episode, RepositoryActivity, SourcePlatform};
use crate::prompt::{assemble_project_query_prompt, assemble_prompt};
use crate::retrieval::Retriever;
use crate::store::memory::InMemoryStore;
use crate::store::{ContextChunk, MilvusConfig, SearchOptions, VectorStore};
use crate::summarizer::{build_episode_summary, build_summary_text};

static QUERY_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:pr|pull request|issue)\s*#?(\d+)").unwrap());

/// Configuration for the RAG pipeline.
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Number of similar episodes to retrieve as context.
    pub top_k: usize,
    /// Maximum number of context chunks carried into a prompt.
    pub max_context_size: usize,
    /// Force re-indexing of episodes before retrieval.
    pub reindex_on_demand: bool,
    pub embedder_model: String,
    pub embedder_dimension: usize,
    pub llm: LlmConfig,
    pub milvus: MilvusConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_context_size: 10,
            reindex_on_demand: false,
            embedder_model: "text-embedding-3-large".to_string(),
            embedder_dimension: 3072,
            llm: LlmConfig::default(),
            milvus: MilvusConfig::from_env(),
        }
    }
}

/// Strip the basename out of a path or URL, dropping a `.git` suffix.
pub fn extract_repo_name(repo: &str) -> String {
    let trimmed = repo.trim_end_matches('/');
    let name = trimmed.rsplit('/').next().unwrap_or(trimmed);
    name.trim_end_matches(".git").to_string()
}

/// Parse `owner/name` out of a hosted-forge URL for the given host.
fn parse_hosted_git_url(url: &str, host: &str) -> (String, String) {
    let mut url = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("git@")
        .to_string();

    // SSH URLs separate host and path with a colon.
    if let Some(pos) = url.find(':') {
        url.replace_range(pos..=pos, "/");
    }

    let url = url.strip_prefix(&format!("{host}/")).unwrap_or(&url);
    let url = url
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .trim_end_matches('/');

    let parts: Vec<&str> = url.split('/').collect();
    if parts.len() >= 2 {
        (parts[0].to_string(), parts[1].to_string())
    } else {
        (String::new(), url.to_string())
    }
}

/// Detect the source platform from a repository argument, returning the
/// platform, owner, and repository name. Anything that is not a
/// recognized forge URL is treated as a plain git repository.
pub fn detect_platform(repo: &str) -> (SourcePlatform, String, String) {
    if repo.contains("github.com") {
        let (owner, name) = parse_hosted_git_url(repo, "github.com");
        return (SourcePlatform::GitHub, owner, name);
    }
    (SourcePlatform::Git, String::new(), extract_repo_name(repo))
}

/// Analyze a repository with the default grouping configuration.
///
/// `repo` may be a local path or a remote URL; the forge token falls back
/// to `GITHUB_TOKEN` when not passed explicitly.
pub async fn analyze_repository(
    ctx: &CancellationToken,
    repo: &str,
    token: Option<&str>,
) -> Result<Vec<Episode>> {
    analyze_repository_with_config(ctx, repo, &GroupingConfig::default(), token).await
}

/// Analyze a repository with a custom grouping configuration.
pub async fn analyze_repository_with_config(
    ctx: &CancellationToken,
    repo: &str,
    config: &GroupingConfig,
    token: Option<&str>,
) -> Result<Vec<Episode>> {
    if ctx.is_cancelled() {
        return Err(Error::Cancelled("analysis"));
    }

    let api_token = match token {
        Some(token) if !token.is_empty() => token.to_string(),
        _ => std::env::var("GITHUB_TOKEN").unwrap_or_default(),
    };

    let activity = ingest_repository(ctx, repo, &api_token).await?;

    if ctx.is_cancelled() {
        return Err(Error::Cancelled("clustering"));
    }

    let episodes = activity.group_into_episodes(config);
    info!(
        episodes = episodes.len(),
        commits = activity.commits.len(),
        artifacts = activity.artifacts.len(),
        "analysis complete"
    );
    Ok(episodes)
}

async fn ingest_repository(
    ctx: &CancellationToken,
    repo: &str,
    token: &str,
) -> Result<RepositoryActivity> {
    let (platform, owner, repo_name) = detect_platform(repo);
    debug!(?platform, %owner, %repo_name, "detected platform");

    let repository = match git::open_repository(repo) {
        Ok(repository) => repository,
        Err(_) => {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled("clone"));
            }
            git::clone_repository(repo)?
        }
    };

    let parsed = git::parse_repository(&repository, repo, git::IngestOptions::default())?;

    let mut activity = RepositoryActivity {
        platform,
        repository_url: repo.to_string(),
        repository_name: repo_name.clone(),
        owner: owner.clone(),
        default_branch: parsed.head_branch,
        commits: parsed.commits,
        artifacts: Vec::new(),
        fetched_at: Utc::now(),
    };

    if platform == SourcePlatform::GitHub
        && !token.is_empty()
        && !owner.is_empty()
        && !repo_name.is_empty()
    {
        match fetch_forge_artifacts(ctx, token, &owner, &repo_name).await {
            Ok(artifacts) => activity.artifacts.extend(artifacts),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => {
                let err = Error::IngestFailed(Box::new(err));
                warn!(error = %err, "continuing with version-control data only");
            }
        }
    }

    Ok(activity)
}

async fn fetch_forge_artifacts(
    ctx: &CancellationToken,
    token: &str,
    owner: &str,
    repo: &str,
) -> Result<Vec<crate::models::Artifact>> {
    let client = GithubClient::new(token)?;
    adapter::fetch_artifacts(&client, ctx, owner, repo).await
}

/// RAG pipeline: embedder, vector store, retriever, and generator wired
/// together behind one facade.
pub struct RagPipeline {
    config: RagConfig,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    retriever: Retriever,
    generator: Generator,
}

impl RagPipeline {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        llm: Box<dyn Llm>,
    ) -> Self {
        let retriever = Retriever::new(embedder.clone(), store.clone());
        let generator = Generator::new(llm, &config.llm);
        Self {
            config,
            embedder,
            store,
            retriever,
            generator,
        }
    }

    /// Build a pipeline with the OpenAI backends and a per-run in-memory
    /// vector store.
    pub fn with_in_memory_store(config: RagConfig) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(
            config.embedder_model.clone(),
            config.embedder_dimension,
        )?);
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::new(config.embedder_dimension));
        let llm: Box<dyn Llm> = Box::new(OpenAiLlm::new(config.llm.clone())?);
        Ok(Self::new(config, embedder, store, llm))
    }

    /// Release the vector-store connection.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await
    }

    /// Index episode summaries into the vector store.
    pub async fn index_episodes(
        &self,
        ctx: &CancellationToken,
        episodes: &[Episode],
    ) -> Result<()> {
        info!(count = episodes.len(), "indexing episodes");
        let summaries: Vec<_> = episodes.iter().map(build_episode_summary).collect();
        let opts = IndexOptions {
            force_reindex: self.config.reindex_on_demand,
            skip_existing: !self.config.reindex_on_demand,
            ..IndexOptions::default()
        };
        index_episodes(ctx, &summaries, self.embedder.as_ref(), self.store.as_ref(), &opts).await
    }

    /// Generate a narrative for one episode: retrieval (self-excluded) →
    /// prompt assembly → generation.
    pub async fn generate_episode_narrative(
        &self,
        ctx: &CancellationToken,
        episode: &Episode,
    ) -> Result<Narrative> {
        info!(episode = %episode.id, "generating episode narrative");

        let mut context = self
            .retriever
            .retrieve_context_for_episode(
                ctx,
                &episode.id,
                self.config.top_k,
                &SearchOptions::default(),
            )
            .await?;
        debug!(chunks = context.len(), "retrieved context");
        context.truncate(self.config.max_context_size);

        let prompt = assemble_prompt(Some(episode), &context)?;
        self.generator.generate(ctx, &episode.id, &prompt).await
    }

    /// Answer a project-level question over the indexed episodes.
    pub async fn generate_project_narrative(
        &self,
        ctx: &CancellationToken,
        query: &str,
        episodes: &[Episode],
    ) -> Result<Narrative> {
        info!(query, "generating project narrative");

        let mut context = self
            .retriever
            .retrieve_context_for_query(ctx, query, self.config.top_k, &SearchOptions::default())
            .await?;
        debug!(chunks = context.len(), "retrieved context");

        augment_with_literal_references(query, episodes, &mut context);

        context.truncate(self.config.max_context_size);

        let prompt = assemble_project_query_prompt(query, episodes, &context);
        self.generator.generate(ctx, "project", &prompt).await
    }

    /// Generate narratives for several episodes, skipping failures.
    pub async fn generate_multiple_narratives(
        &self,
        ctx: &CancellationToken,
        episodes: &[Episode],
    ) -> Result<Vec<Narrative>> {
        let mut narratives = Vec::with_capacity(episodes.len());
        for episode in episodes {
            match self.generate_episode_narrative(ctx, episode).await {
                Ok(narrative) => narratives.push(narrative),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => {
                    warn!(episode = %episode.id, error = %err, "narrative generation failed");
                }
            }
        }
        Ok(narratives)
    }
}

/// Hybrid search: when the question names a PR or issue number, make sure
/// the episode owning that artifact is represented in the context,
/// prepended with a maximal score.
fn augment_with_literal_references(
    query: &str,
    episodes: &[Episode],
    context: &mut Vec<ContextChunk>,
) {
    for capture in QUERY_REFERENCE.captures_iter(query) {
        let number: i64 = match capture[1].parse() {
            Ok(number) => number,
            Err(_) => continue,
        };

        let owning = episodes
            .iter()
            .find(|ep| ep.artifacts.iter().any(|a| a.number == number));
        let episode = match owning {
            Some(episode) => episode,
            None => continue,
        };

        if context.iter().any(|c| c.episode_id == episode.id) {
            continue;
        }

        debug!(episode = %episode.id, number, "hybrid search: injecting literal match");
        let (start_date, end_date) = episode.date_range();
        context.insert(
            0,
            ContextChunk {
                episode_id: episode.id.clone(),
                text: build_summary_text(episode),
                score: 1.0,
                start_date,
                end_date,
                authors: episode.author_names(),
                commit_count: episode.commits.len(),
                file_count: episode.file_count(),
            },
        );
    }
}
