//! Episode export.
//!
//! Serializes episodes as a JSON array with enrichment counts, suitable
//! for downstream tooling. Written to a file via `analyze --export`.

use std::io::Write;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{Artifact, ArtifactType, Commit, Episode};

/// An episode with calculated enrichments for export.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeExport {
    pub id: String,
    pub commit_count: usize,
    pub author_count: usize,
    pub pr_count: usize,
    pub issue_count: usize,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Human-readable duration, e.g. `"5h12m0s"`.
    pub duration: String,
    pub authors: Vec<String>,
    pub commit_hashes: Vec<String>,
    pub commits: Vec<Commit>,
    pub artifacts: Vec<Artifact>,
}

/// Format a duration as `{h}h{m}m{s}s`, omitting leading zero units.
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.num_seconds().max(0);
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn enrich_episode(episode: &Episode) -> EpisodeExport {
    let authors = episode.author_names();
    let commit_hashes = episode.commits.iter().map(|c| c.hash.clone()).collect();

    let mut pr_count = 0;
    let mut issue_count = 0;
    for artifact in &episode.artifacts {
        match artifact.kind {
            ArtifactType::PullRequest | ArtifactType::MergeRequest => pr_count += 1,
            ArtifactType::Issue | ArtifactType::Ticket => issue_count += 1,
        }
    }

    let (start_date, end_date) = episode.date_range();

    EpisodeExport {
        id: episode.id.clone(),
        commit_count: episode.commits.len(),
        author_count: authors.len(),
        pr_count,
        issue_count,
        start_date,
        end_date,
        duration: format_duration(episode.duration()),
        authors,
        commit_hashes,
        commits: episode.commits.clone(),
        artifacts: episode.artifacts.clone(),
    }
}

/// Serialize episodes as a pretty JSON array to any writer.
pub fn export_episodes(episodes: &[Episode], writer: &mut dyn Write) -> Result<()> {
    let exports: Vec<EpisodeExport> = episodes.iter().map(enrich_episode).collect();
    serde_json::to_writer_pretty(&mut *writer, &exports)?;
    writer.write_all(b"\n")?;
    Ok(())
}
