//! Episode summarizer.
//!
//! Turns an [`Episode`] into the human-readable summary that gets embedded
//! and indexed. A summary body looks like:
//!
//! ```text
//! Commits:
//! - Refactor login flow to use JWT
//! - Add unit tests for token verification
//!
//! PRs:
//! - #87 Replace session-based auth with JWT
//!   Migrates every handler to the new middleware and removes the legacy…
//!
//! Issues:
//! - #82 Migrate authentication system
//!
//! Authors: anthony, gavin
//! Date range: 2023-04-02 → 2023-04-07
//! ```
//!
//! Sections appear in a fixed order (Commits, PRs, MRs, Issues, Tickets,
//! Authors, Date range) and empty sections are omitted. Artifact items
//! carry their number, title, and a truncated description so literal `#n`
//! references stay searchable in the vector store.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Artifact, ArtifactType, Episode};

/// Maximum artifact-description length carried into a summary body.
const DESCRIPTION_LIMIT: usize = 500;

/// Aggregated metrics and text for one episode, ready for indexing.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeSummary {
    pub episode_id: String,
    pub title: String,
    pub summary: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
    pub commit_count: usize,
    pub file_count: usize,
}

/// Build the summary for an episode.
pub fn build_episode_summary(episode: &Episode) -> EpisodeSummary {
    let (start_date, end_date) = episode.date_range();
    EpisodeSummary {
        episode_id: episode.id.clone(),
        title: generate_title(episode),
        summary: build_summary_text(episode),
        start_date,
        end_date,
        authors: episode.author_names(),
        commit_count: episode.commits.len(),
        file_count: episode.file_count(),
    }
}

/// Concise episode title: first commit subject, else first artifact title,
/// else `Episode {id}`.
pub fn generate_title(episode: &Episode) -> String {
    if let Some(commit) = episode.commits.first() {
        if !commit.message_subject.is_empty() {
            return commit.message_subject.clone();
        }
    }
    if let Some(artifact) = episode.artifacts.first() {
        if !artifact.title.is_empty() {
            return artifact.title.clone();
        }
    }
    format!("Episode {}", episode.id)
}

fn artifact_section(title: &str, artifacts: &[&Artifact]) -> Option<String> {
    if artifacts.is_empty() {
        return None;
    }
    let mut lines = vec![format!("{title}:")];
    for artifact in artifacts {
        lines.push(format!("- #{} {}", artifact.number, artifact.title));
        if !artifact.description.is_empty() {
            lines.push(format!("  {}", truncate(&artifact.description, DESCRIPTION_LIMIT)));
        }
    }
    Some(lines.join("\n"))
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

/// The formatted summary body.
pub fn build_summary_text(episode: &Episode) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !episode.commits.is_empty() {
        let mut lines = vec!["Commits:".to_string()];
        for commit in &episode.commits {
            let subject = if commit.message_subject.is_empty() {
                commit.message.as_str()
            } else {
                commit.message_subject.as_str()
            };
            lines.push(format!("- {subject}"));
        }
        sections.push(lines.join("\n"));
    }

    let by_kind = |kind: ArtifactType| -> Vec<&Artifact> {
        episode.artifacts.iter().filter(|a| a.kind == kind).collect()
    };

    for (title, kind) in [
        ("PRs", ArtifactType::PullRequest),
        ("MRs", ArtifactType::MergeRequest),
        ("Issues", ArtifactType::Issue),
        ("Tickets", ArtifactType::Ticket),
    ] {
        if let Some(section) = artifact_section(title, &by_kind(kind)) {
            sections.push(section);
        }
    }

    let authors = episode.author_names();
    let mut tail = Vec::new();
    if !authors.is_empty() {
        tail.push(format!("Authors: {}", authors.join(", ")));
    }
    let (start, end) = episode.date_range();
    let date_range = format_date_range(start, end);
    if !date_range.is_empty() {
        tail.push(format!("Date range: {date_range}"));
    }
    if !tail.is_empty() {
        sections.push(tail.join("\n"));
    }

    sections.join("\n\n")
}

/// Format a start/end pair as `YYYY-MM-DD → YYYY-MM-DD`, a single date
/// when both are equal (or one is absent), and empty when both are absent.
pub fn format_date_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> String {
    match (start, end) {
        (None, None) => String::new(),
        (Some(t), None) | (None, Some(t)) => t.format("%Y-%m-%d").to_string(),
        (Some(start), Some(end)) => {
            if start == end {
                start.format("%Y-%m-%d").to_string()
            } else {
                format!(
                    "{} → {}",
                    start.format("%Y-%m-%d"),
                    end.format("%Y-%m-%d")
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtifactMetadata, Author, Commit, CommitStats};
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, day, 12, 0, 0).unwrap()
    }

    fn commit(subject: &str, name: &str, day: u32) -> Commit {
        Commit {
            hash: "c".repeat(40),
            short_hash: "cccccccc".to_string(),
            author: Author {
                name: name.to_string(),
                email: format!("{name}@example.com"),
                username: None,
                timestamp: at(day),
            },
            committer: Author::default(),
            message: subject.to_string(),
            message_subject: subject.to_string(),
            message_body: String::new(),
            committed_at: at(day),
            parent_hashes: Vec::new(),
            tree_hash: String::new(),
            diffs: Vec::new(),
            stats: CommitStats::default(),
            is_merge: false,
            branch: None,
        }
    }

    fn artifact(number: i64, kind: ArtifactType, title: &str, description: &str) -> Artifact {
        Artifact {
            id: format!("pr-{number}"),
            number,
            kind,
            title: title.to_string(),
            description: description.to_string(),
            state: "open".to_string(),
            author: Author::default(),
            assignees: Vec::new(),
            labels: Vec::new(),
            created_at: at(2),
            updated_at: at(7),
            closed_at: None,
            merged_at: None,
            discussions: Vec::new(),
            metadata: ArtifactMetadata::default(),
            url: String::new(),
        }
    }

    #[test]
    fn title_prefers_first_commit_subject() {
        let episode = Episode {
            id: "E3".to_string(),
            commits: vec![commit("Refactor login flow", "anthony", 2)],
            artifacts: vec![artifact(87, ArtifactType::PullRequest, "Replace auth", "")],
        };
        assert_eq!(generate_title(&episode), "Refactor login flow");
    }

    #[test]
    fn title_falls_back_to_artifact_then_id() {
        let episode = Episode {
            id: "E3".to_string(),
            commits: Vec::new(),
            artifacts: vec![artifact(87, ArtifactType::PullRequest, "Replace auth", "")],
        };
        assert_eq!(generate_title(&episode), "Replace auth");

        let bare = Episode {
            id: "E9".to_string(),
            ..Episode::default()
        };
        assert_eq!(generate_title(&bare), "Episode E9");
    }

    #[test]
    fn summary_has_sections_in_order() {
        let episode = Episode {
            id: "E1".to_string(),
            commits: vec![
                commit("Refactor login flow to use JWT", "gavin", 2),
                commit("Add unit tests for token verification", "anthony", 7),
            ],
            artifacts: vec![
                artifact(87, ArtifactType::PullRequest, "Replace session auth", "Moves handlers"),
                artifact(82, ArtifactType::Issue, "Migrate authentication", ""),
            ],
        };

        let text = build_summary_text(&episode);
        let commits_pos = text.find("Commits:").unwrap();
        let prs_pos = text.find("PRs:").unwrap();
        let issues_pos = text.find("Issues:").unwrap();
        let authors_pos = text.find("Authors:").unwrap();
        let range_pos = text.find("Date range:").unwrap();

        assert!(commits_pos < prs_pos);
        assert!(prs_pos < issues_pos);
        assert!(issues_pos < authors_pos);
        assert!(authors_pos < range_pos);

        assert!(text.contains("- #87 Replace session auth"));
        assert!(text.contains("  Moves handlers"));
        assert!(text.contains("Authors: anthony, gavin"));
        assert!(text.contains("Date range: 2023-04-02 → 2023-04-07"));
        assert!(!text.contains("MRs:"));
        assert!(!text.contains("Tickets:"));
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let long = "x".repeat(600);
        let episode = Episode {
            id: "E1".to_string(),
            commits: Vec::new(),
            artifacts: vec![artifact(5, ArtifactType::PullRequest, "Big change", &long)],
        };
        let text = build_summary_text(&episode);
        assert!(text.contains(&format!("  {}...", "x".repeat(500))));
        assert!(!text.contains(&"x".repeat(501)));
    }

    #[test]
    fn date_range_formats() {
        assert_eq!(format_date_range(None, None), "");
        assert_eq!(format_date_range(Some(at(2)), Some(at(2))), "2023-04-02");
        assert_eq!(
            format_date_range(Some(at(2)), Some(at(7))),
            "2023-04-02 → 2023-04-07"
        );
        assert_eq!(format_date_range(Some(at(2)), None), "2023-04-02");
    }

    #[test]
    fn summary_metrics_come_from_episode_views() {
        let episode = Episode {
            id: "E1".to_string(),
            commits: vec![commit("a", "zoe", 2), commit("b", "amir", 3)],
            artifacts: Vec::new(),
        };
        let summary = build_episode_summary(&episode);
        assert_eq!(summary.episode_id, "E1");
        assert_eq!(summary.commit_count, 2);
        assert_eq!(summary.authors, vec!["amir", "zoe"]);
        assert_eq!(summary.start_date, Some(at(2)));
        assert_eq!(summary.end_date, Some(at(3)));
    }
}
