//! Deterministic prompt assembly.
//!
//! Both assemblers are pure functions over their inputs: the same episode
//! and context always produce byte-identical prompts, and context order
//! does not matter because a copy is stably sorted by descending score
//! before rendering.

use std::collections::HashSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{Commit, Episode};
use crate::store::ContextChunk;

/// Maximum artifact-description length carried into a prompt.
const DESCRIPTION_LIMIT: usize = 200;

fn sorted_by_score(context_chunks: &[ContextChunk]) -> Vec<ContextChunk> {
    let mut sorted = context_chunks.to_vec();
    sorted.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted
}

fn commit_time_range(commits: &[Commit]) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let mut start = None;
    let mut end = None;
    for commit in commits {
        let t = commit.committed_at;
        start = Some(start.map_or(t, |s: DateTime<Utc>| s.min(t)));
        end = Some(end.map_or(t, |e: DateTime<Utc>| e.max(t)));
    }
    (start, end)
}

fn unique_commit_authors(commits: &[Commit]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut authors = Vec::new();
    for commit in commits {
        let name = commit.author.name.trim();
        if name.is_empty() || !seen.insert(name.to_string()) {
            continue;
        }
        authors.push(name.to_string());
    }
    authors.sort();
    authors
}

fn format_date_or_na(t: Option<DateTime<Utc>>) -> String {
    match t {
        Some(t) => t.format("%Y-%m-%d").to_string(),
        None => "N/A".to_string(),
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("...");
    out
}

/// Assemble the episode-narrative prompt.
///
/// Fails with [`Error::MissingTarget`] when no target episode is given.
pub fn assemble_prompt(
    target_episode: Option<&Episode>,
    context_chunks: &[ContextChunk],
) -> Result<String> {
    let episode = target_episode.ok_or(Error::MissingTarget)?;
    let sorted = sorted_by_score(context_chunks);

    let mut b = String::new();
    b.push_str(
        "You are a technical writer specializing in software development narratives. \
         Your task is to generate a coherent, human-readable narrative that explains \
         what happened during this development episode and why it matters.\n\n",
    );

    b.push_str("# Episode to Summarize\n\n");
    let _ = writeln!(b, "**Episode ID:** {}\n", episode.id);

    let (start, end) = commit_time_range(&episode.commits);
    let authors = unique_commit_authors(&episode.commits);

    let _ = writeln!(b, "**Commits:** {} commits\n", episode.commits.len());
    let _ = writeln!(
        b,
        "**Time Range:** {} to {}\n",
        format_date_or_na(start),
        format_date_or_na(end)
    );

    if authors.is_empty() {
        b.push_str("**Authors:** N/A\n\n");
    } else {
        let _ = writeln!(b, "**Authors:** {}\n", authors.join(", "));
    }

    b.push_str("**Commit Messages:**\n");
    if episode.commits.is_empty() {
        b.push_str("- (none)\n\n");
    } else {
        for commit in &episode.commits {
            let hash: String = commit.hash.chars().take(7).collect();
            let _ = writeln!(b, "- {} {} (by {})", hash, commit.message, commit.author.name);
        }
        b.push('\n');
    }

    let _ = writeln!(b, "**Related Artifacts:** {} items\n", episode.artifacts.len());
    if episode.artifacts.is_empty() {
        b.push_str("- (none)\n\n");
    } else {
        for artifact in &episode.artifacts {
            let _ = writeln!(
                b,
                "- **{} #{}:** {}",
                artifact.kind.label(),
                artifact.number,
                artifact.title
            );
            if !artifact.description.is_empty() {
                let _ = writeln!(b, "  {}", truncate(&artifact.description, DESCRIPTION_LIMIT));
            }
        }
        b.push('\n');
    }

    if !sorted.is_empty() {
        b.push_str("# Related Development Context\n\n");
        b.push_str(
            "The following are similar episodes from the repository history that may provide useful context:\n\n",
        );
        for chunk in &sorted {
            let _ = writeln!(
                b,
                "**Episode {}** (relevance: {:.2})",
                chunk.episode_id, chunk.score
            );
            b.push_str(&chunk.text);
            b.push_str("\n\n");
        }
    }

    b.push_str("# Task\n\n");
    b.push_str("Generate a narrative summary (2-4 paragraphs) that:\n");
    b.push_str("1. Explains what was accomplished in this episode\n");
    b.push_str("2. Describes the technical approach and key decisions\n");
    b.push_str("3. Connects this work to related development efforts\n");
    b.push_str("4. Highlights the impact and significance of the changes\n\n");
    b.push_str(
        "Write in past tense, use clear technical language, and focus on the 'why' behind the changes, not just the 'what'. \
         Do not invent details or motivations; base all statements strictly on the episode data and provided context. \
         Use related episodes only for background and connections, not as actions performed in this episode. \
         Explain technical decisions and tradeoffs rather than restating commit messages verbatim.\n",
    );

    Ok(b)
}

/// Assemble the project-level question prompt.
pub fn assemble_project_query_prompt(
    question: &str,
    episodes: &[Episode],
    context_chunks: &[ContextChunk],
) -> String {
    let sorted = sorted_by_score(context_chunks);

    let mut b = String::new();
    b.push_str(
        "You are a technical writer specializing in software development narratives. \
         Your task is to answer the following question about a software project \
         based on the development history and relevant context provided.\n\n",
    );

    b.push_str("# Question\n\n");
    let _ = writeln!(b, "{question}\n");

    let mut total_commits = 0usize;
    let mut all_authors = HashSet::new();
    let mut earliest: Option<DateTime<Utc>> = None;
    let mut latest: Option<DateTime<Utc>> = None;
    for episode in episodes {
        total_commits += episode.commits.len();
        for commit in &episode.commits {
            all_authors.insert(commit.author.name.clone());
            let t = commit.committed_at;
            earliest = Some(earliest.map_or(t, |e| e.min(t)));
            latest = Some(latest.map_or(t, |l| l.max(t)));
        }
    }

    b.push_str("# Project Overview\n\n");
    let _ = writeln!(b, "**Episodes:** {} development episodes\n", episodes.len());
    let _ = writeln!(b, "**Total Commits:** {total_commits} commits\n");
    let _ = writeln!(b, "**Contributors:** {} unique authors\n", all_authors.len());
    if let (Some(earliest), Some(latest)) = (earliest, latest) {
        let _ = writeln!(
            b,
            "**Time Range:** {} to {}\n",
            earliest.format("%Y-%m-%d"),
            latest.format("%Y-%m-%d")
        );
    }

    if !sorted.is_empty() {
        b.push_str("# Relevant Development History\n\n");
        b.push_str("The following episodes are most relevant to your question:\n\n");
        for (i, chunk) in sorted.iter().enumerate() {
            let _ = writeln!(
                b,
                "## Episode {}: {} (relevance: {:.2})\n",
                i + 1,
                chunk.episode_id,
                chunk.score
            );
            b.push_str(&chunk.text);
            b.push_str("\n\n");
        }
    }

    b.push_str("# Task\n\n");
    b.push_str("Based on the relevant development history above, answer the question clearly and concisely.\n\n");
    b.push_str("Guidelines:\n");
    b.push_str("- Focus your answer specifically on what was asked\n");
    b.push_str("- Use 2-4 paragraphs unless the question requires more detail\n");
    b.push_str("- Base all statements strictly on the provided episode data\n");
    b.push_str("- Do not invent details or motivations not present in the history\n");
    b.push_str("- Use clear technical language and explain key concepts\n");
    b.push_str(
        "- If the question cannot be fully answered from the available data, state what is known and what is uncertain\n\n",
    );

    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Artifact, ArtifactMetadata, ArtifactType, Author, Commit, CommitStats,
    };
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 10, 0, 0).unwrap()
    }

    fn commit(hash: &str, message: &str, author: &str, day: u32) -> Commit {
        Commit {
            hash: hash.to_string(),
            short_hash: hash.chars().take(8).collect(),
            author: Author {
                name: author.to_string(),
                email: format!("{author}@example.com"),
                username: None,
                timestamp: at(day),
            },
            committer: Author::default(),
            message: message.to_string(),
            message_subject: message.to_string(),
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

    fn chunk(id: &str, text: &str, score: f32) -> ContextChunk {
        ContextChunk {
            episode_id: id.to_string(),
            text: text.to_string(),
            score,
            start_date: None,
            end_date: None,
            authors: Vec::new(),
            commit_count: 0,
            file_count: 0,
        }
    }

    fn episode() -> Episode {
        Episode {
            id: "E2".to_string(),
            commits: vec![
                commit(&"a".repeat(40), "Add retry to fetch loop", "zoe", 3),
                commit(&"b".repeat(40), "Backoff tuning", "amir", 4),
            ],
            artifacts: vec![Artifact {
                id: "pr-10".to_string(),
                number: 31,
                kind: ArtifactType::PullRequest,
                title: "Retry transient failures".to_string(),
                description: "d".repeat(300),
                state: "merged".to_string(),
                author: Author::default(),
                assignees: Vec::new(),
                labels: Vec::new(),
                created_at: at(3),
                updated_at: at(4),
                closed_at: None,
                merged_at: None,
                discussions: Vec::new(),
                metadata: ArtifactMetadata::default(),
                url: String::new(),
            }],
        }
    }

    #[test]
    fn missing_target_fails() {
        let err = assemble_prompt(None, &[]).unwrap_err();
        assert!(matches!(err, Error::MissingTarget));
    }

    #[test]
    fn prompt_is_idempotent_and_order_insensitive() {
        let ep = episode();
        let chunks = vec![chunk("E1", "low", 0.2), chunk("E3", "high", 0.9)];
        let reversed: Vec<ContextChunk> = chunks.iter().rev().cloned().collect();

        let a = assemble_prompt(Some(&ep), &chunks).unwrap();
        let b = assemble_prompt(Some(&ep), &chunks).unwrap();
        let c = assemble_prompt(Some(&ep), &reversed).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);

        // Higher-scoring context renders first.
        assert!(a.find("Episode E3").unwrap() < a.find("Episode E1").unwrap());
    }

    #[test]
    fn episode_block_renders_commits_and_authors() {
        let prompt = assemble_prompt(Some(&episode()), &[]).unwrap();
        assert!(prompt.contains("**Episode ID:** E2"));
        assert!(prompt.contains("**Commits:** 2 commits"));
        assert!(prompt.contains("**Time Range:** 2024-06-03 to 2024-06-04"));
        // Sorted ascending, not commit order.
        assert!(prompt.contains("**Authors:** amir, zoe"));
        assert!(prompt.contains(&format!(
            "- {} Add retry to fetch loop (by zoe)",
            "a".repeat(7)
        )));
    }

    #[test]
    fn artifact_block_truncates_description() {
        let prompt = assemble_prompt(Some(&episode()), &[]).unwrap();
        assert!(prompt.contains("**pull_request #31:** Retry transient failures"));
        assert!(prompt.contains(&format!("{}...", "d".repeat(200))));
        assert!(!prompt.contains(&"d".repeat(201)));
    }

    #[test]
    fn empty_episode_renders_na_markers() {
        let ep = Episode {
            id: "E1".to_string(),
            ..Episode::default()
        };
        let prompt = assemble_prompt(Some(&ep), &[]).unwrap();
        assert!(prompt.contains("**Time Range:** N/A to N/A"));
        assert!(prompt.contains("**Authors:** N/A"));
        assert!(prompt.contains("- (none)"));
        assert!(!prompt.contains("# Related Development Context"));
    }

    #[test]
    fn relevance_scores_use_two_decimals() {
        let prompt = assemble_prompt(Some(&episode()), &[chunk("E9", "ctx", 0.876)]).unwrap();
        assert!(prompt.contains("**Episode E9** (relevance: 0.88)"));
    }

    #[test]
    fn project_prompt_quotes_question_and_aggregates() {
        let episodes = vec![episode()];
        let prompt = assemble_project_query_prompt(
            "What happened with retries?",
            &episodes,
            &[chunk("E2", "retry work", 0.7)],
        );
        assert!(prompt.contains("# Question\n\nWhat happened with retries?"));
        assert!(prompt.contains("**Episodes:** 1 development episodes"));
        assert!(prompt.contains("**Total Commits:** 2 commits"));
        assert!(prompt.contains("**Contributors:** 2 unique authors"));
        assert!(prompt.contains("**Time Range:** 2024-06-03 to 2024-06-04"));
        assert!(prompt.contains("## Episode 1: E2 (relevance: 0.70)"));
        assert!(prompt.contains("state what is known and what is uncertain"));
    }

    #[test]
    fn project_prompt_is_deterministic() {
        let episodes = vec![episode()];
        let chunks = vec![chunk("E1", "a", 0.1), chunk("E2", "b", 0.5)];
        let a = assemble_project_query_prompt("q", &episodes, &chunks);
        let reversed: Vec<ContextChunk> = chunks.iter().rev().cloned().collect();
        let b = assemble_project_query_prompt("q", &episodes, &reversed);
        assert_eq!(a, b);
    }
}
