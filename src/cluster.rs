//! Clustering engine.
//!
//! Groups an unordered stream of commits into episodes with a weighted
//! multi-signal similarity score, and links artifacts to episodes through
//! commit-message references and discussion commit-hash mentions.
//!
//! # Per-commit decision
//!
//! Commits are visited in chronological order. Each one either joins the
//! episode under construction (similarity ≥ `min_similarity`) or finalizes
//! it (emitted when it has at least `min_commits` commits, discarded
//! otherwise) and starts a new one. A trailing episode is flushed the same
//! way at the end of input. Episode ids `E1, E2, …` follow emission order.
//!
//! # Similarity signals
//!
//! | Signal | Default weight | Score |
//! |--------|----------------|-------|
//! | time | 0.30 | linear decay over `max_time_gap`, 0 beyond it |
//! | author | 0.25 | author email seen in the episode |
//! | files | 0.25 | Jaccard overlap of touched paths |
//! | message | 0.10 | best keyword containment against episode subjects |
//! | artifacts | 0.10 | overlap of message references with linked artifacts |
//!
//! Missing signals score 0; the weighted sum stays well-defined for any
//! weight assignment (tests override individual weights freely).

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Artifact, Commit, Episode, RepositoryActivity};

/// Parameters for the episode grouping heuristics.
#[derive(Debug, Clone, Copy)]
pub struct GroupingConfig {
    /// Maximum time gap between commits in the same episode.
    pub max_time_gap: Duration,
    /// Minimum number of commits for an episode to be emitted.
    pub min_commits: usize,
    pub time_weight: f64,
    pub author_weight: f64,
    pub file_weight: f64,
    pub message_weight: f64,
    pub artifact_weight: f64,
    /// Minimum weighted score for a commit to join the current episode.
    pub min_similarity: f64,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            max_time_gap: Duration::hours(24),
            min_commits: 1,
            time_weight: 0.3,
            author_weight: 0.25,
            file_weight: 0.25,
            message_weight: 0.1,
            artifact_weight: 0.1,
            min_similarity: 0.5,
        }
    }
}

static REFERENCE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"#\d+").unwrap(),
        Regex::new(r"(?i)PR-?\d+").unwrap(),
        Regex::new(r"(?i)issue-?\d+").unwrap(),
        Regex::new(r"(?i)MR-?\d+").unwrap(),
    ]
});

static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "to", "was", "will", "with",
];

/// Extract artifact references (`#12`, `PR-456`, `issue-789`, `MR-7`) from
/// text, lowercased so lookups are case-insensitive.
pub fn extract_artifact_references(text: &str) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    for pattern in REFERENCE_PATTERNS.iter() {
        for m in pattern.find_iter(text) {
            refs.insert(m.as_str().to_lowercase());
        }
    }
    refs
}

/// Extract meaningful lowercase keywords (length > 2, stop words removed)
/// from a commit subject.
fn extract_keywords(message: &str) -> HashSet<String> {
    let lowered = message.to_lowercase();
    WORD_PATTERN
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Every recognized reference string, lowercased, mapped to the artifact
/// index it resolves to.
fn build_reference_index(artifacts: &[Artifact]) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (i, artifact) in artifacts.iter().enumerate() {
        index.insert(format!("#{}", artifact.number), i);
        index.insert(artifact.id.to_lowercase(), i);
        index.insert(format!("pr-{}", artifact.number), i);
        index.insert(format!("issue-{}", artifact.number), i);
        index.insert(format!("mr-{}", artifact.number), i);
    }
    index
}

fn time_score(last: &Commit, commit: &Commit, max_gap: Duration) -> f64 {
    let gap_ms = max_gap.num_milliseconds();
    if gap_ms <= 0 {
        return 0.0;
    }
    let diff_ms = (commit.committed_at - last.committed_at)
        .num_milliseconds()
        .abs();
    if diff_ms > gap_ms {
        return 0.0;
    }
    // Linear decay: 1 at zero gap, 0 at max_gap (a gap exactly equal to
    // max_gap passes the cutoff but still scores 0).
    1.0 - diff_ms as f64 / gap_ms as f64
}

fn author_score(episode: &Episode, commit: &Commit) -> f64 {
    let matches = episode
        .commits
        .iter()
        .any(|c| c.author.email == commit.author.email);
    if matches {
        1.0
    } else {
        0.0
    }
}

fn collect_files<'a>(commits: impl Iterator<Item = &'a Commit>) -> HashSet<&'a str> {
    let mut files = HashSet::new();
    for commit in commits {
        for diff in &commit.diffs {
            if !diff.path.is_empty() {
                files.insert(diff.path.as_str());
            }
            if let Some(old) = &diff.old_path {
                if !old.is_empty() {
                    files.insert(old.as_str());
                }
            }
        }
    }
    files
}

fn file_score(episode: &Episode, commit: &Commit) -> f64 {
    let episode_files = collect_files(episode.commits.iter());
    let commit_files = collect_files(std::iter::once(commit));

    if episode_files.is_empty() || commit_files.is_empty() {
        return 0.0;
    }

    let intersection = commit_files.intersection(&episode_files).count();
    let union = episode_files.len() + commit_files.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

fn message_score(episode: &Episode, commit: &Commit) -> f64 {
    let commit_keywords = extract_keywords(&commit.message_subject);
    if commit_keywords.is_empty() {
        return 0.0;
    }

    let mut best = 0.0f64;
    for episode_commit in &episode.commits {
        let episode_keywords = extract_keywords(&episode_commit.message_subject);
        if episode_keywords.is_empty() {
            continue;
        }
        let overlap = commit_keywords
            .iter()
            .filter(|k| episode_keywords.contains(*k))
            .count();
        best = best.max(overlap as f64 / commit_keywords.len() as f64);
    }
    best
}

fn artifact_score(episode: &Episode, commit: &Commit) -> f64 {
    if episode.artifacts.is_empty() {
        return 0.0;
    }

    let commit_refs = extract_artifact_references(&commit.message);
    if commit_refs.is_empty() {
        return 0.0;
    }

    let mut episode_refs = HashSet::new();
    for artifact in &episode.artifacts {
        episode_refs.insert(format!("#{}", artifact.number));
        episode_refs.insert(artifact.id.to_lowercase());
        episode_refs.insert(format!("pr-{}", artifact.number));
        episode_refs.insert(format!("issue-{}", artifact.number));
        episode_refs.insert(format!("mr-{}", artifact.number));
    }

    let overlap = commit_refs
        .iter()
        .filter(|r| episode_refs.contains(*r))
        .count();
    overlap as f64 / commit_refs.len() as f64
}

/// Weighted similarity of a commit to the episode under construction.
pub fn episode_similarity(episode: &Episode, commit: &Commit, config: &GroupingConfig) -> f64 {
    if episode.commits.is_empty() {
        return 0.0;
    }
    let last = episode
        .commits
        .last()
        .expect("non-empty episode has a last commit");

    time_score(last, commit, config.max_time_gap) * config.time_weight
        + author_score(episode, commit) * config.author_weight
        + file_score(episode, commit) * config.file_weight
        + message_score(episode, commit) * config.message_weight
        + artifact_score(episode, commit) * config.artifact_weight
}

/// Attach every artifact the commit references, then every artifact whose
/// discussions mention the commit's hash. Artifact identities stay unique
/// within the episode; order is insertion order.
fn add_referenced_artifacts(
    episode: &mut Episode,
    commit: &Commit,
    index: &HashMap<String, usize>,
    artifacts: &[Artifact],
) {
    let mut present: HashSet<String> = episode.artifacts.iter().map(|a| a.id.clone()).collect();

    for reference in extract_artifact_references(&commit.message) {
        if let Some(&i) = index.get(&reference) {
            let artifact = &artifacts[i];
            if present.insert(artifact.id.clone()) {
                episode.artifacts.push(artifact.clone());
            }
        }
    }

    for artifact in artifacts {
        if present.contains(&artifact.id) {
            continue;
        }
        let mentions_commit = artifact
            .discussions
            .iter()
            .any(|d| !d.commit_hash.is_empty() && d.commit_hash == commit.hash);
        if mentions_commit {
            present.insert(artifact.id.clone());
            episode.artifacts.push(artifact.clone());
        }
    }
}

impl RepositoryActivity {
    /// Group this activity's commits into episodes.
    ///
    /// Commits are copied and stably sorted by `committed_at` first, so
    /// chronological ties keep their ingest order. Emitted episodes are in
    /// chronological order of their first commit.
    pub fn group_into_episodes(&self, config: &GroupingConfig) -> Vec<Episode> {
        if self.commits.is_empty() {
            return Vec::new();
        }

        let mut commits = self.commits.clone();
        commits.sort_by_key(|c| c.committed_at);

        let index = build_reference_index(&self.artifacts);

        let mut episodes: Vec<Episode> = Vec::new();
        let mut current: Option<Episode> = None;

        for commit in &commits {
            let joins = match current.as_ref() {
                None => false,
                Some(episode) => {
                    episode_similarity(episode, commit, config) >= config.min_similarity
                }
            };

            if joins {
                let episode = current.as_mut().expect("episode under construction");
                episode.commits.push(commit.clone());
                add_referenced_artifacts(episode, commit, &index, &self.artifacts);
            } else {
                if let Some(finished) = current.take() {
                    finalize(finished, config, &mut episodes);
                }
                let mut episode = Episode {
                    commits: vec![commit.clone()],
                    ..Episode::default()
                };
                add_referenced_artifacts(&mut episode, commit, &index, &self.artifacts);
                current = Some(episode);
            }
        }

        if let Some(trailing) = current.take() {
            finalize(trailing, config, &mut episodes);
        }

        episodes
    }
}

fn finalize(mut episode: Episode, config: &GroupingConfig, episodes: &mut Vec<Episode>) {
    if episode.commits.len() >= config.min_commits {
        episode.id = format!("E{}", episodes.len() + 1);
        episodes.push(episode);
    }
}
