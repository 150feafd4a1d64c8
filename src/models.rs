//! Platform-neutral domain model.
//!
//! These types represent the commits, artifacts, and episodes that flow
//! through the analysis pipeline. The data lifecycle is:
//!
//! ```text
//! git repository ──▶ Commit ──┐
//!                             ├─▶ RepositoryActivity ──▶ Episode ──▶ EpisodeSummary
//! forge (issues/PRs) ─▶ Artifact ─┘
//! ```
//!
//! Commits and artifacts are created at ingest and never mutated
//! afterwards. Episodes are created by the clustering engine, own their
//! commit and artifact vectors by value, and are frozen after emission.
//!
//! # Identity
//!
//! | Type | Identity |
//! |------|----------|
//! | [`Author`] | email (case-sensitive) |
//! | [`Commit`] | full hash |
//! | [`Artifact`] | `"{kind}-{number}"` built from the forge's internal id |
//! | [`Episode`] | `"E{k}"`, assigned in emission order |

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Origin platform of repository data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourcePlatform {
    Git,
    GitHub,
    GitLab,
    Bitbucket,
    Local,
}

/// The kind of development artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Issue,
    PullRequest,
    /// GitLab terminology.
    MergeRequest,
    Ticket,
}

impl ArtifactType {
    /// Label used in prompt and summary rendering.
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactType::Issue => "issue",
            ArtifactType::PullRequest => "pull_request",
            ArtifactType::MergeRequest => "merge_request",
            ArtifactType::Ticket => "ticket",
        }
    }
}

/// The kind of discussion entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscussionType {
    Comment,
    Review,
    ReviewThread,
    /// GitLab terminology.
    Note,
}

/// Status of a single file change within a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

/// Commit or artifact author. Deduplicated by email across commits,
/// artifacts, and discussions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A file modification in a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diff {
    /// Path after the change.
    pub path: String,
    /// Pre-rename path; `Some` only when `status` is [`DiffStatus::Renamed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub status: DiffStatus,
    pub additions: u32,
    pub deletions: u32,
    pub is_binary: bool,
    /// Raw unified diff text, kept only when patch capture is enabled and
    /// the file is not binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// File extension tag derived from the path (e.g. `"rs"`).
    pub file_type: String,
}

/// Aggregate statistics for a commit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CommitStats {
    pub files_changed: u32,
    pub additions: u32,
    pub deletions: u32,
    /// `additions - deletions`.
    pub net_change: i64,
}

/// A unified code commit.
///
/// `short_hash` is always the first 8 characters of `hash`; `is_merge` is
/// true iff the commit has more than one parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub short_hash: String,
    pub author: Author,
    pub committer: Author,
    /// Full raw commit message.
    pub message: String,
    /// First line of the message, trimmed.
    pub message_subject: String,
    /// Remainder of the message, trimmed.
    pub message_body: String,
    pub committed_at: DateTime<Utc>,
    pub parent_hashes: Vec<String>,
    pub tree_hash: String,
    pub diffs: Vec<Diff>,
    pub stats: CommitStats,
    pub is_merge: bool,
    /// Non-owning back-reference: the name of the first branch whose
    /// history claimed this commit. Branches are owned by the parsed
    /// repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// A git branch reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub hash: String,
    pub is_remote: bool,
    pub is_head: bool,
}

/// Engagement reactions on a discussion entry.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Reactions {
    pub thumbs_up: u32,
    pub thumbs_down: u32,
    pub laugh: u32,
    pub hooray: u32,
    pub confused: u32,
    pub heart: u32,
    pub rocket: u32,
    pub eyes: u32,
    pub total_count: u32,
}

/// One entry in an artifact's conversation: a comment, a review body, or an
/// in-line review-thread comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discussion {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DiscussionType,
    pub author: Author,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Identity of the discussion this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Root identity of the review thread this entry belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Code-review location, when applicable.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    #[serde(default)]
    pub line_number: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_hash: String,
    /// Normalized state for reviews: `approved`, `changes_requested`,
    /// `commented`, `dismissed`, or verbatim pass-through.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub review_state: String,
    #[serde(default)]
    pub reactions: Reactions,
}

/// Type-specific metadata attached to an artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    // Change-proposal specific.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_branch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub head_branch: String,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub changed_files: i64,
    /// Aggregated review state: `""`, `approved`, `changes_requested`,
    /// `commented`, or `dismissed`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub review_state: String,
    #[serde(default)]
    pub is_draft: bool,

    // Issue / ticket specific.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub milestone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,

    /// Identifiers of cross-referenced artifacts (`"pr-{n}"` / `"issue-{n}"`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_artifacts: Vec<String>,
}

/// A platform work item: issue, pull request, merge request, or ticket,
/// with its threaded discussions.
///
/// The identity is `"{kind}-{number}"` built from the forge's *internal*
/// numeric id; `number` is the short number used in `#n` references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub number: i64,
    #[serde(rename = "type")]
    pub kind: ArtifactType,
    pub title: String,
    pub description: String,
    /// `open`, `closed`, or `merged`; raw platform state passes through
    /// verbatim except that a merged change proposal is always `merged`.
    pub state: String,
    pub author: Author,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discussions: Vec<Discussion>,
    #[serde(default)]
    pub metadata: ArtifactMetadata,
    pub url: String,
}

/// Unified repository data across platforms: everything the clustering
/// engine needs in one aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryActivity {
    pub platform: SourcePlatform,
    pub repository_url: String,
    pub repository_name: String,
    pub owner: String,
    pub default_branch: String,
    pub commits: Vec<Commit>,
    pub artifacts: Vec<Artifact>,
    pub fetched_at: DateTime<Utc>,
}

/// A coherent group of commits and linked artifacts emitted by the
/// clustering engine.
///
/// Episodes own their vectors by value: edits to the source activity after
/// emission do not reach an episode. Within an episode, commits are sorted
/// ascending by `committed_at` and artifact identities are unique.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Episode {
    /// `"E{k}"`, 1-based, assigned in emission order.
    pub id: String,
    pub commits: Vec<Commit>,
    pub artifacts: Vec<Artifact>,
}

impl Episode {
    /// Unique commit authors, deduplicated by email in first-seen order.
    pub fn commit_authors(&self) -> Vec<Author> {
        let mut seen = HashSet::new();
        let mut authors = Vec::new();
        for commit in &self.commits {
            if seen.insert(commit.author.email.clone()) {
                authors.push(commit.author.clone());
            }
        }
        authors
    }

    /// Unique non-empty author names from commits and artifacts, sorted
    /// ascending.
    pub fn author_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for commit in &self.commits {
            if !commit.author.name.is_empty() {
                names.insert(commit.author.name.clone());
            }
        }
        for artifact in &self.artifacts {
            if !artifact.author.name.is_empty() {
                names.insert(artifact.author.name.clone());
            }
        }
        names.into_iter().collect()
    }

    /// Unique discussion authors across the episode's artifacts,
    /// deduplicated by email in first-seen order.
    pub fn discussion_authors(&self) -> Vec<Author> {
        let mut seen = HashSet::new();
        let mut authors = Vec::new();
        for artifact in &self.artifacts {
            for discussion in &artifact.discussions {
                if seen.insert(discussion.author.email.clone()) {
                    authors.push(discussion.author.clone());
                }
            }
        }
        authors
    }

    /// Unique artifact authors, deduplicated by email in first-seen order.
    pub fn artifact_authors(&self) -> Vec<Author> {
        let mut seen = HashSet::new();
        let mut authors = Vec::new();
        for artifact in &self.artifacts {
            if seen.insert(artifact.author.email.clone()) {
                authors.push(artifact.author.clone());
            }
        }
        authors
    }

    /// Earliest and latest timestamps across commits and artifacts.
    ///
    /// The start considers commit times and artifact creation; the end
    /// considers commit times, artifact updates, closes, and merges.
    /// Absent times are ignored.
    pub fn date_range(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let mut earliest: Option<DateTime<Utc>> = None;
        let mut latest: Option<DateTime<Utc>> = None;

        for commit in &self.commits {
            let t = commit.committed_at;
            earliest = Some(earliest.map_or(t, |e| e.min(t)));
            latest = Some(latest.map_or(t, |l| l.max(t)));
        }
        for artifact in &self.artifacts {
            let t = artifact.created_at;
            earliest = Some(earliest.map_or(t, |e| e.min(t)));
            let mut ends = vec![artifact.updated_at];
            if let Some(t) = artifact.closed_at {
                ends.push(t);
            }
            if let Some(t) = artifact.merged_at {
                ends.push(t);
            }
            for t in ends {
                latest = Some(latest.map_or(t, |l| l.max(t)));
            }
        }

        (earliest, latest)
    }

    /// Time span from the oldest to the newest commit. Zero for episodes
    /// with one commit or none.
    pub fn duration(&self) -> Duration {
        if self.commits.len() <= 1 {
            return Duration::zero();
        }
        let mut oldest = self.commits[0].committed_at;
        let mut newest = self.commits[0].committed_at;
        for commit in &self.commits[1..] {
            oldest = oldest.min(commit.committed_at);
            newest = newest.max(commit.committed_at);
        }
        newest - oldest
    }

    /// Unique files touched by the episode's commits, counting renamed-from
    /// paths. When a change proposal's `changed_files` metadatum exceeds
    /// the union (the PR-level scope is wider than the diffs we saw), the
    /// larger value is reported instead.
    pub fn file_count(&self) -> usize {
        let mut files = HashSet::new();
        for commit in &self.commits {
            for diff in &commit.diffs {
                if !diff.path.is_empty() {
                    files.insert(diff.path.as_str());
                }
                if let Some(old) = &diff.old_path {
                    if !old.is_empty() && old != &diff.path {
                        files.insert(old.as_str());
                    }
                }
            }
        }

        let metadata_max = self
            .artifacts
            .iter()
            .filter(|a| {
                matches!(
                    a.kind,
                    ArtifactType::PullRequest | ArtifactType::MergeRequest
                )
            })
            .map(|a| a.metadata.changed_files)
            .max()
            .unwrap_or(0);

        if metadata_max > files.len() as i64 {
            metadata_max as usize
        } else {
            files.len()
        }
    }
}
