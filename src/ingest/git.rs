//! Version-control ingester.
//!
//! Opens a local repository (or clones a remote one into a per-URL cache
//! directory under the system temp dir), enumerates references, walks
//! history from HEAD, and converts each commit into the domain model with
//! per-file diffs and aggregate statistics.
//!
//! Diffs are computed against the first parent. The first commit in
//! history diffs against the empty tree, so every file shows up as added
//! with its full line count.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use git2::{Delta, DiffFindOptions, DiffOptions, Oid, Patch, Repository, Sort};
use tracing::debug;

use crate::error::Result;
use crate::models::{Author, Branch, Commit, CommitStats, Diff, DiffStatus};

/// Caller controls for history parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    /// Maximum number of commits to parse; 0 means unlimited.
    pub max_commits: usize,
    /// Capture raw patch text for non-binary files.
    pub include_patch: bool,
}

/// A parsed repository: branches, commits, and HEAD metadata.
#[derive(Debug, Clone)]
pub struct ParsedRepository {
    pub url: String,
    pub branches: Vec<Branch>,
    pub commits: Vec<Commit>,
    pub head_hash: String,
    pub head_branch: String,
    pub total_commits: usize,
}

/// Open a repository from a local path.
pub fn open_repository(path: &str) -> Result<Repository> {
    Ok(Repository::open(path)?)
}

/// Clone a repository into a deterministic cache directory under the
/// system temp dir. Re-runs against the same URL reuse the existing clone.
pub fn clone_repository(url: &str) -> Result<Repository> {
    let dest = clone_cache_dir(url);
    if dest.join(".git").exists() {
        debug!(dir = %dest.display(), "reusing cached clone");
        return Ok(Repository::open(&dest)?);
    }
    std::fs::create_dir_all(&dest)?;
    debug!(url, dir = %dest.display(), "cloning repository");
    Ok(Repository::clone(url, &dest)?)
}

fn clone_cache_dir(url: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    std::env::temp_dir().join(format!("chronicler_{:012x}", hasher.finish()))
}

/// Enumerate branch references, classifying each as local or remote and
/// marking the one HEAD points at.
pub fn parse_branches(repo: &Repository) -> Result<Vec<Branch>> {
    let head_hash = repo
        .head()
        .ok()
        .and_then(|h| h.target())
        .map(|oid| oid.to_string())
        .unwrap_or_default();

    let mut branches = Vec::new();
    for reference in repo.references()? {
        let reference = reference?;
        let hash = match reference.target() {
            Some(oid) => oid.to_string(),
            None => continue, // symbolic refs carry no object
        };
        let name = reference.shorthand().unwrap_or_default().to_string();

        if reference.is_branch() {
            branches.push(Branch {
                is_head: hash == head_hash,
                name,
                hash,
                is_remote: false,
            });
        } else if reference.is_remote() {
            branches.push(Branch {
                name,
                hash,
                is_remote: true,
                is_head: false,
            });
        }
    }

    Ok(branches)
}

fn parse_author(sig: &git2::Signature<'_>) -> Author {
    Author {
        name: sig.name().unwrap_or_default().to_string(),
        email: sig.email().unwrap_or_default().to_string(),
        username: None,
        timestamp: git_time_to_utc(sig.when()),
    }
}

fn git_time_to_utc(time: git2::Time) -> DateTime<Utc> {
    Utc.timestamp_opt(time.seconds(), 0)
        .single()
        .unwrap_or_default()
}

/// File extension tag for a path, empty when there is none.
fn file_type(path: &str) -> String {
    match path.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('/') => ext.to_string(),
        _ => String::new(),
    }
}

/// Split a commit message into subject (first line) and body (remainder),
/// trimming both.
fn parse_message(message: &str) -> (String, String) {
    match message.split_once('\n') {
        Some((subject, body)) => (subject.trim().to_string(), body.trim().to_string()),
        None => (message.trim().to_string(), String::new()),
    }
}

/// Compute per-file diffs for a commit against its first parent.
pub fn parse_commit_diffs(
    repo: &Repository,
    commit: &git2::Commit<'_>,
    include_patch: bool,
) -> Result<Vec<Diff>> {
    let tree = commit.tree()?;
    let parent_tree = if commit.parent_count() > 0 {
        Some(commit.parent(0)?.tree()?)
    } else {
        None
    };

    let mut opts = DiffOptions::new();
    let mut diff = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut opts))?;

    let mut find_opts = DiffFindOptions::new();
    find_opts.renames(true);
    diff.find_similar(Some(&mut find_opts))?;

    let mut diffs = Vec::new();
    let delta_count = diff.deltas().len();

    for idx in 0..delta_count {
        let delta = match diff.get_delta(idx) {
            Some(d) => d,
            None => continue,
        };

        let old_file_path = delta
            .old_file()
            .path()
            .map(|p| p.to_string_lossy().into_owned());
        let new_file_path = delta
            .new_file()
            .path()
            .map(|p| p.to_string_lossy().into_owned());

        let (path, old_path, status) = match delta.status() {
            Delta::Added | Delta::Copied | Delta::Untracked => {
                (new_file_path.unwrap_or_default(), None, DiffStatus::Added)
            }
            Delta::Deleted => (old_file_path.unwrap_or_default(), None, DiffStatus::Deleted),
            Delta::Renamed => (
                new_file_path.unwrap_or_default(),
                old_file_path,
                DiffStatus::Renamed,
            ),
            _ => (
                new_file_path.or(old_file_path).unwrap_or_default(),
                None,
                DiffStatus::Modified,
            ),
        };

        let mut is_binary = delta.flags().is_binary();
        let mut additions = 0u32;
        let mut deletions = 0u32;
        let mut patch_text = None;

        if let Some(mut patch) = Patch::from_diff(&diff, idx)? {
            let (_, adds, dels) = patch.line_stats()?;
            additions = adds as u32;
            deletions = dels as u32;
            if include_patch && !is_binary {
                patch_text = patch.to_buf()?.as_str().map(|s| s.to_string());
            }
        } else {
            // No textual patch means binary content.
            is_binary = true;
        }

        diffs.push(Diff {
            file_type: file_type(&path),
            path,
            old_path,
            status,
            additions,
            deletions,
            is_binary,
            patch: patch_text,
        });
    }

    Ok(diffs)
}

/// Convert a git2 commit into the domain model with full metadata.
pub fn parse_commit(
    repo: &Repository,
    commit: &git2::Commit<'_>,
    include_patch: bool,
) -> Result<Commit> {
    let hash = commit.id().to_string();
    let parent_hashes: Vec<String> = commit.parent_ids().map(|oid| oid.to_string()).collect();

    let diffs = parse_commit_diffs(repo, commit, include_patch)?;

    let mut stats = CommitStats {
        files_changed: diffs.len() as u32,
        ..CommitStats::default()
    };
    for diff in &diffs {
        stats.additions += diff.additions;
        stats.deletions += diff.deletions;
    }
    stats.net_change = i64::from(stats.additions) - i64::from(stats.deletions);

    let message = commit.message().unwrap_or_default().to_string();
    let (subject, body) = parse_message(&message);

    Ok(Commit {
        short_hash: hash.chars().take(8).collect(),
        hash,
        author: parse_author(&commit.author()),
        committer: parse_author(&commit.committer()),
        message,
        message_subject: subject,
        message_body: body,
        committed_at: git_time_to_utc(commit.committer().when()),
        is_merge: commit.parent_count() > 1,
        parent_hashes,
        tree_hash: commit.tree_id().to_string(),
        diffs,
        stats,
        branch: None,
    })
}

/// Walk history from HEAD and parse commits, honoring `max_commits`.
pub fn parse_commits(repo: &Repository, opts: IngestOptions) -> Result<Vec<Commit>> {
    let mut walk = repo.revwalk()?;
    walk.push_head()?;
    walk.set_sorting(Sort::TIME)?;

    let mut commits = Vec::new();
    for oid in walk {
        if opts.max_commits > 0 && commits.len() >= opts.max_commits {
            break;
        }
        let commit = repo.find_commit(oid?)?;
        commits.push(parse_commit(repo, &commit, opts.include_patch)?);
    }

    Ok(commits)
}

/// Parse everything the pipeline needs from a repository: branches,
/// commits, HEAD metadata, and the commit-to-branch association.
pub fn parse_repository(
    repo: &Repository,
    url: &str,
    opts: IngestOptions,
) -> Result<ParsedRepository> {
    let mut branches = parse_branches(repo)?;
    let mut commits = parse_commits(repo, opts)?;

    let (head_hash, head_branch) = match repo.head() {
        Ok(head) => (
            head.target().map(|o| o.to_string()).unwrap_or_default(),
            head.shorthand().unwrap_or_default().to_string(),
        ),
        Err(_) => (String::new(), String::new()),
    };

    // main/master first so shared history is attributed to them.
    branches.sort_by(|a, b| {
        let rank = |name: &str| if name == "main" || name == "master" { 0 } else { 1 };
        rank(&a.name)
            .cmp(&rank(&b.name))
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut commit_to_branch: HashMap<String, String> = HashMap::new();
    for branch in &branches {
        let oid = match Oid::from_str(&branch.hash) {
            Ok(oid) => oid,
            Err(_) => continue,
        };
        let mut walk = match repo.revwalk() {
            Ok(walk) => walk,
            Err(_) => continue,
        };
        if walk.push(oid).is_err() {
            continue;
        }
        for reachable in walk.flatten() {
            commit_to_branch
                .entry(reachable.to_string())
                .or_insert_with(|| branch.name.clone());
        }
    }

    for commit in &mut commits {
        commit.branch = commit_to_branch.get(&commit.hash).cloned();
    }

    let total_commits = commits.len();
    Ok(ParsedRepository {
        url: url.to_string(),
        branches,
        commits,
        head_hash,
        head_branch,
        total_commits,
    })
}

/// Whether `location` looks like a local path rather than a remote URL.
pub fn is_local_path(location: &str) -> bool {
    Path::new(location).exists()
}

/// Aggregate contribution statistics for a single author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContributorStats {
    pub commit_count: usize,
    pub additions: u64,
    pub deletions: u64,
}

/// Commits authored by the given email.
pub fn commits_by_author<'a>(commits: &'a [Commit], author_email: &str) -> Vec<&'a Commit> {
    commits
        .iter()
        .filter(|c| c.author.email == author_email)
        .collect()
}

/// Commits committed strictly inside the given range.
pub fn commits_in_range<'a>(
    commits: &'a [Commit],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<&'a Commit> {
    commits
        .iter()
        .filter(|c| c.committed_at > start && c.committed_at < end)
        .collect()
}

/// Commits that touched the given path, under either its current or its
/// renamed-from name.
pub fn file_history<'a>(commits: &'a [Commit], file_path: &str) -> Vec<&'a Commit> {
    commits
        .iter()
        .filter(|c| {
            c.diffs
                .iter()
                .any(|d| d.path == file_path || d.old_path.as_deref() == Some(file_path))
        })
        .collect()
}

/// Per-author statistics, keyed `"Name <email>"`.
pub fn contributor_stats(commits: &[Commit]) -> HashMap<String, ContributorStats> {
    let mut stats: HashMap<String, ContributorStats> = HashMap::new();
    for commit in commits {
        let key = format!("{} <{}>", commit.author.name, commit.author.email);
        let entry = stats.entry(key).or_default();
        entry.commit_count += 1;
        entry.additions += u64::from(commit.stats.additions);
        entry.deletions += u64::from(commit.stats.deletions);
    }
    stats
}

/// URL of the named remote, when it exists and has one configured.
pub fn remote_url(repo: &Repository, remote_name: &str) -> Option<String> {
    let remote = repo.find_remote(remote_name).ok()?;
    remote.url().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_split_on_first_newline() {
        let (subject, body) = parse_message("Fix parser\n\nHandle empty input.\n");
        assert_eq!(subject, "Fix parser");
        assert_eq!(body, "Handle empty input.");

        let (subject, body) = parse_message("One liner");
        assert_eq!(subject, "One liner");
        assert_eq!(body, "");
    }

    #[test]
    fn file_type_from_extension() {
        assert_eq!(file_type("src/main.rs"), "rs");
        assert_eq!(file_type("Makefile"), "");
        assert_eq!(file_type("docs/guide.md"), "md");
        assert_eq!(file_type("a.tar.gz"), "gz");
    }

    fn history_fixture() -> Vec<Commit> {
        use crate::models::{Author, CommitStats, Diff, DiffStatus};
        use chrono::TimeZone;

        let commit = |hash: &str, name: &str, email: &str, hour: u32, path: &str, adds: u32| {
            let at = Utc.with_ymd_and_hms(2024, 9, 1, hour, 0, 0).unwrap();
            Commit {
                hash: hash.to_string(),
                short_hash: hash.chars().take(8).collect(),
                author: Author {
                    name: name.to_string(),
                    email: email.to_string(),
                    username: None,
                    timestamp: at,
                },
                committer: Author::default(),
                message: String::new(),
                message_subject: String::new(),
                message_body: String::new(),
                committed_at: at,
                parent_hashes: Vec::new(),
                tree_hash: String::new(),
                diffs: vec![Diff {
                    path: path.to_string(),
                    old_path: None,
                    status: DiffStatus::Modified,
                    additions: adds,
                    deletions: 0,
                    is_binary: false,
                    patch: None,
                    file_type: String::new(),
                }],
                stats: CommitStats {
                    files_changed: 1,
                    additions: adds,
                    deletions: 0,
                    net_change: i64::from(adds),
                },
                is_merge: false,
                branch: None,
            }
        };

        vec![
            commit("a1", "Alice", "alice@example.com", 9, "src/auth.rs", 5),
            commit("a2", "Alice", "alice@example.com", 11, "src/auth.rs", 3),
            commit("b1", "Bob", "bob@example.com", 13, "src/parser.rs", 7),
        ]
    }

    #[test]
    fn history_helpers_filter_commits() {
        use chrono::TimeZone;
        let commits = history_fixture();

        let alice = commits_by_author(&commits, "alice@example.com");
        assert_eq!(alice.len(), 2);

        let auth = file_history(&commits, "src/auth.rs");
        assert_eq!(auth.len(), 2);
        assert!(file_history(&commits, "src/missing.rs").is_empty());

        let start = Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap();
        let midday = commits_in_range(&commits, start, end);
        assert_eq!(midday.len(), 1);
        assert_eq!(midday[0].hash, "a2");
    }

    #[test]
    fn contributor_stats_aggregate_per_author() {
        let commits = history_fixture();
        let stats = contributor_stats(&commits);
        assert_eq!(stats.len(), 2);

        let alice = &stats["Alice <alice@example.com>"];
        assert_eq!(alice.commit_count, 2);
        assert_eq!(alice.additions, 8);

        let bob = &stats["Bob <bob@example.com>"];
        assert_eq!(bob.commit_count, 1);
        assert_eq!(bob.additions, 7);
    }

    #[test]
    fn clone_cache_dir_is_stable_per_url() {
        let a = clone_cache_dir("https://github.com/acme/widget");
        let b = clone_cache_dir("https://github.com/acme/widget");
        let c = clone_cache_dir("https://github.com/acme/other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
