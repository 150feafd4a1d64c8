//! GitHub platform adapter.
//!
//! Normalizes the raw records fetched by [`crate::ingest::github`] into
//! the platform-neutral [`Artifact`] model:
//!
//! - artifact identity is `"issue-{id}"` / `"pr-{id}"` built from the
//!   forge's internal numeric id (not the short number),
//! - discussions are classified (top-level comment, in-line review
//!   thread, review body), threaded via reply-to links, and sorted by
//!   creation time,
//! - review states are normalized and aggregated per reviewer,
//! - a merged change proposal always reports state `merged`.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::ingest::github::{
    fetch_repository_artifacts, CrossRef, GithubClient, IssueBundle, PullRequestBundle,
    RawComment, RawReactions, RawReview, RawReviewComment,
};
use crate::models::{
    Artifact, ArtifactMetadata, ArtifactType, Author, Discussion, DiscussionType, Reactions,
};

/// The two artifact identity prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Issue,
    Pr,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Issue => write!(f, "issue"),
            ArtifactKind::Pr => write!(f, "pr"),
        }
    }
}

/// Parse an artifact identity of the form `"issue-{n}"` or `"pr-{n}"`.
///
/// Fails with [`Error::InvalidInput`] unless exactly one prefix matches and
/// the suffix is a non-empty base-10 integer.
pub fn parse_artifact_id(id: &str) -> Result<(ArtifactKind, i64)> {
    let (kind, suffix) = if let Some(rest) = id.strip_prefix("issue-") {
        (ArtifactKind::Issue, rest)
    } else if let Some(rest) = id.strip_prefix("pr-") {
        (ArtifactKind::Pr, rest)
    } else {
        return Err(Error::InvalidInput(format!(
            "invalid artifact id format: {id}"
        )));
    };

    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidInput(format!(
            "invalid artifact number in id {id}"
        )));
    }

    let number = suffix
        .parse::<i64>()
        .map_err(|_| Error::InvalidInput(format!("invalid artifact number in id {id}")))?;

    Ok((kind, number))
}

/// `merged` wins over whatever raw state the platform reports.
pub fn normalize_state(state: &str, merged: bool) -> String {
    if merged {
        "merged".to_string()
    } else {
        state.to_string()
    }
}

/// Map the platform's uppercase review states to the neutral vocabulary;
/// anything unrecognized passes through verbatim.
pub fn normalize_review_state(state: &str) -> String {
    match state {
        "APPROVED" => "approved".to_string(),
        "CHANGES_REQUESTED" => "changes_requested".to_string(),
        "COMMENTED" => "commented".to_string(),
        "DISMISSED" => "dismissed".to_string(),
        other => other.to_string(),
    }
}

/// Aggregate an overall review state from all reviews on a change proposal.
///
/// Each reviewer is collapsed to their most recent review; from the final
/// set, `changes_requested` beats `approved` beats `commented`. An empty
/// review list yields the empty string.
pub fn determine_review_state(reviews: &[RawReview]) -> String {
    if reviews.is_empty() {
        return String::new();
    }

    let mut latest_by_reviewer: HashMap<String, String> = HashMap::new();
    for review in reviews {
        let reviewer = review
            .user
            .as_ref()
            .map(|u| u.login.clone())
            .unwrap_or_default();
        latest_by_reviewer.insert(reviewer, normalize_review_state(&review.state));
    }

    let mut has_changes_requested = false;
    let mut has_approval = false;
    for state in latest_by_reviewer.values() {
        match state.as_str() {
            "changes_requested" => has_changes_requested = true,
            "approved" => has_approval = true,
            _ => {}
        }
    }

    if has_changes_requested {
        "changes_requested".to_string()
    } else if has_approval {
        "approved".to_string()
    } else {
        "commented".to_string()
    }
}

fn convert_reactions(reactions: Option<&RawReactions>) -> Reactions {
    match reactions {
        None => Reactions::default(),
        Some(r) => Reactions {
            thumbs_up: r.plus_one,
            thumbs_down: r.minus_one,
            laugh: r.laugh,
            hooray: r.hooray,
            confused: r.confused,
            heart: r.heart,
            rocket: r.rocket,
            eyes: r.eyes,
            total_count: r.total_count,
        },
    }
}

fn login_author(user: Option<&crate::ingest::github::RawUser>, at: DateTime<Utc>) -> Author {
    Author {
        name: user.map(|u| u.login.clone()).unwrap_or_default(),
        // The forge does not expose emails in artifact contexts.
        email: String::new(),
        username: user.map(|u| u.login.clone()),
        timestamp: at,
    }
}

fn convert_comment(comment: &RawComment) -> Discussion {
    let created = comment.created_at.unwrap_or_default();
    Discussion {
        id: format!("comment-{}", comment.id),
        kind: DiscussionType::Comment,
        author: login_author(comment.user.as_ref(), created),
        body: comment.body.clone(),
        created_at: created,
        updated_at: comment.updated_at.unwrap_or(created),
        parent_id: None,
        thread_id: None,
        file_path: String::new(),
        line_number: 0,
        commit_hash: String::new(),
        review_state: String::new(),
        reactions: convert_reactions(comment.reactions.as_ref()),
    }
}

fn convert_review_comment(comment: &RawReviewComment) -> Discussion {
    let created = comment.created_at.unwrap_or_default();
    let id = format!("review-comment-{}", comment.id);

    // A reply belongs to its parent's thread; a root comment opens one.
    let (parent_id, thread_id) = match comment.in_reply_to_id {
        Some(reply_to) if reply_to != 0 => {
            let parent = format!("review-comment-{reply_to}");
            (Some(parent.clone()), Some(parent))
        }
        _ => (None, Some(id.clone())),
    };

    Discussion {
        kind: DiscussionType::ReviewThread,
        author: login_author(comment.user.as_ref(), created),
        body: comment.body.clone(),
        created_at: created,
        updated_at: comment.updated_at.unwrap_or(created),
        parent_id,
        thread_id,
        file_path: comment.path.clone(),
        line_number: comment.line.or(comment.original_line).unwrap_or(0),
        commit_hash: comment.commit_id.clone(),
        review_state: String::new(),
        reactions: convert_reactions(comment.reactions.as_ref()),
        id,
    }
}

fn convert_review(review: &RawReview) -> Discussion {
    let submitted = review.submitted_at.unwrap_or_default();
    Discussion {
        id: format!("review-{}", review.id),
        kind: DiscussionType::Review,
        author: login_author(review.user.as_ref(), submitted),
        body: review.body.clone().unwrap_or_default(),
        created_at: submitted,
        updated_at: submitted,
        parent_id: None,
        thread_id: None,
        file_path: String::new(),
        line_number: 0,
        commit_hash: String::new(),
        review_state: normalize_review_state(&review.state),
        reactions: Reactions::default(),
    }
}

fn related_artifacts(cross_refs: &[CrossRef]) -> Vec<String> {
    cross_refs
        .iter()
        .map(|r| {
            let prefix = if r.kind == "pull_request" { "pr" } else { "issue" };
            format!("{prefix}-{}", r.number)
        })
        .collect()
}

/// Convert an issue bundle into a neutral artifact.
pub fn convert_issue(bundle: &IssueBundle) -> Artifact {
    let issue = &bundle.issue;
    let created = issue.created_at.unwrap_or_default();

    let mut metadata = ArtifactMetadata {
        related_artifacts: related_artifacts(&bundle.cross_references),
        ..ArtifactMetadata::default()
    };
    if let Some(milestone) = &issue.milestone {
        metadata.milestone = milestone.title.clone();
        metadata.due_date = milestone.due_on;
    }

    let mut discussions: Vec<Discussion> = bundle.comments.iter().map(convert_comment).collect();
    discussions.sort_by_key(|d| d.created_at);

    Artifact {
        id: format!("issue-{}", issue.id),
        number: issue.number,
        kind: ArtifactType::Issue,
        title: issue.title.clone(),
        description: issue.body.clone().unwrap_or_default(),
        state: issue.state.clone(),
        author: login_author(issue.user.as_ref(), created),
        assignees: issue.assignees.iter().map(|u| u.login.clone()).collect(),
        labels: issue.labels.iter().map(|l| l.name.clone()).collect(),
        created_at: created,
        updated_at: issue.updated_at.unwrap_or(created),
        closed_at: issue.closed_at,
        merged_at: None,
        discussions,
        metadata,
        url: issue.html_url.clone(),
    }
}

/// Convert a pull-request bundle into a neutral artifact with its full
/// discussion thread.
pub fn convert_pull_request(bundle: &PullRequestBundle) -> Artifact {
    let pull = &bundle.pull;
    let created = pull.created_at.unwrap_or_default();

    let mut discussions = Vec::with_capacity(
        bundle.comments.len() + bundle.review_comments.len() + bundle.reviews.len(),
    );
    discussions.extend(bundle.comments.iter().map(convert_comment));
    discussions.extend(bundle.review_comments.iter().map(convert_review_comment));
    discussions.extend(bundle.reviews.iter().map(convert_review));
    discussions.sort_by_key(|d| d.created_at);

    let mut metadata = ArtifactMetadata {
        base_branch: pull.base.as_ref().map(|b| b.name.clone()).unwrap_or_default(),
        head_branch: pull.head.as_ref().map(|b| b.name.clone()).unwrap_or_default(),
        additions: pull.additions,
        deletions: pull.deletions,
        changed_files: pull.changed_files,
        review_state: determine_review_state(&bundle.reviews),
        is_draft: pull.draft,
        related_artifacts: related_artifacts(&bundle.cross_references),
        ..ArtifactMetadata::default()
    };
    if let Some(milestone) = &pull.milestone {
        metadata.milestone = milestone.title.clone();
        metadata.due_date = milestone.due_on;
    }

    Artifact {
        id: format!("pr-{}", pull.id),
        number: pull.number,
        kind: ArtifactType::PullRequest,
        title: pull.title.clone(),
        description: pull.body.clone().unwrap_or_default(),
        state: normalize_state(&pull.state, pull.is_merged()),
        author: login_author(pull.user.as_ref(), created),
        assignees: pull.assignees.iter().map(|u| u.login.clone()).collect(),
        labels: pull.labels.iter().map(|l| l.name.clone()).collect(),
        created_at: created,
        updated_at: pull.updated_at.unwrap_or(created),
        closed_at: pull.closed_at,
        merged_at: pull.merged_at,
        discussions,
        metadata,
        url: pull.html_url.clone(),
    }
}

/// Fetch and convert every artifact for a repository.
pub async fn fetch_artifacts(
    client: &GithubClient,
    ctx: &CancellationToken,
    owner: &str,
    repo: &str,
) -> Result<Vec<Artifact>> {
    let (issues, pulls) = fetch_repository_artifacts(client, ctx, owner, repo).await?;

    let mut artifacts = Vec::with_capacity(issues.len() + pulls.len());
    for bundle in &issues {
        artifacts.push(convert_issue(bundle));
    }
    for bundle in &pulls {
        artifacts.push(convert_pull_request(bundle));
    }

    let duplicate = first_duplicate_id(&artifacts);
    if let Some(id) = duplicate {
        warn!(id, "duplicate artifact identity in fetch result");
    }

    info!(count = artifacts.len(), "converted artifacts");
    Ok(artifacts)
}

fn first_duplicate_id(artifacts: &[Artifact]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    artifacts
        .iter()
        .find(|a| !seen.insert(a.id.as_str()))
        .map(|a| a.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::github::{RawIssue, RawPullRequest, RawUser};
    use chrono::TimeZone;

    fn review(author: &str, state: &str, minute: u32) -> RawReview {
        RawReview {
            id: i64::from(minute),
            user: Some(RawUser {
                login: author.to_string(),
            }),
            body: None,
            state: state.to_string(),
            submitted_at: Some(Utc.with_ymd_and_hms(2024, 4, 1, 10, minute, 0).unwrap()),
        }
    }

    #[test]
    fn parse_artifact_id_accepts_both_prefixes() {
        assert_eq!(
            parse_artifact_id("issue-42").unwrap(),
            (ArtifactKind::Issue, 42)
        );
        assert_eq!(parse_artifact_id("pr-123").unwrap(), (ArtifactKind::Pr, 123));
    }

    #[test]
    fn parse_artifact_id_rejects_malformed() {
        for bad in ["issue-", "pr-", "ticket-5", "pr-abc", "pr--3", "42", ""] {
            let err = parse_artifact_id(bad).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{bad}");
        }
    }

    #[test]
    fn review_state_normalization_passes_unknown_through() {
        assert_eq!(normalize_review_state("APPROVED"), "approved");
        assert_eq!(normalize_review_state("CHANGES_REQUESTED"), "changes_requested");
        assert_eq!(normalize_review_state("COMMENTED"), "commented");
        assert_eq!(normalize_review_state("DISMISSED"), "dismissed");
        assert_eq!(normalize_review_state("PENDING"), "PENDING");
    }

    #[test]
    fn changes_requested_wins_over_approval() {
        let reviews = vec![review("alice", "APPROVED", 0), review("bob", "CHANGES_REQUESTED", 1)];
        assert_eq!(determine_review_state(&reviews), "changes_requested");
    }

    #[test]
    fn later_review_overrides_reviewer_state() {
        // Bob softened to a comment, Alice re-approved: approval stands.
        let reviews = vec![
            review("alice", "APPROVED", 0),
            review("bob", "CHANGES_REQUESTED", 1),
            review("bob", "COMMENTED", 2),
            review("alice", "APPROVED", 3),
        ];
        assert_eq!(determine_review_state(&reviews), "approved");
    }

    #[test]
    fn empty_reviews_yield_empty_state() {
        assert_eq!(determine_review_state(&[]), "");
        let reviews = vec![review("carol", "COMMENTED", 0)];
        assert_eq!(determine_review_state(&reviews), "commented");
    }

    #[test]
    fn merged_state_beats_raw_state() {
        assert_eq!(normalize_state("closed", true), "merged");
        assert_eq!(normalize_state("closed", false), "closed");
        assert_eq!(normalize_state("open", false), "open");
    }

    #[test]
    fn issue_conversion_uses_internal_id() {
        let bundle = IssueBundle {
            issue: RawIssue {
                id: 9001,
                number: 42,
                title: "Login broken".to_string(),
                body: Some("Repro steps".to_string()),
                state: "open".to_string(),
                user: Some(RawUser {
                    login: "alice".to_string(),
                }),
                ..RawIssue::default()
            },
            comments: vec![RawComment {
                id: 77,
                body: "can reproduce".to_string(),
                ..RawComment::default()
            }],
            cross_references: vec![CrossRef {
                kind: "pull_request".to_string(),
                number: 43,
                title: String::new(),
                state: String::new(),
                url: String::new(),
                created_at: None,
            }],
        };

        let artifact = convert_issue(&bundle);
        assert_eq!(artifact.id, "issue-9001");
        assert_eq!(artifact.number, 42);
        assert_eq!(artifact.kind, ArtifactType::Issue);
        assert_eq!(artifact.author.name, "alice");
        assert_eq!(artifact.metadata.related_artifacts, vec!["pr-43"]);
        assert_eq!(artifact.discussions.len(), 1);
        assert_eq!(artifact.discussions[0].id, "comment-77");
        assert_eq!(artifact.discussions[0].kind, DiscussionType::Comment);
    }

    #[test]
    fn pull_request_discussions_sorted_and_threaded() {
        let t = |minute| Utc.with_ymd_and_hms(2024, 4, 1, 10, minute, 0).unwrap();
        let bundle = PullRequestBundle {
            pull: RawPullRequest {
                id: 500,
                number: 7,
                state: "closed".to_string(),
                merged_at: Some(t(30)),
                ..RawPullRequest::default()
            },
            comments: vec![RawComment {
                id: 1,
                body: "looks good".to_string(),
                created_at: Some(t(20)),
                ..RawComment::default()
            }],
            review_comments: vec![
                RawReviewComment {
                    id: 10,
                    body: "rename this".to_string(),
                    path: "src/lib.rs".to_string(),
                    line: Some(12),
                    commit_id: "abc123".to_string(),
                    created_at: Some(t(5)),
                    ..RawReviewComment::default()
                },
                RawReviewComment {
                    id: 11,
                    body: "done".to_string(),
                    path: "src/lib.rs".to_string(),
                    in_reply_to_id: Some(10),
                    created_at: Some(t(10)),
                    ..RawReviewComment::default()
                },
            ],
            reviews: vec![RawReview {
                id: 99,
                state: "APPROVED".to_string(),
                submitted_at: Some(t(15)),
                user: Some(RawUser {
                    login: "bob".to_string(),
                }),
                ..RawReview::default()
            }],
            cross_references: Vec::new(),
        };

        let artifact = convert_pull_request(&bundle);
        assert_eq!(artifact.id, "pr-500");
        assert_eq!(artifact.state, "merged");
        assert_eq!(artifact.metadata.review_state, "approved");

        let ids: Vec<&str> = artifact.discussions.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["review-comment-10", "review-comment-11", "review-99", "comment-1"]
        );

        let root = &artifact.discussions[0];
        assert_eq!(root.kind, DiscussionType::ReviewThread);
        assert_eq!(root.thread_id.as_deref(), Some("review-comment-10"));
        assert_eq!(root.parent_id, None);

        let reply = &artifact.discussions[1];
        assert_eq!(reply.parent_id.as_deref(), Some("review-comment-10"));
        assert_eq!(reply.thread_id.as_deref(), Some("review-comment-10"));
    }
}
