//! GitHub forge ingester.
//!
//! A thin REST client over `reqwest` that lists issues, pull requests,
//! comments, review comments, reviews, and timelines with pagination
//! (page size 100), then bundles everything an artifact needs for
//! normalization by [`crate::adapter`].
//!
//! Rate-limit responses are classified into two kinds: the primary quota
//! (`x-ratelimit-*` headers, surfaced with usage and reset time) and the
//! secondary abuse limit (`retry-after` header). Timeline fetches are the
//! one non-fatal call: a failure there degrades to an empty timeline.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};

const API_ROOT: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;
const USER_AGENT: &str = concat!("chronicler/", env!("CARGO_PKG_VERSION"));

/// A user reference as returned by the API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawUser {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLabel {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMilestone {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub due_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct RawReactions {
    #[serde(default)]
    pub total_count: u32,
    #[serde(default, rename = "+1")]
    pub plus_one: u32,
    #[serde(default, rename = "-1")]
    pub minus_one: u32,
    #[serde(default)]
    pub laugh: u32,
    #[serde(default)]
    pub confused: u32,
    #[serde(default)]
    pub heart: u32,
    #[serde(default)]
    pub hooray: u32,
    #[serde(default)]
    pub rocket: u32,
    #[serde(default)]
    pub eyes: u32,
}

/// An issue-endpoint record. The issue listing also returns pull requests;
/// the `pull_request` marker tells them apart.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawIssue {
    pub id: i64,
    pub number: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub labels: Vec<RawLabel>,
    #[serde(default)]
    pub assignees: Vec<RawUser>,
    #[serde(default)]
    pub milestone: Option<RawMilestone>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub reactions: Option<RawReactions>,
    /// Present iff this record is a change proposal.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl RawIssue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBranchRef {
    #[serde(default, rename = "ref")]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPullRequest {
    pub id: i64,
    pub number: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub labels: Vec<RawLabel>,
    #[serde(default)]
    pub assignees: Vec<RawUser>,
    #[serde(default)]
    pub milestone: Option<RawMilestone>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub base: Option<RawBranchRef>,
    #[serde(default)]
    pub head: Option<RawBranchRef>,
    /// Only populated by the detail endpoint; zero from listings.
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub changed_files: i64,
    #[serde(default)]
    pub html_url: String,
}

impl RawPullRequest {
    /// The list endpoint has no `merged` boolean; a merge timestamp is the
    /// reliable signal.
    pub fn is_merged(&self) -> bool {
        self.merged_at.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawComment {
    pub id: i64,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Option<RawReactions>,
}

/// An in-line code review comment with its location on both diff sides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReviewComment {
    pub id: i64,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub line: Option<i64>,
    #[serde(default)]
    pub start_line: Option<i64>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub start_side: Option<String>,
    #[serde(default)]
    pub original_line: Option<i64>,
    #[serde(default)]
    pub original_start_line: Option<i64>,
    #[serde(default)]
    pub in_reply_to_id: Option<i64>,
    #[serde(default)]
    pub commit_id: String,
    #[serde(default)]
    pub original_commit_id: String,
    #[serde(default)]
    pub diff_hunk: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reactions: Option<RawReactions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawReview {
    pub id: i64,
    #[serde(default)]
    pub user: Option<RawUser>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// The issue nested in a timeline cross-reference source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTimelineIssue {
    #[serde(default)]
    pub number: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTimelineSource {
    #[serde(default)]
    pub issue: Option<RawTimelineIssue>,
}

/// A timeline entry. Timeline events are heterogeneous, so every field is
/// optional and unknown shapes deserialize into an inert record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTimelineEvent {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub actor: Option<RawUser>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source: Option<RawTimelineSource>,
}

/// A cross-reference extracted from timeline events.
#[derive(Debug, Clone)]
pub struct CrossRef {
    /// `"issue"` or `"pull_request"`.
    pub kind: String,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// An issue plus its discussion context. The bulk listing leaves
/// `comments` empty; [`fetch_issue`] fills it.
#[derive(Debug, Clone)]
pub struct IssueBundle {
    pub issue: RawIssue,
    pub comments: Vec<RawComment>,
    pub cross_references: Vec<CrossRef>,
}

/// A pull request with its complete discussion context.
#[derive(Debug, Clone)]
pub struct PullRequestBundle {
    pub pull: RawPullRequest,
    pub comments: Vec<RawComment>,
    pub review_comments: Vec<RawReviewComment>,
    pub reviews: Vec<RawReview>,
    pub cross_references: Vec<CrossRef>,
}

/// Authenticated GitHub REST client.
#[derive(Debug)]
pub struct GithubClient {
    http: reqwest::Client,
    token: String,
}

impl GithubClient {
    /// Build a client. Fails with [`Error::MissingCredentials`] when the
    /// token is empty.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::MissingCredentials("GITHUB_TOKEN"));
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Api {
                call: "client construction",
                message: e.to_string(),
            })?;
        Ok(Self { http, token })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        call: &'static str,
        url: String,
    ) -> Result<T> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled(call));
        }

        let request = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .send();

        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(Error::Cancelled(call)),
            response = request => response.map_err(|e| Error::Api {
                call,
                message: e.to_string(),
            })?,
        };

        let status = response.status();
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(classify_rate_limit(call, &response));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                call,
                message: format!("status {status}: {body}"),
            });
        }

        response.json::<T>().await.map_err(|e| Error::Api {
            call,
            message: format!("decoding response: {e}"),
        })
    }

    async fn get_paged<T: DeserializeOwned>(
        &self,
        ctx: &CancellationToken,
        call: &'static str,
        path: String,
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1usize;
        loop {
            let sep = if path.contains('?') { '&' } else { '?' };
            let url = format!("{API_ROOT}{path}{sep}per_page={PAGE_SIZE}&page={page}");
            let batch: Vec<T> = self.get_json(ctx, call, url).await?;
            let batch_len = batch.len();
            all.extend(batch);
            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    /// List all issue-endpoint records (issues *and* pull requests) in any
    /// state.
    pub async fn list_issues(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<RawIssue>> {
        let mut issues: Vec<RawIssue> = self
            .get_paged(
                ctx,
                "list issues",
                format!("/repos/{owner}/{repo}/issues?state=all"),
            )
            .await?;
        issues.sort_by(|a, b| cmp_time_then_id(a.created_at, a.id, b.created_at, b.id));
        Ok(issues)
    }

    /// List all pull requests in any state.
    pub async fn list_pull_requests(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<RawPullRequest>> {
        let mut pulls: Vec<RawPullRequest> = self
            .get_paged(
                ctx,
                "list pull requests",
                format!("/repos/{owner}/{repo}/pulls?state=all"),
            )
            .await?;
        pulls.sort_by(|a, b| cmp_time_then_id(a.created_at, a.id, b.created_at, b.id));
        Ok(pulls)
    }

    /// List the top-level comments on an issue or pull request.
    pub async fn list_comments(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<RawComment>> {
        let mut comments: Vec<RawComment> = self
            .get_paged(
                ctx,
                "list comments",
                format!("/repos/{owner}/{repo}/issues/{number}/comments"),
            )
            .await?;
        comments.sort_by(|a, b| cmp_time_then_id(a.created_at, a.id, b.created_at, b.id));
        Ok(comments)
    }

    /// List the in-line review comments on a pull request.
    pub async fn list_review_comments(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<RawReviewComment>> {
        let mut comments: Vec<RawReviewComment> = self
            .get_paged(
                ctx,
                "list review comments",
                format!("/repos/{owner}/{repo}/pulls/{number}/comments"),
            )
            .await?;
        comments.sort_by(|a, b| cmp_time_then_id(a.created_at, a.id, b.created_at, b.id));
        Ok(comments)
    }

    /// List the reviews submitted on a pull request.
    pub async fn list_reviews(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<RawReview>> {
        let mut reviews: Vec<RawReview> = self
            .get_paged(
                ctx,
                "list reviews",
                format!("/repos/{owner}/{repo}/pulls/{number}/reviews"),
            )
            .await?;
        reviews.sort_by(|a, b| cmp_time_then_id(a.submitted_at, a.id, b.submitted_at, b.id));
        Ok(reviews)
    }

    /// Fetch a single issue record.
    pub async fn get_issue(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<RawIssue> {
        self.get_json(
            ctx,
            "get issue",
            format!("{API_ROOT}/repos/{owner}/{repo}/issues/{number}"),
        )
        .await
    }

    /// Fetch a single pull request. Unlike the listing, the detail
    /// endpoint carries addition/deletion/changed-file counts.
    pub async fn get_pull_request(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<RawPullRequest> {
        self.get_json(
            ctx,
            "get pull request",
            format!("{API_ROOT}/repos/{owner}/{repo}/pulls/{number}"),
        )
        .await
    }

    /// List the timeline for an issue or pull request.
    pub async fn list_timeline(
        &self,
        ctx: &CancellationToken,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<Vec<RawTimelineEvent>> {
        self.get_paged(
            ctx,
            "list timeline",
            format!("/repos/{owner}/{repo}/issues/{number}/timeline"),
        )
        .await
    }
}

fn cmp_time_then_id(
    a_time: Option<DateTime<Utc>>,
    a_id: i64,
    b_time: Option<DateTime<Utc>>,
    b_id: i64,
) -> std::cmp::Ordering {
    a_time.cmp(&b_time).then(a_id.cmp(&b_id))
}

fn classify_rate_limit(call: &'static str, response: &reqwest::Response) -> Error {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
    };

    if let Some(retry_after) = header("retry-after") {
        return Error::SecondaryRateLimit {
            retry_after_secs: Some(retry_after),
        };
    }

    if header("x-ratelimit-remaining") == Some(0) {
        let limit = header("x-ratelimit-limit").unwrap_or(0);
        let used = header("x-ratelimit-used").unwrap_or(limit);
        let resets_at = header("x-ratelimit-reset")
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single())
            .unwrap_or_default();
        return Error::PrimaryRateLimit {
            used,
            limit,
            resets_at,
        };
    }

    Error::Api {
        call,
        message: format!("status {}", response.status()),
    }
}

/// Extract every cross-reference event whose source is an issue or pull
/// request.
pub fn extract_cross_references(timeline: &[RawTimelineEvent]) -> Vec<CrossRef> {
    let mut refs = Vec::new();
    for event in timeline {
        if event.event != "cross-referenced" {
            continue;
        }
        let issue = match event.source.as_ref().and_then(|s| s.issue.as_ref()) {
            Some(issue) => issue,
            None => continue,
        };
        let kind = if issue.pull_request.is_some() {
            "pull_request"
        } else {
            "issue"
        };
        refs.push(CrossRef {
            kind: kind.to_string(),
            number: issue.number,
            title: issue.title.clone(),
            state: issue.state.clone(),
            url: issue.html_url.clone(),
            created_at: event.created_at,
        });
    }
    refs
}

/// Fetch all artifacts for a repository: issues with their timelines, and
/// pull requests with comments, review comments, reviews, and timelines.
///
/// Timeline failures are non-fatal and degrade to an empty timeline;
/// cancellation always propagates.
pub async fn fetch_repository_artifacts(
    client: &GithubClient,
    ctx: &CancellationToken,
    owner: &str,
    repo: &str,
) -> Result<(Vec<IssueBundle>, Vec<PullRequestBundle>)> {
    let records = client.list_issues(ctx, owner, repo).await?;
    info!(count = records.len(), "fetched issue records");

    let mut issues = Vec::new();
    for record in records {
        if record.is_pull_request() {
            // The pulls endpoint is the authoritative source for these.
            continue;
        }
        let cross_references =
            timeline_or_empty(client, ctx, owner, repo, record.number).await?;
        issues.push(IssueBundle {
            issue: record,
            comments: Vec::new(),
            cross_references,
        });
    }

    let raw_pulls = client.list_pull_requests(ctx, owner, repo).await?;
    info!(count = raw_pulls.len(), "fetched pull requests");

    let mut pulls = Vec::new();
    for pull in raw_pulls {
        let number = pull.number;
        let comments = client.list_comments(ctx, owner, repo, number).await?;
        let review_comments = client
            .list_review_comments(ctx, owner, repo, number)
            .await?;
        let reviews = client.list_reviews(ctx, owner, repo, number).await?;
        let cross_references = timeline_or_empty(client, ctx, owner, repo, number).await?;
        pulls.push(PullRequestBundle {
            pull,
            comments,
            review_comments,
            reviews,
            cross_references,
        });
    }

    Ok((issues, pulls))
}

/// Fetch one issue with its comments and timeline cross-references.
pub async fn fetch_issue(
    client: &GithubClient,
    ctx: &CancellationToken,
    owner: &str,
    repo: &str,
    number: i64,
) -> Result<IssueBundle> {
    let issue = client.get_issue(ctx, owner, repo, number).await?;
    let comments = client.list_comments(ctx, owner, repo, number).await?;
    let cross_references = timeline_or_empty(client, ctx, owner, repo, number).await?;
    Ok(IssueBundle {
        issue,
        comments,
        cross_references,
    })
}

/// Fetch one pull request with its complete discussion context.
pub async fn fetch_pull_request(
    client: &GithubClient,
    ctx: &CancellationToken,
    owner: &str,
    repo: &str,
    number: i64,
) -> Result<PullRequestBundle> {
    let pull = client.get_pull_request(ctx, owner, repo, number).await?;
    let comments = client.list_comments(ctx, owner, repo, number).await?;
    let review_comments = client.list_review_comments(ctx, owner, repo, number).await?;
    let reviews = client.list_reviews(ctx, owner, repo, number).await?;
    let cross_references = timeline_or_empty(client, ctx, owner, repo, number).await?;
    Ok(PullRequestBundle {
        pull,
        comments,
        review_comments,
        reviews,
        cross_references,
    })
}

/// Extract issue numbers referenced with a closing keyword, e.g.
/// `"Fixes #123"` or `"see #9"`.
pub fn parse_body_references(body: &str) -> Vec<i64> {
    const KEYWORDS: &[&str] = &[
        "fixes", "closes", "resolves", "fix", "close", "resolve", "see",
    ];

    let lowered = body.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();

    let mut refs = Vec::new();
    for (i, word) in words.iter().enumerate() {
        if !KEYWORDS.contains(word) {
            continue;
        }
        let Some(next) = words.get(i + 1) else {
            continue;
        };
        let Some(rest) = next.strip_prefix('#') else {
            continue;
        };
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(number) = digits.parse::<i64>() {
            refs.push(number);
        }
    }
    refs
}

async fn timeline_or_empty(
    client: &GithubClient,
    ctx: &CancellationToken,
    owner: &str,
    repo: &str,
    number: i64,
) -> Result<Vec<CrossRef>> {
    match client.list_timeline(ctx, owner, repo, number).await {
        Ok(timeline) => Ok(extract_cross_references(&timeline)),
        Err(err) if err.is_cancelled() => Err(err),
        Err(err) => {
            warn!(number, error = %err, "timeline fetch failed, continuing without it");
            Ok(Vec::new())
        }
    }
}
