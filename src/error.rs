//! Crate-wide error type.
//!
//! Every failure is tagged with a kind so callers can branch on the variant
//! instead of matching message strings. The CLI decides presentation and
//! exit codes; library code only classifies.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All error kinds produced by the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation observed a cancelled token and stopped early.
    #[error("operation cancelled during {0}")]
    Cancelled(&'static str),

    /// The caller passed something the operation cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An input collection that must be non-empty was empty.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// A required credential was absent at construction time.
    #[error("missing credentials: {0} is not set")]
    MissingCredentials(&'static str),

    /// Fetching platform artifacts failed; the pipeline logs this and
    /// continues with version-control data only.
    #[error("artifact ingestion failed: {0}")]
    IngestFailed(#[source] Box<Error>),

    /// The forge's primary rate limit was exhausted.
    #[error("primary rate limit hit (used {used} of {limit}, resets at {resets_at})")]
    PrimaryRateLimit {
        used: u64,
        limit: u64,
        resets_at: DateTime<Utc>,
    },

    /// The forge's secondary (abuse) rate limit was triggered.
    #[error("secondary rate limit hit (retry after {retry_after_secs:?} seconds)")]
    SecondaryRateLimit { retry_after_secs: Option<u64> },

    /// A forge API call failed for a reason other than rate limiting.
    #[error("api call {call} failed: {message}")]
    Api { call: &'static str, message: String },

    /// The embedding backend failed.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// The language-model backend failed.
    #[error("LLM request failed: {0}")]
    LlmFailed(String),

    /// A vector-store similarity search failed.
    #[error("search failed: {0}")]
    SearchFailed(String),

    /// A vector-store insert failed.
    #[error("insert failed: {0}")]
    InsertFailed(String),

    /// Prompt assembly was invoked without a target episode.
    #[error("target episode required for episode-level narrative")]
    MissingTarget,

    /// The requested episode is absent from the vector store.
    #[error("episode {0} not found in vector store")]
    NotFound(String),

    /// Narrative generation failed.
    #[error("narrative generation failed: {0}")]
    GenerationFailed(String),

    /// An underlying git operation failed.
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// HTTP transport failure outside a classified API call.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem-level failure (clone directories, export files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True when this error (or its ingest wrapper) is a cancellation.
    ///
    /// `Cancelled` must stay detectable end-to-end, including when an
    /// ingest wrapper intervened.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled(_) => true,
            Error::IngestFailed(inner) => inner.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_detectable_through_ingest_wrapper() {
        let err = Error::IngestFailed(Box::new(Error::Cancelled("artifact fetch")));
        assert!(err.is_cancelled());
        assert!(!Error::MissingTarget.is_cancelled());
        assert!(!Error::NotFound("E1".to_string()).is_cancelled());
    }

    #[test]
    fn messages_name_the_kind() {
        let err = Error::NotFound("E7".to_string());
        assert_eq!(err.to_string(), "episode E7 not found in vector store");

        let err = Error::MissingCredentials("OPENAI_API_KEY");
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let err = Error::Api {
            call: "list issues",
            message: "status 500".to_string(),
        };
        assert!(err.to_string().contains("list issues"));
    }

    #[test]
    fn io_and_json_errors_convert() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));

        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
