//! # Chronicler
//!
//! **Turn a repository's development history into searchable episodes and
//! ask questions about it.**
//!
//! Chronicler ingests commits from a git repository and work items from a
//! hosted forge, groups them into coherent "episodes" with a weighted
//! multi-signal similarity heuristic, indexes episode summaries into a
//! vector store, and answers natural-language questions about the history
//! through a retrieval-augmented generation pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌─────────┐   ┌────────────┐
//! │  Ingest   │──▶│ Cluster  │──▶│Summarize│──▶│ Embed+Index │
//! │ git/forge │   │ episodes │   │         │   │vector store │
//! └───────────┘   └──────────┘   └─────────┘   └─────┬──────┘
//!                                                    │
//!                                   ┌────────────────┤
//!                                   ▼                ▼
//!                             ┌──────────┐     ┌──────────┐
//!                             │ Retrieve │────▶│ Generate │
//!                             │ context  │     │narrative │
//!                             └──────────┘     └──────────┘
//! ```
//!
//! Data flows strictly left to right at ingest time; answering a question
//! reuses only the vector store and the retriever.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Platform-neutral domain types: commits, artifacts, episodes |
//! | [`ingest`] | Git history parsing (git2) and the GitHub REST client |
//! | [`adapter`] | Forge records → neutral artifacts, review-state aggregation |
//! | [`cluster`] | Weighted multi-signal episode grouping and artifact linking |
//! | [`summarizer`] | Episode summaries: title, sectioned body, date range |
//! | [`embedding`] | Embedding provider trait and the OpenAI backend |
//! | [`store`] | Vector-store contract and the in-memory implementation |
//! | [`indexer`] | Batch embedding and insertion with skip/force semantics |
//! | [`retrieval`] | Query and episode context retrieval with self-exclusion |
//! | [`prompt`] | Deterministic prompt assembly |
//! | [`generator`] | LLM backends and narrative generation |
//! | [`orchestrator`] | Platform detection, analyze pipeline, RAG facade |
//! | [`export`] | Episode JSON export |
//! | [`error`] | Tagged error kinds shared by every layer |
//!
//! ## Quick start
//!
//! ```bash
//! chronicler analyze /path/to/repo
//! chronicler analyze https://github.com/acme/widget --export episodes.json
//! chronicler ask /path/to/repo "Who worked on authentication?"
//! ```

pub mod adapter;
pub mod cluster;
pub mod embedding;
pub mod error;
pub mod export;
pub mod generator;
pub mod indexer;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;
pub mod store;
pub mod summarizer;

#[cfg(test)]
pub(crate) mod testutil;
