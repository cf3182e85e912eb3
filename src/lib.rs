//! # AusLaw
//!
//! Australian legal question answering over a local legislation corpus.
//!
//! Legislation is ingested into SQLite as a two-level parent/child chunk
//! tree and searched with hybrid retrieval (vector + FTS5 keyword, fused by
//! Reciprocal Rank Fusion, optionally reranked). On top of retrieval sits a
//! turn orchestrator: a safety gate that escalates crisis situations to
//! support services, a complexity router, an eight-stage legal analysis
//! pipeline, and a conversational graph with a lawyer-brief sub-flow.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────┐
//! │  ingest  │──▶│ chunk+embed │──▶│  SQLite   │
//! │  JSONL   │   │ parent/child│   │ FTS5+Vec  │
//! └──────────┘   └─────────────┘   └─────┬─────┘
//!                                        │ HybridRetriever
//!                      ┌─────────────────┤
//!                      ▼                 ▼
//!               ┌────────────┐    ┌────────────┐
//!               │Orchestrator│◀──▶│ tools/HTTP │
//!               │ safety ... │    │  (axum)    │
//!               └────────────┘    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! auslaw init                        # create database
//! auslaw ingest corpus.jsonl         # load legislation
//! auslaw embed pending               # generate embeddings
//! auslaw search "rent increase notice" --state NSW
//! auslaw ask "How much notice for a rent increase?" --state NSW
//! auslaw serve                       # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`sqlite_store`] | SQLite implementation of the chunk store |
//! | [`embedding`] | Embedding provider backends |
//! | [`reranker`] | Cohere rerank client |
//! | [`retriever`] | Hybrid retrieval service |
//! | [`model`] | Chat / structured-output model provider |
//! | [`safety`] | Safety gate |
//! | [`complexity`] | Simple vs complex routing |
//! | [`pipeline`] | Eight-stage legal analysis |
//! | [`orchestrator`] | Turn handling, graphs, sessions, brief flow |
//! | [`directory`] | Lawyer referrals and action templates |
//! | [`tools`] | Tools callable by name over HTTP |
//! | [`server`] | HTTP server |

pub mod complexity;
pub mod config;
pub mod db;
pub mod directory;
pub mod embed_cmd;
pub mod embedding;
pub mod ingest;
pub mod legal_elements;
pub mod migrate;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod reranker;
pub mod resources;
pub mod retriever;
pub mod safety;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod tools;

#[cfg(test)]
mod test_support;
