//! # AusLaw Core
//!
//! Shared, WASM-safe logic for AusLaw: legislation data models,
//! parent/child chunking, store abstraction, rank fusion, and the
//! provider traits (embedding, reranking) the retrieval path is built on.
//!
//! This crate contains no tokio, sqlx, network, or filesystem
//! dependencies. Everything that talks to the outside world lives in the
//! `auslaw` application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod rerank;
pub mod search;
pub mod store;
