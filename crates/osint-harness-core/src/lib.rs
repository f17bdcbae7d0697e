//! # OSINT Harness Core
//!
//! Pure logic for OSINT Harness: data models, chunking, the embedding
//! trait with its offline hashing provider, exact vector ranking, and the
//! document/vector store traits with in-memory implementations.
//!
//! This crate does no filesystem or network I/O. The `osint-harness` app
//! crate supplies persistent stores, network embedding providers, the tool
//! registry, and the agent loop.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod search;
pub mod store;
