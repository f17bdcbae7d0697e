//! # OSINT Harness
//!
//! A local-first knowledge store and analyst agent for open-source
//! intelligence.
//!
//! Threat reports, vulnerability feeds, and ATT&CK bundles are ingested
//! into a file-backed store, split into chunks, and embedded. A ReAct agent
//! answers questions by searching that store and running analysis tools,
//! citing the chunks it relied on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │  Loader  │──▶│      KnowledgeStore      │──▶│  documents/  │
//! │ JSON/MD  │   │ Chunk → Embed → Index    │   │  vectors/    │
//! └──────────┘   └────────────┬─────────────┘   └──────────────┘
//!                             │ search_kb
//!                ┌────────────▼─────────────┐   ┌──────────────┐
//!                │   Agent (ReAct loop)     │◀─▶│ LanguageModel│
//!                │   ToolRegistry           │   └──────────────┘
//!                └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! osint init
//! osint ingest ./data/nvd.json --source-type vulnerability
//! osint search "sql injection" --mode hybrid
//! osint ask "What techniques does APT29 use for initial access?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed errors for stores, tools, and the language model |
//! | [`index_log`] | Append-only index log with replay and compaction |
//! | [`fs_store`] | File-backed document and vector stores |
//! | [`embedding`] | Embedding providers (OpenAI, local, hashing) |
//! | [`manager`] | Knowledge store: ingest, search, get, delete, stats |
//! | [`loader`] | File loading for ingestion |
//! | [`tools`] | Tool trait, registry, and knowledge base search |
//! | [`osint_tools`] | Entity extraction, relationships, timelines |
//! | [`llm`] | Language model trait and Anthropic client |
//! | [`rag`] | Direct retrieve-and-answer without the agent |
//! | [`react`] | ReAct response parser |
//! | [`agent`] | The agent loop |
//!
//! Models, chunking, ranking, and the store traits live in
//! `osint-harness-core`.

pub mod agent;
pub mod ask;
pub mod config;
pub mod embedding;
pub mod error;
pub mod fs_store;
pub mod get;
pub mod index_log;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod manager;
pub mod osint_tools;
pub mod rag;
pub mod react;
pub mod search;
pub mod stats;
pub mod tools;
