//! # Docent
//!
//! Retrieval-augmented conversations over uploaded documents, plus an
//! agent protocol for tool providers and a documentation agent.
//!
//! The runtime-free logic (chunking, retrieval, context windows, the
//! protocol envelope) lives in `docent-core`. This crate supplies the
//! SQLite store, the remote providers, the worker pool, and the outer
//! surfaces.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ extract ──▶ IngestionPipeline ──▶ SqliteStore
//!                         (chunk → embed → put)      │
//!                                                    ▼
//!  message ──▶ ConversationService ──▶ Retriever ──▶ scan
//!                  │                                  │
//!                  ├──▶ ContextWindowManager ◀────────┘
//!                  └──▶ Generator ──▶ append turns
//!
//!  DocAgent ──Caller──▶ Transport ──▶ Responder ──▶ tools
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] / [`migrate`] | SQLite connection and schema |
//! | [`sqlite_store`] | Store traits over SQLite |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Chat-completion client |
//! | [`retry`] | Bounded retry with backoff and timeout |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`ingest`] | Ingestion worker pool |
//! | [`conversation`] | Message turns |
//! | [`acp`] | Protocol caller and transports |
//! | [`tools`] | Workspace tool providers |
//! | [`agent`] | Documentation agent |
//! | [`app`] | Service wiring |
//! | [`server`] | HTTP server |

pub mod acp;
pub mod agent;
pub mod app;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod retry;
pub mod server;
pub mod sqlite_store;
pub mod tools;
