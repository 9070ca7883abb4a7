//! # Docent Core
//!
//! Runtime-free logic for Docent: data models, the error taxonomy, the
//! tokenizer and chunker, the embedder trait, store traits with an
//! in-memory backend, the retriever, the context window manager, and the
//! agent protocol envelope and method registry.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Everything that needs an async runtime or the network lives in the
//! `docent` app crate.

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod models;
pub mod protocol;
pub mod retrieve;
pub mod store;
pub mod tokens;

pub use error::{Error, Result};
