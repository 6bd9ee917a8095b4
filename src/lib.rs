//! # StudyStack
//!
//! A document study backend: ingest PDFs into a tenant-scoped vector index
//! and answer questions about them with retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────┐
//! │  Upload  │──▶│  Ingestion    │──▶│ Vector index │
//! │  (PDF)   │   │ chunk + embed │   │ SQLite/HTTP  │
//! └──────────┘   └───────────────┘   └──────┬──────┘
//!                                           │
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                 ┌───────────┐      ┌────────────┐
//!                 │ Retrieval │      │ Summaries, │
//!                 │  + chat   │      │ artifacts  │
//!                 └───────────┘      └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! studystack init                                  # create database
//! studystack ingest notes.pdf --user me@example.com
//! studystack query "what is entropy" --user me@example.com
//! studystack summarize <document-id> --user me@example.com
//! studystack serve api                             # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Sliding-window text chunking |
//! | [`extract`] | PDF text extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_index`] | Tenant-scoped vector storage and query |
//! | [`ingest`] | Ingestion coordinator with locking and progress |
//! | [`retrieval`] | Multi-document retrieval and context packing |
//! | [`llm`] | Chat model provider with routing |
//! | [`answer`] | Chat answer generation |
//! | [`summarize`] | Map-reduce summarization |
//! | [`topics`] | Embedding-based topic classification |
//! | [`artifacts`] | Flashcards, quizzes, and podcast audio |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod artifacts;
pub mod blob;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod summarize;
pub mod topics;
pub mod vector_index;
