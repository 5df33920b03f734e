//! # Ragline
//!
//! A document ingestion and grounded-retrieval pipeline for AI assistants.
//!
//! Ragline takes uploaded documents (clean or malformed), extracts and
//! sanitizes their text, splits it into bounded overlapping chunks, embeds
//! each chunk through an external vector service, and stores
//! chunk + vector + provenance in SQLite. At query time it embeds the
//! question, runs a thresholded cosine similarity search, and assembles the
//! surviving chunks into a grounded completion request, with an explicit
//! "nothing relevant was found" path instead of fabricated answers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌──────────┐
//! │ Uploads  │──▶│ Extract→Sanitize  │──▶│  SQLite   │
//! │ (bytes)  │   │ →Chunk→Embed      │   │ chunks+vec│
//! └──────────┘   └───────────────────┘   └────┬─────┘
//!                                             │
//!                          ┌──────────────────┤
//!                          ▼                  ▼
//!                   ┌────────────┐     ┌────────────┐
//!                   │  Retrieve   │────▶│  Grounded  │
//!                   │ (similarity)│     │ completion │
//!                   └────────────┘     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rgl init                                  # create database
//! rgl ingest ./report.pdf                   # ingest a document
//! rgl query "termination clause"            # retrieve matching chunks
//! rgl ask "what does the contract say?"     # retrieve + grounded answer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Multi-strategy text extraction |
//! | [`sanitize`] | Control-character and whitespace cleanup |
//! | [`chunk`] | Text chunking with overlap |
//! | [`embedding`] | Embedding client, retry, worker pool |
//! | [`store`] | Chunk + vector persistence and similarity search |
//! | [`retrieve`] | Query-time retrieval and enrichment |
//! | [`answer`] | Grounded completion |
//! | [`ingest`] | Ingestion pipeline orchestration |
//! | [`progress`] | Progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retrieve;
pub mod sanitize;
pub mod store;
