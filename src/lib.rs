//! # Lectern
//!
//! A hybrid-retrieval knowledge base for curriculum PDFs.
//!
//! Lectern ingests textbooks organized by subject — native-text and scanned
//! alike — and turns them into hierarchy-aware, searchable chunks. Queries
//! run a dense (semantic) and a sparse (lexical) search in parallel and fuse
//! the two rankings with Reciprocal Rank Fusion.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌────────────┐
//! │ Subject tree │──▶│ Extract → Clean →    │──▶│   SQLite   │
//! │ of PDFs      │   │ Segment → Index      │   │ FTS5 + Vec │
//! └──────────────┘   └──────────────────────┘   └─────┬──────┘
//!                                                     │
//!                                    ┌────────────────┤
//!                                    ▼                ▼
//!                              ┌──────────┐     ┌───────────┐
//!                              │   CLI    │     │  Hybrid   │
//!                              │(lectern) │     │ RRF query │
//!                              └──────────┘     └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lectern init                          # create database
//! lectern ingest ./data                 # ingest data/<subject>/*.pdf
//! lectern search "Ohm's Law" --subject physics
//! lectern stats                         # per-subject coverage
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Page text extraction (text layer / OCR, column handling) |
//! | [`ocr`] | OCR engine abstraction |
//! | [`clean`] | Subject-aware text cleaning |
//! | [`segment`] | Paragraph reconstruction, hierarchy tree, chunk emission |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Dual-index write path with commit discipline |
//! | [`search`] | Hybrid retrieval with Reciprocal Rank Fusion |
//! | [`context`] | Conversation memory and generation-context assembly |
//! | [`ingest`] | Batch ingestion pipeline |
//! | [`store`] | Catalog and index backends (SQLite, in-memory) |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod clean;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod get;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod search;
pub mod segment;
pub mod stats;
pub mod store;
