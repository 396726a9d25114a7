//! # `vindex-core`
//!
//! A local, single-process approximate-nearest-neighbor vector database: an
//! HNSW graph index over int8-quantized vectors, backed by a float32
//! re-rank store.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use vindex_core::config::{DbConfig, Mode};
//! use vindex_core::db::{Database, ScoreKind, UpsertItem};
//!
//! fn main() -> vindex_core::error::Result<()> {
//!     let config = DbConfig::new(768, Mode::Balanced);
//!     let mut db = Database::open(std::path::Path::new("./data"), config)?;
//!
//!     db.upsert(vec![UpsertItem {
//!         external_id: "doc-1".to_string(),
//!         vector: vec![0.1; 768],
//!         metadata: serde_json::json!({"title": "Hello World"}),
//!     }])?;
//!
//!     let hits = db.query(&vec![0.1; 768], 10, None, ScoreKind::Cosine)?;
//!     for hit in hits {
//!         println!("{} ({})", hit.external_id, hit.score);
//!     }
//!
//!     db.snapshot()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module organization
//!
//! - [`arena`] — the bump allocator backing every node.
//! - [`node`] — fixed-layout node views over arena bytes.
//! - [`distance`] — the int8 L2² SIMD distance kernel.
//! - [`engine`] — the HNSW graph core (search, insert, the dump codec).
//! - [`quantization`] — f32 → i8 quantization and exact f32 re-rank distance.
//! - [`config`] — frozen/mutable configuration surfaces and search-quality
//!   presets.
//! - [`db`] — the orchestrator binding the graph to durable storage.
//! - [`error`] — the crate-wide error taxonomy.

#![warn(missing_docs)]
// Clippy lints configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(
    test,
    allow(
        clippy::large_stack_arrays,
        clippy::doc_markdown,
        clippy::uninlined_format_args,
        clippy::single_match_else,
        clippy::cast_lossless,
        clippy::manual_assert
    )
)]

pub mod arena;
pub mod config;
pub mod db;
pub mod distance;
pub mod engine;
pub mod error;
pub mod node;
pub mod quantization;

pub use config::{DbConfig, DbParams, HnswConfig, Mode, SearchConfig};
pub use db::{Database, QueryHit, ScoreKind, UpsertItem};
pub use db::metadata::{InMemoryMetadataStore, MetadataEntry, MetadataStore};
pub use engine::HnswIndex;
pub use error::{Error, Result};
