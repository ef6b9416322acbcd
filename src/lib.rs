//! cie — a code intelligence engine.
//!
//! The crate ingests a source repository incrementally: walk and hash,
//! classify changes against the previous manifest, extract structural
//! facts (functions, types, fields, call and implements edges) with
//! tree-sitter or a heuristic fallback, embed code bodies through a
//! pluggable provider pool, and persist everything as idempotent
//! CozoScript transactions into an embedded CozoDB store with HNSW
//! vector indexes.
//!
//! Consumers get three surfaces: [`pipeline::Engine::index`] (with a
//! progress callback and cancellation), [`pipeline::Engine::query`], and
//! the schema contract in [`store`].

pub mod checkpoint;
pub mod config;
pub mod delta;
pub mod embed;
pub mod error;
pub mod git;
pub mod ids;
pub mod language;
pub mod manifest;
pub mod model;
pub mod mutation;
pub mod parser;
pub mod pipeline;
pub mod store;
pub mod validate;
pub mod walker;

pub use config::Config;
pub use error::{CieError, ErrorCategory, Result};
pub use model::{Phase, Progress, RunReport};
pub use pipeline::{CancelToken, Engine};
pub use store::QueryResult;
