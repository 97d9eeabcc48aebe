//! Market snapshot ingestion and validation.
//!
//! A snapshot is structured data validated against JSON Schema and then
//! checked semantically. Once built it is read-only.

mod builder;
mod parser;
mod schema;

pub use builder::SnapshotBuilder;
pub use parser::{MarketSnapshot, SnapshotError};
pub use schema::validate_snapshot_schema;
