//! SQLite storage module for race metadata
//!
//! Provides the `RaceStore` seam used by the HTTP handlers and its
//! SQLite-backed implementation.

pub mod repository;
pub mod schema;

pub use repository::RaceRepository;

use anyhow::Result;

use crate::types::Race;

/// Read access to race metadata.
///
/// Implementations are shared across requests, so they must be safe to call
/// from several blocking workers at once.
pub trait RaceStore: Send + Sync {
    /// All races, most recent season first, chronological within a season.
    fn list_races(&self) -> Result<Vec<Race>>;
}
