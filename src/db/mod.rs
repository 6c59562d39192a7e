//! Database module for edgeprobe.
//!
//! Provides SQLite storage for candidates, comparison services and selections.

mod models;
mod store;

pub use models::*;
pub use store::*;
