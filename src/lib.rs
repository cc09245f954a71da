//! Bidirectional sync between local planning documents and a remote issue
//! tracker.
//!
//! Planning documents (speckit `tasks.md`, GSD `ROADMAP.md`) parse into a
//! normalized task/phase graph; a SQLite identity map carries the durable
//! local↔remote correlations; the reconciliation engine computes a minimal
//! mutation plan from three-way fingerprint comparison; the driver applies
//! it against the tracker and writes localized edits back into the
//! documents.

pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod identity;
pub mod logging;
pub mod model;
pub mod parser;
pub mod reconcile;
pub mod remote;
pub mod rewrite;
pub mod util;

pub use error::{Result, RoadsyncError};
