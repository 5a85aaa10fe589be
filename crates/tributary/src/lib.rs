//! Tributary: incremental scraping of remote document trees.
//!
//! - [`reconcile`] mirrors a remote tree into local records, writing only
//!   what changed since the previous run.
//! - [`signature`] stamps generated documents with their origin.
//! - [`provenance`] records which source versions produced each output.
//! - [`backlinks`] maintains the reverse-reference graph over documents,
//!   and [`watch`] keeps it current while files change on disk.

pub mod backlinks;
pub mod cancel;
pub mod config;
pub mod error;
pub mod gate;
pub mod provenance;
pub mod reconcile;
pub mod remote;
pub mod signature;
pub mod watch;

pub use error::{Result, TributaryError};
pub use tributary_db;
pub use tributary_ids;
