//! Command-line interface for Tributary.

pub mod context;
pub mod error;
pub mod output;

pub mod backlinks;
pub mod config;
pub mod provenance;
pub mod runs;
pub mod scrape;
pub mod sign;
pub mod watch;
