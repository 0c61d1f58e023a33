//! Input/output helpers.
//!
//! - raw table extraction + validation (`ingest`)
//! - cleaned series CSV write/read and atomic file writes (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
