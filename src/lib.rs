//! `streamflow` library crate.
//!
//! The binary (`streamflow`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - acquisition strategies can be swapped for fakes in tests
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod clean;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod io;
pub mod plot;
pub mod report;
