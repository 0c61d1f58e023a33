//! Series cleaning.

pub mod gaps;

pub use gaps::*;
