//! Domain types shared by the pattern engine crates.
//!
//! Patterns and steps are immutable definitions; contexts, traces and
//! results are per-run values. Everything here is plain data with serde
//! derives so an outer layer can serialize it without conversion.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::CoreError;
