//! CPU-isolated normalization of raw NZTAB payloads into typed records.

pub mod types;
mod worker;

pub use types::*;
pub use worker::{transform, TransformPool};
