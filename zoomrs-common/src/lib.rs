// zoomrs-common - Shared types for the zoomrs session engine
//
// This crate defines the options store, error kinds, and the fixed
// diagnostic code tables shared by the query compilers and the engine.

pub mod diag;
pub mod error;
pub mod options;

// Re-export for convenience
pub use diag::*;
pub use error::*;
pub use options::*;
