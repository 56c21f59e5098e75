//! Runtime-compiled kernel sources.
//!
//! Each submodule holds kernel source as `const &str` for one dialect.
//! Sources are specialized per element type, compiled on first use and
//! cached by the backend.

#[cfg(feature = "cuda")]
pub mod neighborhood_cuda;
