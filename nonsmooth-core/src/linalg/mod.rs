//! Linear algebra layer.
//!
//! Sparse matrix operations and factorization backends.

pub mod backend;
pub mod sparse;
