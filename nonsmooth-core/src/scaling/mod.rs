//! Scaling matrices for the cone IPM.
//!
//! Only Nesterov-Todd scaling is needed: every block of the rolling friction
//! cone is a symmetric (second-order) cone.

pub mod nt;

pub use nt::{NtMethod, NtScaling, NtScalingError};
