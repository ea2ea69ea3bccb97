//! Cone definitions and algebra.
//!
//! - `soc`: second-order cone membership and ratio test
//! - `jordan`: blockwise Jordan algebra of the second-order cone
//! - `rolling`: rolling friction cone, sub-block packing and projection

pub mod jordan;
pub mod rolling;
pub mod soc;

pub use rolling::{RollingFrictionCone, SubBlock, CONTACT_DIM, SUB_DIM};
pub use soc::SocCone;
