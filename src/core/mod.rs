//! Core deterministic primitives.
//!
//! Nothing in this module reads the clock or an unseeded RNG (apart from
//! [`fair::OsSeedSource`], which only mints secrets). Given the same seed
//! triple and elapsed times, every value here is reproducible.

pub mod fair;
pub mod money;
pub mod curve;

// Re-export core types
pub use fair::{FairnessCommitment, RoundSeed, SeedSource, JumpSampler};
pub use money::{Amount, apply_basis_points, multiply_by_multiplier, percentage_of};
pub use curve::{smooth_multiplier, jumpy_multiplier, JumpPath};
