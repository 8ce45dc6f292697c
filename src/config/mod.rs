//! # Configuration Module
//!
//! Centralizes the cache geometry and policy tuning constants. Values that
//! depend on each other live together in [`constants`] and are checked with
//! compile-time assertions so a mismatched edit fails the build instead of
//! corrupting eviction behavior at runtime.

pub mod constants;
pub use constants::*;
