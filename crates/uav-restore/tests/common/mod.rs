//! Shared test utilities for uav-restore integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated service instances over temp data directories
//! - Builders for configurations and stub stage sets

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
