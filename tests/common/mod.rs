//! Shared test utilities for tealoop
//!
//! This module provides common helpers for integration tests:
//! - Small components with predictable transitions
//! - Stream helpers with timeouts so a hung run fails instead of blocking

pub mod fixtures;

pub use fixtures::*;
