//! Shared test utilities for the migration workspace.
//!
//! This crate provides:
//! - [`MemorySource`]: an in-memory legacy archive and parameter catalog
//! - [`MemoryTarget`]: an in-memory target archive with the label
//!   uniqueness rule of the real schema
//! - Fixtures for metadata, timestamps and dump files
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```

pub mod fixtures;
pub mod memory;

pub use fixtures::*;
pub use memory::{MemorySource, MemoryTarget, StoredTimeseries};
