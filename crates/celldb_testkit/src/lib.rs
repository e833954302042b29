//! # CellDB Testkit
//!
//! Test utilities for CellDB.
//!
//! This crate provides:
//! - A ready-made technology, registry and database projection
//! - A three-level sample hierarchy
//! - Temporary snapshot stream files
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use celldb_testkit::prelude::*;
//!
//! let mut world = TestWorld::new();
//! let design = world.build_hierarchy();
//! let snapshot = world.backup();
//! assert!(snapshot.cell(design.top).is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
