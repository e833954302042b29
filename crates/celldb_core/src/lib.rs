//! # CellDB Core
//!
//! Transactional, hierarchical design database for CellDB.
//!
//! This crate provides:
//! - An id registry that mints stable ids for technologies, libraries,
//!   cells, exports and cell usages
//! - Immutable, structurally shared records for nodes, arcs, exports,
//!   cells and libraries
//! - Cell revisions with derived usage data, and cell trees with lazily
//!   computed bounds
//! - Versioned snapshots of the whole database
//! - A single-owner editable projection ([`DatabaseThread`]) that turns
//!   snapshots into live cells and edits back into snapshots
//! - A compact diff stream for replicating snapshots
//!
//! ## Usage
//!
//! ```
//! use celldb_core::{CellName, IdManager};
//!
//! let ids = IdManager::new();
//! let lib = ids.new_lib_id("demo").unwrap();
//! let inv = ids.new_cell_id(lib, &CellName::parse("inv{sch}").unwrap()).unwrap();
//! assert_eq!(ids.cell_lib(inv), Some(lib));
//! assert_eq!(ids.describe_cell(inv), "demo:inv{sch}");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backup;
mod config;
pub mod database;
mod error;
pub mod geometry;
pub mod id;
pub mod immutable;
pub mod snapshot;
pub mod stream;
pub mod tech;
pub mod text;
pub mod tree;
mod types;
pub mod usage;

#[cfg(test)]
mod test_support;

pub use backup::{CellBackup, CellRevision, LibraryBackup};
pub use config::Config;
pub use database::{ArcSpec, DatabaseThread, NodeRef, NodeSpec, OwnerToken};
pub use error::{CoreError, CoreResult};
pub use geometry::{GridPoint, GridRect, Orientation};
pub use id::{CellId, ExportId, IdManager, IdMapper, LibId, TechId};
pub use snapshot::Snapshot;
pub use stream::{SnapshotReader, SnapshotWriter};
pub use tech::{DefaultNode, TechCatalog, TechPool};
pub use text::{CellName, VarKey, VarValue, Variable, View};
pub use tree::CellTree;
pub use types::SnapshotVersion;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
