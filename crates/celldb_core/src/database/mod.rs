//! The editable database projection.
//!
//! A [`DatabaseThread`] turns a [`Snapshot`](crate::snapshot::Snapshot) into
//! live, editable cells and libraries, and turns edits back into new
//! snapshots.

mod cache;
mod cell;
mod contents;
mod handles;
mod thread;
mod token;

pub use cell::{LiveCell, LiveLibrary};
pub use contents::CellContents;
pub use handles::{ArcRef, ArcSpec, NodeRef, NodeSpec};
pub use thread::DatabaseThread;
pub use token::OwnerToken;
