//! Immutable records.
//!
//! Records are shared through `Arc` and never change after construction.
//! Every `with_*` method takes `self: &Arc<Self>` and returns the same `Arc`
//! when the requested value is already in place, so `Arc::ptr_eq` works as
//! a cheap "unchanged" test across snapshots.

mod arc;
mod cell;
mod export;
mod library;
mod node;
mod vars;

pub use arc::{ArcEnd, ImmutableArcInst};
pub use cell::ImmutableCell;
pub use export::{ImmutableExport, PortCharacteristic};
pub use library::ImmutableLibrary;
pub use node::{ImmutableNodeInst, ImmutablePortInst};
pub use vars::Variables;

use crate::text::{VarKey, Variable};

/// A record that carries attached variables.
pub trait ElectricObject {
    /// The record's variables.
    fn vars(&self) -> &Variables;

    /// Looks up a variable by key.
    fn var(&self, key: &VarKey) -> Option<&Variable> {
        self.vars().get(key)
    }
}
