//! Cell records.

use super::{ElectricObject, Variables};
use crate::id::{CellId, IdMapper, TechId};
use crate::text::{VarKey, Variable};
use std::sync::Arc;

/// Per-cell state other than its contents.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmutableCell {
    cell_id: CellId,
    tech: TechId,
    creation_date: i64,
    revision_date: i64,
    flags: u32,
    vars: Variables,
}

impl ImmutableCell {
    /// Flag: instances of this cell are locked.
    pub const INSTANCES_LOCKED: u32 = 1;
    /// Flag: the cell is part of a cell library.
    pub const IN_CELL_LIBRARY: u32 = 2;

    /// Creates a cell record. Dates are milliseconds since the epoch.
    #[must_use]
    pub fn new(cell_id: CellId, tech: TechId, creation_date: i64) -> Arc<Self> {
        Arc::new(Self {
            cell_id,
            tech,
            creation_date,
            revision_date: creation_date,
            flags: 0,
            vars: Variables::default(),
        })
    }

    /// The cell id.
    #[must_use]
    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    /// Main technology of the cell.
    #[must_use]
    pub fn tech(&self) -> TechId {
        self.tech
    }

    /// Creation date.
    #[must_use]
    pub fn creation_date(&self) -> i64 {
        self.creation_date
    }

    /// Last revision date.
    #[must_use]
    pub fn revision_date(&self) -> i64 {
        self.revision_date
    }

    /// Flag bits.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Returns the cell with another main technology.
    #[must_use]
    pub fn with_tech(self: &Arc<Self>, tech: TechId) -> Arc<Self> {
        if self.tech == tech {
            return Arc::clone(self);
        }
        self.rebuild(|c| c.tech = tech)
    }

    /// Returns the cell with another revision date.
    #[must_use]
    pub fn with_revision_date(self: &Arc<Self>, date: i64) -> Arc<Self> {
        if self.revision_date == date {
            return Arc::clone(self);
        }
        self.rebuild(|c| c.revision_date = date)
    }

    /// Returns the cell with other flag bits.
    #[must_use]
    pub fn with_flags(self: &Arc<Self>, flags: u32) -> Arc<Self> {
        if self.flags == flags {
            return Arc::clone(self);
        }
        self.rebuild(|c| c.flags = flags)
    }

    /// Returns the cell with `var` added or replaced.
    #[must_use]
    pub fn with_variable(self: &Arc<Self>, var: Variable) -> Arc<Self> {
        let vars = self.vars.with(var);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|c| c.vars = vars)
    }

    /// Returns the cell without `key`.
    #[must_use]
    pub fn without_variable(self: &Arc<Self>, key: &VarKey) -> Arc<Self> {
        let vars = self.vars.without(key);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|c| c.vars = vars)
    }

    /// Returns the cell with ids rewritten through `mapper`.
    #[must_use]
    pub fn with_renamed_ids(self: &Arc<Self>, mapper: &IdMapper) -> Arc<Self> {
        let cell_id = mapper.cell(self.cell_id);
        if cell_id == self.cell_id {
            return Arc::clone(self);
        }
        self.rebuild(|c| c.cell_id = cell_id)
    }

    pub(crate) fn with_vars(self: &Arc<Self>, vars: Variables) -> Arc<Self> {
        self.rebuild(|c| c.vars = vars)
    }

    fn rebuild(&self, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut next = self.clone();
        f(&mut next);
        Arc::new(next)
    }
}

impl ElectricObject for ImmutableCell {
    fn vars(&self) -> &Variables {
        &self.vars
    }
}
