//! Live cells and libraries.

use super::contents::CellContents;
use crate::backup::{CellBackup, CellRevision, LibraryBackup};
use crate::error::{CoreError, CoreResult};
use crate::id::{CellId, IdManager, LibId};
use crate::immutable::{ImmutableCell, ImmutableLibrary};
use crate::text::{CellName, NaturalName};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The editable projection of one cell.
///
/// Holds the current cell record and the backup the projection last
/// agreed with. The cell's contents live in the thread's cache.
#[derive(Debug, Clone)]
pub struct LiveCell {
    cell_id: CellId,
    lib: LibId,
    name: CellName,
    record: Arc<ImmutableCell>,
    backup: Arc<CellBackup>,
    next_ids: (u32, u32),
}

impl LiveCell {
    pub(crate) fn new(lib: LibId, name: CellName, backup: Arc<CellBackup>) -> Self {
        let record = Arc::clone(backup.revision().cell());
        Self {
            cell_id: record.cell_id(),
            lib,
            name,
            record,
            backup,
            next_ids: (0, 0),
        }
    }

    pub(crate) fn from_backup(ids: &IdManager, backup: &Arc<CellBackup>) -> CoreResult<Self> {
        let cell_id = backup.cell_id();
        let (Some(lib), Some(name)) = (ids.cell_lib(cell_id), ids.cell_name(cell_id)) else {
            return Err(CoreError::invalid_argument(format!("unknown {cell_id}")));
        };
        Ok(Self::new(lib, name, Arc::clone(backup)))
    }

    /// The cell id.
    #[must_use]
    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    /// The owning library.
    #[must_use]
    pub fn lib(&self) -> LibId {
        self.lib
    }

    /// The cell name.
    #[must_use]
    pub fn name(&self) -> &CellName {
        &self.name
    }

    /// The current cell record.
    #[must_use]
    pub fn record(&self) -> &Arc<ImmutableCell> {
        &self.record
    }

    /// The backup this cell last agreed with.
    #[must_use]
    pub fn last_backup(&self) -> &Arc<CellBackup> {
        &self.backup
    }

    /// The revision of the last backup.
    #[must_use]
    pub fn revision(&self) -> &Arc<CellRevision> {
        self.backup.revision()
    }

    /// True when the record or `contents` differ from the last backup.
    #[must_use]
    pub fn is_changed(&self, contents: Option<&CellContents>) -> bool {
        !Arc::ptr_eq(&self.record, self.backup.revision().cell())
            || contents.is_some_and(CellContents::is_dirty)
    }

    pub(crate) fn set_record(&mut self, record: Arc<ImmutableCell>) {
        self.record = record;
    }

    /// Returns the last backup when nothing changed, otherwise a backup of
    /// the current state flagged as modified.
    pub(crate) fn backup(
        &self,
        ids: &IdManager,
        contents: Option<&CellContents>,
    ) -> CoreResult<Arc<CellBackup>> {
        if !self.is_changed(contents) {
            return Ok(Arc::clone(&self.backup));
        }
        let base = self.backup.revision();
        let (nodes, arcs, exports) = match contents {
            Some(c) => c.to_lists(base),
            None => (
                Arc::clone(base.nodes()),
                Arc::clone(base.arcs()),
                Arc::clone(base.exports()),
            ),
        };
        let revision = base.with(ids, Arc::clone(&self.record), nodes, arcs, exports)?;
        Ok(self.backup.with(&revision, true))
    }

    /// Adopts `backup`, remembering the node and arc ids `contents` has
    /// handed out so a rebuild never reuses them.
    pub(crate) fn commit(&mut self, backup: Arc<CellBackup>, contents: Option<&CellContents>) {
        self.record = Arc::clone(backup.revision().cell());
        self.backup = backup;
        if let Some(c) = contents {
            self.next_ids = (
                self.next_ids.0.max(c.next_node_id()),
                self.next_ids.1.max(c.next_arc_id()),
            );
        }
    }

    /// Editable contents rebuilt from the last backup.
    #[must_use]
    pub fn contents(&self) -> CellContents {
        let (node_id, arc_id) = self.next_ids;
        CellContents::from_revision(self.revision()).with_id_floor(node_id, arc_id)
    }
}

/// The editable projection of one library.
#[derive(Debug, Clone)]
pub struct LiveLibrary {
    lib_id: LibId,
    name: String,
    record: Arc<ImmutableLibrary>,
    backup: Option<Arc<LibraryBackup>>,
    cells: BTreeMap<NaturalName, CellId>,
}

impl LiveLibrary {
    pub(crate) fn new(lib_id: LibId, name: String, record: Arc<ImmutableLibrary>) -> Self {
        Self {
            lib_id,
            name,
            record,
            backup: None,
            cells: BTreeMap::new(),
        }
    }

    pub(crate) fn from_backup(ids: &IdManager, backup: &Arc<LibraryBackup>) -> CoreResult<Self> {
        let lib_id = backup.library().lib_id();
        let name = ids
            .lib_name(lib_id)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown {lib_id}")))?;
        Ok(Self {
            lib_id,
            name,
            record: Arc::clone(backup.library()),
            backup: Some(Arc::clone(backup)),
            cells: BTreeMap::new(),
        })
    }

    /// The library id.
    #[must_use]
    pub fn lib_id(&self) -> LibId {
        self.lib_id
    }

    /// The library name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current library record.
    #[must_use]
    pub fn record(&self) -> &Arc<ImmutableLibrary> {
        &self.record
    }

    /// Live cells of this library in name order.
    pub fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.cells.values().copied()
    }

    pub(crate) fn find_cell(&self, name: &CellName) -> Option<CellId> {
        self.cells.get(&NaturalName::new(name.to_string())).copied()
    }

    pub(crate) fn add_cell(&mut self, name: &CellName, cell: CellId) {
        self.cells.insert(NaturalName::new(name.to_string()), cell);
    }

    pub(crate) fn remove_cell(&mut self, name: &CellName) {
        self.cells.remove(&NaturalName::new(name.to_string()));
    }

    pub(crate) fn clear_cells(&mut self) {
        self.cells.clear();
    }

    pub(crate) fn set_record(&mut self, record: Arc<ImmutableLibrary>) {
        self.record = record;
    }

    pub(crate) fn is_same_as(&self, backup: &Arc<LibraryBackup>) -> bool {
        self.backup.as_ref().is_some_and(|b| Arc::ptr_eq(b, backup))
            && Arc::ptr_eq(&self.record, backup.library())
    }

    pub(crate) fn backup(&self) -> Arc<LibraryBackup> {
        match &self.backup {
            Some(b) if Arc::ptr_eq(b.library(), &self.record) => Arc::clone(b),
            Some(b) => b.with(&self.record, true),
            None => LibraryBackup::new(Arc::clone(&self.record), true),
        }
    }

    pub(crate) fn commit(&mut self, backup: Arc<LibraryBackup>) {
        self.record = Arc::clone(backup.library());
        self.backup = Some(backup);
    }
}
