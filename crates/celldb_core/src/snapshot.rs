//! Snapshots: immutable, versioned views of the whole database.

use crate::backup::{CellBackup, LibraryBackup};
use crate::error::{ensure, CoreError, CoreResult};
use crate::geometry::GridRect;
use crate::id::{CellId, IdManager, IdMapper, LibId};
use crate::tech::TechPool;
use crate::tree::CellTree;
use crate::types::SnapshotVersion;
use std::sync::Arc;

/// Cell slots indexed by `CellId::index`.
pub type CellSlots = Arc<[Option<Arc<CellBackup>>]>;
/// Library slots indexed by `LibId::index`.
pub type LibrarySlots = Arc<[Option<Arc<LibraryBackup>>]>;

/// An immutable, versioned state of every library and cell.
///
/// Slots that did not change between two snapshots hold the same `Arc`, so
/// diffing two snapshots is a pointer comparison per slot.
#[derive(Debug)]
pub struct Snapshot {
    version: SnapshotVersion,
    tool: Option<String>,
    id_manager: Arc<IdManager>,
    tech_pool: Arc<dyn TechPool>,
    cell_backups: CellSlots,
    cell_trees: Arc<[Option<Arc<CellTree>>]>,
    lib_backups: LibrarySlots,
}

impl Snapshot {
    /// The initial snapshot of a registry: version 0, no libraries.
    #[must_use]
    pub fn empty(id_manager: &Arc<IdManager>, tech_pool: &Arc<dyn TechPool>) -> Arc<Self> {
        Arc::new(Self {
            version: SnapshotVersion::default(),
            tool: None,
            id_manager: Arc::clone(id_manager),
            tech_pool: Arc::clone(tech_pool),
            cell_backups: Arc::from(Vec::new()),
            cell_trees: Arc::from(Vec::new()),
            lib_backups: Arc::from(Vec::new()),
        })
    }

    /// Returns a snapshot with the given slots.
    ///
    /// Returns `self` when every slot is pointer-identical to this
    /// snapshot's; otherwise the version is bumped by one. Cell trees are
    /// rebuilt bottom-up with unchanged subtrees shared.
    pub fn with(
        self: &Arc<Self>,
        tool: Option<&str>,
        cell_backups: &[Option<Arc<CellBackup>>],
        lib_backups: &[Option<Arc<LibraryBackup>>],
    ) -> CoreResult<Arc<Self>> {
        let cells = trim(cell_backups);
        let libs = trim(lib_backups);
        if same_slots(&self.cell_backups, cells) && same_slots(&self.lib_backups, libs) {
            return Ok(Arc::clone(self));
        }
        self.with_at_version(tool, cells, libs, self.version.next())
    }

    pub(crate) fn with_at_version(
        self: &Arc<Self>,
        tool: Option<&str>,
        cell_backups: &[Option<Arc<CellBackup>>],
        lib_backups: &[Option<Arc<LibraryBackup>>],
        version: SnapshotVersion,
    ) -> CoreResult<Arc<Self>> {
        let ids = &*self.id_manager;
        let cells = trim(cell_backups);
        let libs = trim(lib_backups);

        for (i, lib) in libs.iter().enumerate() {
            if let Some(lib) = lib {
                ensure_arg(
                    lib.library().lib_id().index() == i,
                    || format!("library {} in slot {i}", lib.library().lib_id()),
                )?;
            }
        }
        for (i, cell) in cells.iter().enumerate() {
            let Some(cell) = cell else { continue };
            let cell_id = cell.cell_id();
            ensure_arg(cell_id.index() == i, || format!("{cell_id} in slot {i}"))?;
            let lib = ids
                .cell_lib(cell_id)
                .ok_or_else(|| CoreError::invalid_argument(format!("unknown {cell_id}")))?;
            ensure_arg(
                libs.get(lib.index()).is_some_and(Option::is_some),
                || format!("{} has no library", ids.describe_cell(cell_id)),
            )?;
        }

        let mut builder = TreeBuilder {
            ids,
            pool: &self.tech_pool,
            cells,
            old_trees: &self.cell_trees,
            trees: vec![None; cells.len()],
            visiting: vec![false; cells.len()],
        };
        for i in 0..cells.len() {
            if cells[i].is_some() {
                builder.build(i)?;
            }
        }
        let cell_trees = builder.trees;

        Ok(Arc::new(Self {
            version,
            tool: tool.map(str::to_string),
            id_manager: Arc::clone(&self.id_manager),
            tech_pool: Arc::clone(&self.tech_pool),
            cell_backups: reuse_slots(&self.cell_backups, cells),
            cell_trees: Arc::from(cell_trees),
            lib_backups: reuse_slots(&self.lib_backups, libs),
        }))
    }

    /// Version number, incremented by every effective change.
    #[must_use]
    pub fn version(&self) -> SnapshotVersion {
        self.version
    }

    /// Tool that produced this snapshot.
    #[must_use]
    pub fn tool(&self) -> Option<&str> {
        self.tool.as_deref()
    }

    /// The registry all ids in this snapshot belong to.
    #[must_use]
    pub fn id_manager(&self) -> &Arc<IdManager> {
        &self.id_manager
    }

    /// The technology pool used for bounds.
    #[must_use]
    pub fn tech_pool(&self) -> &Arc<dyn TechPool> {
        &self.tech_pool
    }

    /// Cell slots.
    #[must_use]
    pub fn cell_backups(&self) -> &CellSlots {
        &self.cell_backups
    }

    /// Library slots.
    #[must_use]
    pub fn lib_backups(&self) -> &LibrarySlots {
        &self.lib_backups
    }

    /// Backup of a cell.
    #[must_use]
    pub fn cell(&self, id: CellId) -> Option<&Arc<CellBackup>> {
        self.cell_backups.get(id.index())?.as_ref()
    }

    /// Tree of a cell.
    #[must_use]
    pub fn cell_tree(&self, id: CellId) -> Option<&Arc<CellTree>> {
        self.cell_trees.get(id.index())?.as_ref()
    }

    /// Backup of a library.
    #[must_use]
    pub fn library(&self, id: LibId) -> Option<&Arc<LibraryBackup>> {
        self.lib_backups.get(id.index())?.as_ref()
    }

    /// Bounds of a cell.
    #[must_use]
    pub fn cell_bounds(&self, id: CellId) -> Option<Arc<GridRect>> {
        self.cell_tree(id).map(|t| t.bounds())
    }

    /// Present cells in id order.
    pub fn cells(&self) -> impl Iterator<Item = &Arc<CellBackup>> + '_ {
        self.cell_backups.iter().flatten()
    }

    /// Present libraries in id order.
    pub fn libraries(&self) -> impl Iterator<Item = &Arc<LibraryBackup>> + '_ {
        self.lib_backups.iter().flatten()
    }

    /// Indices of cell slots that differ from `old`.
    #[must_use]
    pub fn changed_cells(&self, old: &Snapshot) -> Vec<usize> {
        changed_slots(&old.cell_backups, &self.cell_backups)
    }

    /// Indices of library slots that differ from `old`.
    #[must_use]
    pub fn changed_libraries(&self, old: &Snapshot) -> Vec<usize> {
        changed_slots(&old.lib_backups, &self.lib_backups)
    }

    /// Returns the snapshot with ids rewritten through `mapper`.
    pub fn with_renamed_ids(self: &Arc<Self>, mapper: &IdMapper) -> CoreResult<Arc<Self>> {
        if mapper.is_empty() {
            return Ok(Arc::clone(self));
        }
        let ids = &*self.id_manager;
        let mut libs: Vec<Option<Arc<LibraryBackup>>> = Vec::new();
        for lib in self.libraries() {
            let lib = lib.with_renamed_ids(mapper);
            put_slot(&mut libs, lib.library().lib_id().index(), lib)?;
        }
        let mut cells: Vec<Option<Arc<CellBackup>>> = Vec::new();
        for cell in self.cells() {
            let cell = cell.with_renamed_ids(ids, mapper)?;
            put_slot(&mut cells, cell.cell_id().index(), cell)?;
        }
        self.with(self.tool(), &cells, &libs)
    }

    /// Verifies every slot, every tree and the registry.
    pub fn check(&self) -> CoreResult<()> {
        let ids = &*self.id_manager;
        ids.check()?;
        ensure!(
            self.cell_trees.len() == self.cell_backups.len(),
            "{} trees for {} cells",
            self.cell_trees.len(),
            self.cell_backups.len()
        );
        for (i, lib) in self.lib_backups.iter().enumerate() {
            if let Some(lib) = lib {
                ensure!(lib.library().lib_id().index() == i, "library slot {i} mismatch");
            }
        }
        for (i, (cell, tree)) in self.cell_backups.iter().zip(self.cell_trees.iter()).enumerate() {
            match (cell, tree) {
                (None, None) => {}
                (Some(cell), Some(tree)) => {
                    ensure!(cell.cell_id().index() == i, "cell slot {i} mismatch");
                    ensure!(Arc::ptr_eq(tree.top(), cell), "stale tree for {}", cell.cell_id());
                    let lib = ids.cell_lib(cell.cell_id());
                    ensure!(
                        lib.and_then(|l| self.library(l)).is_some(),
                        "{} has no library",
                        cell.cell_id()
                    );
                    cell.check(ids)?;
                    tree.check(ids)?;
                    for sub in tree.subtrees().iter().flatten() {
                        let shared = self.cell_tree(sub.cell_id());
                        ensure!(
                            shared.is_some_and(|t| Arc::ptr_eq(t, sub)),
                            "subtree of {} is not shared",
                            sub.cell_id()
                        );
                    }
                }
                _ => return Err(CoreError::invariant(format!("tree slot {i} mismatch"))),
            }
        }
        Ok(())
    }
}

struct TreeBuilder<'a> {
    ids: &'a IdManager,
    pool: &'a Arc<dyn TechPool>,
    cells: &'a [Option<Arc<CellBackup>>],
    old_trees: &'a [Option<Arc<CellTree>>],
    trees: Vec<Option<Arc<CellTree>>>,
    visiting: Vec<bool>,
}

impl TreeBuilder<'_> {
    fn build(&mut self, index: usize) -> CoreResult<Arc<CellTree>> {
        if let Some(tree) = &self.trees[index] {
            return Ok(Arc::clone(tree));
        }
        let Some(top) = self.cells[index].clone() else {
            return Err(CoreError::invalid_argument(format!("cell slot {index} is empty")));
        };
        let cell_id = top.cell_id();
        if self.visiting[index] {
            return Err(CoreError::invalid_argument(format!(
                "recursive instantiation of {}",
                self.ids.describe_cell(cell_id)
            )));
        }
        self.visiting[index] = true;

        let usages = Arc::clone(top.revision().cell_usages());
        let mut subtrees = Vec::with_capacity(usages.len());
        for (i, info) in usages.iter().enumerate() {
            if info.is_none() {
                subtrees.push(None);
                continue;
            }
            let usage = self.ids.usage_in_at(cell_id, i).ok_or_else(|| {
                CoreError::invalid_argument(format!("{cell_id}: usage {i} not in registry"))
            })?;
            let proto = usage.proto.index();
            if self.cells.get(proto).map_or(true, Option::is_none) {
                return Err(CoreError::invalid_argument(format!(
                    "{} instantiates missing {}",
                    self.ids.describe_cell(cell_id),
                    self.ids.describe_cell(usage.proto)
                )));
            }
            subtrees.push(Some(self.build(proto)?));
        }

        let old = self.old_trees.get(index).and_then(Option::as_ref);
        let tree = CellTree::with(self.ids, &top, subtrees, self.pool, old)?;
        self.visiting[index] = false;
        self.trees[index] = Some(Arc::clone(&tree));
        Ok(tree)
    }
}

fn ensure_arg(cond: bool, message: impl FnOnce() -> String) -> CoreResult<()> {
    if cond {
        Ok(())
    } else {
        Err(CoreError::invalid_argument(message()))
    }
}

fn trim<T>(slots: &[Option<T>]) -> &[Option<T>] {
    let len = slots.iter().rposition(Option::is_some).map_or(0, |p| p + 1);
    &slots[..len]
}

fn same_slots<T>(old: &[Option<Arc<T>>], new: &[Option<Arc<T>>]) -> bool {
    old.len() == new.len() && old.iter().zip(new).all(|(a, b)| same_slot(a, b))
}

fn same_slot<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn reuse_slots<T>(old: &Arc<[Option<Arc<T>>]>, new: &[Option<Arc<T>>]) -> Arc<[Option<Arc<T>>]> {
    if same_slots(old, new) {
        Arc::clone(old)
    } else {
        Arc::from(new.to_vec())
    }
}

fn changed_slots<T>(old: &[Option<Arc<T>>], new: &[Option<Arc<T>>]) -> Vec<usize> {
    let len = old.len().max(new.len());
    (0..len)
        .filter(|&i| {
            let a = old.get(i).cloned().flatten();
            let b = new.get(i).cloned().flatten();
            !same_slot(&a, &b)
        })
        .collect()
}

fn put_slot<T>(slots: &mut Vec<Option<Arc<T>>>, index: usize, value: Arc<T>) -> CoreResult<()> {
    if slots.len() <= index {
        slots.resize(index + 1, None);
    }
    if slots[index].is_some() {
        return Err(CoreError::invalid_argument(format!(
            "two records renamed into slot {index}"
        )));
    }
    slots[index] = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::PortProtoId;
    use crate::immutable::ImmutableExport;
    use crate::test_support::World;

    #[test]
    fn empty_snapshot() {
        let w = World::new();
        let snap = w.empty_snapshot();
        assert_eq!(snap.version(), SnapshotVersion::new(0));
        assert_eq!(snap.cells().count(), 0);
        snap.check().unwrap();
        let same = snap.with(Some("tool"), &[], &[]).unwrap();
        assert!(Arc::ptr_eq(&snap, &same));
    }

    #[test]
    fn unchanged_slots_are_shared() {
        let w = World::new();
        let leaf = w.backup("leaf", vec![w.pin(0, "pin@0", 0, 0)]);
        let top = w.backup("top", vec![w.inst(0, leaf.cell_id(), 100, 0)]);
        let other = w.backup("other", Vec::new());
        let lib = w.lib_backup();

        let s0 = w.empty_snapshot();
        let s1 = s0
            .with(Some("test"), &w.slots(&[&leaf, &top, &other]), &[Some(Arc::clone(&lib))])
            .unwrap();
        assert_eq!(s1.version(), SnapshotVersion::new(1));
        assert_eq!(s1.tool(), Some("test"));
        s1.check().unwrap();

        let edited = w.backup("other", vec![w.pin(0, "pin@0", 0, 0)]);
        let s2 = s1
            .with(None, &w.slots(&[&leaf, &top, &edited]), &[Some(lib)])
            .unwrap();
        assert_eq!(s2.version(), SnapshotVersion::new(2));
        assert!(Arc::ptr_eq(s1.cell_tree(leaf.cell_id()).unwrap(), s2.cell_tree(leaf.cell_id()).unwrap()));
        assert!(Arc::ptr_eq(s1.cell_tree(top.cell_id()).unwrap(), s2.cell_tree(top.cell_id()).unwrap()));
        assert!(Arc::ptr_eq(s1.lib_backups(), s2.lib_backups()));
        assert_eq!(s2.changed_cells(&s1), vec![edited.cell_id().index()]);
        assert!(s2.changed_libraries(&s1).is_empty());
        s2.check().unwrap();
    }

    #[test]
    fn bounds_follow_hierarchy() {
        let w = World::new();
        let leaf = w.backup("leaf", vec![w.pin(0, "pin@0", 0, 0)]);
        let top = w.backup("top", vec![w.inst(0, leaf.cell_id(), 100, 0)]);
        let snap = w
            .empty_snapshot()
            .with(None, &w.slots(&[&leaf, &top]), &[Some(w.lib_backup())])
            .unwrap();
        assert_eq!(*snap.cell_bounds(top.cell_id()).unwrap(), GridRect::new(95, -2, 105, 2));
    }

    #[test]
    fn missing_proto_rejected() {
        let w = World::new();
        let leaf = w.backup("leaf", Vec::new());
        let top = w.backup("top", vec![w.inst(0, leaf.cell_id(), 0, 0)]);
        let err = w
            .empty_snapshot()
            .with(None, &w.slots(&[&top]), &[Some(w.lib_backup())])
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn recursion_rejected() {
        let w = World::new();
        let a_id = w.cell("a");
        let b_id = w.cell("b");
        let a = w.backup("a", vec![w.inst(0, b_id, 0, 0)]);
        let b = w.backup("b", vec![w.inst(0, a_id, 0, 0)]);
        let err = w
            .empty_snapshot()
            .with(None, &w.slots(&[&a, &b]), &[Some(w.lib_backup())])
            .unwrap_err();
        assert!(err.to_string().contains("recursive"));
    }

    #[test]
    fn use_of_an_undefined_export_rejected() {
        let w = World::new();
        let leaf_id = w.cell("leaf");
        let out = w.ids.new_export_id(leaf_id, "out").unwrap();
        let export = ImmutableExport::new(out, "out", 0, w.pin_port).unwrap();
        let leaf = CellBackup::new(
            w.revision("leaf", vec![w.pin(0, "pin@0", 0, 0)], vec![export]),
            false,
        );
        let top_id = w.cell("top");
        let y = w.ids.new_export_id(top_id, "y").unwrap();
        let outer = ImmutableExport::new(y, "y", 0, PortProtoId::Export(out)).unwrap();
        let top = CellBackup::new(
            w.revision("top", vec![w.inst(0, leaf_id, 0, 0)], vec![outer]),
            false,
        );
        let s1 = w
            .empty_snapshot()
            .with(None, &w.slots(&[&leaf, &top]), &[Some(w.lib_backup())])
            .unwrap();
        s1.check().unwrap();

        let bare = w.backup("leaf", vec![w.pin(0, "pin@0", 0, 0)]);
        let result = s1
            .with(None, &w.slots(&[&bare, &top]), s1.lib_backups())
            .and_then(|s2| s2.check());
        assert!(matches!(result, Err(CoreError::InvariantViolation { .. })));
    }

    #[test]
    fn cell_requires_library() {
        let w = World::new();
        let leaf = w.backup("leaf", Vec::new());
        assert!(w.empty_snapshot().with(None, &w.slots(&[&leaf]), &[]).is_err());
    }

    #[test]
    fn library_rename_moves_slots() {
        let w = World::new();
        let leaf = w.backup("leaf", vec![w.pin(0, "pin@0", 0, 0)]);
        let top = w.backup("top", vec![w.inst(0, leaf.cell_id(), 0, 0)]);
        let s1 = w
            .empty_snapshot()
            .with(None, &w.slots(&[&leaf, &top]), &[Some(w.lib_backup())])
            .unwrap();
        let mapper = IdMapper::rename_library(&w.ids, w.lib, "renamed").unwrap();
        let s2 = s1.with_renamed_ids(&mapper).unwrap();
        assert!(s2.library(w.lib).is_none());
        let new_lib = w.ids.find_lib_id("renamed").unwrap();
        assert!(s2.library(new_lib).is_some());
        assert_eq!(s2.cells().count(), 2);
        assert!(s2.cell(leaf.cell_id()).is_none());
        s2.check().unwrap();
    }
}
