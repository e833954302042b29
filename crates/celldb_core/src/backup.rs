//! Cell revisions and backups.

use crate::error::{ensure, CoreError, CoreResult};
use crate::id::{CellId, ExportId, IdManager, IdMapper};
use crate::immutable::{
    ElectricObject, ImmutableArcInst, ImmutableCell, ImmutableExport, ImmutableLibrary,
    ImmutableNodeInst,
};
use crate::text::compare_names;
use crate::usage::{bitset_with, CellUsageInfo, UsageCollector, EMPTY_BITSET};
use roaring::RoaringBitmap;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Nodes of a revision, sorted by name.
pub type NodeList = Arc<[Arc<ImmutableNodeInst>]>;
/// Arcs of a revision, sorted by name then arc id.
pub type ArcList = Arc<[Arc<ImmutableArcInst>]>;
/// Exports of a revision, sorted by name.
pub type ExportList = Arc<[Arc<ImmutableExport>]>;
/// Per-usage entries, indexed by `CellUsage::index_in_parent`.
pub type UsageList = Arc<[Option<Arc<CellUsageInfo>>]>;

/// Full contents of a cell plus the usage data derived from them.
#[derive(Debug)]
pub struct CellRevision {
    cell: Arc<ImmutableCell>,
    nodes: NodeList,
    arcs: ArcList,
    exports: ExportList,
    tech_usages: Arc<RoaringBitmap>,
    cell_usages: UsageList,
    export_index: Arc<[Option<u32>]>,
    defined_exports: Arc<RoaringBitmap>,
    deleted_exports: Arc<RoaringBitmap>,
}

impl CellRevision {
    /// Creates the revision of an empty cell.
    pub fn new(ids: &IdManager, cell: Arc<ImmutableCell>) -> CoreResult<Arc<Self>> {
        if ids.cell_name(cell.cell_id()).is_none() {
            return Err(CoreError::invalid_argument(format!(
                "unknown {}",
                cell.cell_id()
            )));
        }
        let mut techs = RoaringBitmap::new();
        techs.insert(cell.tech().as_u32());
        Ok(Arc::new(Self {
            cell,
            nodes: Arc::from(Vec::new()),
            arcs: Arc::from(Vec::new()),
            exports: Arc::from(Vec::new()),
            tech_usages: Arc::new(techs),
            cell_usages: Arc::from(Vec::new()),
            export_index: Arc::from(Vec::new()),
            defined_exports: Arc::clone(&*EMPTY_BITSET),
            deleted_exports: Arc::clone(&*EMPTY_BITSET),
        }))
    }

    /// Returns a revision with the given record and contents.
    ///
    /// Pieces that are pointer-identical to this revision's are carried
    /// over without revalidation, and the usage collector only runs when
    /// the contents, the technology or the cell variables changed. Returns
    /// `self` when everything is identical.
    pub fn with(
        self: &Arc<Self>,
        ids: &IdManager,
        cell: Arc<ImmutableCell>,
        nodes: NodeList,
        arcs: ArcList,
        exports: ExportList,
    ) -> CoreResult<Arc<Self>> {
        let same_nodes = Arc::ptr_eq(&self.nodes, &nodes);
        let same_arcs = Arc::ptr_eq(&self.arcs, &arcs);
        let same_exports = Arc::ptr_eq(&self.exports, &exports);
        if Arc::ptr_eq(&self.cell, &cell) && same_nodes && same_arcs && same_exports {
            return Ok(Arc::clone(self));
        }
        let cell_id = cell.cell_id();

        let topology_changed = self.cell.cell_id() != cell_id
            || self.cell.tech() != cell.tech()
            || !self.cell.vars().ptr_eq(cell.vars())
            || !(same_nodes && same_arcs && same_exports);
        let (tech_usages, cell_usages) = if topology_changed {
            let uc = UsageCollector::new(ids, &cell, &nodes, &arcs, &exports)?;
            (
                uc.tech_usages(&self.tech_usages),
                uc.cell_usages(&self.cell_usages)?,
            )
        } else {
            (
                Arc::clone(&self.tech_usages),
                Arc::clone(&self.cell_usages),
            )
        };
        let is_icon = ids.cell_name(cell_id).is_some_and(|n| n.is_icon());
        if is_icon && cell_usages.iter().any(Option::is_some) {
            return Err(CoreError::invalid_argument(format!(
                "icon {} contains subcells",
                ids.describe_cell(cell_id)
            )));
        }

        if !same_nodes {
            check_nodes(&nodes).map_err(as_argument)?;
        }
        if !same_arcs {
            check_arcs(&arcs).map_err(as_argument)?;
        }

        let mut export_index = Arc::clone(&self.export_index);
        let mut defined_exports = Arc::clone(&self.defined_exports);
        let mut deleted_exports = Arc::clone(&self.deleted_exports);
        if !same_exports || self.cell.cell_id() != cell_id {
            let index = build_export_index(cell_id, &exports).map_err(as_argument)?;
            if *index != *self.export_index {
                export_index = Arc::from(index);
                let defined: RoaringBitmap = export_index
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.is_some())
                    .map(|(i, _)| i as u32)
                    .collect();
                defined_exports = bitset_with(&self.defined_exports, defined);
                let mut deleted = RoaringBitmap::new();
                if let Some(max) = defined_exports.max() {
                    deleted.insert_range(0..max);
                    deleted -= &*defined_exports;
                }
                deleted_exports = bitset_with(&self.deleted_exports, deleted);
            }
        }

        Ok(Arc::new(Self {
            cell,
            nodes,
            arcs,
            exports,
            tech_usages,
            cell_usages,
            export_index,
            defined_exports,
            deleted_exports,
        }))
    }

    /// The cell record.
    #[must_use]
    pub fn cell(&self) -> &Arc<ImmutableCell> {
        &self.cell
    }

    /// The cell id.
    #[must_use]
    pub fn cell_id(&self) -> CellId {
        self.cell.cell_id()
    }

    /// Nodes sorted by name.
    #[must_use]
    pub fn nodes(&self) -> &NodeList {
        &self.nodes
    }

    /// Arcs sorted by name, then arc id.
    #[must_use]
    pub fn arcs(&self) -> &ArcList {
        &self.arcs
    }

    /// Exports sorted by name.
    #[must_use]
    pub fn exports(&self) -> &ExportList {
        &self.exports
    }

    /// Indices of the technologies this cell uses directly.
    #[must_use]
    pub fn tech_usages(&self) -> &Arc<RoaringBitmap> {
        &self.tech_usages
    }

    /// Per-usage entries indexed by `index_in_parent`.
    #[must_use]
    pub fn cell_usages(&self) -> &UsageList {
        &self.cell_usages
    }

    /// Entry for usage `index`, if the subcell is instantiated.
    #[must_use]
    pub fn cell_usage(&self, index: usize) -> Option<&Arc<CellUsageInfo>> {
        self.cell_usages.get(index).and_then(Option::as_ref)
    }

    /// Instance counts indexed by `index_in_parent`.
    #[must_use]
    pub fn inst_counts(&self) -> Vec<u32> {
        self.cell_usages
            .iter()
            .map(|u| u.as_ref().map_or(0, |u| u.inst_count()))
            .collect()
    }

    /// Chronological indices of exports currently defined.
    #[must_use]
    pub fn defined_exports(&self) -> &Arc<RoaringBitmap> {
        &self.defined_exports
    }

    /// Chronological indices below the highest defined one that are not
    /// defined.
    #[must_use]
    pub fn deleted_exports(&self) -> &Arc<RoaringBitmap> {
        &self.deleted_exports
    }

    /// Looks up an export by id.
    #[must_use]
    pub fn find_export(&self, id: ExportId) -> Option<&Arc<ImmutableExport>> {
        if id.parent != self.cell_id() {
            return None;
        }
        let pos = (*self.export_index.get(id.chron_index as usize)?)?;
        self.exports.get(pos as usize)
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn find_node(&self, name: &str) -> Option<&Arc<ImmutableNodeInst>> {
        self.nodes
            .binary_search_by(|n| compare_names(n.name(), name))
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Looks up a node by node id.
    #[must_use]
    pub fn node_by_id(&self, node_id: u32) -> Option<&Arc<ImmutableNodeInst>> {
        self.nodes.iter().find(|n| n.node_id() == node_id)
    }

    /// Returns the revision with ids rewritten through `mapper`.
    pub fn with_renamed_ids(
        self: &Arc<Self>,
        ids: &IdManager,
        mapper: &IdMapper,
    ) -> CoreResult<Arc<Self>> {
        let cell = self.cell.with_renamed_ids(mapper);
        let nodes = map_list(&self.nodes, |n| n.with_renamed_ids(mapper));
        let arcs = map_list(&self.arcs, |a| a.with_renamed_ids(mapper));
        let exports = map_list(&self.exports, |e| e.with_renamed_ids(mapper));
        if Arc::ptr_eq(&cell, &self.cell)
            && Arc::ptr_eq(&nodes, &self.nodes)
            && Arc::ptr_eq(&arcs, &self.arcs)
            && Arc::ptr_eq(&exports, &self.exports)
        {
            return Ok(Arc::clone(self));
        }
        if cell.cell_id() == self.cell.cell_id() {
            return self.with(ids, cell, nodes, arcs, exports);
        }
        Self::new(ids, Arc::clone(&cell))?.with(ids, cell, nodes, arcs, exports)
    }

    /// Verifies ordering, the export index and the derived usage data.
    pub fn check(&self, ids: &IdManager) -> CoreResult<()> {
        let cell_id = self.cell_id();
        check_nodes(&self.nodes)?;
        check_arcs(&self.arcs)?;
        let index = build_export_index(cell_id, &self.exports)?;
        ensure!(*index == *self.export_index, "{cell_id}: stale export index");
        for (chron, pos) in self.export_index.iter().enumerate() {
            ensure!(
                pos.is_some() == self.defined_exports.contains(chron as u32),
                "{cell_id}: defined exports disagree at {chron}"
            );
        }
        ensure!(
            self.cell_usages.last().map_or(true, Option::is_some),
            "{cell_id}: usage table not trimmed"
        );

        let uc = UsageCollector::new(ids, &self.cell, &self.nodes, &self.arcs, &self.exports)?;
        ensure!(
            Arc::ptr_eq(&uc.tech_usages(&self.tech_usages), &self.tech_usages),
            "{cell_id}: stale technology usage"
        );
        let usages = uc.cell_usages(&self.cell_usages)?;
        ensure!(
            Arc::ptr_eq(&usages, &self.cell_usages),
            "{cell_id}: stale cell usages"
        );
        for (i, info) in self.cell_usages.iter().enumerate() {
            if let Some(info) = info {
                let usage = ids.usage_in_at(cell_id, i).ok_or_else(|| {
                    CoreError::invariant(format!("{cell_id}: usage {i} not in registry"))
                })?;
                info.check(usage, ids)?;
            }
        }
        Ok(())
    }
}

fn as_argument(err: CoreError) -> CoreError {
    match err {
        CoreError::InvariantViolation { message } => CoreError::InvalidArgument { message },
        other => other,
    }
}

fn check_nodes(nodes: &[Arc<ImmutableNodeInst>]) -> CoreResult<()> {
    let mut seen = HashSet::with_capacity(nodes.len());
    for (i, n) in nodes.iter().enumerate() {
        ensure!(seen.insert(n.node_id()), "duplicate node id {}", n.node_id());
        if i > 0 {
            let prev = &nodes[i - 1];
            ensure!(
                compare_names(prev.name(), n.name()) == Ordering::Less,
                "nodes out of order at {} / {}",
                prev.name(),
                n.name()
            );
        }
    }
    Ok(())
}

fn check_arcs(arcs: &[Arc<ImmutableArcInst>]) -> CoreResult<()> {
    for w in arcs.windows(2) {
        let (prev, a) = (&w[0], &w[1]);
        let cmp = compare_names(prev.name(), a.name());
        let bad = cmp == Ordering::Greater
            || (cmp == Ordering::Equal && (a.is_temp_name() || prev.arc_id() >= a.arc_id()));
        ensure!(!bad, "arcs out of order at {} / {}", prev.name(), a.name());
    }
    Ok(())
}

fn build_export_index(cell_id: CellId, exports: &[Arc<ImmutableExport>]) -> CoreResult<Vec<Option<u32>>> {
    let len = exports
        .iter()
        .map(|e| e.export_id().chron_index as usize + 1)
        .max()
        .unwrap_or(0);
    let mut index = vec![None; len];
    for (pos, e) in exports.iter().enumerate() {
        ensure!(
            e.export_id().parent == cell_id,
            "export {} belongs to {}",
            e.name(),
            e.export_id().parent
        );
        if pos > 0 {
            let prev = &exports[pos - 1];
            ensure!(
                compare_names(prev.name(), e.name()) == Ordering::Less,
                "exports out of order at {} / {}",
                prev.name(),
                e.name()
            );
        }
        let slot = &mut index[e.export_id().chron_index as usize];
        ensure!(slot.is_none(), "duplicate export {}", e.export_id());
        *slot = Some(pos as u32);
    }
    Ok(index)
}

fn map_list<T>(list: &Arc<[Arc<T>]>, f: impl Fn(&Arc<T>) -> Arc<T>) -> Arc<[Arc<T>]> {
    let mut out: Option<Vec<Arc<T>>> = None;
    for (i, item) in list.iter().enumerate() {
        let mapped = f(item);
        if out.is_none() && !Arc::ptr_eq(&mapped, item) {
            out = Some(list[..i].to_vec());
        }
        if let Some(out) = out.as_mut() {
            out.push(mapped);
        }
    }
    out.map_or_else(|| Arc::clone(list), Arc::from)
}

/// A cell revision plus the "modified since saved" flag.
#[derive(Debug)]
pub struct CellBackup {
    revision: Arc<CellRevision>,
    modified: bool,
}

impl CellBackup {
    /// Creates a backup.
    #[must_use]
    pub fn new(revision: Arc<CellRevision>, modified: bool) -> Arc<Self> {
        Arc::new(Self { revision, modified })
    }

    /// Returns `self` when both parts are unchanged.
    #[must_use]
    pub fn with(self: &Arc<Self>, revision: &Arc<CellRevision>, modified: bool) -> Arc<Self> {
        if Arc::ptr_eq(&self.revision, revision) && self.modified == modified {
            return Arc::clone(self);
        }
        Self::new(Arc::clone(revision), modified)
    }

    /// The revision.
    #[must_use]
    pub fn revision(&self) -> &Arc<CellRevision> {
        &self.revision
    }

    /// The cell id.
    #[must_use]
    pub fn cell_id(&self) -> CellId {
        self.revision.cell_id()
    }

    /// True when the cell changed since it was last saved.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Returns the backup with ids rewritten through `mapper`.
    pub fn with_renamed_ids(
        self: &Arc<Self>,
        ids: &IdManager,
        mapper: &IdMapper,
    ) -> CoreResult<Arc<Self>> {
        let revision = self.revision.with_renamed_ids(ids, mapper)?;
        Ok(self.with(&revision, self.modified))
    }

    /// Checks the revision.
    pub fn check(&self, ids: &IdManager) -> CoreResult<()> {
        self.revision.check(ids)
    }
}

/// A library record plus the "modified since saved" flag.
#[derive(Debug)]
pub struct LibraryBackup {
    library: Arc<ImmutableLibrary>,
    modified: bool,
}

impl LibraryBackup {
    /// Creates a backup.
    #[must_use]
    pub fn new(library: Arc<ImmutableLibrary>, modified: bool) -> Arc<Self> {
        Arc::new(Self { library, modified })
    }

    /// Returns `self` when both parts are unchanged.
    #[must_use]
    pub fn with(self: &Arc<Self>, library: &Arc<ImmutableLibrary>, modified: bool) -> Arc<Self> {
        if Arc::ptr_eq(&self.library, library) && self.modified == modified {
            return Arc::clone(self);
        }
        Self::new(Arc::clone(library), modified)
    }

    /// The library record.
    #[must_use]
    pub fn library(&self) -> &Arc<ImmutableLibrary> {
        &self.library
    }

    /// True when the library changed since it was last saved.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Returns the backup with ids rewritten through `mapper`.
    #[must_use]
    pub fn with_renamed_ids(self: &Arc<Self>, mapper: &IdMapper) -> Arc<Self> {
        let library = self.library.with_renamed_ids(mapper);
        self.with(&library, self.modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GridPoint, Orientation};
    use crate::id::{NodeProtoId, PortProtoId, PrimitiveNodeId, TechId};
    use crate::text::{CellName, VarKey, VarValue, Variable};

    struct Fixture {
        ids: Arc<IdManager>,
        tech: TechId,
        cell: CellId,
        pin: PrimitiveNodeId,
        port: PortProtoId,
    }

    fn fixture(name: &str) -> Fixture {
        let ids = IdManager::new();
        let tech = ids.new_tech_id("mocmos").unwrap();
        let lib = ids.new_lib_id("demo").unwrap();
        let cell = ids.new_cell_id(lib, &CellName::parse(name).unwrap()).unwrap();
        let pin = ids.new_primitive_node_id(tech, "pin").unwrap();
        let port = PortProtoId::Primitive(ids.new_primitive_port_id(pin, "p").unwrap());
        Fixture {
            ids,
            tech,
            cell,
            pin,
            port,
        }
    }

    fn pin(f: &Fixture, id: u32, name: &str) -> Arc<ImmutableNodeInst> {
        ImmutableNodeInst::new(
            id,
            NodeProtoId::Primitive(f.pin),
            name,
            GridPoint::ORIGIN,
            Orientation::IDENT,
            0,
            0,
        )
        .unwrap()
    }

    fn empty(f: &Fixture) -> Arc<CellRevision> {
        CellRevision::new(&f.ids, ImmutableCell::new(f.cell, f.tech, 0)).unwrap()
    }

    #[test]
    fn identical_inputs_return_self() {
        let f = fixture("a");
        let rev = empty(&f);
        let same = rev
            .with(
                &f.ids,
                Arc::clone(rev.cell()),
                Arc::clone(rev.nodes()),
                Arc::clone(rev.arcs()),
                Arc::clone(rev.exports()),
            )
            .unwrap();
        assert!(Arc::ptr_eq(&rev, &same));
    }

    #[test]
    fn date_change_skips_collector() {
        let f = fixture("a");
        let rev = empty(&f);
        let nodes: NodeList = Arc::from(vec![pin(&f, 0, "pin@0")]);
        let rev = rev
            .with(&f.ids, Arc::clone(rev.cell()), nodes, Arc::clone(rev.arcs()), Arc::clone(rev.exports()))
            .unwrap();
        let dated = rev
            .with(
                &f.ids,
                rev.cell().with_revision_date(99),
                Arc::clone(rev.nodes()),
                Arc::clone(rev.arcs()),
                Arc::clone(rev.exports()),
            )
            .unwrap();
        assert!(!Arc::ptr_eq(&rev, &dated));
        assert!(Arc::ptr_eq(rev.tech_usages(), dated.tech_usages()));
        assert!(Arc::ptr_eq(rev.cell_usages(), dated.cell_usages()));
        dated.check(&f.ids).unwrap();
    }

    #[test]
    fn nodes_must_be_sorted() {
        let f = fixture("a");
        let rev = empty(&f);
        let bad: NodeList = Arc::from(vec![pin(&f, 0, "pin@10"), pin(&f, 1, "pin@9")]);
        let err = rev
            .with(&f.ids, Arc::clone(rev.cell()), bad, Arc::clone(rev.arcs()), Arc::clone(rev.exports()))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));

        let dup: NodeList = Arc::from(vec![pin(&f, 0, "x"), pin(&f, 0, "y")]);
        assert!(rev
            .with(&f.ids, Arc::clone(rev.cell()), dup, Arc::clone(rev.arcs()), Arc::clone(rev.exports()))
            .is_err());
    }

    #[test]
    fn export_index_and_deleted_exports() {
        let f = fixture("a");
        let rev = empty(&f);
        let e0 = f.ids.new_export_id(f.cell, "a").unwrap();
        let _e1 = f.ids.new_export_id(f.cell, "b").unwrap();
        let e2 = f.ids.new_export_id(f.cell, "c").unwrap();
        let nodes: NodeList = Arc::from(vec![pin(&f, 0, "pin@0")]);
        let exports: ExportList = Arc::from(vec![
            ImmutableExport::new(e0, "a", 0, f.port).unwrap(),
            ImmutableExport::new(e2, "c", 0, f.port).unwrap(),
        ]);
        let rev = rev
            .with(&f.ids, Arc::clone(rev.cell()), nodes, Arc::clone(rev.arcs()), exports)
            .unwrap();
        assert_eq!(rev.defined_exports().iter().collect::<Vec<_>>(), [0, 2]);
        assert_eq!(rev.deleted_exports().iter().collect::<Vec<_>>(), [1]);
        assert_eq!(rev.find_export(e2).map(|e| e.name()), Some("c"));
        assert!(rev.find_node("pin@0").is_some());
        rev.check(&f.ids).unwrap();
    }

    #[test]
    fn unsorted_exports_rejected() {
        let f = fixture("a");
        let rev = empty(&f);
        let e0 = f.ids.new_export_id(f.cell, "z").unwrap();
        let e1 = f.ids.new_export_id(f.cell, "a").unwrap();
        let nodes: NodeList = Arc::from(vec![pin(&f, 0, "pin@0")]);
        let exports: ExportList = Arc::from(vec![
            ImmutableExport::new(e0, "z", 0, f.port).unwrap(),
            ImmutableExport::new(e1, "a", 0, f.port).unwrap(),
        ]);
        assert!(rev
            .with(&f.ids, Arc::clone(rev.cell()), nodes, Arc::clone(rev.arcs()), exports)
            .is_err());
    }

    #[test]
    fn icon_cannot_hold_subcells() {
        let f = fixture("inv{ic}");
        let lib = f.ids.cell_lib(f.cell).unwrap();
        let leaf = f.ids.new_cell_id(lib, &CellName::parse("leaf").unwrap()).unwrap();
        let rev = empty(&f);
        let nodes: NodeList = Arc::from(vec![ImmutableNodeInst::new(
            0,
            NodeProtoId::Cell(leaf),
            "leaf@0",
            GridPoint::ORIGIN,
            Orientation::IDENT,
            0,
            0,
        )
        .unwrap()]);
        let err = rev
            .with(&f.ids, Arc::clone(rev.cell()), nodes, Arc::clone(rev.arcs()), Arc::clone(rev.exports()))
            .unwrap_err();
        assert!(err.to_string().contains("icon"));
    }

    #[test]
    fn cell_variable_change_reruns_collector() {
        let f = fixture("a");
        let rev = empty(&f);
        let cell = rev.cell().with_variable(Variable::new(
            VarKey::new("note").unwrap(),
            VarValue::Str("x".into()),
        ));
        let next = rev
            .with(&f.ids, cell, Arc::clone(rev.nodes()), Arc::clone(rev.arcs()), Arc::clone(rev.exports()))
            .unwrap();
        // same result, so the old bitset is kept
        assert!(Arc::ptr_eq(rev.tech_usages(), next.tech_usages()));
    }

    #[test]
    fn backup_with_reuses() {
        let f = fixture("a");
        let rev = empty(&f);
        let b = CellBackup::new(Arc::clone(&rev), false);
        assert!(Arc::ptr_eq(&b, &b.with(&rev, false)));
        assert!(b.with(&rev, true).is_modified());

        let lib = LibraryBackup::new(ImmutableLibrary::new(f.ids.cell_lib(f.cell).unwrap()), false);
        assert!(Arc::ptr_eq(&lib, &lib.with(&Arc::clone(lib.library()), false)));
    }
}
