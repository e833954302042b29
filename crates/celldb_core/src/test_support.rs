//! Fixtures shared by unit tests.

use crate::backup::{CellBackup, CellRevision, ExportList, LibraryBackup, NodeList};
use crate::geometry::{GridPoint, Orientation};
use crate::id::{ArcProtoId, CellId, IdManager, LibId, NodeProtoId, PortProtoId, PrimitiveNodeId, TechId};
use crate::immutable::{ImmutableCell, ImmutableExport, ImmutableLibrary, ImmutableNodeInst};
use crate::snapshot::Snapshot;
use crate::tech::{DefaultNode, TechCatalog, TechPool};
use crate::text::CellName;
use std::sync::Arc;

pub(crate) struct World {
    pub ids: Arc<IdManager>,
    pub tech: TechId,
    pub lib: LibId,
    pub pin: PrimitiveNodeId,
    pub pin_port: PortProtoId,
    pub wire: ArcProtoId,
    pub pool: Arc<dyn TechPool>,
}

impl World {
    pub fn new() -> Self {
        let ids = IdManager::new();
        let tech = ids.new_tech_id("mocmos").unwrap();
        let lib = ids.new_lib_id("demo").unwrap();
        let mut catalog = TechCatalog::new();
        let pin = catalog
            .register_primitive(&ids, tech, "pin", DefaultNode::new(10, 4), &["p"])
            .unwrap();
        let wire = catalog.register_arc_proto(&ids, tech, "metal-1").unwrap();
        let pin_port = PortProtoId::Primitive(ids.find_primitive_port_id(pin, "p").unwrap());
        Self {
            ids,
            tech,
            lib,
            pin,
            pin_port,
            wire,
            pool: catalog.into_pool(),
        }
    }

    pub fn cell(&self, name: &str) -> CellId {
        let name = CellName::parse(name).unwrap();
        self.ids
            .find_cell_id(self.lib, &name)
            .unwrap_or_else(|| self.ids.new_cell_id(self.lib, &name).unwrap())
    }

    pub fn revision(
        &self,
        name: &str,
        nodes: Vec<Arc<ImmutableNodeInst>>,
        exports: Vec<Arc<ImmutableExport>>,
    ) -> Arc<CellRevision> {
        let cell = self.cell(name);
        let rev = CellRevision::new(&self.ids, ImmutableCell::new(cell, self.tech, 0)).unwrap();
        let nodes: NodeList = Arc::from(nodes);
        let exports: ExportList = Arc::from(exports);
        rev.with(&self.ids, Arc::clone(rev.cell()), nodes, Arc::clone(rev.arcs()), exports)
            .unwrap()
    }

    pub fn backup(&self, name: &str, nodes: Vec<Arc<ImmutableNodeInst>>) -> Arc<CellBackup> {
        CellBackup::new(self.revision(name, nodes, Vec::new()), false)
    }

    pub fn pin(&self, id: u32, name: &str, x: i64, y: i64) -> Arc<ImmutableNodeInst> {
        ImmutableNodeInst::new(
            id,
            NodeProtoId::Primitive(self.pin),
            name,
            GridPoint::new(x, y),
            Orientation::IDENT,
            10,
            4,
        )
        .unwrap()
    }

    pub fn inst(&self, id: u32, proto: CellId, x: i64, y: i64) -> Arc<ImmutableNodeInst> {
        ImmutableNodeInst::new(
            id,
            NodeProtoId::Cell(proto),
            format!("inst@{id}"),
            GridPoint::new(x, y),
            Orientation::IDENT,
            0,
            0,
        )
        .unwrap()
    }

    pub fn lib_backup(&self) -> Arc<LibraryBackup> {
        LibraryBackup::new(ImmutableLibrary::new(self.lib), false)
    }

    pub fn empty_snapshot(&self) -> Arc<Snapshot> {
        Snapshot::empty(&self.ids, &self.pool)
    }

    /// Places backups at their cell index.
    pub fn slots(&self, cells: &[&Arc<CellBackup>]) -> Vec<Option<Arc<CellBackup>>> {
        let mut out = Vec::new();
        for cell in cells {
            let i = cell.cell_id().index();
            if out.len() <= i {
                out.resize(i + 1, None);
            }
            out[i] = Some(Arc::clone(cell));
        }
        out
    }
}
