//! Snapshot diff reader.

use super::{
    DIFF_TAG, END_OF_LIST, END_TAG, NONE_REF, VAR_BOOL, VAR_DOUBLE, VAR_INT, VAR_INTS, VAR_LONG,
    VAR_STR, VAR_STRS,
};
use crate::backup::{CellBackup, CellRevision, LibraryBackup};
use crate::error::{CoreError, CoreResult};
use crate::geometry::{GridPoint, Orientation};
use crate::id::{
    ArcProtoId, CellId, ExportId, IdManager, LibId, NodeProtoId, PortProtoId, PrimitiveNodeId,
    PrimitivePortId, TechId,
};
use crate::immutable::{
    ArcEnd, ImmutableArcInst, ImmutableCell, ImmutableExport, ImmutableLibrary, ImmutableNodeInst,
    ImmutablePortInst, PortCharacteristic, Variables,
};
use crate::snapshot::Snapshot;
use crate::tech::TechPool;
use crate::text::{CellName, TextDescriptor, VarKey, VarValue, Variable};
use crate::types::SnapshotVersion;
use celldb_codec::StreamDecoder;
use std::io::Read;
use std::sync::Arc;

/// Largest count a list or table in the stream may claim.
const MAX_COUNT: usize = 16 * 1024 * 1024;

/// Rebuilds snapshots from a stream written by
/// [`SnapshotWriter`](super::SnapshotWriter).
///
/// Registry entries announced by the stream are minted in the reader's
/// [`IdManager`], which must either be fresh or already agree with the
/// writer's registry index for index.
#[derive(Debug)]
pub struct SnapshotReader<R: Read> {
    dec: StreamDecoder<R>,
    ids: Arc<IdManager>,
    tech_pool: Arc<dyn TechPool>,
    var_keys: Vec<VarKey>,
    descriptors: Vec<TextDescriptor>,
    tools: Vec<String>,
    techs: Vec<TechId>,
    arc_protos: Vec<ArcProtoId>,
    primitive_nodes: Vec<PrimitiveNodeId>,
    primitive_ports: Vec<PrimitivePortId>,
    orientations: Vec<Orientation>,
    libs_seen: usize,
    cells_seen: usize,
    exports_seen: Vec<usize>,
}

impl<R: Read> SnapshotReader<R> {
    /// Creates a reader at the start of a stream.
    pub fn new(input: R, ids: &Arc<IdManager>, tech_pool: &Arc<dyn TechPool>) -> Self {
        Self {
            dec: StreamDecoder::new(input),
            ids: Arc::clone(ids),
            tech_pool: Arc::clone(tech_pool),
            var_keys: Vec::new(),
            descriptors: Vec::new(),
            tools: Vec::new(),
            techs: Vec::new(),
            arc_protos: Vec::new(),
            primitive_nodes: Vec::new(),
            primitive_ports: Vec::new(),
            orientations: Vec::new(),
            libs_seen: 0,
            cells_seen: 0,
            exports_seen: Vec::new(),
        }
    }

    /// Registry the reader mints into.
    pub fn id_manager(&self) -> &Arc<IdManager> {
        &self.ids
    }

    /// The empty snapshot a stream starts from.
    pub fn initial_snapshot(&self) -> Arc<Snapshot> {
        Snapshot::empty(&self.ids, &self.tech_pool)
    }

    /// Bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.dec.bytes_read()
    }

    /// Reads the next diff and applies it to `old`.
    ///
    /// Returns `None` at the end of the stream. Slots the diff does not
    /// mention keep `old`'s `Arc`s.
    pub fn read_diff(&mut self, old: &Arc<Snapshot>) -> CoreResult<Option<Arc<Snapshot>>> {
        if !Arc::ptr_eq(old.id_manager(), &self.ids) {
            return Err(CoreError::invalid_argument(
                "snapshot belongs to a different registry",
            ));
        }
        match self.dec.read_byte()? {
            END_TAG => return Ok(None),
            DIFF_TAG => {}
            tag => return Err(CoreError::stream_corruption(format!("unknown tag {tag}"))),
        }
        self.read_registry_growth()?;

        let version = self.dec.read_long()?;
        let version = u64::try_from(version)
            .map(SnapshotVersion::new)
            .map_err(|_| CoreError::stream_corruption(format!("version {version}")))?;
        let tool = match self.dec.read_int()? {
            NONE_REF => None,
            i => Some(self.resolve_tool(i)?),
        };

        let mut libs: Vec<Option<Arc<LibraryBackup>>> = old.lib_backups().to_vec();
        loop {
            let i = self.dec.read_int()?;
            if i == END_OF_LIST {
                break;
            }
            let i = to_index(i)?;
            let lib_id = self
                .ids
                .lib_id(i)
                .ok_or_else(|| CoreError::stream_corruption(format!("library slot {i} unknown")))?;
            let slot = if self.dec.read_bool()? {
                let base = old.lib_backups().get(i).and_then(Option::as_ref);
                Some(self.read_library(lib_id, base)?)
            } else {
                None
            };
            put(&mut libs, i, slot);
        }
        libs.resize(self.read_slot_count("library", self.ids.num_libs())?, None);

        let mut cells: Vec<Option<Arc<CellBackup>>> = old.cell_backups().to_vec();
        let mut changed_cells = 0;
        loop {
            let i = self.dec.read_int()?;
            if i == END_OF_LIST {
                break;
            }
            let i = to_index(i)?;
            let cell_id = self
                .ids
                .cell_id(i)
                .ok_or_else(|| CoreError::stream_corruption(format!("cell slot {i} unknown")))?;
            let slot = if self.dec.read_bool()? {
                let base = old.cell_backups().get(i).and_then(Option::as_ref);
                Some(self.read_cell(cell_id, base)?)
            } else {
                None
            };
            put(&mut cells, i, slot);
            changed_cells += 1;
        }
        cells.resize(self.read_slot_count("cell", self.ids.num_cells())?, None);

        let snapshot = old
            .with_at_version(tool.as_deref(), &cells, &libs, version)
            .map_err(corrupt)?;
        tracing::debug!(
            from = %old.version(),
            to = %snapshot.version(),
            changed_cells,
            bytes = self.dec.bytes_read(),
            "read snapshot diff"
        );
        Ok(Some(snapshot))
    }

    fn read_registry_growth(&mut self) -> CoreResult<()> {
        let new_libs = self.read_count()?;
        for _ in 0..new_libs {
            let name = self.dec.read_string()?;
            let id = self.ids.new_lib_id(&name).map_err(corrupt)?;
            expect_index("library", id.index(), self.libs_seen)?;
            self.libs_seen += 1;
        }

        let new_cells = self.read_count()?;
        for _ in 0..new_cells {
            let lib = self.lib_ref()?;
            let name = CellName::parse(&self.dec.read_string()?).map_err(corrupt)?;
            let id = self.ids.new_cell_id(lib, &name).map_err(corrupt)?;
            expect_index("cell", id.index(), self.cells_seen)?;
            self.cells_seen += 1;
        }
        self.exports_seen.resize(self.cells_seen, 0);

        loop {
            let i = self.dec.read_int()?;
            if i == END_OF_LIST {
                break;
            }
            let i = to_index(i)?;
            let cell = self.cell_ref_at(i)?;
            let count = self.read_count()?;
            for _ in 0..count {
                let name = self.dec.read_string()?;
                let chron = self.exports_seen[i];
                match self.ids.export_id(cell, chron) {
                    Some(id) => {
                        if self.ids.export_external_id(id).as_deref() != Some(name.as_str()) {
                            return Err(CoreError::stream_corruption(format!(
                                "{cell}: export {chron} is not {name}"
                            )));
                        }
                    }
                    None => {
                        let minted = self
                            .ids
                            .new_export_ids(cell, std::slice::from_ref(&name))
                            .map_err(corrupt)?;
                        let index = minted.first().map_or(usize::MAX, |e| e.chron_index as usize);
                        expect_index("export", index, chron)?;
                    }
                }
                self.exports_seen[i] += 1;
            }
        }
        Ok(())
    }

    fn read_library(
        &mut self,
        lib_id: LibId,
        base: Option<&Arc<LibraryBackup>>,
    ) -> CoreResult<Arc<LibraryBackup>> {
        let modified = self.dec.read_bool()?;
        let file = self.read_optional_string()?;
        let version = self.read_optional_string()?;
        let flags = self.dec.read_int()? as u32;
        let vars = self.read_vars()?;
        let lib = ImmutableLibrary::new(lib_id)
            .with_file(file)
            .with_version(version)
            .with_flags(flags)
            .with_vars(vars);
        let lib = match base {
            Some(b) if **b.library() == *lib => Arc::clone(b.library()),
            _ => lib,
        };
        Ok(match base {
            Some(b) => b.with(&lib, modified),
            None => LibraryBackup::new(lib, modified),
        })
    }

    fn read_cell(
        &mut self,
        cell_id: CellId,
        base: Option<&Arc<CellBackup>>,
    ) -> CoreResult<Arc<CellBackup>> {
        let modified = self.dec.read_bool()?;
        let creation = self.dec.read_long()?;
        let revision_date = self.dec.read_long()?;
        let tech = self.tech_ref()?;
        let flags = self.dec.read_int()? as u32;
        let vars = self.read_vars()?;
        let record = ImmutableCell::new(cell_id, tech, creation)
            .with_revision_date(revision_date)
            .with_flags(flags)
            .with_vars(vars);

        let base_rev = base.map(|b| b.revision());
        let record = match base_rev {
            Some(rev) if **rev.cell() == *record => Arc::clone(rev.cell()),
            _ => record,
        };

        let nodes = if self.dec.read_bool()? {
            let n = self.read_count()?;
            let mut nodes = Vec::new();
            for _ in 0..n {
                nodes.push(self.read_node()?);
            }
            Arc::from(nodes)
        } else {
            let rev = unchanged(base_rev, cell_id, "nodes")?;
            Arc::clone(rev.nodes())
        };
        let arcs = if self.dec.read_bool()? {
            let n = self.read_count()?;
            let mut arcs = Vec::new();
            for _ in 0..n {
                arcs.push(self.read_arc()?);
            }
            Arc::from(arcs)
        } else {
            let rev = unchanged(base_rev, cell_id, "arcs")?;
            Arc::clone(rev.arcs())
        };
        let exports = if self.dec.read_bool()? {
            let n = self.read_count()?;
            let mut exports = Vec::new();
            for _ in 0..n {
                exports.push(self.read_export(cell_id)?);
            }
            Arc::from(exports)
        } else {
            let rev = unchanged(base_rev, cell_id, "exports")?;
            Arc::clone(rev.exports())
        };

        let revision = match base_rev {
            Some(rev) => rev.with(&self.ids, record, nodes, arcs, exports),
            None => CellRevision::new(&self.ids, Arc::clone(&record))
                .and_then(|rev| rev.with(&self.ids, record, nodes, arcs, exports)),
        }
        .map_err(corrupt)?;
        Ok(match base {
            Some(b) => b.with(&revision, modified),
            None => CellBackup::new(revision, modified),
        })
    }

    fn read_node(&mut self) -> CoreResult<Arc<ImmutableNodeInst>> {
        let node_id = self.dec.read_int()? as u32;
        let proto = self.node_proto_ref()?;
        let name = self.dec.read_string()?;
        let name_td = self.descriptor_ref()?;
        let orient = self.orientation_ref()?;
        let anchor = GridPoint::new(self.dec.read_long()?, self.dec.read_long()?);
        let width = self.dec.read_long()?;
        let height = self.dec.read_long()?;
        let flags = self.dec.read_int()? as u32;
        let tech_bits = self.dec.read_byte()?;
        let proto_td = self.descriptor_ref()?;
        let vars = self.read_vars()?;

        let mut ports: Vec<Option<Arc<ImmutablePortInst>>> = Vec::new();
        loop {
            let chron = self.dec.read_int()?;
            if chron == END_OF_LIST {
                break;
            }
            let chron = to_index(chron)?;
            if !self.has_port(proto, chron) {
                return Err(CoreError::stream_corruption(format!(
                    "node {node_id}: port {chron} not on {proto}"
                )));
            }
            let port_vars = self.read_vars()?;
            if ports.len() <= chron {
                ports.resize(chron + 1, None);
            }
            ports[chron] = Some(ImmutablePortInst::from_vars(port_vars));
        }

        let node = ImmutableNodeInst::new(node_id, proto, name, anchor, orient, width, height)
            .map_err(corrupt)?
            .with_name_descriptor(name_td)
            .with_flags(flags)
            .with_tech_bits(tech_bits)
            .with_proto_descriptor(proto_td)
            .with_vars(vars);
        Ok(if ports.is_empty() {
            node
        } else {
            node.with_port_slots(ports)
        })
    }

    fn read_arc(&mut self) -> CoreResult<Arc<ImmutableArcInst>> {
        let arc_id = self.dec.read_int()? as u32;
        let proto = self.arc_proto_ref()?;
        let name = self.dec.read_string()?;
        let name_td = self.descriptor_ref()?;
        let tail = self.read_arc_end()?;
        let head = self.read_arc_end()?;
        let width = self.dec.read_long()?;
        let angle = self.dec.read_short()?;
        let flags = self.dec.read_int()? as u32;
        let vars = self.read_vars()?;
        Ok(ImmutableArcInst::new(arc_id, proto, name, tail, head, width)
            .map_err(corrupt)?
            .with_name_descriptor(name_td)
            .with_angle(angle)
            .with_flags(flags)
            .with_vars(vars))
    }

    fn read_arc_end(&mut self) -> CoreResult<ArcEnd> {
        let node_id = self.dec.read_int()? as u32;
        let port = self.port_ref()?;
        let location = GridPoint::new(self.dec.read_long()?, self.dec.read_long()?);
        Ok(ArcEnd::new(node_id, port, location))
    }

    fn read_export(&mut self, cell: CellId) -> CoreResult<Arc<ImmutableExport>> {
        let chron = self.dec.read_int()?;
        let export_id = self
            .ids
            .export_id(cell, to_index(chron)?)
            .ok_or_else(|| CoreError::stream_corruption(format!("{cell}: export {chron} unknown")))?;
        let name = self.dec.read_string()?;
        let name_td = self.descriptor_ref()?;
        let node_id = self.dec.read_int()? as u32;
        let port = self.port_ref()?;
        let always_drawn = self.dec.read_bool()?;
        let body_only = self.dec.read_bool()?;
        let byte = self.dec.read_byte()?;
        let characteristic = PortCharacteristic::from_byte(byte)
            .ok_or_else(|| CoreError::stream_corruption(format!("port characteristic {byte}")))?;
        let vars = self.read_vars()?;
        Ok(ImmutableExport::new(export_id, name, node_id, port)
            .map_err(corrupt)?
            .with_name_descriptor(name_td)
            .with_always_drawn(always_drawn)
            .with_body_only(body_only)
            .with_characteristic(characteristic)
            .with_vars(vars))
    }

    fn read_vars(&mut self) -> CoreResult<Variables> {
        let n = self.read_count()?;
        let mut vars = Vec::new();
        for _ in 0..n {
            let key = self.var_key_ref()?;
            let td = self.descriptor_ref()?;
            let value = self.read_var_value()?;
            vars.push(Variable::new(key, value).with_descriptor(td));
        }
        Variables::from_vec(vars).map_err(corrupt)
    }

    fn read_var_value(&mut self) -> CoreResult<VarValue> {
        Ok(match self.dec.read_byte()? {
            VAR_INT => VarValue::Int(self.dec.read_int()?),
            VAR_LONG => VarValue::Long(self.dec.read_long()?),
            VAR_DOUBLE => VarValue::Double(self.dec.read_double()?),
            VAR_BOOL => VarValue::Bool(self.dec.read_bool()?),
            VAR_STR => VarValue::Str(self.dec.read_string()?),
            VAR_INTS => {
                let n = self.read_count()?;
                let mut vs = Vec::new();
                for _ in 0..n {
                    vs.push(self.dec.read_int()?);
                }
                VarValue::Ints(vs)
            }
            VAR_STRS => {
                let n = self.read_count()?;
                let mut vs = Vec::new();
                for _ in 0..n {
                    vs.push(self.dec.read_string()?);
                }
                VarValue::Strs(vs)
            }
            tag => return Err(CoreError::stream_corruption(format!("variable tag {tag}"))),
        })
    }

    fn read_optional_string(&mut self) -> CoreResult<Option<String>> {
        Ok(if self.dec.read_bool()? {
            Some(self.dec.read_string()?)
        } else {
            None
        })
    }

    /// Reads a count in `0..=MAX_COUNT`.
    ///
    /// Lists built from a count grow as their items are read, so a count
    /// alone never allocates.
    fn read_count(&mut self) -> CoreResult<usize> {
        let n = to_index(self.dec.read_int()?)?;
        if n > MAX_COUNT {
            return Err(CoreError::stream_corruption(format!(
                "count {n} exceeds {MAX_COUNT}"
            )));
        }
        Ok(n)
    }

    /// Reads the length of a slot table, which cannot exceed the registry.
    fn read_slot_count(&mut self, what: &str, registered: usize) -> CoreResult<usize> {
        let n = self.read_count()?;
        if n > registered {
            return Err(CoreError::stream_corruption(format!(
                "{n} {what} slots, {registered} registered"
            )));
        }
        Ok(n)
    }

    fn has_port(&self, proto: NodeProtoId, chron: usize) -> bool {
        match proto {
            NodeProtoId::Cell(cell) => chron < self.ids.num_export_ids(cell),
            NodeProtoId::Primitive(node) => u32::try_from(chron).is_ok_and(|index| {
                self.ids
                    .primitive_port_name(PrimitivePortId { node, index })
                    .is_some()
            }),
        }
    }

    fn lib_ref(&mut self) -> CoreResult<LibId> {
        let i = to_index(self.dec.read_int()?)?;
        if i >= self.libs_seen {
            return Err(CoreError::stream_corruption(format!("library {i} not announced")));
        }
        self.ids
            .lib_id(i)
            .ok_or_else(|| CoreError::stream_corruption(format!("library {i} unknown")))
    }

    fn cell_ref_at(&self, i: usize) -> CoreResult<CellId> {
        if i >= self.cells_seen {
            return Err(CoreError::stream_corruption(format!("cell {i} not announced")));
        }
        self.ids
            .cell_id(i)
            .ok_or_else(|| CoreError::stream_corruption(format!("cell {i} unknown")))
    }

    fn resolve_tool(&mut self, i: i32) -> CoreResult<String> {
        let i = to_index(i)?;
        if i == self.tools.len() {
            let tool = self.dec.read_string()?;
            self.tools.push(tool);
        }
        lookup(&self.tools, i, "tool").cloned()
    }

    fn tech_ref(&mut self) -> CoreResult<TechId> {
        let i = to_index(self.dec.read_int()?)?;
        if i == self.techs.len() {
            let name = self.dec.read_string()?;
            let tech = self.ids.new_tech_id(&name).map_err(corrupt)?;
            self.techs.push(tech);
        }
        lookup(&self.techs, i, "technology").copied()
    }

    fn arc_proto_ref(&mut self) -> CoreResult<ArcProtoId> {
        let i = to_index(self.dec.read_int()?)?;
        if i == self.arc_protos.len() {
            let tech = self.tech_ref()?;
            let name = self.dec.read_string()?;
            let ap = self.ids.new_arc_proto_id(tech, &name).map_err(corrupt)?;
            self.arc_protos.push(ap);
        }
        lookup(&self.arc_protos, i, "arc prototype").copied()
    }

    fn primitive_node_ref(&mut self) -> CoreResult<PrimitiveNodeId> {
        let i = to_index(self.dec.read_int()?)?;
        if i == self.primitive_nodes.len() {
            let tech = self.tech_ref()?;
            let name = self.dec.read_string()?;
            let pn = self.ids.new_primitive_node_id(tech, &name).map_err(corrupt)?;
            self.primitive_nodes.push(pn);
        }
        lookup(&self.primitive_nodes, i, "primitive node").copied()
    }

    fn primitive_port_ref(&mut self) -> CoreResult<PrimitivePortId> {
        let i = to_index(self.dec.read_int()?)?;
        if i == self.primitive_ports.len() {
            let node = self.primitive_node_ref()?;
            let name = self.dec.read_string()?;
            let pp = self.ids.new_primitive_port_id(node, &name).map_err(corrupt)?;
            self.primitive_ports.push(pp);
        }
        lookup(&self.primitive_ports, i, "primitive port").copied()
    }

    fn node_proto_ref(&mut self) -> CoreResult<NodeProtoId> {
        Ok(if self.dec.read_bool()? {
            let i = to_index(self.dec.read_int()?)?;
            NodeProtoId::Cell(self.cell_ref_at(i)?)
        } else {
            NodeProtoId::Primitive(self.primitive_node_ref()?)
        })
    }

    fn port_ref(&mut self) -> CoreResult<PortProtoId> {
        Ok(if self.dec.read_bool()? {
            let i = to_index(self.dec.read_int()?)?;
            let cell = self.cell_ref_at(i)?;
            let chron = to_index(self.dec.read_int()?)?;
            let export: ExportId = self
                .ids
                .export_id(cell, chron)
                .ok_or_else(|| CoreError::stream_corruption(format!("{cell}: export {chron} unknown")))?;
            PortProtoId::Export(export)
        } else {
            PortProtoId::Primitive(self.primitive_port_ref()?)
        })
    }

    fn orientation_ref(&mut self) -> CoreResult<Orientation> {
        let i = to_index(self.dec.read_int()?)?;
        if i == self.orientations.len() {
            let angle = self.dec.read_short()?;
            let mx = self.dec.read_bool()?;
            let my = self.dec.read_bool()?;
            self.orientations.push(Orientation::new(angle, mx, my));
        }
        lookup(&self.orientations, i, "orientation").copied()
    }

    fn descriptor_ref(&mut self) -> CoreResult<TextDescriptor> {
        let i = to_index(self.dec.read_int()?)?;
        if i == self.descriptors.len() {
            let bits = self.dec.read_long()? as u64;
            let color = self.dec.read_int()?;
            self.descriptors.push(TextDescriptor::new(bits, color));
        }
        lookup(&self.descriptors, i, "text descriptor").copied()
    }

    fn var_key_ref(&mut self) -> CoreResult<VarKey> {
        let i = to_index(self.dec.read_int()?)?;
        if i == self.var_keys.len() {
            let name = self.dec.read_string()?;
            self.var_keys.push(VarKey::new(&name).map_err(corrupt)?);
        }
        lookup(&self.var_keys, i, "variable key").cloned()
    }
}

fn to_index(i: i32) -> CoreResult<usize> {
    usize::try_from(i).map_err(|_| CoreError::stream_corruption(format!("negative index {i}")))
}

fn lookup<'a, T>(table: &'a [T], i: usize, what: &str) -> CoreResult<&'a T> {
    table
        .get(i)
        .ok_or_else(|| CoreError::stream_corruption(format!("{what} {i} out of range")))
}

fn expect_index(what: &str, got: usize, expected: usize) -> CoreResult<()> {
    if got == expected {
        Ok(())
    } else {
        Err(CoreError::stream_corruption(format!(
            "{what} minted at {got}, stream expects {expected}"
        )))
    }
}

fn unchanged<'a>(
    base: Option<&'a Arc<CellRevision>>,
    cell: CellId,
    what: &str,
) -> CoreResult<&'a Arc<CellRevision>> {
    base.ok_or_else(|| CoreError::stream_corruption(format!("{cell}: unchanged {what} of a new cell")))
}

fn put<T>(slots: &mut Vec<Option<T>>, i: usize, value: Option<T>) {
    if slots.len() <= i {
        slots.resize_with(i + 1, || None);
    }
    slots[i] = value;
}

fn corrupt(err: CoreError) -> CoreError {
    match err {
        CoreError::Codec(_) | CoreError::Io(_) | CoreError::StreamCorruption { .. } => err,
        other => CoreError::stream_corruption(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GridRect;
    use crate::stream::SnapshotWriter;
    use crate::tech::{DefaultNode, TechCatalog};
    use crate::test_support::World;
    use celldb_codec::StreamEncoder;

    /// A registry and pool registered the same way as `World`'s.
    fn mirror() -> (Arc<IdManager>, Arc<dyn TechPool>) {
        let ids = IdManager::new();
        let tech = ids.new_tech_id("mocmos").unwrap();
        let mut catalog = TechCatalog::new();
        catalog
            .register_primitive(&ids, tech, "pin", DefaultNode::new(10, 4), &["p"])
            .unwrap();
        catalog.register_arc_proto(&ids, tech, "metal-1").unwrap();
        (ids, catalog.into_pool())
    }

    /// leaf exports `in` and `out`; top holds two leaf instances and a pin
    /// wired together.
    fn hierarchy(w: &World) -> Arc<Snapshot> {
        let leaf_id = w.cell("leaf{sch}");
        let names = vec!["in".to_string(), "out".to_string()];
        let export_ids = w.ids.new_export_ids(leaf_id, &names).unwrap();
        let exports = vec![
            ImmutableExport::new(export_ids[0], "in", 0, w.pin_port).unwrap(),
            ImmutableExport::new(export_ids[1], "out", 1, w.pin_port)
                .unwrap()
                .with_characteristic(PortCharacteristic::Output),
        ];
        let key = VarKey::new("ATTR_delay").unwrap();
        let leaf_nodes = vec![
            w.pin(0, "pin@0", -10, 0)
                .with_variable(Variable::new(key.clone(), VarValue::Double(1.5))),
            w.pin(1, "pin@1", 10, 0)
                .with_variable(Variable::new(key, VarValue::Strs(vec!["a".into(), "b".into()]))),
        ];
        let leaf = CellBackup::new(w.revision("leaf{sch}", leaf_nodes, exports), true);

        let top_id = w.cell("top{sch}");
        let out = PortProtoId::Export(export_ids[1]);
        let top_nodes = vec![
            w.inst(0, leaf_id, 0, 0),
            w.inst(1, leaf_id, 100, 0).with_orient(Orientation::R90),
            w.pin(2, "pin@2", 50, 50),
        ];
        let rev = w.revision("top{sch}", top_nodes, Vec::new());
        let arc = ImmutableArcInst::new(
            0,
            w.wire,
            "net@0",
            ArcEnd::new(0, out, GridPoint::new(10, 0)),
            ArcEnd::new(2, w.pin_port, GridPoint::new(50, 50)),
            2,
        )
        .unwrap();
        let rev = rev
            .with(
                &w.ids,
                Arc::clone(rev.cell()),
                Arc::clone(rev.nodes()),
                Arc::from(vec![arc]),
                Arc::clone(rev.exports()),
            )
            .unwrap();
        let top = CellBackup::new(rev, true);
        let other = w.backup("spare", vec![w.pin(0, "pin@0", 0, 0)]);

        let lib = LibraryBackup::new(
            ImmutableLibrary::new(w.lib).with_file(Some("demo.jelib".into())),
            true,
        );
        w.empty_snapshot()
            .with(Some("editor"), &w.slots(&[&leaf, &top, &other]), &[Some(lib)])
            .unwrap()
    }

    fn write_stream(old: &Snapshot, snaps: &[&Arc<Snapshot>]) -> Vec<u8> {
        let mut writer = SnapshotWriter::new(Vec::new());
        let mut prev = old;
        for snap in snaps {
            writer.write_diff(prev, snap).unwrap();
            prev = snap;
        }
        writer.finish().unwrap()
    }

    #[test]
    fn round_trip_into_fresh_registry() {
        let w = World::new();
        let snap = hierarchy(&w);
        let bytes = write_stream(&w.empty_snapshot(), &[&snap]);

        let (ids, pool) = mirror();
        let mut reader = SnapshotReader::new(bytes.as_slice(), &ids, &pool);
        let start = reader.initial_snapshot();
        let read = reader.read_diff(&start).unwrap().unwrap();
        assert!(reader.read_diff(&read).unwrap().is_none());
        assert_eq!(reader.bytes_read(), bytes.len() as u64);

        assert_eq!(read.version(), snap.version());
        assert_eq!(read.tool(), Some("editor"));
        read.check().unwrap();
        assert_eq!(ids.num_cells(), 3);
        for (a, b) in snap.cells().zip(read.cells()) {
            let (ra, rb) = (a.revision(), b.revision());
            assert_eq!(ra.cell_id(), rb.cell_id());
            assert_eq!(**ra.cell(), **rb.cell());
            assert_eq!(ra.nodes().len(), rb.nodes().len());
            for (na, nb) in ra.nodes().iter().zip(rb.nodes().iter()) {
                assert_eq!(**na, **nb);
            }
            for (aa, ab) in ra.arcs().iter().zip(rb.arcs().iter()) {
                assert_eq!(**aa, **ab);
            }
            for (ea, eb) in ra.exports().iter().zip(rb.exports().iter()) {
                assert_eq!(**ea, **eb);
            }
            assert_eq!(a.is_modified(), b.is_modified());
            assert_eq!(snap.cell_bounds(a.cell_id()), read.cell_bounds(b.cell_id()));
        }
        let lib = read.libraries().next().unwrap();
        assert_eq!(lib.library().file(), Some("demo.jelib"));
        let demo = ids.find_lib_id("demo").unwrap();
        let leaf = ids.find_cell_id(demo, &CellName::parse("leaf{sch}").unwrap());
        assert_eq!(
            ids.export_external_id(ids.export_id(leaf.unwrap(), 1).unwrap()).as_deref(),
            Some("out")
        );
    }

    #[test]
    fn unchanged_slots_stay_shared() {
        let w = World::new();
        let s1 = hierarchy(&w);
        let spare = w.cell("spare");
        let spare_backup = s1.cell(spare).unwrap();
        let rev = spare_backup.revision();
        let moved = rev
            .with(
                &w.ids,
                Arc::clone(rev.cell()),
                Arc::from(vec![w.pin(0, "pin@0", 40, 0)]),
                Arc::clone(rev.arcs()),
                Arc::clone(rev.exports()),
            )
            .unwrap();
        let mut slots = s1.cell_backups().to_vec();
        slots[spare.index()] = Some(spare_backup.with(&moved, true));
        let s2 = s1.with(None, &slots, s1.lib_backups()).unwrap();
        let bytes = write_stream(&w.empty_snapshot(), &[&s1, &s2]);

        let (ids, pool) = mirror();
        let mut reader = SnapshotReader::new(bytes.as_slice(), &ids, &pool);
        let r1 = reader.read_diff(&reader.initial_snapshot()).unwrap().unwrap();
        let r2 = reader.read_diff(&r1).unwrap().unwrap();
        assert_eq!(r2.version(), s2.version());
        assert_eq!(r2.tool(), None);
        assert_eq!(r2.changed_cells(&r1), vec![spare.index()]);
        assert!(r2.changed_libraries(&r1).is_empty());
        let (o, n) = (r1.cell(spare).unwrap(), r2.cell(spare).unwrap());
        assert!(Arc::ptr_eq(o.revision().cell(), n.revision().cell()));
        assert!(Arc::ptr_eq(o.revision().arcs(), n.revision().arcs()));
        assert_eq!(*r2.cell_bounds(spare).unwrap(), GridRect::new(35, -2, 45, 2));
    }

    #[test]
    fn shared_registry_is_accepted() {
        let w = World::new();
        let snap = hierarchy(&w);
        let bytes = write_stream(&w.empty_snapshot(), &[&snap]);
        let mut reader = SnapshotReader::new(bytes.as_slice(), &w.ids, &w.pool);
        let read = reader.read_diff(&w.empty_snapshot()).unwrap().unwrap();
        read.check().unwrap();
        assert_eq!(w.ids.num_cells(), 3);
        assert_eq!(w.ids.num_libs(), 1);
        assert_eq!(read.cells().count(), 3);
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let w = World::new();
        let snap = hierarchy(&w);
        let bytes = write_stream(&w.empty_snapshot(), &[&snap]);
        let (ids, pool) = mirror();
        let mut reader = SnapshotReader::new(&bytes[..bytes.len() / 2], &ids, &pool);
        let err = reader.read_diff(&reader.initial_snapshot()).unwrap_err();
        assert!(matches!(err, CoreError::Codec(_)));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let (ids, pool) = mirror();
        let mut reader = SnapshotReader::new(&[7u8][..], &ids, &pool);
        let err = reader.read_diff(&reader.initial_snapshot()).unwrap_err();
        assert!(matches!(err, CoreError::StreamCorruption { .. }));
    }

    /// A diff header announcing nothing, up to the library slot count.
    fn empty_header() -> StreamEncoder<Vec<u8>> {
        let mut enc = StreamEncoder::new(Vec::new());
        enc.write_byte(DIFF_TAG).unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(END_OF_LIST).unwrap();
        enc.write_long(1).unwrap();
        enc.write_int(NONE_REF).unwrap();
        enc.write_int(END_OF_LIST).unwrap();
        enc
    }

    fn read_one(bytes: &[u8]) -> CoreResult<Option<Arc<Snapshot>>> {
        let (ids, pool) = mirror();
        let mut reader = SnapshotReader::new(bytes, &ids, &pool);
        let start = reader.initial_snapshot();
        reader.read_diff(&start)
    }

    #[test]
    fn huge_slot_count_is_rejected() {
        let mut enc = empty_header();
        enc.write_int(i32::MAX).unwrap();
        let err = read_one(&enc.into_inner()).unwrap_err();
        assert!(matches!(err, CoreError::StreamCorruption { .. }));

        let mut enc = empty_header();
        enc.write_int(1).unwrap();
        let err = read_one(&enc.into_inner()).unwrap_err();
        assert!(matches!(err, CoreError::StreamCorruption { .. }));
    }

    #[test]
    fn removal_of_unknown_slot_is_rejected() {
        let mut enc = StreamEncoder::new(Vec::new());
        enc.write_byte(DIFF_TAG).unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(END_OF_LIST).unwrap();
        enc.write_long(1).unwrap();
        enc.write_int(NONE_REF).unwrap();
        enc.write_int(i32::MAX - 1).unwrap();
        enc.write_bool(false).unwrap();
        let err = read_one(&enc.into_inner()).unwrap_err();
        assert!(matches!(err, CoreError::StreamCorruption { .. }));
    }

    #[test]
    fn huge_registry_growth_is_rejected() {
        let mut enc = StreamEncoder::new(Vec::new());
        enc.write_byte(DIFF_TAG).unwrap();
        enc.write_int(i32::MAX).unwrap();
        let err = read_one(&enc.into_inner()).unwrap_err();
        assert!(matches!(err, CoreError::StreamCorruption { .. }));
    }

    /// A diff that announces `demo:leaf{sch}` and starts its only node,
    /// stopping after the node's orientation.
    fn node_prefix() -> StreamEncoder<Vec<u8>> {
        let mut enc = StreamEncoder::new(Vec::new());
        enc.write_byte(DIFF_TAG).unwrap();
        enc.write_int(1).unwrap();
        enc.write_string("demo").unwrap();
        enc.write_int(1).unwrap();
        enc.write_int(0).unwrap();
        enc.write_string("leaf{sch}").unwrap();
        enc.write_int(END_OF_LIST).unwrap();
        enc.write_long(1).unwrap();
        enc.write_int(NONE_REF).unwrap();
        enc.write_int(END_OF_LIST).unwrap();
        enc.write_int(0).unwrap();
        // cell 0: modified, dates, technology, flags, no variables
        enc.write_int(0).unwrap();
        enc.write_bool(true).unwrap();
        enc.write_bool(true).unwrap();
        enc.write_long(0).unwrap();
        enc.write_long(0).unwrap();
        enc.write_int(0).unwrap();
        enc.write_string("mocmos").unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(0).unwrap();
        // one node, a pin
        enc.write_bool(true).unwrap();
        enc.write_int(1).unwrap();
        enc.write_int(0).unwrap();
        enc.write_bool(false).unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(0).unwrap();
        enc.write_string("pin").unwrap();
        enc.write_string("pin@0").unwrap();
        enc.write_int(0).unwrap();
        enc.write_long(0).unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(0).unwrap();
        enc.write_short(0).unwrap();
        enc.write_bool(false).unwrap();
        enc.write_bool(false).unwrap();
        enc
    }

    /// Finishes the node started by `node_prefix` with no variables and
    /// the given port slot.
    fn node_suffix(enc: &mut StreamEncoder<Vec<u8>>, port: i32) {
        enc.write_int(0).unwrap();
        enc.write_byte(0).unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(port).unwrap();
        enc.write_int(0).unwrap();
        enc.write_int(END_OF_LIST).unwrap();
    }

    #[test]
    fn out_of_range_anchor_is_rejected() {
        let mut enc = node_prefix();
        enc.write_long(i64::MAX).unwrap();
        enc.write_long(0).unwrap();
        enc.write_long(10).unwrap();
        enc.write_long(4).unwrap();
        node_suffix(&mut enc, END_OF_LIST);
        let err = read_one(&enc.into_inner()).unwrap_err();
        assert!(matches!(err, CoreError::StreamCorruption { .. }));
    }

    #[test]
    fn port_slot_beyond_the_prototype_is_rejected() {
        let mut enc = node_prefix();
        enc.write_long(0).unwrap();
        enc.write_long(0).unwrap();
        enc.write_long(10).unwrap();
        enc.write_long(4).unwrap();
        node_suffix(&mut enc, i32::MAX);
        let err = read_one(&enc.into_inner()).unwrap_err();
        assert!(matches!(err, CoreError::StreamCorruption { .. }));
    }

    #[test]
    fn conflicting_registry_is_rejected() {
        let w = World::new();
        let snap = hierarchy(&w);
        let bytes = write_stream(&w.empty_snapshot(), &[&snap]);
        let (ids, pool) = mirror();
        ids.new_lib_id("other").unwrap();
        let mut reader = SnapshotReader::new(bytes.as_slice(), &ids, &pool);
        let err = reader.read_diff(&reader.initial_snapshot()).unwrap_err();
        assert!(matches!(err, CoreError::StreamCorruption { .. }));
    }
}
