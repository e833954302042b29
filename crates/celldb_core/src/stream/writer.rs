//! Snapshot diff writer.

use super::{
    Interner, DIFF_TAG, END_OF_LIST, END_TAG, NONE_REF, VAR_BOOL, VAR_DOUBLE, VAR_INT, VAR_INTS,
    VAR_LONG, VAR_STR, VAR_STRS,
};
use crate::backup::{CellBackup, CellRevision, LibraryBackup};
use crate::error::{CoreError, CoreResult};
use crate::geometry::Orientation;
use crate::id::{ArcProtoId, IdManager, NodeProtoId, PortProtoId, PrimitiveNodeId, PrimitivePortId, TechId};
use crate::immutable::{ArcEnd, ElectricObject, ImmutableArcInst, ImmutableExport, ImmutableNodeInst, Variables};
use crate::snapshot::Snapshot;
use crate::text::{TextDescriptor, VarKey, VarValue};
use celldb_codec::StreamEncoder;
use std::io::Write;
use std::sync::Arc;

/// Writes snapshot diffs to a byte stream.
///
/// The writer remembers which registry entries and interned values it
/// already sent, so a stream must be written by one writer from the first
/// diff on.
#[derive(Debug)]
pub struct SnapshotWriter<W: Write> {
    enc: StreamEncoder<W>,
    var_keys: Interner<VarKey>,
    descriptors: Interner<TextDescriptor>,
    tools: Interner<String>,
    techs: Interner<TechId>,
    arc_protos: Interner<ArcProtoId>,
    primitive_nodes: Interner<PrimitiveNodeId>,
    primitive_ports: Interner<PrimitivePortId>,
    orientations: Interner<Orientation>,
    libs_sent: usize,
    cells_sent: usize,
    exports_sent: Vec<usize>,
}

impl<W: Write> SnapshotWriter<W> {
    /// Creates a writer at the start of a stream.
    pub fn new(out: W) -> Self {
        Self {
            enc: StreamEncoder::new(out),
            var_keys: Interner::new(),
            descriptors: Interner::new(),
            tools: Interner::new(),
            techs: Interner::new(),
            arc_protos: Interner::new(),
            primitive_nodes: Interner::new(),
            primitive_ports: Interner::new(),
            orientations: Interner::new(),
            libs_sent: 0,
            cells_sent: 0,
            exports_sent: Vec::new(),
        }
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.enc.bytes_written()
    }

    /// Writes the changes from `old` to `new`.
    ///
    /// Both snapshots must share a registry. Only slots that differ are
    /// written, and within a changed cell only the record lists that
    /// changed.
    pub fn write_diff(&mut self, old: &Snapshot, new: &Snapshot) -> CoreResult<()> {
        if !Arc::ptr_eq(old.id_manager(), new.id_manager()) {
            return Err(CoreError::invalid_argument(
                "snapshots belong to different registries",
            ));
        }
        let ids = new.id_manager();
        self.enc.write_byte(DIFF_TAG)?;
        self.write_registry_growth(ids)?;

        self.enc.write_long(new.version().as_u64() as i64)?;
        match new.tool() {
            Some(tool) => {
                let (index, added) = self.tools.intern(tool.to_string());
                self.enc.write_int(index)?;
                if added {
                    self.enc.write_string(tool)?;
                }
            }
            None => self.enc.write_int(NONE_REF)?,
        }

        for i in new.changed_libraries(old) {
            self.enc.write_int(i as i32)?;
            match new.lib_backups().get(i).and_then(Option::as_ref) {
                Some(lib) => {
                    self.enc.write_bool(true)?;
                    self.write_library(lib)?;
                }
                None => self.enc.write_bool(false)?,
            }
        }
        self.enc.write_int(END_OF_LIST)?;
        self.enc.write_int(new.lib_backups().len() as i32)?;

        let mut changed_cells = 0;
        for i in new.changed_cells(old) {
            self.enc.write_int(i as i32)?;
            match new.cell_backups().get(i).and_then(Option::as_ref) {
                Some(cell) => {
                    self.enc.write_bool(true)?;
                    let base = old.cell_backups().get(i).and_then(Option::as_ref);
                    self.write_cell(ids, cell, base.map(|b| b.revision()))?;
                }
                None => self.enc.write_bool(false)?,
            }
            changed_cells += 1;
        }
        self.enc.write_int(END_OF_LIST)?;
        self.enc.write_int(new.cell_backups().len() as i32)?;

        tracing::debug!(
            from = %old.version(),
            to = %new.version(),
            changed_cells,
            bytes = self.enc.bytes_written(),
            "wrote snapshot diff"
        );
        Ok(())
    }

    /// Writes the end marker, flushes and returns the sink.
    pub fn finish(mut self) -> CoreResult<W> {
        self.enc.write_byte(END_TAG)?;
        self.enc.flush()?;
        Ok(self.enc.into_inner())
    }

    /// Flushes the sink.
    pub fn flush(&mut self) -> CoreResult<()> {
        Ok(self.enc.flush()?)
    }

    fn write_registry_growth(&mut self, ids: &IdManager) -> CoreResult<()> {
        let num_libs = ids.num_libs();
        self.enc.write_int((num_libs - self.libs_sent.min(num_libs)) as i32)?;
        for i in self.libs_sent..num_libs {
            let name = ids
                .lib_id(i)
                .and_then(|l| ids.lib_name(l))
                .ok_or_else(|| CoreError::invariant(format!("library {i} has no name")))?;
            self.enc.write_string(&name)?;
        }
        self.libs_sent = self.libs_sent.max(num_libs);

        let num_cells = ids.num_cells();
        self.enc.write_int((num_cells - self.cells_sent.min(num_cells)) as i32)?;
        for i in self.cells_sent..num_cells {
            let cell = ids
                .cell_id(i)
                .ok_or_else(|| CoreError::invariant(format!("cell {i} missing")))?;
            let (Some(lib), Some(name)) = (ids.cell_lib(cell), ids.cell_name(cell)) else {
                return Err(CoreError::invariant(format!("{cell} has no name")));
            };
            self.enc.write_int(lib.index() as i32)?;
            self.enc.write_string(&name.to_string())?;
        }
        self.cells_sent = self.cells_sent.max(num_cells);

        self.exports_sent.resize(num_cells, 0);
        for i in 0..num_cells {
            let Some(cell) = ids.cell_id(i) else { continue };
            let total = ids.num_export_ids(cell);
            let sent = self.exports_sent[i];
            if total <= sent {
                continue;
            }
            self.enc.write_int(i as i32)?;
            self.enc.write_int((total - sent) as i32)?;
            for chron in sent..total {
                let name = ids
                    .export_id(cell, chron)
                    .and_then(|e| ids.export_external_id(e))
                    .ok_or_else(|| CoreError::invariant(format!("{cell}: export {chron} missing")))?;
                self.enc.write_string(&name)?;
            }
            self.exports_sent[i] = total;
        }
        self.enc.write_int(END_OF_LIST)?;
        Ok(())
    }

    fn write_library(&mut self, backup: &LibraryBackup) -> CoreResult<()> {
        let lib = backup.library();
        self.enc.write_bool(backup.is_modified())?;
        self.write_optional_string(lib.file())?;
        self.write_optional_string(lib.version())?;
        self.enc.write_int(lib.flags() as i32)?;
        self.write_vars(lib.vars())
    }

    fn write_cell(
        &mut self,
        ids: &IdManager,
        backup: &CellBackup,
        base: Option<&Arc<CellRevision>>,
    ) -> CoreResult<()> {
        let rev = backup.revision();
        let cell = rev.cell();
        self.enc.write_bool(backup.is_modified())?;
        self.enc.write_long(cell.creation_date())?;
        self.enc.write_long(cell.revision_date())?;
        self.write_tech(ids, cell.tech())?;
        self.enc.write_int(cell.flags() as i32)?;
        self.write_vars(cell.vars())?;

        let same_nodes = base.is_some_and(|b| Arc::ptr_eq(b.nodes(), rev.nodes()));
        self.enc.write_bool(!same_nodes)?;
        if !same_nodes {
            self.enc.write_int(rev.nodes().len() as i32)?;
            for node in rev.nodes().iter() {
                self.write_node(ids, node)?;
            }
        }
        let same_arcs = base.is_some_and(|b| Arc::ptr_eq(b.arcs(), rev.arcs()));
        self.enc.write_bool(!same_arcs)?;
        if !same_arcs {
            self.enc.write_int(rev.arcs().len() as i32)?;
            for arc in rev.arcs().iter() {
                self.write_arc(ids, arc)?;
            }
        }
        let same_exports = base.is_some_and(|b| Arc::ptr_eq(b.exports(), rev.exports()));
        self.enc.write_bool(!same_exports)?;
        if !same_exports {
            self.enc.write_int(rev.exports().len() as i32)?;
            for export in rev.exports().iter() {
                self.write_export(ids, export)?;
            }
        }
        Ok(())
    }

    fn write_node(&mut self, ids: &IdManager, node: &ImmutableNodeInst) -> CoreResult<()> {
        self.enc.write_int(node.node_id() as i32)?;
        self.write_node_proto(ids, node.proto())?;
        self.enc.write_string(node.name())?;
        self.write_descriptor(node.name_descriptor())?;
        self.write_orientation(node.orient())?;
        self.enc.write_long(node.anchor().x)?;
        self.enc.write_long(node.anchor().y)?;
        self.enc.write_long(node.width())?;
        self.enc.write_long(node.height())?;
        self.enc.write_int(node.flags() as i32)?;
        self.enc.write_byte(node.tech_bits())?;
        self.write_descriptor(node.proto_descriptor())?;
        self.write_vars(node.vars())?;
        let ports: Vec<_> = node.port_insts().collect();
        for (chron, port) in ports.into_iter().rev() {
            self.enc.write_int(chron as i32)?;
            self.write_vars(port.vars())?;
        }
        self.enc.write_int(END_OF_LIST)?;
        Ok(())
    }

    fn write_arc(&mut self, ids: &IdManager, arc: &ImmutableArcInst) -> CoreResult<()> {
        self.enc.write_int(arc.arc_id() as i32)?;
        self.write_arc_proto(ids, arc.proto())?;
        self.enc.write_string(arc.name())?;
        self.write_descriptor(arc.name_descriptor())?;
        self.write_arc_end(ids, arc.tail())?;
        self.write_arc_end(ids, arc.head())?;
        self.enc.write_long(arc.width())?;
        self.enc.write_short(arc.angle())?;
        self.enc.write_int(arc.flags() as i32)?;
        self.write_vars(arc.vars())
    }

    fn write_arc_end(&mut self, ids: &IdManager, end: ArcEnd) -> CoreResult<()> {
        self.enc.write_int(end.node_id as i32)?;
        self.write_port(ids, end.port)?;
        self.enc.write_long(end.location.x)?;
        self.enc.write_long(end.location.y)?;
        Ok(())
    }

    fn write_export(&mut self, ids: &IdManager, export: &ImmutableExport) -> CoreResult<()> {
        self.enc.write_int(export.export_id().chron_index as i32)?;
        self.enc.write_string(export.name())?;
        self.write_descriptor(export.name_descriptor())?;
        self.enc.write_int(export.original_node_id() as i32)?;
        self.write_port(ids, export.original_port())?;
        self.enc.write_bool(export.always_drawn())?;
        self.enc.write_bool(export.body_only())?;
        self.enc.write_byte(export.characteristic().as_byte())?;
        self.write_vars(export.vars())
    }

    fn write_node_proto(&mut self, ids: &IdManager, proto: NodeProtoId) -> CoreResult<()> {
        match proto {
            NodeProtoId::Cell(cell) => {
                self.enc.write_bool(true)?;
                self.enc.write_int(cell.index() as i32)?;
            }
            NodeProtoId::Primitive(pn) => {
                self.enc.write_bool(false)?;
                self.write_primitive_node(ids, pn)?;
            }
        }
        Ok(())
    }

    fn write_port(&mut self, ids: &IdManager, port: PortProtoId) -> CoreResult<()> {
        match port {
            PortProtoId::Export(e) => {
                self.enc.write_bool(true)?;
                self.enc.write_int(e.parent.index() as i32)?;
                self.enc.write_int(e.chron_index as i32)?;
            }
            PortProtoId::Primitive(pp) => {
                self.enc.write_bool(false)?;
                let (index, added) = self.primitive_ports.intern(pp);
                self.enc.write_int(index)?;
                if added {
                    self.write_primitive_node(ids, pp.node)?;
                    let name = ids
                        .primitive_port_name(pp)
                        .ok_or_else(|| CoreError::invariant(format!("{pp:?} has no name")))?;
                    self.enc.write_string(&name)?;
                }
            }
        }
        Ok(())
    }

    fn write_tech(&mut self, ids: &IdManager, tech: TechId) -> CoreResult<()> {
        let (index, added) = self.techs.intern(tech);
        self.enc.write_int(index)?;
        if added {
            let name = ids
                .tech_name(tech)
                .ok_or_else(|| CoreError::invariant(format!("{tech} has no name")))?;
            self.enc.write_string(&name)?;
        }
        Ok(())
    }

    fn write_primitive_node(&mut self, ids: &IdManager, pn: PrimitiveNodeId) -> CoreResult<()> {
        let (index, added) = self.primitive_nodes.intern(pn);
        self.enc.write_int(index)?;
        if added {
            self.write_tech(ids, pn.tech)?;
            let name = ids
                .primitive_node_name(pn)
                .ok_or_else(|| CoreError::invariant(format!("{pn:?} has no name")))?;
            self.enc.write_string(&name)?;
        }
        Ok(())
    }

    fn write_arc_proto(&mut self, ids: &IdManager, ap: ArcProtoId) -> CoreResult<()> {
        let (index, added) = self.arc_protos.intern(ap);
        self.enc.write_int(index)?;
        if added {
            self.write_tech(ids, ap.tech)?;
            let name = ids
                .arc_proto_name(ap)
                .ok_or_else(|| CoreError::invariant(format!("{ap:?} has no name")))?;
            self.enc.write_string(&name)?;
        }
        Ok(())
    }

    fn write_orientation(&mut self, orient: Orientation) -> CoreResult<()> {
        let (index, added) = self.orientations.intern(orient);
        self.enc.write_int(index)?;
        if added {
            self.enc.write_short(orient.angle())?;
            self.enc.write_bool(orient.mirror_x())?;
            self.enc.write_bool(orient.mirror_y())?;
        }
        Ok(())
    }

    fn write_descriptor(&mut self, td: TextDescriptor) -> CoreResult<()> {
        let (index, added) = self.descriptors.intern(td);
        self.enc.write_int(index)?;
        if added {
            self.enc.write_long(td.bits() as i64)?;
            self.enc.write_int(td.color())?;
        }
        Ok(())
    }

    fn write_var_key(&mut self, key: &VarKey) -> CoreResult<()> {
        let (index, added) = self.var_keys.intern(key.clone());
        self.enc.write_int(index)?;
        if added {
            self.enc.write_string(key.name())?;
        }
        Ok(())
    }

    fn write_vars(&mut self, vars: &Variables) -> CoreResult<()> {
        self.enc.write_int(vars.len() as i32)?;
        for var in vars.iter() {
            self.write_var_key(var.key())?;
            self.write_descriptor(var.descriptor())?;
            self.write_var_value(var.value())?;
        }
        Ok(())
    }

    fn write_var_value(&mut self, value: &VarValue) -> CoreResult<()> {
        match value {
            VarValue::Int(v) => {
                self.enc.write_byte(VAR_INT)?;
                self.enc.write_int(*v)?;
            }
            VarValue::Long(v) => {
                self.enc.write_byte(VAR_LONG)?;
                self.enc.write_long(*v)?;
            }
            VarValue::Double(v) => {
                self.enc.write_byte(VAR_DOUBLE)?;
                self.enc.write_double(*v)?;
            }
            VarValue::Bool(v) => {
                self.enc.write_byte(VAR_BOOL)?;
                self.enc.write_bool(*v)?;
            }
            VarValue::Str(v) => {
                self.enc.write_byte(VAR_STR)?;
                self.enc.write_string(v)?;
            }
            VarValue::Ints(vs) => {
                self.enc.write_byte(VAR_INTS)?;
                self.enc.write_int(vs.len() as i32)?;
                for v in vs {
                    self.enc.write_int(*v)?;
                }
            }
            VarValue::Strs(vs) => {
                self.enc.write_byte(VAR_STRS)?;
                self.enc.write_int(vs.len() as i32)?;
                for v in vs {
                    self.enc.write_string(v)?;
                }
            }
        }
        Ok(())
    }

    fn write_optional_string(&mut self, s: Option<&str>) -> CoreResult<()> {
        self.enc.write_bool(s.is_some())?;
        if let Some(s) = s {
            self.enc.write_string(s)?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn interned_var_keys(&self) -> usize {
        self.var_keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::World;

    #[test]
    fn repeated_key_costs_only_its_index() {
        let mut writer = SnapshotWriter::new(Vec::new());
        let key = VarKey::new("ATTR_width").unwrap();
        writer.write_var_key(&key).unwrap();
        let first = writer.bytes_written();
        assert_eq!(first, 4 + 4 + "ATTR_width".len() as u64);
        writer.write_var_key(&key).unwrap();
        assert_eq!(writer.bytes_written() - first, 4);
        assert_eq!(writer.interned_var_keys(), 1);
    }

    #[test]
    fn repeated_descriptor_costs_only_its_index() {
        let mut writer = SnapshotWriter::new(Vec::new());
        writer.write_descriptor(TextDescriptor::DISPLAYED).unwrap();
        assert_eq!(writer.bytes_written(), 4 + 8 + 4);
        writer.write_descriptor(TextDescriptor::DISPLAYED).unwrap();
        assert_eq!(writer.bytes_written(), 4 + 8 + 4 + 4);
    }

    #[test]
    fn empty_diff_layout() {
        let w = World::new();
        let snap = w.empty_snapshot();
        let mut writer = SnapshotWriter::new(Vec::new());
        writer.write_diff(&snap, &snap).unwrap();
        let bytes = writer.finish().unwrap();
        // tag, lib growth (count + name), cell growth count, export groups
        // end, version, tool, lib end, lib count, cell end, cell count, end tag
        let lib_name = 4 + "demo".len();
        assert_eq!(bytes.len(), 1 + 4 + lib_name + 4 + 4 + 8 + 4 + 4 + 4 + 4 + 4 + 1);
        assert_eq!(bytes[0], DIFF_TAG);
        assert_eq!(bytes[bytes.len() - 1], END_TAG);
    }

    #[test]
    fn unchanged_lists_are_not_resent() {
        let w = World::new();
        let leaf = w.backup("leaf", vec![w.pin(0, "pin@0", 0, 0)]);
        let lib = w.lib_backup();
        let s1 = w
            .empty_snapshot()
            .with(None, &w.slots(&[&leaf]), &[Some(Arc::clone(&lib))])
            .unwrap();
        let rev = leaf.revision();
        let dated = rev
            .with(
                &w.ids,
                rev.cell().with_revision_date(5),
                Arc::clone(rev.nodes()),
                Arc::clone(rev.arcs()),
                Arc::clone(rev.exports()),
            )
            .unwrap();
        let s2 = s1
            .with(None, &w.slots(&[&leaf.with(&dated, true)]), &[Some(lib)])
            .unwrap();

        let mut full = SnapshotWriter::new(Vec::new());
        full.write_diff(&w.empty_snapshot(), &s2).unwrap();
        let mut incremental = SnapshotWriter::new(Vec::new());
        incremental.write_diff(&w.empty_snapshot(), &s1).unwrap();
        let before = incremental.bytes_written();
        incremental.write_diff(&s1, &s2).unwrap();
        assert!(incremental.bytes_written() - before < full.bytes_written());
    }
}
