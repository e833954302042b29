//! Mutable working copy of a cell's contents.

use crate::backup::{ArcList, CellRevision, ExportList, NodeList};
use crate::error::{CoreError, CoreResult};
use crate::id::{CellId, ExportId, NodeProtoId, PortProtoId};
use crate::immutable::{ImmutableArcInst, ImmutableExport, ImmutableNodeInst, ImmutablePortInst};
use crate::text::NaturalName;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
struct Dirty {
    nodes: bool,
    arcs: bool,
    exports: bool,
}

/// Nodes, arcs and exports of one cell, indexed for editing.
///
/// Built from a [`CellRevision`] and turned back into sorted record lists
/// on backup. Categories that were not touched hand back the revision's
/// own lists.
#[derive(Debug, Clone)]
pub struct CellContents {
    nodes: Vec<Option<Arc<ImmutableNodeInst>>>,
    node_names: BTreeMap<NaturalName, u32>,
    arcs: Vec<Option<Arc<ImmutableArcInst>>>,
    arc_names: BTreeSet<(NaturalName, u32)>,
    exports: BTreeMap<u32, Arc<ImmutableExport>>,
    export_names: BTreeMap<NaturalName, u32>,
    next_node_id: u32,
    next_arc_id: u32,
    dirty: Dirty,
}

impl CellContents {
    /// Indexes the contents of `revision`.
    #[must_use]
    pub fn from_revision(revision: &CellRevision) -> Self {
        let mut contents = Self {
            nodes: Vec::new(),
            node_names: BTreeMap::new(),
            arcs: Vec::new(),
            arc_names: BTreeSet::new(),
            exports: BTreeMap::new(),
            export_names: BTreeMap::new(),
            next_node_id: 0,
            next_arc_id: 0,
            dirty: Dirty::default(),
        };
        for node in revision.nodes().iter() {
            put(&mut contents.nodes, node.node_id(), Arc::clone(node));
            contents
                .node_names
                .insert(NaturalName::new(node.name()), node.node_id());
        }
        for arc in revision.arcs().iter() {
            put(&mut contents.arcs, arc.arc_id(), Arc::clone(arc));
            contents
                .arc_names
                .insert((NaturalName::new(arc.name()), arc.arc_id()));
        }
        for export in revision.exports().iter() {
            let chron = export.export_id().chron_index;
            contents.exports.insert(chron, Arc::clone(export));
            contents
                .export_names
                .insert(NaturalName::new(export.name()), chron);
        }
        contents.next_node_id = contents.nodes.len() as u32;
        contents.next_arc_id = contents.arcs.len() as u32;
        contents
    }

    /// Raises the ids handed to new nodes and arcs to at least `node_id`
    /// and `arc_id`.
    #[must_use]
    pub fn with_id_floor(mut self, node_id: u32, arc_id: u32) -> Self {
        self.next_node_id = self.next_node_id.max(node_id);
        self.next_arc_id = self.next_arc_id.max(arc_id);
        self
    }

    /// True when anything changed since the last backup.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.nodes || self.dirty.arcs || self.dirty.exports
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = Dirty::default();
    }

    /// Sorted record lists, reusing the lists of `base` for untouched
    /// categories.
    #[must_use]
    pub fn to_lists(&self, base: &CellRevision) -> (NodeList, ArcList, ExportList) {
        let nodes = if self.dirty.nodes {
            self.nodes_sorted().cloned().collect::<Vec<_>>().into()
        } else {
            Arc::clone(base.nodes())
        };
        let arcs = if self.dirty.arcs {
            self.arcs_sorted().cloned().collect::<Vec<_>>().into()
        } else {
            Arc::clone(base.arcs())
        };
        let exports = if self.dirty.exports {
            self.exports_sorted().cloned().collect::<Vec<_>>().into()
        } else {
            Arc::clone(base.exports())
        };
        (nodes, arcs, exports)
    }

    // Nodes

    /// Node by id.
    #[must_use]
    pub fn node(&self, node_id: u32) -> Option<&Arc<ImmutableNodeInst>> {
        self.nodes.get(node_id as usize)?.as_ref()
    }

    /// Node id by name.
    #[must_use]
    pub fn find_node(&self, name: &str) -> Option<u32> {
        self.node_names.get(&NaturalName::new(name)).copied()
    }

    /// Nodes in name order.
    pub fn nodes_sorted(&self) -> impl Iterator<Item = &Arc<ImmutableNodeInst>> + '_ {
        self.node_names
            .values()
            .filter_map(|&id| self.node(id))
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.node_names.len()
    }

    /// Id the next created node gets. Ids of killed nodes are not
    /// handed out again.
    #[must_use]
    pub fn next_node_id(&self) -> u32 {
        self.next_node_id
    }

    /// Number of instances of `proto`.
    #[must_use]
    pub fn count_instances_of(&self, proto: CellId) -> u32 {
        self.nodes
            .iter()
            .flatten()
            .filter(|n| n.proto() == NodeProtoId::Cell(proto))
            .count() as u32
    }

    /// Cells instantiated here.
    pub fn subcells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.nodes.iter().flatten().filter_map(|n| n.proto().as_cell())
    }

    pub(crate) fn add_node(&mut self, node: Arc<ImmutableNodeInst>) -> CoreResult<()> {
        let key = NaturalName::new(node.name());
        if self.node_names.contains_key(&key) {
            return Err(CoreError::duplicate_name(node.name()));
        }
        if self.node(node.node_id()).is_some() {
            return Err(CoreError::invalid_argument(format!(
                "node id {} is taken",
                node.node_id()
            )));
        }
        self.node_names.insert(key, node.node_id());
        self.next_node_id = self.next_node_id.max(node.node_id().saturating_add(1));
        put(&mut self.nodes, node.node_id(), node);
        self.dirty.nodes = true;
        Ok(())
    }

    pub(crate) fn replace_node(&mut self, node: Arc<ImmutableNodeInst>) -> CoreResult<()> {
        let old = self
            .node(node.node_id())
            .cloned()
            .ok_or_else(|| CoreError::killed(format!("node {}", node.node_id())))?;
        if Arc::ptr_eq(&old, &node) {
            return Ok(());
        }
        if old.name() != node.name() {
            let key = NaturalName::new(node.name());
            if self.node_names.contains_key(&key) {
                return Err(CoreError::duplicate_name(node.name()));
            }
            self.node_names.remove(&NaturalName::new(old.name()));
            self.node_names.insert(key, node.node_id());
        }
        put(&mut self.nodes, node.node_id(), node);
        self.dirty.nodes = true;
        Ok(())
    }

    pub(crate) fn remove_node(&mut self, node_id: u32) -> Option<Arc<ImmutableNodeInst>> {
        let node = self.nodes.get_mut(node_id as usize)?.take()?;
        self.node_names.remove(&NaturalName::new(node.name()));
        self.dirty.nodes = true;
        Some(node)
    }

    // Arcs

    /// Arc by id.
    #[must_use]
    pub fn arc(&self, arc_id: u32) -> Option<&Arc<ImmutableArcInst>> {
        self.arcs.get(arc_id as usize)?.as_ref()
    }

    /// Arcs in name order, ties by arc id.
    pub fn arcs_sorted(&self) -> impl Iterator<Item = &Arc<ImmutableArcInst>> + '_ {
        self.arc_names.iter().filter_map(|(_, id)| self.arc(*id))
    }

    /// Id the next created arc gets.
    #[must_use]
    pub fn next_arc_id(&self) -> u32 {
        self.next_arc_id
    }

    /// True when an arc is named `name`.
    #[must_use]
    pub fn has_arc_name(&self, name: &str) -> bool {
        let key = NaturalName::new(name);
        self.arc_names
            .range((key.clone(), 0)..=(key, u32::MAX))
            .next()
            .is_some()
    }

    /// Ids of arcs with an end on `node_id`.
    #[must_use]
    pub fn arcs_touching(&self, node_id: u32) -> Vec<u32> {
        self.arcs
            .iter()
            .flatten()
            .filter(|a| a.touches(node_id))
            .map(|a| a.arc_id())
            .collect()
    }

    pub(crate) fn add_arc(&mut self, arc: Arc<ImmutableArcInst>) -> CoreResult<()> {
        if self.has_arc_name(arc.name()) {
            return Err(CoreError::duplicate_name(arc.name()));
        }
        if self.arc(arc.arc_id()).is_some() {
            return Err(CoreError::invalid_argument(format!(
                "arc id {} is taken",
                arc.arc_id()
            )));
        }
        self.arc_names
            .insert((NaturalName::new(arc.name()), arc.arc_id()));
        self.next_arc_id = self.next_arc_id.max(arc.arc_id().saturating_add(1));
        put(&mut self.arcs, arc.arc_id(), arc);
        self.dirty.arcs = true;
        Ok(())
    }

    pub(crate) fn remove_arc(&mut self, arc_id: u32) -> Option<Arc<ImmutableArcInst>> {
        let arc = self.arcs.get_mut(arc_id as usize)?.take()?;
        self.arc_names
            .remove(&(NaturalName::new(arc.name()), arc.arc_id()));
        self.dirty.arcs = true;
        Some(arc)
    }

    // Exports

    /// Export by chronological index.
    #[must_use]
    pub fn export(&self, chron_index: u32) -> Option<&Arc<ImmutableExport>> {
        self.exports.get(&chron_index)
    }

    /// Export by name.
    #[must_use]
    pub fn find_export(&self, name: &str) -> Option<&Arc<ImmutableExport>> {
        let chron = self.export_names.get(&NaturalName::new(name))?;
        self.exports.get(chron)
    }

    /// Exports in name order.
    pub fn exports_sorted(&self) -> impl Iterator<Item = &Arc<ImmutableExport>> + '_ {
        self.export_names
            .values()
            .filter_map(|chron| self.exports.get(chron))
    }

    /// Chronological indices of exports on `node_id`.
    #[must_use]
    pub fn exports_on(&self, node_id: u32) -> Vec<u32> {
        self.exports
            .values()
            .filter(|e| e.original_node_id() == node_id)
            .map(|e| e.export_id().chron_index)
            .collect()
    }

    pub(crate) fn add_export(&mut self, export: Arc<ImmutableExport>) -> CoreResult<()> {
        let key = NaturalName::new(export.name());
        if self.export_names.contains_key(&key) {
            return Err(CoreError::duplicate_name(export.name()));
        }
        let chron = export.export_id().chron_index;
        if self.exports.contains_key(&chron) {
            return Err(CoreError::invalid_argument(format!(
                "export {} is already defined",
                export.export_id()
            )));
        }
        self.export_names.insert(key, chron);
        self.exports.insert(chron, export);
        self.dirty.exports = true;
        Ok(())
    }

    pub(crate) fn remove_export(&mut self, chron_index: u32) -> Option<Arc<ImmutableExport>> {
        let export = self.exports.remove(&chron_index)?;
        self.export_names.remove(&NaturalName::new(export.name()));
        self.dirty.exports = true;
        Some(export)
    }

    // Ports of subcells

    /// True when an arc, an export or a port instance refers to `port`.
    #[must_use]
    pub fn refers_to(&self, port: PortProtoId) -> bool {
        self.arcs_on(port).next().is_some()
            || self.exports.values().any(|e| e.original_port() == port)
            || self.nodes_with_port_inst(port).next().is_some()
    }

    fn arcs_on(&self, port: PortProtoId) -> impl Iterator<Item = &Arc<ImmutableArcInst>> + '_ {
        self.arcs
            .iter()
            .flatten()
            .filter(move |a| a.tail().port == port || a.head().port == port)
    }

    fn nodes_with_port_inst(
        &self,
        port: PortProtoId,
    ) -> impl Iterator<Item = &Arc<ImmutableNodeInst>> + '_ {
        self.nodes
            .iter()
            .flatten()
            .filter(move |n| n.proto() == port.parent() && !n.port_inst(port).is_empty())
    }

    /// Removes arcs and exports on `port` and clears its port instances.
    ///
    /// Returns the number of removed arcs and the ids of removed exports.
    pub(crate) fn disconnect(&mut self, port: PortProtoId) -> CoreResult<(usize, Vec<ExportId>)> {
        let arcs: Vec<u32> = self.arcs_on(port).map(|a| a.arc_id()).collect();
        for &arc_id in &arcs {
            self.remove_arc(arc_id);
        }
        let nodes: Vec<_> = self.nodes_with_port_inst(port).cloned().collect();
        for node in nodes {
            let node = node.with_port_inst(port, &ImmutablePortInst::empty())?;
            self.replace_node(node)?;
        }
        let chrons: Vec<u32> = self
            .exports
            .values()
            .filter(|e| e.original_port() == port)
            .map(|e| e.export_id().chron_index)
            .collect();
        let exports = chrons
            .into_iter()
            .filter_map(|chron| self.remove_export(chron))
            .map(|e| e.export_id())
            .collect();
        Ok((arcs.len(), exports))
    }
}

fn put<T>(slots: &mut Vec<Option<T>>, index: u32, value: T) {
    let index = index as usize;
    if slots.len() <= index {
        slots.resize_with(index + 1, || None);
    }
    slots[index] = Some(value);
}
