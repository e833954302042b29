//! The database thread projection.

use super::cache::LiveCache;
use super::cell::{LiveCell, LiveLibrary};
use super::contents::CellContents;
use super::handles::{ArcRef, ArcSpec, NodeRef, NodeSpec};
use super::token::OwnerToken;
use crate::backup::{CellBackup, CellRevision};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::id::{CellId, CellUsage, ExportId, IdManager, LibId, NodeProtoId, PortProtoId, TechId};
use crate::immutable::{ArcEnd, ImmutableArcInst, ImmutableCell, ImmutableExport, ImmutableLibrary, ImmutableNodeInst};
use crate::snapshot::Snapshot;
use crate::text::{CellName, Variable};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A mutable projection of a [`Snapshot`] owned by a single actor.
///
/// Mutations need the owner's token and must happen between
/// [`start_changing`](Self::start_changing) and
/// [`end_changing`](Self::end_changing). [`backup`](Self::backup) turns the
/// current state into a new snapshot, and [`restore`](Self::restore) moves
/// the projection to another snapshot of the same registry.
#[derive(Debug)]
pub struct DatabaseThread {
    owner: u64,
    config: Config,
    ids: Arc<IdManager>,
    snapshot: Arc<Snapshot>,
    valid: bool,
    libraries: Vec<Option<LiveLibrary>>,
    cells: Vec<Option<LiveCell>>,
    cache: LiveCache,
}

impl DatabaseThread {
    /// Creates a projection of `snapshot` owned by `owner`.
    pub fn new(owner: &OwnerToken, snapshot: Arc<Snapshot>, config: Config) -> CoreResult<Self> {
        let mut thread = Self {
            owner: owner.id(),
            cache: LiveCache::new(config.live_cache_capacity),
            config,
            ids: Arc::clone(snapshot.id_manager()),
            snapshot: Arc::clone(&snapshot),
            valid: true,
            libraries: Vec::new(),
            cells: Vec::new(),
        };
        thread.sync_to(&snapshot)?;
        Ok(thread)
    }

    // Change protocol

    fn check_owner(&self, token: &OwnerToken) -> CoreResult<()> {
        if token.id() != self.owner {
            tracing::warn!(owner = self.owner, caller = token.id(), "call from a non-owner");
            return Err(CoreError::WrongThread {
                owner: self.owner,
                caller: token.id(),
            });
        }
        Ok(())
    }

    fn check_changing(&self, token: &OwnerToken) -> CoreResult<()> {
        self.check_owner(token)?;
        if self.valid {
            tracing::warn!("mutation outside a change");
            return Err(CoreError::NotChanging);
        }
        Ok(())
    }

    /// Enters the changing state.
    pub fn start_changing(&mut self, token: &OwnerToken) -> CoreResult<()> {
        self.check_owner(token)?;
        if !self.valid {
            tracing::warn!("change started twice");
            return Err(CoreError::AlreadyChanging);
        }
        self.valid = false;
        tracing::trace!("start changing");
        Ok(())
    }

    /// Leaves the changing state.
    pub fn end_changing(&mut self, token: &OwnerToken) -> CoreResult<()> {
        self.check_owner(token)?;
        if self.valid {
            tracing::warn!("change ended twice");
            return Err(CoreError::NotChanging);
        }
        self.valid = true;
        tracing::trace!("end changing");
        Ok(())
    }

    /// True between `start_changing` and `end_changing`.
    #[must_use]
    pub fn is_changing(&self) -> bool {
        !self.valid
    }

    /// Runs `f` inside a change. The change is ended even when `f` fails.
    pub fn change<T>(
        &mut self,
        token: &OwnerToken,
        f: impl FnOnce(&mut Self) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.start_changing(token)?;
        let result = f(self);
        let ended = self.end_changing(token);
        let value = result?;
        ended?;
        Ok(value)
    }

    // Readers

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The registry.
    #[must_use]
    pub fn id_manager(&self) -> &Arc<IdManager> {
        &self.ids
    }

    /// The snapshot produced by the last backup or restore.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// A live cell.
    #[must_use]
    pub fn cell(&self, cell: CellId) -> Option<&LiveCell> {
        self.cells.get(cell.index())?.as_ref()
    }

    /// Looks up a live cell of `lib` by its `name;version{view}` text.
    #[must_use]
    pub fn find_cell(&self, lib: LibId, name: &str) -> Option<CellId> {
        let name = CellName::parse(name).ok()?;
        self.library(lib)?.find_cell(&name)
    }

    /// Live cells in id order.
    pub fn cells(&self) -> impl Iterator<Item = &LiveCell> + '_ {
        self.cells.iter().flatten()
    }

    /// A live library.
    #[must_use]
    pub fn library(&self, lib: LibId) -> Option<&LiveLibrary> {
        self.libraries.get(lib.index())?.as_ref()
    }

    /// Looks up a live library by name.
    #[must_use]
    pub fn find_library(&self, name: &str) -> Option<LibId> {
        self.ids
            .find_lib_id(name)
            .filter(|&id| self.library(id).is_some())
    }

    /// Live libraries in id order.
    pub fn libraries(&self) -> impl Iterator<Item = &LiveLibrary> + '_ {
        self.libraries.iter().flatten()
    }

    /// Current nodes of a cell in name order.
    pub fn nodes(&self, cell: CellId) -> CoreResult<Vec<Arc<ImmutableNodeInst>>> {
        let live = self.live_cell(cell)?;
        Ok(match self.cache.peek(cell) {
            Some(c) => c.nodes_sorted().cloned().collect(),
            None => live.revision().nodes().to_vec(),
        })
    }

    /// Current arcs of a cell.
    pub fn arcs(&self, cell: CellId) -> CoreResult<Vec<Arc<ImmutableArcInst>>> {
        let live = self.live_cell(cell)?;
        Ok(match self.cache.peek(cell) {
            Some(c) => c.arcs_sorted().cloned().collect(),
            None => live.revision().arcs().to_vec(),
        })
    }

    /// Current exports of a cell in name order.
    pub fn exports(&self, cell: CellId) -> CoreResult<Vec<Arc<ImmutableExport>>> {
        let live = self.live_cell(cell)?;
        Ok(match self.cache.peek(cell) {
            Some(c) => c.exports_sorted().cloned().collect(),
            None => live.revision().exports().to_vec(),
        })
    }

    /// The current record of a node.
    #[must_use]
    pub fn node(&self, node: NodeRef) -> Option<Arc<ImmutableNodeInst>> {
        let live = self.cell(node.cell)?;
        match self.cache.peek(node.cell) {
            Some(c) => c.node(node.node_id).cloned(),
            None => live.revision().node_by_id(node.node_id).cloned(),
        }
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn find_node(&self, cell: CellId, name: &str) -> Option<NodeRef> {
        let live = self.cell(cell)?;
        let node_id = match self.cache.peek(cell) {
            Some(c) => c.find_node(name)?,
            None => live.revision().find_node(name)?.node_id(),
        };
        Some(NodeRef { cell, node_id })
    }

    /// Number of cells whose contents are cached.
    #[must_use]
    pub fn cached_cells(&self) -> usize {
        self.cache.len()
    }

    /// True when the contents of `cell` are cached.
    #[must_use]
    pub fn is_cached(&self, cell: CellId) -> bool {
        self.cache.contains(cell)
    }

    // Libraries and cells

    /// Creates a library.
    pub fn new_library(&mut self, token: &OwnerToken, name: &str) -> CoreResult<LibId> {
        self.check_changing(token)?;
        if self.find_library(name).is_some() {
            return Err(CoreError::duplicate_name(name));
        }
        let lib_id = self.ids.new_lib_id(name)?;
        if self.library(lib_id).is_some() {
            return Err(CoreError::duplicate_name(name));
        }
        let name = self.ids.lib_name(lib_id).unwrap_or_else(|| name.to_string());
        let live = LiveLibrary::new(lib_id, name, ImmutableLibrary::new(lib_id));
        put(&mut self.libraries, lib_id.index(), live);
        tracing::debug!(lib = %lib_id, "created library");
        Ok(lib_id)
    }

    /// Sets the file a library is stored in.
    pub fn set_library_file(
        &mut self,
        token: &OwnerToken,
        lib: LibId,
        file: Option<String>,
    ) -> CoreResult<()> {
        self.check_changing(token)?;
        let live = self
            .libraries
            .get_mut(lib.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| CoreError::killed(format!("library {lib}")))?;
        let record = live.record().with_file(file);
        live.set_record(record);
        Ok(())
    }

    /// Creates a cell in `lib`.
    pub fn new_cell(
        &mut self,
        token: &OwnerToken,
        lib: LibId,
        name: &str,
        tech: TechId,
    ) -> CoreResult<CellId> {
        self.check_changing(token)?;
        let cell_name = CellName::parse(name)?;
        let live_lib = self
            .library(lib)
            .ok_or_else(|| CoreError::killed(format!("library {lib}")))?;
        if live_lib.find_cell(&cell_name).is_some() {
            return Err(CoreError::duplicate_name(cell_name.to_string()));
        }
        if self.ids.tech_name(tech).is_none() {
            return Err(CoreError::invalid_argument(format!("unknown {tech}")));
        }
        let cell_id = self.ids.new_cell_id(lib, &cell_name)?;
        if self.cell(cell_id).is_some() {
            return Err(CoreError::duplicate_name(cell_name.to_string()));
        }
        let record = ImmutableCell::new(cell_id, tech, now_millis());
        let revision = CellRevision::new(&self.ids, record)?;
        let live = LiveCell::new(lib, cell_name.clone(), CellBackup::new(revision, true));
        put(&mut self.cells, cell_id.index(), live);
        if let Some(live_lib) = self.libraries.get_mut(lib.index()).and_then(Option::as_mut) {
            live_lib.add_cell(&cell_name, cell_id);
        }
        tracing::debug!(cell = %self.ids.describe_cell(cell_id), "created cell");
        Ok(cell_id)
    }

    /// Kills a cell that no live cell instantiates.
    ///
    /// Fails with [`CoreError::CellInUse`] naming one instantiating cell
    /// otherwise, leaving everything unchanged.
    pub fn kill_cell(&mut self, token: &OwnerToken, cell: CellId) -> CoreResult<()> {
        self.check_changing(token)?;
        let live = self.live_cell(cell)?;
        for i in 0..self.ids.num_usages_of(cell) {
            let Some(usage) = self.ids.usage_of_at(cell, i) else { continue };
            if self.instance_count(usage) > 0 {
                return Err(CoreError::CellInUse {
                    cell: self.ids.describe_cell(cell),
                    parent: self.ids.describe_cell(usage.parent),
                });
            }
        }
        let (lib, name) = (live.lib(), live.name().clone());
        self.cells[cell.index()] = None;
        self.cache.remove(cell);
        if let Some(live_lib) = self.libraries.get_mut(lib.index()).and_then(Option::as_mut) {
            live_lib.remove_cell(&name);
        }
        tracing::debug!(cell = %self.ids.describe_cell(cell), "killed cell");
        Ok(())
    }

    /// Sets or replaces a variable on the cell record.
    pub fn set_cell_variable(
        &mut self,
        token: &OwnerToken,
        cell: CellId,
        var: Variable,
    ) -> CoreResult<()> {
        self.check_changing(token)?;
        let live = self.live_cell_mut(cell)?;
        let record = live.record().with_variable(var);
        live.set_record(record);
        Ok(())
    }

    /// Sets the revision date of a cell.
    pub fn set_revision_date(&mut self, token: &OwnerToken, cell: CellId, date: i64) -> CoreResult<()> {
        self.check_changing(token)?;
        let live = self.live_cell_mut(cell)?;
        let record = live.record().with_revision_date(date);
        live.set_record(record);
        Ok(())
    }

    // Nodes

    /// Creates a node and returns its handle.
    pub fn new_node(&mut self, token: &OwnerToken, cell: CellId, spec: NodeSpec) -> CoreResult<NodeRef> {
        self.check_changing(token)?;
        let parent = self.live_cell(cell)?;
        let (base, (width, height)) = match spec.proto {
            NodeProtoId::Cell(proto) => {
                let sub = self.live_cell(proto)?;
                if parent.name().is_icon() {
                    return Err(CoreError::invalid_argument(format!(
                        "icon {} cannot contain instances",
                        self.ids.describe_cell(cell)
                    )));
                }
                if proto == cell || self.instantiates(proto, cell) {
                    return Err(CoreError::invalid_argument(format!(
                        "placing {} in {} makes the hierarchy recursive",
                        self.ids.describe_cell(proto),
                        self.ids.describe_cell(cell)
                    )));
                }
                (sub.name().name().to_string(), spec.size.unwrap_or((0, 0)))
            }
            NodeProtoId::Primitive(pn) => {
                let base = self
                    .ids
                    .primitive_node_name(pn)
                    .ok_or_else(|| CoreError::invalid_argument(format!("unknown primitive {pn:?}")))?;
                let size = spec.size.unwrap_or_else(|| {
                    self.snapshot
                        .tech_pool()
                        .default_node(pn)
                        .map_or((0, 0), |d| (d.width, d.height))
                });
                (base, size)
            }
        };

        let contents = self.contents_mut(cell)?;
        let node_id = contents.next_node_id();
        let name = match spec.name {
            Some(name) => name,
            None => temp_name(&base, node_id, |n| contents.find_node(n).is_some()),
        };
        let node = ImmutableNodeInst::new(
            node_id,
            spec.proto,
            name,
            spec.anchor,
            spec.orient,
            width,
            height,
        )?;
        contents.add_node(node)?;
        Ok(NodeRef { cell, node_id })
    }

    /// Replaces a node record with the result of `f`.
    ///
    /// `f` may change anything but the node id and prototype.
    pub fn modify_node(
        &mut self,
        token: &OwnerToken,
        node: NodeRef,
        f: impl FnOnce(&Arc<ImmutableNodeInst>) -> CoreResult<Arc<ImmutableNodeInst>>,
    ) -> CoreResult<()> {
        self.check_changing(token)?;
        let contents = self.contents_mut(node.cell)?;
        let old = contents
            .node(node.node_id)
            .cloned()
            .ok_or_else(|| CoreError::killed(node.to_string()))?;
        let new = f(&old)?;
        if new.node_id() != old.node_id() || new.proto() != old.proto() {
            return Err(CoreError::invalid_argument(format!(
                "{node}: node id and prototype cannot change"
            )));
        }
        contents.replace_node(new)
    }

    /// Kills a node together with its arcs and exports. Parent cells lose
    /// what they attached to those exports, as with [`Self::kill_export`].
    pub fn kill_node(&mut self, token: &OwnerToken, node: NodeRef) -> CoreResult<()> {
        self.check_changing(token)?;
        let contents = self.contents_mut(node.cell)?;
        if contents.node(node.node_id).is_none() {
            return Err(CoreError::killed(node.to_string()));
        }
        for arc_id in contents.arcs_touching(node.node_id) {
            contents.remove_arc(arc_id);
        }
        let exports: Vec<ExportId> = contents
            .exports_on(node.node_id)
            .into_iter()
            .filter_map(|chron| contents.remove_export(chron))
            .map(|e| e.export_id())
            .collect();
        contents.remove_node(node.node_id);
        for export in exports {
            self.disconnect_export(export)?;
        }
        Ok(())
    }

    // Arcs

    /// Creates an arc and returns its handle.
    pub fn new_arc(&mut self, token: &OwnerToken, cell: CellId, spec: ArcSpec) -> CoreResult<ArcRef> {
        self.check_changing(token)?;
        if self.ids.arc_proto_name(spec.proto).is_none() {
            return Err(CoreError::invalid_argument(format!(
                "unknown arc prototype {:?}",
                spec.proto
            )));
        }
        let contents = self.contents_mut(cell)?;
        let tail = contents.node(spec.tail.0).cloned();
        let head = contents.node(spec.head.0).cloned();
        let tail = self.check_end(cell, tail, spec.tail)?;
        let head = self.check_end(cell, head, spec.head)?;

        let contents = self.contents_mut(cell)?;
        let arc_id = contents.next_arc_id();
        let name = match spec.name {
            Some(name) => name,
            None => temp_name("net", arc_id, |n| contents.has_arc_name(n)),
        };
        let arc = ImmutableArcInst::new(arc_id, spec.proto, name, tail, head, spec.width)?;
        contents.add_arc(arc)?;
        Ok(ArcRef { cell, arc_id })
    }

    fn check_end(
        &self,
        cell: CellId,
        node: Option<Arc<ImmutableNodeInst>>,
        (node_id, port): (u32, PortProtoId),
    ) -> CoreResult<ArcEnd> {
        let node = node.ok_or_else(|| {
            CoreError::killed(NodeRef { cell, node_id }.to_string())
        })?;
        self.check_port(&node, port)?;
        Ok(ArcEnd::new(node_id, port, node.anchor()))
    }

    fn check_port(&self, node: &ImmutableNodeInst, port: PortProtoId) -> CoreResult<()> {
        if port.parent() != node.proto() {
            return Err(CoreError::invalid_argument(format!(
                "port of {} used on node {} of {}",
                port.parent(),
                node.name(),
                node.proto()
            )));
        }
        if let PortProtoId::Export(export) = port {
            let defined = match self.cache.peek(export.parent) {
                Some(c) => c.export(export.chron_index).is_some(),
                None => self
                    .cell(export.parent)
                    .is_some_and(|c| c.revision().find_export(export).is_some()),
            };
            if !defined {
                return Err(CoreError::killed(format!("export {export}")));
            }
        }
        Ok(())
    }

    /// Kills an arc.
    pub fn kill_arc(&mut self, token: &OwnerToken, arc: ArcRef) -> CoreResult<()> {
        self.check_changing(token)?;
        self.contents_mut(arc.cell)?
            .remove_arc(arc.arc_id)
            .map(|_| ())
            .ok_or_else(|| CoreError::killed(arc.to_string()))
    }

    // Exports

    /// Exports a port of a node under `name`.
    pub fn new_export(
        &mut self,
        token: &OwnerToken,
        cell: CellId,
        name: &str,
        node: NodeRef,
        port: PortProtoId,
    ) -> CoreResult<ExportId> {
        self.check_changing(token)?;
        if node.cell != cell {
            return Err(CoreError::invalid_argument(format!("{node} is not in {cell}")));
        }
        let contents = self.contents_mut(cell)?;
        if contents.find_export(name).is_some() {
            return Err(CoreError::duplicate_name(name));
        }
        let target = contents
            .node(node.node_id)
            .cloned()
            .ok_or_else(|| CoreError::killed(node.to_string()))?;
        self.check_port(&target, port)?;

        let reusable = self
            .ids
            .find_export_id(cell, name)
            .filter(|id| self.cache.peek(cell).is_some_and(|c| c.export(id.chron_index).is_none()));
        let export_id = match reusable {
            Some(id) => id,
            None => self.ids.new_export_id(cell, name)?,
        };
        let export = ImmutableExport::new(export_id, name, node.node_id, port)?;
        self.contents_mut(cell)?.add_export(export)?;
        Ok(export_id)
    }

    /// Kills an export.
    ///
    /// Whatever parent cells attach to it goes too, up the hierarchy.
    pub fn kill_export(&mut self, token: &OwnerToken, export: ExportId) -> CoreResult<()> {
        self.check_changing(token)?;
        self.contents_mut(export.parent)?
            .remove_export(export.chron_index)
            .ok_or_else(|| CoreError::killed(format!("export {export}")))?;
        self.disconnect_export(export)
    }

    /// Removes what instances of the parent of `export` attach to it.
    fn disconnect_export(&mut self, export: ExportId) -> CoreResult<()> {
        let mut pending = vec![export];
        while let Some(export) = pending.pop() {
            let port = PortProtoId::Export(export);
            for i in 0..self.ids.num_usages_of(export.parent) {
                let Some(usage) = self.ids.usage_of_at(export.parent, i) else { continue };
                if !self.refers_to(usage, port) {
                    continue;
                }
                let (arcs, exports) = self.contents_mut(usage.parent)?.disconnect(port)?;
                tracing::debug!(
                    %export,
                    parent = %self.ids.describe_cell(usage.parent),
                    arcs,
                    exports = exports.len(),
                    "disconnected killed export"
                );
                pending.extend(exports);
            }
        }
        Ok(())
    }

    /// True when the parent of `usage` attaches anything to `port`.
    fn refers_to(&self, usage: CellUsage, port: PortProtoId) -> bool {
        let Some(parent) = self.cell(usage.parent) else {
            return false;
        };
        match self.cache.peek(usage.parent) {
            Some(c) => c.refers_to(port),
            None => parent
                .revision()
                .cell_usage(usage.index_in_parent as usize)
                .is_some_and(|u| u.used_exports().contains(port.chron_index())),
        }
    }

    // Backup and restore

    /// Produces a snapshot of the current state.
    ///
    /// Unchanged cells and libraries keep their backups, so a backup with
    /// no intervening change returns the current snapshot itself.
    pub fn backup(&mut self, token: &OwnerToken) -> CoreResult<Arc<Snapshot>> {
        self.check_owner(token)?;
        if !self.valid {
            tracing::warn!("backup during a change");
            return Err(CoreError::AlreadyChanging);
        }
        let mut cell_slots = vec![None; self.cells.len()];
        for (i, live) in self.cells.iter().enumerate() {
            if let Some(live) = live {
                cell_slots[i] = Some(live.backup(&self.ids, self.cache.peek(live.cell_id()))?);
            }
        }
        let lib_slots: Vec<_> = self
            .libraries
            .iter()
            .map(|l| l.as_ref().map(LiveLibrary::backup))
            .collect();
        let snapshot = self
            .snapshot
            .with(self.config.tool.as_deref(), &cell_slots, &lib_slots)?;
        if self.config.check_invariants {
            snapshot.check()?;
        }

        for (live, backup) in self.cells.iter_mut().zip(cell_slots) {
            if let (Some(live), Some(backup)) = (live.as_mut(), backup) {
                live.commit(backup, self.cache.peek(live.cell_id()));
            }
        }
        for (live, backup) in self.libraries.iter_mut().zip(lib_slots) {
            if let (Some(live), Some(backup)) = (live.as_mut(), backup) {
                live.commit(backup);
            }
        }
        self.cache.mark_all_clean();
        tracing::debug!(
            version = %snapshot.version(),
            changed_cells = snapshot.changed_cells(&self.snapshot).len(),
            changed_libraries = snapshot.changed_libraries(&self.snapshot).len(),
            "backup"
        );
        self.snapshot = Arc::clone(&snapshot);
        Ok(snapshot)
    }

    /// Moves the projection to `snapshot`, discarding unsaved edits.
    ///
    /// The snapshot must belong to this projection's registry.
    pub fn restore(&mut self, token: &OwnerToken, snapshot: &Arc<Snapshot>) -> CoreResult<()> {
        self.check_owner(token)?;
        if !self.valid {
            tracing::warn!("restore during a change");
            return Err(CoreError::AlreadyChanging);
        }
        if !Arc::ptr_eq(snapshot.id_manager(), &self.ids) {
            return Err(CoreError::invalid_argument(
                "snapshot belongs to another registry",
            ));
        }
        self.valid = false;
        let result = self.sync_to(snapshot);
        self.valid = true;
        let (created, deleted, updated) = result?;
        tracing::debug!(
            from = %self.snapshot.version(),
            to = %snapshot.version(),
            created,
            deleted,
            updated,
            "restore"
        );
        self.snapshot = Arc::clone(snapshot);
        Ok(())
    }

    /// Three-way diff of the live tables against `snapshot`. Nothing is
    /// changed when building the new tables fails.
    fn sync_to(&mut self, snapshot: &Snapshot) -> CoreResult<(usize, usize, usize)> {
        let (mut created, mut deleted, mut updated) = (0, 0, 0);

        let lib_len = self.libraries.len().max(snapshot.lib_backups().len());
        let mut libraries: Vec<Option<LiveLibrary>> = Vec::with_capacity(lib_len);
        for i in 0..lib_len {
            let old = self.libraries.get(i).and_then(Option::as_ref);
            let new = snapshot.lib_backups().get(i).and_then(Option::as_ref);
            libraries.push(match (old, new) {
                (_, None) => None,
                (Some(live), Some(b)) if live.is_same_as(b) => Some(live.clone()),
                (_, Some(b)) => Some(LiveLibrary::from_backup(&self.ids, b)?),
            });
        }

        let cell_len = self.cells.len().max(snapshot.cell_backups().len());
        let mut cells: Vec<Option<LiveCell>> = Vec::with_capacity(cell_len);
        let mut stale: Vec<CellId> = Vec::new();
        for i in 0..cell_len {
            let old = self.cells.get(i).and_then(Option::as_ref);
            let new = snapshot.cell_backups().get(i).and_then(Option::as_ref);
            cells.push(match (old, new) {
                (None, None) => None,
                (Some(live), None) => {
                    deleted += 1;
                    stale.push(live.cell_id());
                    None
                }
                (None, Some(b)) => {
                    created += 1;
                    Some(LiveCell::from_backup(&self.ids, b)?)
                }
                (Some(live), Some(b)) => {
                    let contents = self.cache.peek(live.cell_id());
                    if Arc::ptr_eq(live.last_backup(), b) && !live.is_changed(contents) {
                        Some(live.clone())
                    } else {
                        updated += 1;
                        stale.push(live.cell_id());
                        Some(LiveCell::from_backup(&self.ids, b)?)
                    }
                }
            });
        }

        for lib in libraries.iter_mut().flatten() {
            lib.clear_cells();
        }
        for cell in cells.iter().flatten() {
            if let Some(lib) = libraries.get_mut(cell.lib().index()).and_then(Option::as_mut) {
                lib.add_cell(cell.name(), cell.cell_id());
            }
        }
        for cell in stale {
            self.cache.remove(cell);
        }
        self.libraries = libraries;
        self.cells = cells;
        Ok((created, deleted, updated))
    }

    // Helpers

    fn live_cell(&self, cell: CellId) -> CoreResult<&LiveCell> {
        self.cell(cell)
            .ok_or_else(|| CoreError::killed(self.ids.describe_cell(cell)))
    }

    fn live_cell_mut(&mut self, cell: CellId) -> CoreResult<&mut LiveCell> {
        match self.cells.get_mut(cell.index()).and_then(Option::as_mut) {
            Some(live) => Ok(live),
            None => Err(CoreError::killed(self.ids.describe_cell(cell))),
        }
    }

    /// Editable contents of a live cell, rebuilt from its revision when
    /// not cached.
    fn contents_mut(&mut self, cell: CellId) -> CoreResult<&mut CellContents> {
        if !self.cache.contains(cell) {
            let contents = self.live_cell(cell)?.contents();
            self.cache.insert(cell, contents);
        }
        self.cache
            .get_mut(cell)
            .ok_or_else(|| CoreError::invariant(format!("contents of {cell} vanished")))
    }

    fn instance_count(&self, usage: CellUsage) -> u32 {
        let Some(parent) = self.cell(usage.parent) else {
            return 0;
        };
        match self.cache.peek(usage.parent) {
            Some(c) => c.count_instances_of(usage.proto),
            None => parent
                .revision()
                .cell_usage(usage.index_in_parent as usize)
                .map_or(0, |u| u.inst_count()),
        }
    }

    fn subcells(&self, cell: CellId) -> Vec<CellId> {
        if let Some(c) = self.cache.peek(cell) {
            return c.subcells().collect();
        }
        let Some(live) = self.cell(cell) else {
            return Vec::new();
        };
        live.revision()
            .cell_usages()
            .iter()
            .enumerate()
            .filter(|(_, u)| u.is_some())
            .filter_map(|(i, _)| self.ids.usage_in_at(cell, i))
            .map(|u| u.proto)
            .collect()
    }

    /// True when `from` instantiates `target` at any depth.
    fn instantiates(&self, from: CellId, target: CellId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![from];
        while let Some(cell) = stack.pop() {
            for child in self.subcells(cell) {
                if child == target {
                    return true;
                }
                if seen.insert(child) {
                    stack.push(child);
                }
            }
        }
        false
    }
}

fn put<T>(slots: &mut Vec<Option<T>>, index: usize, value: T) {
    if slots.len() <= index {
        slots.resize_with(index + 1, || None);
    }
    slots[index] = Some(value);
}

fn temp_name(base: &str, start: u32, taken: impl Fn(&str) -> bool) -> String {
    let mut n = start;
    loop {
        let name = format!("{base}@{n}");
        if !taken(&name) {
            return name;
        }
        n += 1;
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GridPoint, GridRect};
    use crate::immutable::{ElectricObject, ImmutablePortInst};
    use crate::test_support::World;
    use crate::text::{VarKey, VarValue};

    struct Db {
        w: World,
        token: OwnerToken,
        db: DatabaseThread,
        lib: LibId,
    }

    fn db_with(config: Config) -> Db {
        let w = World::new();
        let token = OwnerToken::new();
        let mut db = DatabaseThread::new(&token, w.empty_snapshot(), config).unwrap();
        let lib = db.change(&token, |db| db.new_library(&token, "work")).unwrap();
        Db { w, token, db, lib }
    }

    fn db() -> Db {
        db_with(Config::default().check_invariants(true))
    }

    /// leaf has exports `in` (chron 0) and `out` (chron 1); top has two leaf
    /// instances with an arc on `out` of the first.
    fn hierarchy(d: &mut Db) -> (CellId, CellId, NodeRef, NodeRef) {
        let (token, lib, tech) = (&d.token, d.lib, d.w.tech);
        let pin = NodeProtoId::Primitive(d.w.pin);
        let (pin_port, wire) = (d.w.pin_port, d.w.wire);
        d.db.change(token, |db| {
            let leaf = db.new_cell(token, lib, "leaf{lay}", tech)?;
            let a = db.new_node(token, leaf, NodeSpec::new(pin).at(-10, 0))?;
            let b = db.new_node(token, leaf, NodeSpec::new(pin).at(10, 0))?;
            let e_in = db.new_export(token, leaf, "in", a, pin_port)?;
            let e_out = db.new_export(token, leaf, "out", b, pin_port)?;
            assert_eq!((e_in.chron_index, e_out.chron_index), (0, 1));

            let top = db.new_cell(token, lib, "top{lay}", tech)?;
            let i0 = db.new_node(token, top, NodeSpec::new(NodeProtoId::Cell(leaf)).at(0, 0))?;
            let i1 = db.new_node(token, top, NodeSpec::new(NodeProtoId::Cell(leaf)).at(100, 0))?;
            let p = db.new_node(token, top, NodeSpec::new(pin).at(50, 50))?;
            db.new_arc(
                token,
                top,
                ArcSpec::new(wire, (i0.node_id, PortProtoId::Export(e_out)), (p.node_id, pin_port)),
            )?;
            Ok((leaf, top, i0, i1))
        })
        .unwrap()
    }

    #[test]
    fn change_protocol() {
        let mut d = db();
        let token = &d.token;
        let err = d.db.new_library(token, "x").unwrap_err();
        assert!(matches!(err, CoreError::NotChanging));
        d.db.start_changing(token).unwrap();
        assert!(matches!(d.db.start_changing(token), Err(CoreError::AlreadyChanging)));
        assert!(matches!(d.db.backup(token), Err(CoreError::AlreadyChanging)));
        d.db.end_changing(token).unwrap();
        assert!(matches!(d.db.end_changing(token), Err(CoreError::NotChanging)));
        assert!(!d.db.is_changing());
    }

    #[test]
    fn wrong_token_changes_nothing() {
        let mut d = db();
        let (leaf, _, _, _) = hierarchy(&mut d);
        let before = d.db.backup(&d.token).unwrap();
        let intruder = OwnerToken::new();

        assert!(matches!(
            d.db.start_changing(&intruder),
            Err(CoreError::WrongThread { .. })
        ));
        d.db.start_changing(&d.token).unwrap();
        let err = d.db.kill_node(&intruder, NodeRef { cell: leaf, node_id: 0 }).unwrap_err();
        assert!(matches!(err, CoreError::WrongThread { .. }));
        assert!(d.db.new_cell(&intruder, d.lib, "x", d.w.tech).is_err());
        d.db.end_changing(&d.token).unwrap();
        assert!(d.db.backup(&intruder).is_err());

        let after = d.db.backup(&d.token).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(d.db.nodes(leaf).unwrap().len(), 2);
    }

    #[test]
    fn backup_is_idempotent() {
        let mut d = db();
        hierarchy(&mut d);
        let s1 = d.db.backup(&d.token).unwrap();
        let s2 = d.db.backup(&d.token).unwrap();
        assert!(Arc::ptr_eq(&s1, &s2));
        assert_eq!(s1.version().as_u64(), 1);
    }

    #[test]
    fn unchanged_cells_keep_their_backups() {
        let mut d = db();
        let (leaf, top, _, _) = hierarchy(&mut d);
        let s1 = d.db.backup(&d.token).unwrap();
        let token = &d.token;
        let pin = NodeProtoId::Primitive(d.w.pin);
        d.db.change(token, |db| db.new_node(token, top, NodeSpec::new(pin))).unwrap();
        let s2 = d.db.backup(token).unwrap();
        assert!(Arc::ptr_eq(s1.cell(leaf).unwrap(), s2.cell(leaf).unwrap()));
        assert!(Arc::ptr_eq(s1.cell_tree(leaf).unwrap(), s2.cell_tree(leaf).unwrap()));
        assert!(!Arc::ptr_eq(s1.cell(top).unwrap(), s2.cell(top).unwrap()));
        assert_eq!(s2.changed_cells(&s1), vec![top.index()]);
        // arcs and exports were not touched
        let (r1, r2) = (s1.cell(top).unwrap().revision(), s2.cell(top).unwrap().revision());
        assert!(Arc::ptr_eq(r1.arcs(), r2.arcs()));
        assert!(Arc::ptr_eq(r1.cell_usages(), r2.cell_usages()));
    }

    #[test]
    fn usage_counts_and_used_exports() {
        let mut d = db();
        let (leaf, top, _, _) = hierarchy(&mut d);
        let snap = d.db.backup(&d.token).unwrap();
        let usage = d.w.ids.find_usage_in(top, leaf).unwrap();
        let info = snap
            .cell(top)
            .unwrap()
            .revision()
            .cell_usage(usage.index_in_parent as usize)
            .unwrap();
        assert_eq!(info.inst_count(), 2);
        assert_eq!(info.used_exports().iter().collect::<Vec<_>>(), [1]);
        assert_eq!(*snap.cell_bounds(leaf).unwrap(), GridRect::new(-15, -2, 15, 2));
    }

    #[test]
    fn kill_policy() {
        let mut d = db();
        let (leaf, top, i0, i1) = hierarchy(&mut d);
        let s1 = d.db.backup(&d.token).unwrap();
        let token = &d.token;

        let err = d.db.change(token, |db| db.kill_cell(token, leaf)).unwrap_err();
        assert!(matches!(err, CoreError::CellInUse { .. }));
        assert!(d.db.cell(leaf).is_some());
        assert!(Arc::ptr_eq(&s1, &d.db.backup(token).unwrap()));

        d.db.change(token, |db| {
            db.kill_node(token, i0)?;
            db.kill_node(token, i1)?;
            db.kill_cell(token, leaf)
        })
        .unwrap();
        let s2 = d.db.backup(token).unwrap();
        assert!(s2.cell(leaf).is_none());
        assert!(s2.cell(top).unwrap().revision().cell_usages().is_empty());
        assert_eq!(d.db.find_cell(d.lib, "leaf{lay}"), None);
        // the arc on the killed instance went with it
        assert!(d.db.arcs(top).unwrap().is_empty());
    }

    #[test]
    fn killing_an_export_disconnects_its_users() {
        let mut d = db();
        let (leaf, top, _, i1) = hierarchy(&mut d);
        let token = &d.token;
        let (lib, tech) = (d.lib, d.w.tech);
        let out = d.db.exports(leaf).unwrap()[1].export_id();
        let port = PortProtoId::Export(out);
        let key = VarKey::new("ATTR_load").unwrap();
        let load = ImmutablePortInst::empty().with_variable(Variable::new(key, VarValue::Int(2)));
        let chip = d
            .db
            .change(token, |db| {
                db.modify_node(token, i1, |n| n.with_port_inst(port, &load))?;
                let y = db.new_export(token, top, "y", i1, port)?;
                let chip = db.new_cell(token, lib, "chip{lay}", tech)?;
                let inst = db.new_node(token, chip, NodeSpec::new(NodeProtoId::Cell(top)))?;
                db.new_export(token, chip, "z", inst, PortProtoId::Export(y))?;
                Ok(chip)
            })
            .unwrap();
        let usage = d.w.ids.find_usage_in(top, leaf).unwrap();
        let used = |s: &Snapshot| {
            let rev = s.cell(top).unwrap().revision();
            let info = rev.cell_usage(usage.index_in_parent as usize).unwrap();
            (info.inst_count(), info.used_exports().len())
        };
        let s1 = d.db.backup(token).unwrap();
        assert_eq!(used(&s1), (2, 1));

        d.db.change(token, |db| db.kill_export(token, out)).unwrap();
        let s2 = d.db.backup(token).unwrap();
        assert_eq!(used(&s2), (2, 0));
        assert_eq!(d.db.exports(leaf).unwrap().len(), 1);
        assert!(d.db.arcs(top).unwrap().is_empty());
        assert!(d.db.exports(top).unwrap().is_empty());
        assert!(d.db.exports(chip).unwrap().is_empty());
        assert!(d.db.node(i1).unwrap().port_inst(port).is_empty());
        assert_eq!(s2.changed_cells(&s1), vec![leaf.index(), top.index(), chip.index()]);
    }

    #[test]
    fn killing_an_exported_node_disconnects_uncached_parents() {
        let mut d = db_with(Config::default().check_invariants(true).live_cache_capacity(1));
        let (leaf, top, _, _) = hierarchy(&mut d);
        d.db.backup(&d.token).unwrap();
        let token = &d.token;
        let node = d.db.find_node(leaf, "pin@1").unwrap();
        d.db.change(token, |db| db.kill_node(token, node)).unwrap();
        let snap = d.db.backup(token).unwrap();
        snap.check().unwrap();
        assert_eq!(d.db.exports(leaf).unwrap().len(), 1);
        assert!(d.db.arcs(top).unwrap().is_empty());
        assert_eq!(d.db.nodes(top).unwrap().len(), 3);
    }

    #[test]
    fn node_ids_are_not_reused_after_eviction() {
        let mut d = db_with(Config::default().check_invariants(true).live_cache_capacity(1));
        let token = &d.token;
        let (lib, tech) = (d.lib, d.w.tech);
        let pin = NodeProtoId::Primitive(d.w.pin);
        let (solo, other, last) = d
            .db
            .change(token, |db| {
                let solo = db.new_cell(token, lib, "solo", tech)?;
                db.new_node(token, solo, NodeSpec::new(pin))?;
                let last = db.new_node(token, solo, NodeSpec::new(pin).at(10, 0))?;
                let other = db.new_cell(token, lib, "other", tech)?;
                Ok((solo, other, last))
            })
            .unwrap();
        d.db.backup(token).unwrap();
        d.db.change(token, |db| db.kill_node(token, last)).unwrap();
        d.db.backup(token).unwrap();
        d.db.change(token, |db| db.new_node(token, other, NodeSpec::new(pin)))
            .unwrap();
        assert!(!d.db.is_cached(solo));

        let node = d
            .db
            .change(token, |db| db.new_node(token, solo, NodeSpec::new(pin).at(20, 0)))
            .unwrap();
        assert_eq!(node.node_id, 2);
        d.db.backup(token).unwrap();
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut d = db();
        let (leaf, _, _, _) = hierarchy(&mut d);
        let token = &d.token;
        let (lib, tech) = (d.lib, d.w.tech);
        let pin = NodeProtoId::Primitive(d.w.pin);
        d.db.start_changing(token).unwrap();
        assert!(matches!(
            d.db.new_cell(token, lib, "leaf{lay}", tech),
            Err(CoreError::DuplicateName { .. })
        ));
        assert!(matches!(
            d.db.new_library(token, "work"),
            Err(CoreError::DuplicateName { .. })
        ));
        let first = d.db.nodes(leaf).unwrap()[0].name().to_string();
        assert!(matches!(
            d.db.new_node(token, leaf, NodeSpec::new(pin).named(first)),
            Err(CoreError::DuplicateName { .. })
        ));
        d.db.end_changing(token).unwrap();
    }

    #[test]
    fn new_node_defaults() {
        let mut d = db();
        let (leaf, top, _, _) = hierarchy(&mut d);
        let node = d.db.find_node(leaf, "pin@0").unwrap();
        let rec = d.db.node(node).unwrap();
        assert_eq!((rec.width(), rec.height()), (10, 4));
        let inst = d.db.find_node(top, "leaf@0").unwrap();
        assert_eq!(d.db.node(inst).unwrap().proto(), NodeProtoId::Cell(leaf));
    }

    #[test]
    fn recursion_and_icons_rejected() {
        let mut d = db();
        let (leaf, top, _, _) = hierarchy(&mut d);
        let token = &d.token;
        let (lib, tech) = (d.lib, d.w.tech);
        d.db.start_changing(token).unwrap();
        let err = d.db.new_node(token, leaf, NodeSpec::new(NodeProtoId::Cell(top))).unwrap_err();
        assert!(err.to_string().contains("recursive"));
        let icon = d.db.new_cell(token, lib, "inv{ic}", tech).unwrap();
        assert!(d.db.new_node(token, icon, NodeSpec::new(NodeProtoId::Cell(leaf))).is_err());
        d.db.end_changing(token).unwrap();
    }

    #[test]
    fn cache_eviction_and_rebuild() {
        let mut d = db_with(Config::default().live_cache_capacity(1));
        let (leaf, top, _, _) = hierarchy(&mut d);
        d.db.backup(&d.token).unwrap();
        assert_eq!(d.db.cached_cells(), 1);
        assert!(!d.db.is_cached(leaf));
        assert_eq!(d.db.nodes(leaf).unwrap().len(), 2);

        let token = &d.token;
        let node = d.db.find_node(leaf, "pin@1").unwrap();
        d.db.change(token, |db| {
            db.modify_node(token, node, |n| Ok(n.with_anchor(GridPoint::new(20, 0))))
        })
        .unwrap();
        assert!(d.db.is_cached(leaf));
        let snap = d.db.backup(token).unwrap();
        assert_eq!(*snap.cell_bounds(leaf).unwrap(), GridRect::new(-15, -2, 25, 2));
        assert!(snap.cell(top).is_some());
    }

    #[test]
    fn restore_round_trip() {
        let mut d = db();
        let (leaf, _, _, _) = hierarchy(&mut d);
        let s1 = d.db.backup(&d.token).unwrap();
        let token = &d.token;
        let (lib, tech) = (d.lib, d.w.tech);
        let extra = d
            .db
            .change(token, |db| {
                let node = db.find_node(leaf, "pin@0").unwrap();
                db.kill_node(token, node)?;
                db.new_cell(token, lib, "extra", tech)
            })
            .unwrap();
        let s2 = d.db.backup(token).unwrap();
        assert_eq!(d.db.nodes(leaf).unwrap().len(), 1);

        d.db.restore(token, &s1).unwrap();
        assert!(d.db.cell(extra).is_none());
        assert_eq!(d.db.nodes(leaf).unwrap().len(), 2);
        assert_eq!(d.db.find_cell(lib, "extra"), None);
        assert!(Arc::ptr_eq(&d.db.backup(token).unwrap(), &s1));

        d.db.restore(token, &s2).unwrap();
        assert!(d.db.cell(extra).is_some());
        assert_eq!(d.db.find_cell(lib, "extra"), Some(extra));
    }

    #[test]
    fn restore_discards_unsaved_edits() {
        let mut d = db();
        let (leaf, _, _, _) = hierarchy(&mut d);
        let s1 = d.db.backup(&d.token).unwrap();
        let token = &d.token;
        let pin = NodeProtoId::Primitive(d.w.pin);
        d.db.change(token, |db| db.new_node(token, leaf, NodeSpec::new(pin))).unwrap();
        assert_eq!(d.db.nodes(leaf).unwrap().len(), 3);
        d.db.restore(token, &s1).unwrap();
        assert_eq!(d.db.nodes(leaf).unwrap().len(), 2);
    }

    #[test]
    fn restore_rejects_foreign_snapshot() {
        let mut d = db();
        let other = World::new();
        let err = d.db.restore(&d.token, &other.empty_snapshot()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn cell_record_edits() {
        let mut d = db();
        let (leaf, _, _, _) = hierarchy(&mut d);
        let s1 = d.db.backup(&d.token).unwrap();
        let token = &d.token;
        let key = VarKey::new("ATTR_note").unwrap();
        d.db.change(token, |db| {
            db.set_cell_variable(token, leaf, Variable::new(key.clone(), VarValue::Int(3)))?;
            db.set_revision_date(token, leaf, 42)
        })
        .unwrap();
        let s2 = d.db.backup(token).unwrap();
        let rev = s2.cell(leaf).unwrap().revision();
        assert_eq!(rev.cell().revision_date(), 42);
        assert!(rev.cell().var(&key).is_some());
        assert!(Arc::ptr_eq(rev.nodes(), s1.cell(leaf).unwrap().revision().nodes()));
        assert!(s2.cell(leaf).unwrap().is_modified());
    }

    #[test]
    fn killed_objects_reported() {
        let mut d = db();
        let (leaf, _, i0, _) = hierarchy(&mut d);
        let token = &d.token;
        d.db.start_changing(token).unwrap();
        let leaf_export = d.db.exports(leaf).unwrap()[0].export_id();
        d.db.kill_node(token, i0).unwrap();
        assert!(matches!(d.db.kill_node(token, i0), Err(CoreError::KilledObject { .. })));
        d.db.kill_export(token, leaf_export).unwrap();
        assert!(matches!(
            d.db.kill_export(token, leaf_export),
            Err(CoreError::KilledObject { .. })
        ));
        d.db.end_changing(token).unwrap();
    }
}
