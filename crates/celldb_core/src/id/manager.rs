//! Id registry.

use super::{
    ArcProtoId, CellId, CellUsage, ExportId, LibId, PrimitiveNodeId, PrimitivePortId, TechId,
};
use crate::error::{ensure, CoreError, CoreResult};
use crate::text::CellName;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Append-only list of names with a reverse map.
#[derive(Debug, Default, Clone)]
struct NameTable {
    names: Vec<String>,
    by_name: HashMap<String, u32>,
}

impl NameTable {
    fn find(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    fn name(&self, index: u32) -> Option<&str> {
        self.names.get(index as usize).map(String::as_str)
    }

    fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns the index for `name` and whether it was just added.
    #[allow(clippy::cast_possible_truncation)]
    fn get_or_insert(&mut self, name: &str) -> (u32, bool) {
        if let Some(index) = self.find(name) {
            return (index, false);
        }
        let index = self.names.len() as u32;
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), index);
        (index, true)
    }

    fn check(&self, what: &str) -> CoreResult<()> {
        ensure!(
            self.names.len() == self.by_name.len(),
            "{what}: {} names but {} map entries",
            self.names.len(),
            self.by_name.len()
        );
        for (i, name) in self.names.iter().enumerate() {
            ensure!(
                self.find(name) == Some(i as u32),
                "{what}: name {name:?} does not map back to {i}"
            );
        }
        Ok(())
    }
}

#[derive(Debug)]
struct TechEntry {
    name: String,
    arcs: NameTable,
    nodes: NameTable,
    ports: Vec<NameTable>,
}

#[derive(Debug)]
struct CellEntry {
    lib: LibId,
    name: CellName,
    exports: NameTable,
    usages_in: Vec<CellId>,
    usage_by_proto: HashMap<CellId, u32>,
    usages_of: Vec<CellUsage>,
}

#[derive(Debug, Default)]
struct Registry {
    techs: Vec<TechEntry>,
    tech_by_name: HashMap<String, TechId>,
    libs: Vec<String>,
    lib_by_name: HashMap<String, LibId>,
    cells: Vec<CellEntry>,
    cell_by_name: HashMap<(LibId, CellName), CellId>,
}

impl Registry {
    fn cell(&self, id: CellId) -> CoreResult<&CellEntry> {
        self.cells
            .get(id.index())
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown {id}")))
    }

    fn cell_mut(&mut self, id: CellId) -> CoreResult<&mut CellEntry> {
        self.cells
            .get_mut(id.index())
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown {id}")))
    }

    fn tech_mut(&mut self, id: TechId) -> CoreResult<&mut TechEntry> {
        self.techs
            .get_mut(id.index())
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown {id}")))
    }
}

/// Process-wide authority for technology, library, cell and export ids.
///
/// Lookups take a read lock; every mint takes the write lock once, so table
/// growth and name-map insertion are never observed apart.
///
/// ## Example
///
/// ```
/// use celldb_core::{CellName, IdManager};
///
/// let ids = IdManager::new();
/// let lib = ids.new_lib_id("demo").unwrap();
/// let inv = ids.new_cell_id(lib, &CellName::parse("inv{sch}").unwrap()).unwrap();
/// assert_eq!(ids.cell_id(inv.index()), Some(inv));
/// assert_eq!(ids.new_cell_id(lib, &CellName::parse("inv{sch}").unwrap()).unwrap(), inv);
/// ```
pub struct IdManager {
    inner: RwLock<Registry>,
}

impl IdManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Registry::default()),
        })
    }

    // ----- technologies -----

    /// Returns the technology named `name`, minting it if needed.
    ///
    /// Characters other than ASCII alphanumerics, `-` and `_` are replaced
    /// by `-`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new_tech_id(&self, name: &str) -> CoreResult<TechId> {
        if name.is_empty() {
            return Err(CoreError::invalid_name(name, "empty technology name"));
        }
        let name: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        if let Some(id) = self.inner.read().tech_by_name.get(&name) {
            return Ok(*id);
        }
        let mut reg = self.inner.write();
        if let Some(id) = reg.tech_by_name.get(&name) {
            return Ok(*id);
        }
        let id = TechId(reg.techs.len() as u32);
        reg.techs.push(TechEntry {
            name: name.clone(),
            arcs: NameTable::default(),
            nodes: NameTable::default(),
            ports: Vec::new(),
        });
        reg.tech_by_name.insert(name.clone(), id);
        tracing::trace!(%id, name = %name, "minted technology id");
        Ok(id)
    }

    /// Returns the technology with registry index `index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn tech_id(&self, index: usize) -> Option<TechId> {
        (index < self.inner.read().techs.len()).then(|| TechId(index as u32))
    }

    /// Looks up a technology by (normalized) name.
    #[must_use]
    pub fn find_tech_id(&self, name: &str) -> Option<TechId> {
        self.inner.read().tech_by_name.get(name).copied()
    }

    /// Number of technologies minted.
    #[must_use]
    pub fn num_techs(&self) -> usize {
        self.inner.read().techs.len()
    }

    /// Name of a technology.
    #[must_use]
    pub fn tech_name(&self, id: TechId) -> Option<String> {
        self.inner
            .read()
            .techs
            .get(id.index())
            .map(|t| t.name.clone())
    }

    /// Returns the arc prototype `name` of `tech`, minting it if needed.
    pub fn new_arc_proto_id(&self, tech: TechId, name: &str) -> CoreResult<ArcProtoId> {
        crate::text::check_object_name(name)?;
        let mut reg = self.inner.write();
        let (index, minted) = reg.tech_mut(tech)?.arcs.get_or_insert(name);
        let id = ArcProtoId { tech, index };
        if minted {
            tracing::trace!(%tech, index, name, "minted arc prototype id");
        }
        Ok(id)
    }

    /// Name of an arc prototype.
    #[must_use]
    pub fn arc_proto_name(&self, id: ArcProtoId) -> Option<String> {
        let reg = self.inner.read();
        let tech = reg.techs.get(id.tech.index())?;
        tech.arcs.name(id.index).map(str::to_string)
    }

    /// Looks up an arc prototype by name.
    #[must_use]
    pub fn find_arc_proto_id(&self, tech: TechId, name: &str) -> Option<ArcProtoId> {
        let reg = self.inner.read();
        let index = reg.techs.get(tech.index())?.arcs.find(name)?;
        Some(ArcProtoId { tech, index })
    }

    /// Returns the primitive node `name` of `tech`, minting it if needed.
    pub fn new_primitive_node_id(&self, tech: TechId, name: &str) -> CoreResult<PrimitiveNodeId> {
        crate::text::check_object_name(name)?;
        let mut reg = self.inner.write();
        let entry = reg.tech_mut(tech)?;
        let (index, minted) = entry.nodes.get_or_insert(name);
        if minted {
            entry.ports.push(NameTable::default());
            tracing::trace!(%tech, index, name, "minted primitive node id");
        }
        Ok(PrimitiveNodeId { tech, index })
    }

    /// Name of a primitive node.
    #[must_use]
    pub fn primitive_node_name(&self, id: PrimitiveNodeId) -> Option<String> {
        let reg = self.inner.read();
        let tech = reg.techs.get(id.tech.index())?;
        tech.nodes.name(id.index).map(str::to_string)
    }

    /// Looks up a primitive node by name.
    #[must_use]
    pub fn find_primitive_node_id(&self, tech: TechId, name: &str) -> Option<PrimitiveNodeId> {
        let reg = self.inner.read();
        let index = reg.techs.get(tech.index())?.nodes.find(name)?;
        Some(PrimitiveNodeId { tech, index })
    }

    /// Returns the port `name` of a primitive, minting it if needed.
    pub fn new_primitive_port_id(
        &self,
        node: PrimitiveNodeId,
        name: &str,
    ) -> CoreResult<PrimitivePortId> {
        crate::text::check_object_name(name)?;
        let mut reg = self.inner.write();
        let ports = reg
            .tech_mut(node.tech)?
            .ports
            .get_mut(node.index as usize)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown primitive {node:?}")))?;
        let (index, minted) = ports.get_or_insert(name);
        if minted {
            tracing::trace!(tech = %node.tech, node = node.index, index, name, "minted primitive port id");
        }
        Ok(PrimitivePortId { node, index })
    }

    /// Name of a primitive port.
    #[must_use]
    pub fn primitive_port_name(&self, id: PrimitivePortId) -> Option<String> {
        let reg = self.inner.read();
        let tech = reg.techs.get(id.node.tech.index())?;
        let ports = tech.ports.get(id.node.index as usize)?;
        ports.name(id.index).map(str::to_string)
    }

    /// Looks up a primitive port by name.
    #[must_use]
    pub fn find_primitive_port_id(
        &self,
        node: PrimitiveNodeId,
        name: &str,
    ) -> Option<PrimitivePortId> {
        let reg = self.inner.read();
        let tech = reg.techs.get(node.tech.index())?;
        let index = tech.ports.get(node.index as usize)?.find(name)?;
        Some(PrimitivePortId { node, index })
    }

    // ----- libraries -----

    /// Returns the library named `name`, minting it if needed.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new_lib_id(&self, name: &str) -> CoreResult<LibId> {
        if name.is_empty() {
            return Err(CoreError::invalid_name(name, "empty library name"));
        }
        if name.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(CoreError::invalid_name(
                name,
                "library names may not contain whitespace or ':'",
            ));
        }
        let mut reg = self.inner.write();
        if let Some(id) = reg.lib_by_name.get(name) {
            return Ok(*id);
        }
        let id = LibId(reg.libs.len() as u32);
        reg.libs.push(name.to_string());
        reg.lib_by_name.insert(name.to_string(), id);
        tracing::trace!(%id, name, "minted library id");
        Ok(id)
    }

    /// Returns the library with registry index `index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn lib_id(&self, index: usize) -> Option<LibId> {
        (index < self.inner.read().libs.len()).then(|| LibId(index as u32))
    }

    /// Looks up a library by name.
    #[must_use]
    pub fn find_lib_id(&self, name: &str) -> Option<LibId> {
        self.inner.read().lib_by_name.get(name).copied()
    }

    /// Number of libraries minted.
    #[must_use]
    pub fn num_libs(&self) -> usize {
        self.inner.read().libs.len()
    }

    /// Name of a library.
    #[must_use]
    pub fn lib_name(&self, id: LibId) -> Option<String> {
        self.inner.read().libs.get(id.index()).cloned()
    }

    // ----- cells -----

    /// Returns the cell `name` of `lib`, minting it if needed.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new_cell_id(&self, lib: LibId, name: &CellName) -> CoreResult<CellId> {
        let mut reg = self.inner.write();
        if lib.index() >= reg.libs.len() {
            return Err(CoreError::invalid_argument(format!("unknown {lib}")));
        }
        let key = (lib, name.clone());
        if let Some(id) = reg.cell_by_name.get(&key) {
            return Ok(*id);
        }
        let id = CellId(reg.cells.len() as u32);
        reg.cells.push(CellEntry {
            lib,
            name: name.clone(),
            exports: NameTable::default(),
            usages_in: Vec::new(),
            usage_by_proto: HashMap::new(),
            usages_of: Vec::new(),
        });
        reg.cell_by_name.insert(key, id);
        tracing::trace!(%id, %lib, name = %name, "minted cell id");
        Ok(id)
    }

    /// Returns the cell with registry index `index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn cell_id(&self, index: usize) -> Option<CellId> {
        (index < self.inner.read().cells.len()).then(|| CellId(index as u32))
    }

    /// Looks up a cell by library and name.
    #[must_use]
    pub fn find_cell_id(&self, lib: LibId, name: &CellName) -> Option<CellId> {
        self.inner
            .read()
            .cell_by_name
            .get(&(lib, name.clone()))
            .copied()
    }

    /// Number of cells minted.
    #[must_use]
    pub fn num_cells(&self) -> usize {
        self.inner.read().cells.len()
    }

    /// Name of a cell.
    #[must_use]
    pub fn cell_name(&self, id: CellId) -> Option<CellName> {
        self.inner.read().cells.get(id.index()).map(|c| c.name.clone())
    }

    /// Library of a cell.
    #[must_use]
    pub fn cell_lib(&self, id: CellId) -> Option<LibId> {
        self.inner.read().cells.get(id.index()).map(|c| c.lib)
    }

    /// All cells minted for `lib`, in mint order.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn cells_of_lib(&self, lib: LibId) -> Vec<CellId> {
        self.inner
            .read()
            .cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.lib == lib)
            .map(|(i, _)| CellId(i as u32))
            .collect()
    }

    /// Qualified `lib:cell` description, for messages.
    #[must_use]
    pub fn describe_cell(&self, id: CellId) -> String {
        let reg = self.inner.read();
        match reg.cells.get(id.index()) {
            Some(c) => format!(
                "{}:{}",
                reg.libs.get(c.lib.index()).map_or("?", String::as_str),
                c.name
            ),
            None => id.to_string(),
        }
    }

    // ----- exports -----

    /// Mints a new export id for `cell` with external id `suggested`.
    ///
    /// If the external id is taken, a unique `suggested@N` is used instead.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new_export_id(&self, cell: CellId, suggested: &str) -> CoreResult<ExportId> {
        if suggested.is_empty() {
            return Err(CoreError::invalid_name(suggested, "empty export id"));
        }
        let mut reg = self.inner.write();
        let exports = &mut reg.cell_mut(cell)?.exports;
        let mut external = suggested.to_string();
        let mut n = exports.len();
        while exports.find(&external).is_some() {
            external = format!("{suggested}@{n}");
            n += 1;
        }
        let (chron_index, _) = exports.get_or_insert(&external);
        let id = ExportId {
            parent: cell,
            chron_index,
        };
        tracing::trace!(%id, external = %external, "minted export id");
        Ok(id)
    }

    /// Mints export ids for every name in `external_ids`, in order.
    ///
    /// Fails with [`CoreError::DuplicateName`] without minting anything if
    /// any name is already taken or repeated.
    pub fn new_export_ids(&self, cell: CellId, external_ids: &[String]) -> CoreResult<Vec<ExportId>> {
        let mut reg = self.inner.write();
        let exports = &mut reg.cell_mut(cell)?.exports;
        let mut seen = std::collections::HashSet::new();
        for name in external_ids {
            if name.is_empty() {
                return Err(CoreError::invalid_name(name.as_str(), "empty export id"));
            }
            if exports.find(name).is_some() || !seen.insert(name.as_str()) {
                return Err(CoreError::duplicate_name(name.as_str()));
            }
        }
        let ids = external_ids
            .iter()
            .map(|name| ExportId {
                parent: cell,
                chron_index: exports.get_or_insert(name).0,
            })
            .collect::<Vec<_>>();
        tracing::trace!(%cell, count = ids.len(), "minted export ids");
        Ok(ids)
    }

    /// Number of export ids minted for `cell`.
    #[must_use]
    pub fn num_export_ids(&self, cell: CellId) -> usize {
        self.inner
            .read()
            .cells
            .get(cell.index())
            .map_or(0, |c| c.exports.len())
    }

    /// Export of `cell` with chronological index `chron_index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn export_id(&self, cell: CellId, chron_index: usize) -> Option<ExportId> {
        (chron_index < self.num_export_ids(cell)).then(|| ExportId {
            parent: cell,
            chron_index: chron_index as u32,
        })
    }

    /// Looks up an export by external id.
    #[must_use]
    pub fn find_export_id(&self, cell: CellId, external_id: &str) -> Option<ExportId> {
        let reg = self.inner.read();
        let chron_index = reg.cells.get(cell.index())?.exports.find(external_id)?;
        Some(ExportId {
            parent: cell,
            chron_index,
        })
    }

    /// External id of an export.
    #[must_use]
    pub fn export_external_id(&self, id: ExportId) -> Option<String> {
        let reg = self.inner.read();
        let cell = reg.cells.get(id.parent.index())?;
        cell.exports.name(id.chron_index).map(str::to_string)
    }

    // ----- usages -----

    /// Returns the usage of `proto` in `parent`, recording it on first request.
    #[allow(clippy::cast_possible_truncation)]
    pub fn usage_in(&self, parent: CellId, proto: CellId) -> CoreResult<CellUsage> {
        if let Some(u) = self.find_usage_in(parent, proto) {
            return Ok(u);
        }
        let mut reg = self.inner.write();
        reg.cell(proto)?;
        let entry = reg.cell_mut(parent)?;
        if let Some(&index_in_parent) = entry.usage_by_proto.get(&proto) {
            return Ok(CellUsage {
                parent,
                proto,
                index_in_parent,
            });
        }
        let usage = CellUsage {
            parent,
            proto,
            index_in_parent: entry.usages_in.len() as u32,
        };
        entry.usages_in.push(proto);
        entry.usage_by_proto.insert(proto, usage.index_in_parent);
        reg.cell_mut(proto)?.usages_of.push(usage);
        tracing::trace!(%usage, "recorded cell usage");
        Ok(usage)
    }

    /// Returns the usage of `proto` in `parent` if it was ever recorded.
    #[must_use]
    pub fn find_usage_in(&self, parent: CellId, proto: CellId) -> Option<CellUsage> {
        let reg = self.inner.read();
        let index_in_parent = *reg.cells.get(parent.index())?.usage_by_proto.get(&proto)?;
        Some(CellUsage {
            parent,
            proto,
            index_in_parent,
        })
    }

    /// Number of usages recorded in `parent`.
    #[must_use]
    pub fn num_usages_in(&self, parent: CellId) -> usize {
        self.inner
            .read()
            .cells
            .get(parent.index())
            .map_or(0, |c| c.usages_in.len())
    }

    /// Usage with `index_in_parent == index` of `parent`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn usage_in_at(&self, parent: CellId, index: usize) -> Option<CellUsage> {
        let reg = self.inner.read();
        let proto = *reg.cells.get(parent.index())?.usages_in.get(index)?;
        Some(CellUsage {
            parent,
            proto,
            index_in_parent: index as u32,
        })
    }

    /// Number of usages recorded of `proto`.
    #[must_use]
    pub fn num_usages_of(&self, proto: CellId) -> usize {
        self.inner
            .read()
            .cells
            .get(proto.index())
            .map_or(0, |c| c.usages_of.len())
    }

    /// The `index`-th recorded usage of `proto`, in recording order.
    #[must_use]
    pub fn usage_of_at(&self, proto: CellId, index: usize) -> Option<CellUsage> {
        self.inner
            .read()
            .cells
            .get(proto.index())?
            .usages_of
            .get(index)
            .copied()
    }

    // ----- checks -----

    /// Verifies that every table agrees with its maps and that the usage
    /// tables are mutually consistent.
    #[allow(clippy::cast_possible_truncation)]
    pub fn check(&self) -> CoreResult<()> {
        let reg = self.inner.read();

        ensure!(
            reg.techs.len() == reg.tech_by_name.len(),
            "technology table and name map differ in size"
        );
        for (i, tech) in reg.techs.iter().enumerate() {
            ensure!(
                reg.tech_by_name.get(&tech.name) == Some(&TechId(i as u32)),
                "technology {} does not map back to index {i}",
                tech.name
            );
            tech.arcs.check(&tech.name)?;
            tech.nodes.check(&tech.name)?;
            ensure!(
                tech.ports.len() == tech.nodes.len(),
                "technology {}: port tables out of step with primitives",
                tech.name
            );
            for ports in &tech.ports {
                ports.check(&tech.name)?;
            }
        }

        ensure!(
            reg.libs.len() == reg.lib_by_name.len(),
            "library table and name map differ in size"
        );
        for (i, name) in reg.libs.iter().enumerate() {
            ensure!(
                reg.lib_by_name.get(name) == Some(&LibId(i as u32)),
                "library {name} does not map back to index {i}"
            );
        }

        ensure!(
            reg.cells.len() == reg.cell_by_name.len(),
            "cell table and name map differ in size"
        );
        let mut total_in = 0;
        let mut total_of = 0;
        for (i, cell) in reg.cells.iter().enumerate() {
            let id = CellId(i as u32);
            ensure!(cell.lib.index() < reg.libs.len(), "{id} has unknown {}", cell.lib);
            ensure!(
                reg.cell_by_name.get(&(cell.lib, cell.name.clone())) == Some(&id),
                "cell {} does not map back to {id}",
                cell.name
            );
            cell.exports.check(&cell.name.to_string())?;

            ensure!(
                cell.usages_in.len() == cell.usage_by_proto.len(),
                "{id}: usage table and map differ in size"
            );
            for (index, proto) in cell.usages_in.iter().enumerate() {
                let usage = CellUsage {
                    parent: id,
                    proto: *proto,
                    index_in_parent: index as u32,
                };
                ensure!(
                    cell.usage_by_proto.get(proto) == Some(&usage.index_in_parent),
                    "{usage} missing from usage map"
                );
                let of = &reg
                    .cells
                    .get(proto.index())
                    .ok_or_else(|| CoreError::invariant(format!("{usage} has unknown proto")))?
                    .usages_of;
                ensure!(of.contains(&usage), "{usage} missing from proto's used-by table");
            }
            for usage in &cell.usages_of {
                ensure!(usage.proto == id, "{usage} listed under {id}");
                let parent = reg
                    .cells
                    .get(usage.parent.index())
                    .ok_or_else(|| CoreError::invariant(format!("{usage} has unknown parent")))?;
                ensure!(
                    parent.usages_in.get(usage.index_in_parent as usize) == Some(&id),
                    "{usage} missing from parent's usage table"
                );
            }
            total_in += cell.usages_in.len();
            total_of += cell.usages_of.len();
        }
        ensure!(
            total_in == total_of,
            "usage tables disagree: {total_in} uses vs {total_of} used-by entries"
        );
        Ok(())
    }
}

impl fmt::Debug for IdManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = self.inner.read();
        f.debug_struct("IdManager")
            .field("techs", &reg.techs.len())
            .field("libs", &reg.libs.len())
            .field("cells", &reg.cells.len())
            .finish()
    }
}
