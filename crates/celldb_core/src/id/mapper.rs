//! Id renaming.

use super::{CellId, ExportId, IdManager, LibId, NodeProtoId, PortProtoId};
use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;

/// Records old-to-new id renamings so that stale references in records can
/// be rewritten with `with_renamed_ids`.
///
/// Ids without an entry map to themselves.
#[derive(Debug, Default, Clone)]
pub struct IdMapper {
    libs: HashMap<LibId, LibId>,
    cells: HashMap<CellId, CellId>,
    exports: HashMap<ExportId, ExportId>,
}

impl IdMapper {
    /// Creates an empty mapper.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the mapping for renaming library `old` to `new_name`.
    ///
    /// Mints the new library, a cell with the same name for every cell of
    /// `old`, and exports with the same external ids and chronological
    /// indices in each new cell.
    pub fn rename_library(ids: &IdManager, old: LibId, new_name: &str) -> CoreResult<Self> {
        if ids.lib_name(old).is_none() {
            return Err(CoreError::invalid_argument(format!("unknown {old}")));
        }
        let new_lib = ids.new_lib_id(new_name)?;
        if new_lib == old {
            return Err(CoreError::invalid_argument(format!(
                "library {new_name} is already named so"
            )));
        }

        let mut mapper = Self::new();
        mapper.add_lib(old, new_lib);
        for cell in ids.cells_of_lib(old) {
            let name = ids
                .cell_name(cell)
                .ok_or_else(|| CoreError::invalid_argument(format!("unknown {cell}")))?;
            let new_cell = ids.new_cell_id(new_lib, &name)?;
            mapper.add_cell(cell, new_cell);

            let external: Vec<String> = (0..ids.num_export_ids(cell))
                .filter_map(|i| ids.export_id(cell, i))
                .filter_map(|e| ids.export_external_id(e))
                .collect();
            let existing = ids.num_export_ids(new_cell);
            for (i, ext) in external.iter().enumerate().take(existing) {
                let present = ids
                    .export_id(new_cell, i)
                    .and_then(|e| ids.export_external_id(e));
                if present.as_deref() != Some(ext.as_str()) {
                    return Err(CoreError::invalid_argument(format!(
                        "cell {name} in {new_name} already has different exports"
                    )));
                }
            }
            if external.len() > existing {
                ids.new_export_ids(new_cell, &external[existing..])?;
            }
            for i in 0..external.len() {
                if let (Some(from), Some(to)) = (ids.export_id(cell, i), ids.export_id(new_cell, i))
                {
                    mapper.add_export(from, to);
                }
            }
        }
        tracing::debug!(
            from = %old,
            to = %new_lib,
            cells = mapper.cells.len(),
            "built library rename mapping"
        );
        Ok(mapper)
    }

    /// Records a library renaming.
    pub fn add_lib(&mut self, from: LibId, to: LibId) {
        self.libs.insert(from, to);
    }

    /// Records a cell renaming.
    pub fn add_cell(&mut self, from: CellId, to: CellId) {
        self.cells.insert(from, to);
    }

    /// Records an export renaming.
    pub fn add_export(&mut self, from: ExportId, to: ExportId) {
        self.exports.insert(from, to);
    }

    /// Maps a library id.
    #[must_use]
    pub fn lib(&self, id: LibId) -> LibId {
        self.libs.get(&id).copied().unwrap_or(id)
    }

    /// Maps a cell id.
    #[must_use]
    pub fn cell(&self, id: CellId) -> CellId {
        self.cells.get(&id).copied().unwrap_or(id)
    }

    /// Maps an export id.
    #[must_use]
    pub fn export(&self, id: ExportId) -> ExportId {
        self.exports.get(&id).copied().unwrap_or(id)
    }

    /// Maps a node prototype.
    #[must_use]
    pub fn node_proto(&self, proto: NodeProtoId) -> NodeProtoId {
        match proto {
            NodeProtoId::Cell(id) => NodeProtoId::Cell(self.cell(id)),
            NodeProtoId::Primitive(_) => proto,
        }
    }

    /// Maps a port prototype.
    #[must_use]
    pub fn port(&self, port: PortProtoId) -> PortProtoId {
        match port {
            PortProtoId::Export(id) => PortProtoId::Export(self.export(id)),
            PortProtoId::Primitive(_) => port,
        }
    }

    /// True when nothing is renamed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.libs.is_empty() && self.cells.is_empty() && self.exports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::CellName;

    #[test]
    fn rename_library_maps_everything() {
        let ids = IdManager::new();
        let lib = ids.new_lib_id("old").unwrap();
        let a = ids.new_cell_id(lib, &CellName::parse("a").unwrap()).unwrap();
        let b = ids.new_cell_id(lib, &CellName::parse("b{sch}").unwrap()).unwrap();
        let out = ids.new_export_id(b, "out").unwrap();
        let inp = ids.new_export_id(b, "in").unwrap();

        let mapper = IdMapper::rename_library(&ids, lib, "new").unwrap();
        let new_lib = ids.find_lib_id("new").unwrap();
        assert_eq!(mapper.lib(lib), new_lib);

        let na = mapper.cell(a);
        let nb = mapper.cell(b);
        assert_ne!(na, a);
        assert_eq!(ids.cell_lib(nb), Some(new_lib));
        assert_eq!(ids.cell_name(nb), ids.cell_name(b));

        let nout = mapper.export(out);
        assert_eq!(nout.parent, nb);
        assert_eq!(nout.chron_index, out.chron_index);
        assert_eq!(ids.export_external_id(mapper.export(inp)).as_deref(), Some("in"));
        ids.check().unwrap();
    }

    #[test]
    fn unmapped_ids_are_identity() {
        let mapper = IdMapper::new();
        assert!(mapper.is_empty());
        assert_eq!(mapper.cell(CellId(4)), CellId(4));
    }

    #[test]
    fn rename_to_same_name_fails() {
        let ids = IdManager::new();
        let lib = ids.new_lib_id("same").unwrap();
        assert!(IdMapper::rename_library(&ids, lib, "same").is_err());
        assert!(IdMapper::rename_library(&ids, LibId(7), "other").is_err());
    }
}
