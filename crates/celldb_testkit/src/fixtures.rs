//! Test fixtures and database helpers.
//!
//! Provides a registry with a small technology, an owned database
//! projection, a sample hierarchy and temporary stream files.

use celldb_core::id::{ArcProtoId, NodeProtoId, PortProtoId, PrimitiveNodeId};
use celldb_core::{
    ArcSpec, CellId, Config, DatabaseThread, DefaultNode, ExportId, IdManager, LibId, NodeRef,
    NodeSpec, OwnerToken, Snapshot, SnapshotReader, SnapshotWriter, TechCatalog, TechId, TechPool,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Default size of the test pin, in grid units.
pub const PIN_SIZE: (i64, i64) = (10, 4);

/// Primitives and arcs of the test technology.
#[derive(Debug, Clone)]
pub struct TestTech {
    /// Technology id.
    pub tech: TechId,
    /// A pin with a single port.
    pub pin: PrimitiveNodeId,
    /// The pin's port.
    pub pin_port: PortProtoId,
    /// A wire.
    pub wire: ArcProtoId,
    /// Geometry collaborator.
    pub pool: Arc<dyn TechPool>,
}

impl TestTech {
    /// Registers the test technology in `ids`.
    ///
    /// Registration is deterministic, so two registries set up this way
    /// agree on every technology id.
    pub fn register(ids: &IdManager) -> Self {
        let tech = ids.new_tech_id("mocmos").expect("Failed to mint technology");
        let mut catalog = TechCatalog::new();
        let pin = catalog
            .register_primitive(ids, tech, "pin", DefaultNode::new(PIN_SIZE.0, PIN_SIZE.1), &["p"])
            .expect("Failed to register pin");
        let wire = catalog
            .register_arc_proto(ids, tech, "metal-1")
            .expect("Failed to register wire");
        let pin_port = PortProtoId::Primitive(
            ids.find_primitive_port_id(pin, "p")
                .expect("Pin port missing"),
        );
        Self {
            tech,
            pin,
            pin_port,
            wire,
            pool: catalog.into_pool(),
        }
    }
}

/// A registry, a technology and a database projection owned by the test.
pub struct TestWorld {
    /// The registry.
    pub ids: Arc<IdManager>,
    /// The technology.
    pub tech: TestTech,
    /// The owner token of `db`.
    pub token: OwnerToken,
    /// The projection.
    pub db: DatabaseThread,
}

impl TestWorld {
    /// Creates a world with invariant checks on every backup.
    pub fn new() -> Self {
        Self::with_config(Config::new().check_invariants(true))
    }

    /// Creates a world with the given projection configuration.
    pub fn with_config(config: Config) -> Self {
        let ids = IdManager::new();
        let tech = TestTech::register(&ids);
        let token = OwnerToken::new();
        let db = DatabaseThread::new(&token, Snapshot::empty(&ids, &tech.pool), config)
            .expect("Failed to open projection");
        Self {
            ids,
            tech,
            token,
            db,
        }
    }

    /// Runs `f` inside a change.
    pub fn edit<T>(&mut self, f: impl FnOnce(&mut DatabaseThread, &OwnerToken, &TestTech) -> T) -> T {
        self.db
            .start_changing(&self.token)
            .expect("Failed to start change");
        let result = f(&mut self.db, &self.token, &self.tech);
        self.db
            .end_changing(&self.token)
            .expect("Failed to end change");
        result
    }

    /// Takes a backup.
    pub fn backup(&mut self) -> Arc<Snapshot> {
        self.db.backup(&self.token).expect("Backup failed")
    }

    /// Restores `snapshot`.
    pub fn restore(&mut self, snapshot: &Arc<Snapshot>) {
        self.db
            .restore(&self.token, snapshot)
            .expect("Restore failed");
    }

    /// Builds [`Hierarchy`] in a fresh library named `demo`.
    pub fn build_hierarchy(&mut self) -> Hierarchy {
        self.edit(|db, token, tech| {
            let lib = db.new_library(token, "demo").expect("new_library");
            let leaf = db
                .new_cell(token, lib, "leaf{sch}", tech.tech)
                .expect("new_cell leaf");
            let a = add_pin(db, token, tech, leaf, -10, 0);
            let b = add_pin(db, token, tech, leaf, 10, 0);
            db.new_arc(
                token,
                leaf,
                ArcSpec::new(tech.wire, (a.node_id, tech.pin_port), (b.node_id, tech.pin_port)),
            )
            .expect("new_arc leaf");
            let leaf_in = db
                .new_export(token, leaf, "in", a, tech.pin_port)
                .expect("export in");
            let leaf_out = db
                .new_export(token, leaf, "out", b, tech.pin_port)
                .expect("export out");

            let mid = db
                .new_cell(token, lib, "mid{sch}", tech.tech)
                .expect("new_cell mid");
            let left = add_instance(db, token, mid, leaf, 0, 0);
            let right = add_instance(db, token, mid, leaf, 100, 0);
            db.new_arc(
                token,
                mid,
                ArcSpec::new(
                    tech.wire,
                    (left.node_id, PortProtoId::Export(leaf_out)),
                    (right.node_id, PortProtoId::Export(leaf_in)),
                ),
            )
            .expect("new_arc mid");

            let top = db
                .new_cell(token, lib, "top{sch}", tech.tech)
                .expect("new_cell top");
            add_instance(db, token, top, mid, 0, 0);
            add_instance(db, token, top, leaf, 0, 500);

            Hierarchy {
                lib,
                leaf,
                mid,
                top,
                leaf_in,
                leaf_out,
            }
        })
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Cells of the sample hierarchy.
///
/// `leaf` holds two pins joined by a wire and exports them as `in` and
/// `out`. `mid` holds two leaf instances wired `out` to `in`. `top` holds
/// one `mid` and one `leaf` instance.
#[derive(Debug, Clone, Copy)]
pub struct Hierarchy {
    /// The library.
    pub lib: LibId,
    /// The leaf cell.
    pub leaf: CellId,
    /// The middle cell.
    pub mid: CellId,
    /// The top cell.
    pub top: CellId,
    /// Export `in` of the leaf.
    pub leaf_in: ExportId,
    /// Export `out` of the leaf.
    pub leaf_out: ExportId,
}

/// Places a pin at `(x, y)`.
pub fn add_pin(
    db: &mut DatabaseThread,
    token: &OwnerToken,
    tech: &TestTech,
    cell: CellId,
    x: i64,
    y: i64,
) -> NodeRef {
    db.new_node(token, cell, NodeSpec::new(NodeProtoId::Primitive(tech.pin)).at(x, y))
        .expect("Failed to place pin")
}

/// Places an instance of `proto` at `(x, y)`.
pub fn add_instance(
    db: &mut DatabaseThread,
    token: &OwnerToken,
    cell: CellId,
    proto: CellId,
    x: i64,
    y: i64,
) -> NodeRef {
    db.new_node(token, cell, NodeSpec::new(NodeProtoId::Cell(proto)).at(x, y))
        .expect("Failed to place instance")
}

/// A snapshot stream file in a temporary directory.
pub struct StreamFile {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl StreamFile {
    /// Creates an empty temporary location.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            path: temp_dir.path().join("history.stream"),
            _temp_dir: temp_dir,
        }
    }

    /// Path of the stream file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the diffs `start -> snapshots[0] -> snapshots[1] -> ...`.
    pub fn write(&self, start: &Arc<Snapshot>, snapshots: &[Arc<Snapshot>]) {
        let file = File::create(&self.path).expect("Failed to create stream file");
        let mut writer = SnapshotWriter::new(BufWriter::new(file));
        let mut prev = start;
        for snapshot in snapshots {
            writer.write_diff(prev, snapshot).expect("write_diff failed");
            prev = snapshot;
        }
        writer
            .finish()
            .expect("finish failed")
            .flush()
            .expect("flush failed");
    }

    /// Reads every snapshot into `ids`.
    pub fn read(&self, ids: &Arc<IdManager>, pool: &Arc<dyn TechPool>) -> Vec<Arc<Snapshot>> {
        let file = File::open(&self.path).expect("Failed to open stream file");
        let mut reader = SnapshotReader::new(BufReader::new(file), ids, pool);
        let mut current = reader.initial_snapshot();
        let mut out = Vec::new();
        while let Some(next) = reader.read_diff(&current).expect("read_diff failed") {
            out.push(Arc::clone(&next));
            current = next;
        }
        out
    }

    /// Size of the stream file in bytes.
    pub fn len(&self) -> u64 {
        std::fs::metadata(&self.path).map_or(0, |m| m.len())
    }

    /// True when the file is missing or empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StreamFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a temporary stream file.
pub fn with_temp_stream<F, R>(f: F) -> R
where
    F: FnOnce(&StreamFile) -> R,
{
    let stream = StreamFile::new();
    f(&stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_builds_and_backs_up() {
        let mut world = TestWorld::new();
        let design = world.build_hierarchy();
        let snapshot = world.backup();
        assert_eq!(snapshot.cells().count(), 3);
        let mid = snapshot.cell(design.mid).unwrap().revision();
        assert_eq!(mid.nodes().len(), 2);
        assert_eq!(mid.arcs().len(), 1);
    }

    #[test]
    fn temp_stream_is_removed_with_its_fixture() {
        let path = with_temp_stream(|stream| {
            let world = TestWorld::new();
            stream.write(world.db.snapshot(), &[]);
            assert!(!stream.is_empty());
            stream.path().to_path_buf()
        });
        assert!(!path.exists());
    }
}
