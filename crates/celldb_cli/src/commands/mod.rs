//! CLI command implementations.

pub mod demo;
pub mod dump;
pub mod inspect;
pub mod verify;

use celldb_core::id::{ArcProtoId, PortProtoId, PrimitiveNodeId};
use celldb_core::{
    CoreError, CoreResult, DefaultNode, IdManager, Snapshot, SnapshotReader, TechCatalog, TechId,
    TechPool,
};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Name of the drawing frame the demo's top cell selects.
pub const DEMO_FRAME: &str = "a";

/// The technology the demo writes with and every command replays with.
#[derive(Debug)]
pub struct Technology {
    /// Technology id.
    pub tech: TechId,
    /// Wire pin.
    pub pin: PrimitiveNodeId,
    /// The single port of the pin.
    pub pin_port: PortProtoId,
    /// N-channel transistor.
    pub nmos: PrimitiveNodeId,
    /// P-channel transistor.
    pub pmos: PrimitiveNodeId,
    /// Metal wire.
    pub metal: ArcProtoId,
    /// Geometry collaborator handed to snapshots.
    pub pool: Arc<dyn TechPool>,
}

impl Technology {
    /// A transistor port by name.
    pub fn port(&self, ids: &IdManager, node: PrimitiveNodeId, name: &str) -> CoreResult<PortProtoId> {
        ids.find_primitive_port_id(node, name)
            .map(PortProtoId::Primitive)
            .ok_or_else(|| CoreError::invalid_argument(format!("no port {name}")))
    }
}

/// Registers the demo technology in `ids`.
pub fn technology(ids: &IdManager) -> CoreResult<Technology> {
    let tech = ids.new_tech_id("mocmos")?;
    let mut catalog = TechCatalog::new();
    let pin = catalog.register_primitive(ids, tech, "metal-1-pin", DefaultNode::new(400, 400), &["m1"])?;
    let nmos = catalog.register_primitive(ids, tech, "nmos", DefaultNode::new(1200, 800), &["g", "s", "d"])?;
    let pmos = catalog.register_primitive(ids, tech, "pmos", DefaultNode::new(1200, 800), &["g", "s", "d"])?;
    let metal = catalog.register_arc_proto(ids, tech, "metal-1")?;
    let pin_port = ids
        .find_primitive_port_id(pin, "m1")
        .map(PortProtoId::Primitive)
        .ok_or_else(|| CoreError::invariant("pin port missing"))?;
    let pool = catalog
        .with_margin(nmos, 200)
        .with_margin(pmos, 200)
        .with_frame(DEMO_FRAME, 48_000, 36_000)
        .into_pool();
    Ok(Technology {
        tech,
        pin,
        pin_port,
        nmos,
        pmos,
        metal,
        pool,
    })
}

/// One step of a replayed stream.
pub struct Step<'a> {
    /// Zero-based diff number.
    pub index: usize,
    /// Snapshot before the diff.
    pub old: &'a Arc<Snapshot>,
    /// Snapshot after the diff.
    pub new: &'a Arc<Snapshot>,
    /// Encoded size of the diff.
    pub bytes: u64,
}

/// Replays the stream at `path`, calling `f` after every diff. Returns the
/// final snapshot and the number of diffs.
pub fn replay(
    path: &Path,
    mut f: impl FnMut(Step<'_>) -> Result<(), Box<dyn std::error::Error>>,
) -> Result<(Arc<Snapshot>, usize), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No stream found at {:?}", path).into());
    }
    let ids = IdManager::new();
    let tech = technology(&ids)?;
    let file = File::open(path)?;
    let mut reader = SnapshotReader::new(BufReader::new(file), &ids, &tech.pool);

    let mut current = reader.initial_snapshot();
    let mut index = 0;
    loop {
        let start = reader.bytes_read();
        let Some(next) = reader.read_diff(&current)? else {
            break;
        };
        f(Step {
            index,
            old: &current,
            new: &next,
            bytes: reader.bytes_read() - start,
        })?;
        current = next;
        index += 1;
    }
    Ok((current, index))
}
