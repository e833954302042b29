//! Demo command implementation.

use super::{technology, Technology, DEMO_FRAME};
use celldb_core::id::{NodeProtoId, PortProtoId};
use celldb_core::tech::FRAME_VARIABLE;
use celldb_core::{
    ArcSpec, CellId, Config, CoreError, CoreResult, DatabaseThread, IdManager, NodeSpec,
    OwnerToken, Snapshot, SnapshotWriter, VarKey, VarValue, Variable,
};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

/// Cells of the sample design.
struct Design {
    buf: CellId,
    top: CellId,
}

/// Runs the demo command.
pub fn run(path: &Path, rounds: usize) -> Result<(), Box<dyn std::error::Error>> {
    let ids = IdManager::new();
    let tech = technology(&ids)?;
    let token = OwnerToken::new();
    let config = Config::new().check_invariants(true).tool("celldb-demo");
    let mut db = DatabaseThread::new(&token, Snapshot::empty(&ids, &tech.pool), config)?;

    let file = File::create(path)?;
    let mut writer = SnapshotWriter::new(BufWriter::new(file));
    let mut prev = Arc::clone(db.snapshot());

    let design = db.change(&token, |db| build_design(db, &token, &tech))?;
    record(&mut db, &token, &mut writer, &mut prev)?;
    for round in 0..rounds {
        db.change(&token, |db| edit(db, &token, &design, round))?;
        record(&mut db, &token, &mut writer, &mut prev)?;
    }

    writer.finish()?.flush()?;
    let bytes = std::fs::metadata(path)?.len();
    tracing::info!(version = %prev.version(), bytes, "wrote demo stream");
    println!("Wrote {} snapshots ({} bytes) to {:?}", rounds + 1, bytes, path);
    Ok(())
}

fn record<W: Write>(
    db: &mut DatabaseThread,
    token: &OwnerToken,
    writer: &mut SnapshotWriter<W>,
    prev: &mut Arc<Snapshot>,
) -> CoreResult<()> {
    let snapshot = db.backup(token)?;
    writer.write_diff(prev, &snapshot)?;
    *prev = snapshot;
    Ok(())
}

/// Builds `inv{sch}` from transistors, `buf{sch}` from two inverters and
/// `top{sch}` from two buffers.
fn build_design(db: &mut DatabaseThread, token: &OwnerToken, tech: &Technology) -> CoreResult<Design> {
    let ids = Arc::clone(db.id_manager());
    let lib = db.new_library(token, "demo")?;
    db.set_library_file(token, lib, Some("demo.jelib".to_string()))?;

    let inv = db.new_cell(token, lib, "inv{sch}", tech.tech)?;
    let pin = NodeProtoId::Primitive(tech.pin);
    let p = db.new_node(token, inv, NodeSpec::new(NodeProtoId::Primitive(tech.pmos)).at(0, 1200))?;
    let n = db.new_node(token, inv, NodeSpec::new(NodeProtoId::Primitive(tech.nmos)).at(0, -1200))?;
    let a = db.new_node(token, inv, NodeSpec::new(pin).at(-2400, 0))?;
    let y = db.new_node(token, inv, NodeSpec::new(pin).at(2400, 0))?;
    for (mos, proto) in [(p, tech.pmos), (n, tech.nmos)] {
        let gate = tech.port(&ids, proto, "g")?;
        let drain = tech.port(&ids, proto, "d")?;
        db.new_arc(
            token,
            inv,
            ArcSpec::new(tech.metal, (a.node_id, tech.pin_port), (mos.node_id, gate)).width(400),
        )?;
        db.new_arc(
            token,
            inv,
            ArcSpec::new(tech.metal, (mos.node_id, drain), (y.node_id, tech.pin_port)).width(400),
        )?;
    }
    let inv_in = db.new_export(token, inv, "in", a, tech.pin_port)?;
    let inv_out = db.new_export(token, inv, "out", y, tech.pin_port)?;

    let buf = db.new_cell(token, lib, "buf{sch}", tech.tech)?;
    let first = db.new_node(token, buf, NodeSpec::new(NodeProtoId::Cell(inv)).at(0, 0))?;
    let second = db.new_node(token, buf, NodeSpec::new(NodeProtoId::Cell(inv)).at(6000, 0))?;
    db.new_arc(
        token,
        buf,
        ArcSpec::new(
            tech.metal,
            (first.node_id, PortProtoId::Export(inv_out)),
            (second.node_id, PortProtoId::Export(inv_in)),
        ),
    )?;
    db.new_export(token, buf, "in", first, PortProtoId::Export(inv_in))?;
    db.new_export(token, buf, "out", second, PortProtoId::Export(inv_out))?;

    let top = db.new_cell(token, lib, "top{sch}", tech.tech)?;
    db.new_node(token, top, NodeSpec::new(NodeProtoId::Cell(buf)).named("u1").at(0, 0))?;
    db.new_node(token, top, NodeSpec::new(NodeProtoId::Cell(buf)).named("u2").at(12_000, 0))?;
    let frame = Variable::new(VarKey::new(FRAME_VARIABLE)?, VarValue::Str(DEMO_FRAME.to_string()));
    db.set_cell_variable(token, top, frame)?;
    Ok(Design { buf, top })
}

/// Even rounds place an extra buffer in the top cell, odd rounds remove it.
fn edit(db: &mut DatabaseThread, token: &OwnerToken, design: &Design, round: usize) -> CoreResult<()> {
    if round % 2 == 0 {
        let y = 6000 * (round as i64 + 1);
        db.new_node(
            token,
            design.top,
            NodeSpec::new(NodeProtoId::Cell(design.buf))
                .named(format!("extra{round}"))
                .at(0, y),
        )?;
    } else {
        let name = format!("extra{}", round - 1);
        let node = db
            .find_node(design.top, &name)
            .ok_or_else(|| CoreError::killed(name))?;
        db.kill_node(token, node)?;
    }
    db.set_revision_date(token, design.top, round as i64 + 1)
}
