//! Usage collection.
//!
//! Derives, from one cell's nodes, arcs and exports, which subcells it
//! instantiates (with counts), which exports of each subcell it references,
//! and which technologies it uses. Results are merged against the previous
//! revision so that unchanged entries keep their `Arc`.

use crate::error::{ensure, CoreError, CoreResult};
use crate::id::{CellId, CellUsage, IdManager, NodeProtoId, PortProtoId};
use crate::immutable::{ImmutableArcInst, ImmutableCell, ImmutableExport, ImmutableNodeInst};
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

/// The canonical empty bitset. Every empty bitset in a revision is this one.
pub static EMPTY_BITSET: LazyLock<Arc<RoaringBitmap>> =
    LazyLock::new(|| Arc::new(RoaringBitmap::new()));

/// Returns `old` if it equals `new`, the shared empty bitset if `new` is
/// empty, and a fresh `Arc` otherwise.
#[must_use]
pub fn bitset_with(old: &Arc<RoaringBitmap>, new: RoaringBitmap) -> Arc<RoaringBitmap> {
    if **old == new {
        Arc::clone(old)
    } else if new.is_empty() {
        Arc::clone(&*EMPTY_BITSET)
    } else {
        Arc::new(new)
    }
}

/// How a parent uses one subcell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUsageInfo {
    inst_count: u32,
    used_exports: Arc<RoaringBitmap>,
}

impl CellUsageInfo {
    /// Creates a usage entry.
    #[must_use]
    pub fn new(inst_count: u32, used_exports: RoaringBitmap) -> Arc<Self> {
        Arc::new(Self {
            inst_count,
            used_exports: bitset_with(&EMPTY_BITSET, used_exports),
        })
    }

    /// Number of instances of the subcell.
    #[must_use]
    pub fn inst_count(&self) -> u32 {
        self.inst_count
    }

    /// Chronological indices of the subcell's referenced exports.
    #[must_use]
    pub fn used_exports(&self) -> &Arc<RoaringBitmap> {
        &self.used_exports
    }

    /// Returns `self` when count and exports are unchanged.
    #[must_use]
    pub fn with(self: &Arc<Self>, inst_count: u32, used_exports: RoaringBitmap) -> Arc<Self> {
        let used_exports = bitset_with(&self.used_exports, used_exports);
        if self.inst_count == inst_count && Arc::ptr_eq(&self.used_exports, &used_exports) {
            return Arc::clone(self);
        }
        Arc::new(Self {
            inst_count,
            used_exports,
        })
    }

    /// Checks the entry against the registry.
    pub fn check(&self, usage: CellUsage, ids: &IdManager) -> CoreResult<()> {
        ensure!(self.inst_count > 0, "{usage} recorded without instances");
        if let Some(max) = self.used_exports.max() {
            ensure!(
                (max as usize) < ids.num_export_ids(usage.proto),
                "{usage} references export {max} that was never minted"
            );
        }
        ensure!(
            !self.used_exports.is_empty() || Arc::ptr_eq(&self.used_exports, &*EMPTY_BITSET),
            "{usage} has a non-canonical empty bitset"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct UsageAcc {
    inst_count: u32,
    used_exports: RoaringBitmap,
}

/// One scan of a cell's contents.
#[derive(Debug)]
pub struct UsageCollector {
    parent: CellId,
    usages: BTreeMap<u32, UsageAcc>,
    tech_usages: RoaringBitmap,
}

impl UsageCollector {
    /// Scans nodes, then arcs, then exports of `cell`.
    ///
    /// Usage edges are recorded in `ids` on first sight. Fails when an arc
    /// end or export names a node that does not exist or a port that does
    /// not belong to that node's prototype.
    pub fn new(
        ids: &IdManager,
        cell: &ImmutableCell,
        nodes: &[Arc<ImmutableNodeInst>],
        arcs: &[Arc<ImmutableArcInst>],
        exports: &[Arc<ImmutableExport>],
    ) -> CoreResult<Self> {
        let mut uc = Self {
            parent: cell.cell_id(),
            usages: BTreeMap::new(),
            tech_usages: RoaringBitmap::new(),
        };
        uc.tech_usages.insert(cell.tech().as_u32());

        let mut protos = HashMap::with_capacity(nodes.len());
        for node in nodes {
            protos.insert(node.node_id(), node.proto());
            match node.proto() {
                NodeProtoId::Cell(proto) => {
                    let usage = ids.usage_in(uc.parent, proto)?;
                    let acc = uc.usages.entry(usage.index_in_parent).or_default();
                    acc.inst_count += 1;
                    for (chron, _) in node.port_insts() {
                        acc.used_exports.insert(chron);
                    }
                }
                NodeProtoId::Primitive(pn) => {
                    uc.tech_usages.insert(pn.tech.as_u32());
                }
            }
        }

        for arc in arcs {
            for end in [arc.tail(), arc.head()] {
                check_port(&protos, end.node_id, end.port, || {
                    format!("arc {}", arc.name())
                })?;
                uc.add_port(ids, end.port)?;
            }
            uc.tech_usages.insert(arc.proto().tech.as_u32());
        }

        for export in exports {
            check_port(&protos, export.original_node_id(), export.original_port(), || {
                format!("export {}", export.name())
            })?;
            uc.add_port(ids, export.original_port())?;
        }
        Ok(uc)
    }

    fn add_port(&mut self, ids: &IdManager, port: PortProtoId) -> CoreResult<()> {
        match port {
            PortProtoId::Export(e) => {
                let usage = ids.usage_in(self.parent, e.parent)?;
                self.usages
                    .entry(usage.index_in_parent)
                    .or_default()
                    .used_exports
                    .insert(e.chron_index);
            }
            PortProtoId::Primitive(pp) => {
                self.tech_usages.insert(pp.node.tech.as_u32());
            }
        }
        Ok(())
    }

    /// Technology usage, reusing `old` when equal.
    #[must_use]
    pub fn tech_usages(&self, old: &Arc<RoaringBitmap>) -> Arc<RoaringBitmap> {
        bitset_with(old, self.tech_usages.clone())
    }

    /// Per-usage entries indexed by `index_in_parent`, trailing gaps trimmed.
    ///
    /// Entries equal to the matching entry of `old` are reused, and `old`
    /// itself is returned when every entry is reused.
    pub fn cell_usages(
        &self,
        old: &Arc<[Option<Arc<CellUsageInfo>>]>,
    ) -> CoreResult<Arc<[Option<Arc<CellUsageInfo>>]>> {
        let len = self.usages.keys().next_back().map_or(0, |&k| k as usize + 1);
        let mut out: Vec<Option<Arc<CellUsageInfo>>> = vec![None; len];
        for (&index, acc) in &self.usages {
            if acc.inst_count == 0 {
                return Err(CoreError::invalid_argument(format!(
                    "{} references exports of usage {index} without instances",
                    self.parent
                )));
            }
            let info = match old.get(index as usize).and_then(Option::as_ref) {
                Some(prev) => prev.with(acc.inst_count, acc.used_exports.clone()),
                None => CellUsageInfo::new(acc.inst_count, acc.used_exports.clone()),
            };
            out[index as usize] = Some(info);
        }
        let unchanged = out.len() == old.len()
            && out.iter().zip(old.iter()).all(|(a, b)| match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            });
        if unchanged {
            return Ok(Arc::clone(old));
        }
        Ok(Arc::from(out))
    }
}

fn check_port(
    protos: &HashMap<u32, NodeProtoId>,
    node_id: u32,
    port: PortProtoId,
    what: impl Fn() -> String,
) -> CoreResult<()> {
    match protos.get(&node_id) {
        None => Err(CoreError::invalid_argument(format!(
            "{} refers to missing node {node_id}",
            what()
        ))),
        Some(&proto) if proto != port.parent() => Err(CoreError::invalid_argument(format!(
            "{} uses a port of {} on a node of {proto}",
            what(),
            port.parent()
        ))),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GridPoint, Orientation};
    use crate::immutable::{ArcEnd, ImmutablePortInst};
    use crate::text::{CellName, VarKey, VarValue, Variable};

    struct Fixture {
        ids: Arc<IdManager>,
        top: Arc<ImmutableCell>,
        a: CellId,
        out: PortProtoId,
        pin: NodeProtoId,
        pin_port: PortProtoId,
        wire: crate::id::ArcProtoId,
    }

    fn fixture() -> Fixture {
        let ids = IdManager::new();
        let tech = ids.new_tech_id("mocmos").unwrap();
        let generic = ids.new_tech_id("generic").unwrap();
        let lib = ids.new_lib_id("demo").unwrap();
        let top = ids.new_cell_id(lib, &CellName::parse("top").unwrap()).unwrap();
        let a = ids.new_cell_id(lib, &CellName::parse("a").unwrap()).unwrap();
        ids.new_export_id(a, "in").unwrap();
        let out = ids.new_export_id(a, "out").unwrap();
        let pn = ids.new_primitive_node_id(generic, "pin").unwrap();
        let pp = ids.new_primitive_port_id(pn, "p").unwrap();
        let wire = ids.new_arc_proto_id(generic, "wire").unwrap();
        Fixture {
            top: ImmutableCell::new(top, tech, 0),
            ids,
            a,
            out: PortProtoId::Export(out),
            pin: NodeProtoId::Primitive(pn),
            pin_port: PortProtoId::Primitive(pp),
            wire,
        }
    }

    fn node(id: u32, proto: NodeProtoId, name: &str) -> Arc<ImmutableNodeInst> {
        ImmutableNodeInst::new(id, proto, name, GridPoint::ORIGIN, Orientation::IDENT, 0, 0).unwrap()
    }

    #[test]
    fn two_instances_one_export() {
        let f = fixture();
        let nodes = vec![
            node(0, NodeProtoId::Cell(f.a), "a@0"),
            node(1, NodeProtoId::Cell(f.a), "a@1"),
            node(2, f.pin, "pin@0"),
        ];
        let arcs = vec![ImmutableArcInst::new(
            0,
            f.wire,
            "net@0",
            ArcEnd::new(0, f.out, GridPoint::ORIGIN),
            ArcEnd::new(2, f.pin_port, GridPoint::new(10, 0)),
            0,
        )
        .unwrap()];

        let uc = UsageCollector::new(&f.ids, &f.top, &nodes, &arcs, &[]).unwrap();
        let empty: Arc<[Option<Arc<CellUsageInfo>>]> = Arc::from(Vec::new());
        let usages = uc.cell_usages(&empty).unwrap();
        let usage = f.ids.find_usage_in(f.top.cell_id(), f.a).unwrap();
        let info = usages[usage.index_in_parent as usize].as_ref().unwrap();
        assert_eq!(info.inst_count(), 2);
        assert_eq!(info.used_exports().iter().collect::<Vec<_>>(), [1]);
        info.check(usage, &f.ids).unwrap();

        let techs = uc.tech_usages(&EMPTY_BITSET);
        assert_eq!(techs.len(), 2);
    }

    #[test]
    fn instance_without_exports_has_empty_bitset() {
        let f = fixture();
        let nodes = vec![node(0, NodeProtoId::Cell(f.a), "a@0")];
        let uc = UsageCollector::new(&f.ids, &f.top, &nodes, &[], &[]).unwrap();
        let usages = uc.cell_usages(&Arc::from(Vec::new())).unwrap();
        let info = usages[0].as_ref().unwrap();
        assert_eq!(info.inst_count(), 1);
        assert!(Arc::ptr_eq(info.used_exports(), &*EMPTY_BITSET));
    }

    #[test]
    fn port_variables_mark_export_used() {
        let f = fixture();
        let inst = ImmutablePortInst::empty().with_variable(Variable::new(
            VarKey::new("ATTR_probe").unwrap(),
            VarValue::Bool(true),
        ));
        let n = node(0, NodeProtoId::Cell(f.a), "a@0")
            .with_port_inst(f.out, &inst)
            .unwrap();
        let uc = UsageCollector::new(&f.ids, &f.top, &[n], &[], &[]).unwrap();
        let usages = uc.cell_usages(&Arc::from(Vec::new())).unwrap();
        assert!(usages[0].as_ref().unwrap().used_exports().contains(1));
    }

    #[test]
    fn rescan_reuses_old_entries() {
        let f = fixture();
        let nodes = vec![node(0, NodeProtoId::Cell(f.a), "a@0")];
        let uc = UsageCollector::new(&f.ids, &f.top, &nodes, &[], &[]).unwrap();
        let first = uc.cell_usages(&Arc::from(Vec::new())).unwrap();
        let techs = uc.tech_usages(&EMPTY_BITSET);

        let moved = vec![nodes[0].with_anchor(GridPoint::new(5, 5))];
        let uc2 = UsageCollector::new(&f.ids, &f.top, &moved, &[], &[]).unwrap();
        assert!(Arc::ptr_eq(&first, &uc2.cell_usages(&first).unwrap()));
        assert!(Arc::ptr_eq(&techs, &uc2.tech_usages(&techs)));
    }

    #[test]
    fn mismatched_port_is_rejected() {
        let f = fixture();
        let nodes = vec![node(0, f.pin, "pin@0"), node(1, f.pin, "pin@1")];
        let arcs = vec![ImmutableArcInst::new(
            0,
            f.wire,
            "net@0",
            ArcEnd::new(0, f.out, GridPoint::ORIGIN),
            ArcEnd::new(1, f.pin_port, GridPoint::ORIGIN),
            0,
        )
        .unwrap()];
        let err = UsageCollector::new(&f.ids, &f.top, &nodes, &arcs, &[]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));

        let dangling = vec![ImmutableArcInst::new(
            0,
            f.wire,
            "net@0",
            ArcEnd::new(0, f.pin_port, GridPoint::ORIGIN),
            ArcEnd::new(9, f.pin_port, GridPoint::ORIGIN),
            0,
        )
        .unwrap()];
        assert!(UsageCollector::new(&f.ids, &f.top, &nodes, &dangling, &[]).is_err());
    }
}
