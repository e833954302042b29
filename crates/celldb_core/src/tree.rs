//! Cell trees and lazily computed bounds.

use crate::backup::CellBackup;
use crate::error::{ensure, CoreError, CoreResult};
use crate::geometry::GridRect;
use crate::id::{CellId, IdManager, NodeProtoId};
use crate::tech::TechPool;
use crate::usage::bitset_with;
use roaring::RoaringBitmap;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Subtrees indexed by `CellUsage::index_in_parent`.
pub type SubtreeList = Arc<[Option<Arc<CellTree>>]>;

/// A cell backup together with the trees of every cell it instantiates.
///
/// Trees are shared between snapshots: a tree whose top and subtrees are
/// unchanged is reused as is, together with its memoized bounds.
#[derive(Debug)]
pub struct CellTree {
    top: Arc<CellBackup>,
    subtrees: SubtreeList,
    all_techs: Arc<RoaringBitmap>,
    tech_pool: Arc<dyn TechPool>,
    bounds: OnceLock<Arc<GridRect>>,
    candidate: Option<Arc<GridRect>>,
}

impl CellTree {
    /// Builds the tree of `top`, reusing `old` where possible.
    ///
    /// `subtrees` must have one slot per usage entry of the top revision,
    /// holding the tree of the instantiated cell exactly where the usage is
    /// present.
    pub fn with(
        ids: &IdManager,
        top: &Arc<CellBackup>,
        subtrees: Vec<Option<Arc<CellTree>>>,
        tech_pool: &Arc<dyn TechPool>,
        old: Option<&Arc<CellTree>>,
    ) -> CoreResult<Arc<Self>> {
        check_subtrees(ids, top, &subtrees).map_err(|e| match e {
            CoreError::InvariantViolation { message } => CoreError::InvalidArgument { message },
            other => other,
        })?;

        if let Some(old) = old {
            let same_subtrees = old.subtrees.len() == subtrees.len()
                && old
                    .subtrees
                    .iter()
                    .zip(&subtrees)
                    .all(|(a, b)| same_tree(a.as_ref(), b.as_ref()));
            if Arc::ptr_eq(&old.top, top) && same_subtrees && Arc::ptr_eq(&old.tech_pool, tech_pool) {
                return Ok(Arc::clone(old));
            }
        }

        let revision = top.revision();
        let mut techs = (**revision.tech_usages()).clone();
        for tree in subtrees.iter().flatten() {
            techs |= &*tree.all_techs;
        }
        let all_techs = match old {
            Some(old) => bitset_with(&old.all_techs, techs),
            None => bitset_with(revision.tech_usages(), techs),
        };
        let candidate = old.and_then(|o| o.bounds.get().cloned().or_else(|| o.candidate.clone()));

        Ok(Arc::new(Self {
            top: Arc::clone(top),
            subtrees: Arc::from(subtrees),
            all_techs,
            tech_pool: Arc::clone(tech_pool),
            bounds: OnceLock::new(),
            candidate,
        }))
    }

    /// The top cell's backup.
    #[must_use]
    pub fn top(&self) -> &Arc<CellBackup> {
        &self.top
    }

    /// The top cell's id.
    #[must_use]
    pub fn cell_id(&self) -> CellId {
        self.top.cell_id()
    }

    /// Subtrees indexed by usage.
    #[must_use]
    pub fn subtrees(&self) -> &SubtreeList {
        &self.subtrees
    }

    /// Technologies used anywhere in the hierarchy below and including the
    /// top cell.
    #[must_use]
    pub fn all_techs(&self) -> &Arc<RoaringBitmap> {
        &self.all_techs
    }

    /// The technology pool the bounds are computed with.
    #[must_use]
    pub fn tech_pool(&self) -> &Arc<dyn TechPool> {
        &self.tech_pool
    }

    /// Bounding box of the cell in its own coordinates.
    ///
    /// Computed on first call and memoized. When the result equals the
    /// bounds of the tree this one replaced, that `Arc` is returned.
    pub fn bounds(&self) -> Arc<GridRect> {
        Arc::clone(self.bounds.get_or_init(|| self.compute_bounds()))
    }

    fn compute_bounds(&self) -> Arc<GridRect> {
        let revision = self.top.revision();
        let mut child_bounds: HashMap<CellId, Arc<GridRect>> = HashMap::new();
        let mut acc: Option<GridRect> = None;
        for node in revision.nodes().iter() {
            let local = match node.proto() {
                NodeProtoId::Cell(proto) => {
                    if !child_bounds.contains_key(&proto) {
                        let Some(tree) = self
                            .subtrees
                            .iter()
                            .flatten()
                            .find(|t| t.cell_id() == proto)
                        else {
                            continue;
                        };
                        child_bounds.insert(proto, tree.bounds());
                    }
                    match child_bounds.get(&proto) {
                        Some(b) => **b,
                        None => continue,
                    }
                }
                NodeProtoId::Primitive(pn) => self.tech_pool.primitive_node_bounds(node, pn),
            };
            let placed = node.orient().transform_rect(&local).translate(node.anchor());
            acc = Some(acc.map_or(placed, |a| a.union(&placed)));
        }
        if let Some(extra) = self.tech_pool.cell_primitive_bounds(revision) {
            acc = Some(acc.map_or(extra, |a| a.union(&extra)));
        }
        let rect = acc.unwrap_or(GridRect::EMPTY);
        match &self.candidate {
            Some(c) if **c == rect => Arc::clone(c),
            _ => Arc::new(rect),
        }
    }

    /// Verifies that subtrees match usages and that `all_techs` is the
    /// union of own and child technologies.
    pub fn check(&self, ids: &IdManager) -> CoreResult<()> {
        check_subtrees(ids, &self.top, &self.subtrees)?;
        let mut techs = (**self.top.revision().tech_usages()).clone();
        for tree in self.subtrees.iter().flatten() {
            techs |= &*tree.all_techs;
        }
        ensure!(
            techs == *self.all_techs,
            "{}: stale technology closure",
            self.cell_id()
        );
        Ok(())
    }
}

fn same_tree(a: Option<&Arc<CellTree>>, b: Option<&Arc<CellTree>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn check_subtrees(
    ids: &IdManager,
    top: &CellBackup,
    subtrees: &[Option<Arc<CellTree>>],
) -> CoreResult<()> {
    let cell_id = top.cell_id();
    let usages = top.revision().cell_usages();
    ensure!(
        subtrees.len() == usages.len(),
        "{cell_id}: {} subtrees for {} usages",
        subtrees.len(),
        usages.len()
    );
    for (i, (info, tree)) in usages.iter().zip(subtrees).enumerate() {
        match (info, tree) {
            (None, None) => {}
            (Some(info), Some(tree)) => {
                let usage = ids.usage_in_at(cell_id, i).ok_or_else(|| {
                    CoreError::invariant(format!("{cell_id}: usage {i} not in registry"))
                })?;
                ensure!(
                    usage.proto == tree.cell_id(),
                    "{cell_id}: subtree {i} is {} instead of {}",
                    tree.cell_id(),
                    usage.proto
                );
                let defined = tree.top().revision().defined_exports();
                if let Some(chron) = info.used_exports().iter().find(|c| !defined.contains(*c)) {
                    return Err(CoreError::invariant(format!(
                        "{usage} uses export {chron}, which {} does not define",
                        usage.proto
                    )));
                }
            }
            (Some(_), None) => {
                return Err(CoreError::invariant(format!(
                    "{cell_id}: usage {i} has no subtree"
                )))
            }
            (None, Some(_)) => {
                return Err(CoreError::invariant(format!(
                    "{cell_id}: subtree {i} without usage"
                )))
            }
        }
    }
    Ok(())
}
