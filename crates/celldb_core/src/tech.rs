//! Technology collaborator.
//!
//! The core never interprets technology geometry itself. It asks a
//! [`TechPool`] for primitive bounds and default node sizes, and carries the
//! pool along with every [`Snapshot`](crate::snapshot::Snapshot).

use crate::backup::CellRevision;
use crate::error::CoreResult;
use crate::geometry::GridRect;
use crate::id::{ArcProtoId, IdManager, PrimitiveNodeId, TechId};
use crate::immutable::{ElectricObject, ImmutableNodeInst};
use crate::text::{VarKey, VarValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Name of the cell variable that selects a drawing frame.
pub const FRAME_VARIABLE: &str = "FACET_schematic_page_size";

/// Default size of a freshly placed primitive, in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefaultNode {
    /// Default width.
    pub width: i64,
    /// Default height.
    pub height: i64,
}

impl DefaultNode {
    /// Creates a default size.
    #[must_use]
    pub const fn new(width: i64, height: i64) -> Self {
        Self { width, height }
    }
}

/// Pure map from primitive to its default size.
pub type DefaultNodes = HashMap<PrimitiveNodeId, DefaultNode>;

/// Geometry queries the core delegates to the technology layer.
pub trait TechPool: Send + Sync + fmt::Debug {
    /// Bounds of a primitive node before orientation and placement.
    fn primitive_node_bounds(&self, node: &ImmutableNodeInst, proto: PrimitiveNodeId) -> GridRect;

    /// Extra cell-level geometry, such as a drawing frame.
    fn cell_primitive_bounds(&self, revision: &CellRevision) -> Option<GridRect>;

    /// Default size of a primitive, if the technology defines one.
    fn default_node(&self, proto: PrimitiveNodeId) -> Option<DefaultNode>;
}

/// A [`TechPool`] built from registered primitives.
#[derive(Debug, Clone, Default)]
pub struct TechCatalog {
    defaults: DefaultNodes,
    margins: HashMap<PrimitiveNodeId, i64>,
    frames: HashMap<String, GridRect>,
}

impl TechCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a primitive and its ports, minting their ids in `ids`.
    pub fn register_primitive(
        &mut self,
        ids: &IdManager,
        tech: TechId,
        name: &str,
        default: DefaultNode,
        ports: &[&str],
    ) -> CoreResult<PrimitiveNodeId> {
        let id = ids.new_primitive_node_id(tech, name)?;
        for port in ports {
            ids.new_primitive_port_id(id, port)?;
        }
        self.defaults.insert(id, default);
        Ok(id)
    }

    /// Registers an arc prototype.
    pub fn register_arc_proto(
        &mut self,
        ids: &IdManager,
        tech: TechId,
        name: &str,
    ) -> CoreResult<ArcProtoId> {
        ids.new_arc_proto_id(tech, name)
    }

    /// Widens the drawn bounds of `proto` by `margin` on every side.
    #[must_use]
    pub fn with_margin(mut self, proto: PrimitiveNodeId, margin: i64) -> Self {
        self.margins.insert(proto, margin.max(0));
        self
    }

    /// Adds a named drawing frame, centered on the cell origin.
    #[must_use]
    pub fn with_frame(mut self, name: impl Into<String>, width: i64, height: i64) -> Self {
        self.frames.insert(name.into(), GridRect::centered(width, height));
        self
    }

    /// Replaces the default node sizes.
    #[must_use]
    pub fn with_default_nodes(mut self, defaults: DefaultNodes) -> Self {
        self.defaults = defaults;
        self
    }

    /// The default node sizes.
    #[must_use]
    pub fn default_nodes(&self) -> &DefaultNodes {
        &self.defaults
    }

    /// Wraps the catalog for sharing with snapshots.
    #[must_use]
    pub fn into_pool(self) -> Arc<dyn TechPool> {
        Arc::new(self)
    }
}

impl TechPool for TechCatalog {
    fn primitive_node_bounds(&self, node: &ImmutableNodeInst, proto: PrimitiveNodeId) -> GridRect {
        let margin = self.margins.get(&proto).copied().unwrap_or(0);
        GridRect::centered(node.width() + 2 * margin, node.height() + 2 * margin)
    }

    fn cell_primitive_bounds(&self, revision: &CellRevision) -> Option<GridRect> {
        let key = VarKey::new(FRAME_VARIABLE).ok()?;
        match revision.cell().var(&key)?.value() {
            VarValue::Str(frame) => self.frames.get(frame.as_str()).copied(),
            _ => None,
        }
    }

    fn default_node(&self, proto: PrimitiveNodeId) -> Option<DefaultNode> {
        self.defaults.get(&proto).copied()
    }
}
