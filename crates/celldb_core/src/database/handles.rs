//! Handles and creation requests for nodes and arcs.

use crate::geometry::{GridPoint, Orientation};
use crate::id::{ArcProtoId, CellId, NodeProtoId, PortProtoId};
use std::fmt;

/// Handle to a node of a live cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    /// Parent cell.
    pub cell: CellId,
    /// Node id within the parent.
    pub node_id: u32,
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/node{}", self.cell, self.node_id)
    }
}

/// Handle to an arc of a live cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArcRef {
    /// Parent cell.
    pub cell: CellId,
    /// Arc id within the parent.
    pub arc_id: u32,
}

impl fmt::Display for ArcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/arc{}", self.cell, self.arc_id)
    }
}

/// Request to create a node.
///
/// Without a name the node gets a temporary `proto@N` name. Without a size
/// a primitive gets the technology's default size and a cell instance gets
/// zero.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    /// Prototype to instantiate.
    pub proto: NodeProtoId,
    /// Node name.
    pub name: Option<String>,
    /// Placement point.
    pub anchor: GridPoint,
    /// Orientation.
    pub orient: Orientation,
    /// Width and height in grid units.
    pub size: Option<(i64, i64)>,
}

impl NodeSpec {
    /// A request for `proto` at the origin.
    #[must_use]
    pub fn new(proto: NodeProtoId) -> Self {
        Self {
            proto,
            name: None,
            anchor: GridPoint::ORIGIN,
            orient: Orientation::IDENT,
            size: None,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the placement point.
    #[must_use]
    pub fn at(mut self, x: i64, y: i64) -> Self {
        self.anchor = GridPoint::new(x, y);
        self
    }

    /// Sets the orientation.
    #[must_use]
    pub fn oriented(mut self, orient: Orientation) -> Self {
        self.orient = orient;
        self
    }

    /// Sets the size.
    #[must_use]
    pub fn sized(mut self, width: i64, height: i64) -> Self {
        self.size = Some((width, height));
        self
    }
}

/// Request to create an arc between two node ports.
///
/// Arc ends sit on the anchors of their nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArcSpec {
    /// Arc prototype.
    pub proto: ArcProtoId,
    /// Arc name; a temporary `net@N` name when absent.
    pub name: Option<String>,
    /// Tail node id and port.
    pub tail: (u32, PortProtoId),
    /// Head node id and port.
    pub head: (u32, PortProtoId),
    /// Width in grid units.
    pub width: i64,
}

impl ArcSpec {
    /// A zero-width arc from `tail` to `head`.
    #[must_use]
    pub fn new(proto: ArcProtoId, tail: (u32, PortProtoId), head: (u32, PortProtoId)) -> Self {
        Self {
            proto,
            name: None,
            tail,
            head,
            width: 0,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the width.
    #[must_use]
    pub fn width(mut self, width: i64) -> Self {
        self.width = width;
        self
    }
}
