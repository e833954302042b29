//! Identifiers.
//!
//! Every id is a small `Copy` index into a table owned by an [`IdManager`].
//! Indices are assigned in mint order and never reused, so an id stays valid
//! for the lifetime of its registry no matter how names change.

mod manager;
mod mapper;

pub use manager::IdManager;
pub use mapper::IdMapper;

use std::fmt;

macro_rules! index_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Returns the registry index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Returns the raw index value.
            #[must_use]
            pub const fn as_u32(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

index_id!(
    /// Identifier of a technology.
    TechId,
    "tech"
);
index_id!(
    /// Identifier of a library.
    LibId,
    "lib"
);
index_id!(
    /// Identifier of a cell.
    CellId,
    "cell"
);

/// Identifier of an export, local to its parent cell.
///
/// `chron_index` is the position in the parent's export table, assigned at
/// creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExportId {
    /// The cell that owns the export.
    pub parent: CellId,
    /// Chronological index within the parent.
    pub chron_index: u32,
}

impl fmt::Display for ExportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:e{}", self.parent, self.chron_index)
    }
}

/// Identifier of an arc prototype of a technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArcProtoId {
    /// Owning technology.
    pub tech: TechId,
    /// Index within the technology's arc table.
    pub index: u32,
}

/// Identifier of a primitive node prototype of a technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimitiveNodeId {
    /// Owning technology.
    pub tech: TechId,
    /// Index within the technology's primitive table.
    pub index: u32,
}

/// Identifier of a port on a primitive node prototype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrimitivePortId {
    /// Owning primitive.
    pub node: PrimitiveNodeId,
    /// Index within the primitive's port table.
    pub index: u32,
}

/// Prototype of a node instance: a cell or a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeProtoId {
    /// An instance of another cell.
    Cell(CellId),
    /// An instance of a technology primitive.
    Primitive(PrimitiveNodeId),
}

impl NodeProtoId {
    /// Returns the cell for subcell instances.
    #[must_use]
    pub const fn as_cell(self) -> Option<CellId> {
        match self {
            Self::Cell(id) => Some(id),
            Self::Primitive(_) => None,
        }
    }

    /// Returns the technology of a primitive prototype.
    #[must_use]
    pub const fn tech(self) -> Option<TechId> {
        match self {
            Self::Cell(_) => None,
            Self::Primitive(id) => Some(id.tech),
        }
    }
}

impl fmt::Display for NodeProtoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cell(id) => write!(f, "{id}"),
            Self::Primitive(id) => write!(f, "{}:n{}", id.tech, id.index),
        }
    }
}

/// Prototype of a port: an export of a cell or a port of a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PortProtoId {
    /// An export of a subcell.
    Export(ExportId),
    /// A port of a primitive.
    Primitive(PrimitivePortId),
}

impl PortProtoId {
    /// The node prototype this port belongs to.
    #[must_use]
    pub const fn parent(self) -> NodeProtoId {
        match self {
            Self::Export(id) => NodeProtoId::Cell(id.parent),
            Self::Primitive(id) => NodeProtoId::Primitive(id.node),
        }
    }

    /// Index of the port within its prototype.
    #[must_use]
    pub const fn chron_index(self) -> u32 {
        match self {
            Self::Export(id) => id.chron_index,
            Self::Primitive(id) => id.index,
        }
    }
}

/// A recorded instantiation edge from `parent` to `proto`.
///
/// At most one exists per pair. `index_in_parent` addresses the parent's
/// per-usage arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellUsage {
    /// The instantiating cell.
    pub parent: CellId,
    /// The instantiated cell.
    pub proto: CellId,
    /// Stable position in the parent's usage table.
    pub index_in_parent: u32,
}

impl fmt::Display for CellUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}[{}]",
            self.parent, self.proto, self.index_in_parent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display() {
        assert_eq!(CellId(3).to_string(), "cell#3");
        assert_eq!(
            ExportId {
                parent: CellId(3),
                chron_index: 1
            }
            .to_string(),
            "cell#3:e1"
        );
    }

    #[test]
    fn port_parent() {
        let e = ExportId {
            parent: CellId(2),
            chron_index: 4,
        };
        assert_eq!(PortProtoId::Export(e).parent(), NodeProtoId::Cell(CellId(2)));
        assert_eq!(PortProtoId::Export(e).chron_index(), 4);

        let pn = PrimitiveNodeId {
            tech: TechId(0),
            index: 1,
        };
        let pp = PortProtoId::Primitive(PrimitivePortId { node: pn, index: 2 });
        assert_eq!(pp.parent(), NodeProtoId::Primitive(pn));
        assert_eq!(pp.parent().tech(), Some(TechId(0)));
    }
}
