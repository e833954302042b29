//! Node instance records.

use super::{ElectricObject, Variables};
use crate::error::{CoreError, CoreResult};
use crate::geometry::{GridPoint, Orientation, MAX_COORD};
use crate::id::{IdMapper, NodeProtoId, PortProtoId};
use crate::text::{check_object_name, TextDescriptor, VarKey, Variable};
use std::sync::{Arc, LazyLock};

static EMPTY_PORT: LazyLock<Arc<ImmutablePortInst>> =
    LazyLock::new(|| Arc::new(ImmutablePortInst::default()));

/// State of one port of a node instance: only its variables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImmutablePortInst {
    vars: Variables,
}

impl ImmutablePortInst {
    /// The shared port instance without variables.
    #[must_use]
    pub fn empty() -> Arc<Self> {
        Arc::clone(&*EMPTY_PORT)
    }

    /// True when the port carries no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Returns the port with `var` added or replaced.
    #[must_use]
    pub fn with_variable(self: &Arc<Self>, var: Variable) -> Arc<Self> {
        let vars = self.vars.with(var);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        Arc::new(Self { vars })
    }

    /// Returns the port without `key`.
    #[must_use]
    pub fn without_variable(self: &Arc<Self>, key: &VarKey) -> Arc<Self> {
        let vars = self.vars.without(key);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        if vars.is_empty() {
            return Self::empty();
        }
        Arc::new(Self { vars })
    }

    pub(crate) fn from_vars(vars: Variables) -> Arc<Self> {
        if vars.is_empty() {
            Self::empty()
        } else {
            Arc::new(Self { vars })
        }
    }
}

impl ElectricObject for ImmutablePortInst {
    fn vars(&self) -> &Variables {
        &self.vars
    }
}

/// A placed instance of a cell or primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmutableNodeInst {
    node_id: u32,
    proto: NodeProtoId,
    name: String,
    name_descriptor: TextDescriptor,
    orient: Orientation,
    anchor: GridPoint,
    width: i64,
    height: i64,
    flags: u32,
    tech_bits: u8,
    proto_descriptor: TextDescriptor,
    vars: Variables,
    ports: Arc<[Option<Arc<ImmutablePortInst>>]>,
}

impl ImmutableNodeInst {
    /// Flag: the node is hard to select.
    pub const HARD_SELECT: u32 = 1;
    /// Flag: the node is locked against edits.
    pub const LOCKED: u32 = 2;
    /// Flag: the node is drawn expanded.
    pub const EXPANDED: u32 = 4;

    /// Creates a node record.
    pub fn new(
        node_id: u32,
        proto: NodeProtoId,
        name: impl Into<String>,
        anchor: GridPoint,
        orient: Orientation,
        width: i64,
        height: i64,
    ) -> CoreResult<Arc<Self>> {
        let name = name.into();
        check_object_name(&name)?;
        check_size(width, height)?;
        if !anchor.in_range() {
            return Err(CoreError::invalid_argument(format!(
                "node anchor {anchor} out of range"
            )));
        }
        Ok(Arc::new(Self {
            node_id,
            proto,
            name,
            name_descriptor: TextDescriptor::EMPTY,
            orient,
            anchor,
            width,
            height,
            flags: 0,
            tech_bits: 0,
            proto_descriptor: TextDescriptor::DISPLAYED,
            vars: Variables::default(),
            ports: Arc::from(Vec::new()),
        }))
    }

    /// Id of the node within its parent cell.
    #[must_use]
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// The prototype.
    #[must_use]
    pub fn proto(&self) -> NodeProtoId {
        self.proto
    }

    /// Node name, unique within the parent.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor of the name text.
    #[must_use]
    pub fn name_descriptor(&self) -> TextDescriptor {
        self.name_descriptor
    }

    /// Orientation of the instance.
    #[must_use]
    pub fn orient(&self) -> Orientation {
        self.orient
    }

    /// Placement point.
    #[must_use]
    pub fn anchor(&self) -> GridPoint {
        self.anchor
    }

    /// Width in grid units.
    #[must_use]
    pub fn width(&self) -> i64 {
        self.width
    }

    /// Height in grid units.
    #[must_use]
    pub fn height(&self) -> i64 {
        self.height
    }

    /// User flag bits.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Technology-specific bits.
    #[must_use]
    pub fn tech_bits(&self) -> u8 {
        self.tech_bits
    }

    /// Descriptor of the prototype name text.
    #[must_use]
    pub fn proto_descriptor(&self) -> TextDescriptor {
        self.proto_descriptor
    }

    /// Returns the node with another name.
    pub fn with_name(self: &Arc<Self>, name: &str) -> CoreResult<Arc<Self>> {
        if self.name == name {
            return Ok(Arc::clone(self));
        }
        check_object_name(name)?;
        Ok(self.rebuild(|n| n.name = name.to_string()))
    }

    /// Returns the node with another name descriptor.
    #[must_use]
    pub fn with_name_descriptor(self: &Arc<Self>, td: TextDescriptor) -> Arc<Self> {
        if self.name_descriptor == td {
            return Arc::clone(self);
        }
        self.rebuild(|n| n.name_descriptor = td)
    }

    /// Returns the node placed at another point.
    #[must_use]
    pub fn with_anchor(self: &Arc<Self>, anchor: GridPoint) -> Arc<Self> {
        if self.anchor == anchor {
            return Arc::clone(self);
        }
        self.rebuild(|n| n.anchor = anchor)
    }

    /// Returns the node with another orientation.
    #[must_use]
    pub fn with_orient(self: &Arc<Self>, orient: Orientation) -> Arc<Self> {
        if self.orient == orient {
            return Arc::clone(self);
        }
        self.rebuild(|n| n.orient = orient)
    }

    /// Returns the node with another size.
    pub fn with_size(self: &Arc<Self>, width: i64, height: i64) -> CoreResult<Arc<Self>> {
        if self.width == width && self.height == height {
            return Ok(Arc::clone(self));
        }
        check_size(width, height)?;
        Ok(self.rebuild(|n| {
            n.width = width;
            n.height = height;
        }))
    }

    /// Returns the node with other flag bits.
    #[must_use]
    pub fn with_flags(self: &Arc<Self>, flags: u32) -> Arc<Self> {
        if self.flags == flags {
            return Arc::clone(self);
        }
        self.rebuild(|n| n.flags = flags)
    }

    /// Returns the node with other technology bits.
    #[must_use]
    pub fn with_tech_bits(self: &Arc<Self>, tech_bits: u8) -> Arc<Self> {
        if self.tech_bits == tech_bits {
            return Arc::clone(self);
        }
        self.rebuild(|n| n.tech_bits = tech_bits)
    }

    /// Returns the node with another prototype descriptor.
    #[must_use]
    pub fn with_proto_descriptor(self: &Arc<Self>, td: TextDescriptor) -> Arc<Self> {
        if self.proto_descriptor == td {
            return Arc::clone(self);
        }
        self.rebuild(|n| n.proto_descriptor = td)
    }

    /// Returns the node with `var` added or replaced.
    #[must_use]
    pub fn with_variable(self: &Arc<Self>, var: Variable) -> Arc<Self> {
        let vars = self.vars.with(var);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|n| n.vars = vars)
    }

    /// Returns the node without `key`.
    #[must_use]
    pub fn without_variable(self: &Arc<Self>, key: &VarKey) -> Arc<Self> {
        let vars = self.vars.without(key);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|n| n.vars = vars)
    }

    /// State of one port. Ports without variables share one empty record.
    #[must_use]
    pub fn port_inst(&self, port: PortProtoId) -> Arc<ImmutablePortInst> {
        self.ports
            .get(port.chron_index() as usize)
            .and_then(Option::as_ref)
            .map_or_else(ImmutablePortInst::empty, Arc::clone)
    }

    /// Returns the node with the state of `port` replaced.
    pub fn with_port_inst(
        self: &Arc<Self>,
        port: PortProtoId,
        inst: &Arc<ImmutablePortInst>,
    ) -> CoreResult<Arc<Self>> {
        if port.parent() != self.proto {
            return Err(CoreError::invalid_argument(format!(
                "port of {} used on node {} of {}",
                port.parent(),
                self.name,
                self.proto
            )));
        }
        let index = port.chron_index() as usize;
        let current = self.ports.get(index).and_then(Option::as_ref);
        let new = (!inst.is_empty()).then(|| Arc::clone(inst));
        let same = match (current, &new) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        if same {
            return Ok(Arc::clone(self));
        }
        let mut ports = self.ports.to_vec();
        if ports.len() <= index {
            ports.resize(index + 1, None);
        }
        ports[index] = new;
        while matches!(ports.last(), Some(None)) {
            ports.pop();
        }
        let ports: Arc<[_]> = Arc::from(ports);
        Ok(self.rebuild(|n| n.ports = ports))
    }

    /// Ports that carry variables, with their chronological index.
    pub fn port_insts(&self) -> impl Iterator<Item = (u32, &Arc<ImmutablePortInst>)> + '_ {
        self.ports
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (i as u32, p)))
    }

    /// True when any port carries variables.
    #[must_use]
    pub fn has_port_insts(&self) -> bool {
        !self.ports.is_empty()
    }

    /// Returns the node with ids rewritten through `mapper`.
    #[must_use]
    pub fn with_renamed_ids(self: &Arc<Self>, mapper: &IdMapper) -> Arc<Self> {
        let proto = mapper.node_proto(self.proto);
        if proto == self.proto {
            return Arc::clone(self);
        }
        self.rebuild(|n| n.proto = proto)
    }

    pub(crate) fn with_port_slots(
        self: &Arc<Self>,
        ports: Vec<Option<Arc<ImmutablePortInst>>>,
    ) -> Arc<Self> {
        let ports: Arc<[_]> = Arc::from(ports);
        self.rebuild(|n| n.ports = ports)
    }

    pub(crate) fn with_vars(self: &Arc<Self>, vars: Variables) -> Arc<Self> {
        self.rebuild(|n| n.vars = vars)
    }

    fn rebuild(&self, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut next = self.clone();
        f(&mut next);
        Arc::new(next)
    }
}

impl ElectricObject for ImmutableNodeInst {
    fn vars(&self) -> &Variables {
        &self.vars
    }
}

fn check_size(width: i64, height: i64) -> CoreResult<()> {
    if width < 0 || height < 0 {
        return Err(CoreError::invalid_argument(format!(
            "negative node size {width}x{height}"
        )));
    }
    if width > MAX_COORD || height > MAX_COORD {
        return Err(CoreError::invalid_argument(format!(
            "node size {width}x{height} out of range"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{CellId, ExportId, PrimitiveNodeId, PrimitivePortId, TechId};
    use crate::text::VarValue;

    fn pin() -> PrimitiveNodeId {
        PrimitiveNodeId {
            tech: TechId(0),
            index: 0,
        }
    }

    fn node() -> Arc<ImmutableNodeInst> {
        ImmutableNodeInst::new(
            0,
            NodeProtoId::Primitive(pin()),
            "pin@0",
            GridPoint::new(1, 2),
            Orientation::IDENT,
            10,
            4,
        )
        .unwrap()
    }

    #[test]
    fn unchanged_returns_same_arc() {
        let n = node();
        assert!(Arc::ptr_eq(&n, &n.with_anchor(GridPoint::new(1, 2))));
        assert!(Arc::ptr_eq(&n, &n.with_size(10, 4).unwrap()));
        assert!(Arc::ptr_eq(&n, &n.with_name("pin@0").unwrap()));
        let moved = n.with_anchor(GridPoint::new(3, 3));
        assert!(!Arc::ptr_eq(&n, &moved));
        assert_eq!(moved.anchor(), GridPoint::new(3, 3));
        assert_eq!(moved.name(), "pin@0");
    }

    #[test]
    fn rejects_bad_values() {
        let n = node();
        assert!(n.with_size(-1, 3).is_err());
        assert!(n.with_size(MAX_COORD + 1, 3).is_err());
        assert!(n.with_name("").is_err());
        assert!(ImmutableNodeInst::new(
            1,
            NodeProtoId::Primitive(pin()),
            "pin@1",
            GridPoint::new(0, i64::MAX),
            Orientation::IDENT,
            0,
            0
        )
        .is_err());
        assert!(ImmutableNodeInst::new(
            1,
            NodeProtoId::Primitive(pin()),
            "a b",
            GridPoint::ORIGIN,
            Orientation::IDENT,
            0,
            0
        )
        .is_err());
    }

    #[test]
    fn port_insts_trim_empty_tail() {
        let n = node();
        let port = PortProtoId::Primitive(PrimitivePortId {
            node: pin(),
            index: 2,
        });
        let key = VarKey::new("ATTR_load").unwrap();
        let inst = ImmutablePortInst::empty().with_variable(Variable::new(key.clone(), VarValue::Int(3)));

        let with_port = n.with_port_inst(port, &inst).unwrap();
        assert!(with_port.has_port_insts());
        assert_eq!(with_port.port_insts().map(|(i, _)| i).collect::<Vec<_>>(), [2]);
        assert!(Arc::ptr_eq(&with_port, &with_port.with_port_inst(port, &inst).unwrap()));

        let cleared = with_port
            .with_port_inst(port, &inst.without_variable(&key))
            .unwrap();
        assert!(!cleared.has_port_insts());
        assert!(cleared.port_inst(port).is_empty());
    }

    #[test]
    fn port_of_other_proto_rejected() {
        let n = node();
        let port = PortProtoId::Export(ExportId {
            parent: CellId(0),
            chron_index: 0,
        });
        assert!(n.with_port_inst(port, &ImmutablePortInst::empty()).is_err());
    }

    #[test]
    fn renamed_ids_map_subcell_proto() {
        let n = ImmutableNodeInst::new(
            0,
            NodeProtoId::Cell(CellId(1)),
            "a@0",
            GridPoint::ORIGIN,
            Orientation::IDENT,
            0,
            0,
        )
        .unwrap();
        let mut mapper = IdMapper::new();
        assert!(Arc::ptr_eq(&n, &n.with_renamed_ids(&mapper)));
        mapper.add_cell(CellId(1), CellId(5));
        assert_eq!(n.with_renamed_ids(&mapper).proto(), NodeProtoId::Cell(CellId(5)));
    }
}
