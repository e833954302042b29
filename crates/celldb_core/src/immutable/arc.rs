//! Arc instance records.

use super::{ElectricObject, Variables};
use crate::error::{CoreError, CoreResult};
use crate::geometry::{GridPoint, MAX_COORD};
use crate::id::{ArcProtoId, IdMapper, PortProtoId};
use crate::text::{check_object_name, TextDescriptor, VarKey, Variable};
use std::sync::Arc;

/// One end of an arc: a port of a node, and a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArcEnd {
    /// Node id in the parent cell.
    pub node_id: u32,
    /// Port on that node's prototype.
    pub port: PortProtoId,
    /// Location of the end.
    pub location: GridPoint,
}

impl ArcEnd {
    /// Creates an arc end.
    #[must_use]
    pub const fn new(node_id: u32, port: PortProtoId, location: GridPoint) -> Self {
        Self {
            node_id,
            port,
            location,
        }
    }
}

/// A wire between two node ports.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmutableArcInst {
    arc_id: u32,
    proto: ArcProtoId,
    name: String,
    name_descriptor: TextDescriptor,
    tail: ArcEnd,
    head: ArcEnd,
    width: i64,
    angle: i16,
    flags: u32,
    vars: Variables,
}

impl ImmutableArcInst {
    /// Flag: the arc cannot change length or angle.
    pub const RIGID: u32 = 1;
    /// Flag: the arc keeps its angle.
    pub const FIXED_ANGLE: u32 = 2;
    /// Flag: the arc may slide within its ports.
    pub const SLIDABLE: u32 = 4;

    /// Creates an arc record. The angle follows from the end locations.
    pub fn new(
        arc_id: u32,
        proto: ArcProtoId,
        name: impl Into<String>,
        tail: ArcEnd,
        head: ArcEnd,
        width: i64,
    ) -> CoreResult<Arc<Self>> {
        let name = name.into();
        check_object_name(&name)?;
        check_width(width)?;
        for end in [&tail, &head] {
            if !end.location.in_range() {
                return Err(CoreError::invalid_argument(format!(
                    "arc end {} out of range",
                    end.location
                )));
            }
        }
        Ok(Arc::new(Self {
            arc_id,
            proto,
            name,
            name_descriptor: TextDescriptor::EMPTY,
            tail,
            head,
            width,
            angle: default_angle(tail.location, head.location).unwrap_or(0),
            flags: Self::FIXED_ANGLE,
            vars: Variables::default(),
        }))
    }

    /// Id of the arc within its parent cell.
    #[must_use]
    pub fn arc_id(&self) -> u32 {
        self.arc_id
    }

    /// The arc prototype.
    #[must_use]
    pub fn proto(&self) -> ArcProtoId {
        self.proto
    }

    /// Arc name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True for generated names such as `net@4`.
    #[must_use]
    pub fn is_temp_name(&self) -> bool {
        self.name.contains('@')
    }

    /// Descriptor of the name text.
    #[must_use]
    pub fn name_descriptor(&self) -> TextDescriptor {
        self.name_descriptor
    }

    /// Tail end.
    #[must_use]
    pub fn tail(&self) -> ArcEnd {
        self.tail
    }

    /// Head end.
    #[must_use]
    pub fn head(&self) -> ArcEnd {
        self.head
    }

    /// Full width in grid units.
    #[must_use]
    pub fn width(&self) -> i64 {
        self.width
    }

    /// Angle in tenths of a degree.
    #[must_use]
    pub fn angle(&self) -> i16 {
        self.angle
    }

    /// Flag bits.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// True when either end sits on `node_id`.
    #[must_use]
    pub fn touches(&self, node_id: u32) -> bool {
        self.tail.node_id == node_id || self.head.node_id == node_id
    }

    /// Returns the arc with another name.
    pub fn with_name(self: &Arc<Self>, name: &str) -> CoreResult<Arc<Self>> {
        if self.name == name {
            return Ok(Arc::clone(self));
        }
        check_object_name(name)?;
        Ok(self.rebuild(|a| a.name = name.to_string()))
    }

    /// Returns the arc with another name descriptor.
    #[must_use]
    pub fn with_name_descriptor(self: &Arc<Self>, td: TextDescriptor) -> Arc<Self> {
        if self.name_descriptor == td {
            return Arc::clone(self);
        }
        self.rebuild(|a| a.name_descriptor = td)
    }

    /// Returns the arc with its end locations moved.
    ///
    /// The angle is recomputed unless the arc collapses to a point.
    #[must_use]
    pub fn with_locations(self: &Arc<Self>, tail: GridPoint, head: GridPoint) -> Arc<Self> {
        if self.tail.location == tail && self.head.location == head {
            return Arc::clone(self);
        }
        let angle = default_angle(tail, head).unwrap_or(self.angle);
        self.rebuild(|a| {
            a.tail.location = tail;
            a.head.location = head;
            a.angle = angle;
        })
    }

    /// Returns the arc with another width.
    pub fn with_width(self: &Arc<Self>, width: i64) -> CoreResult<Arc<Self>> {
        if self.width == width {
            return Ok(Arc::clone(self));
        }
        check_width(width)?;
        Ok(self.rebuild(|a| a.width = width))
    }

    /// Returns the arc with an explicit angle.
    #[must_use]
    pub fn with_angle(self: &Arc<Self>, angle: i16) -> Arc<Self> {
        let angle = angle.rem_euclid(3600);
        if self.angle == angle {
            return Arc::clone(self);
        }
        self.rebuild(|a| a.angle = angle)
    }

    /// Returns the arc with other flag bits.
    #[must_use]
    pub fn with_flags(self: &Arc<Self>, flags: u32) -> Arc<Self> {
        if self.flags == flags {
            return Arc::clone(self);
        }
        self.rebuild(|a| a.flags = flags)
    }

    /// Returns the arc with `var` added or replaced.
    #[must_use]
    pub fn with_variable(self: &Arc<Self>, var: Variable) -> Arc<Self> {
        let vars = self.vars.with(var);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|a| a.vars = vars)
    }

    /// Returns the arc without `key`.
    #[must_use]
    pub fn without_variable(self: &Arc<Self>, key: &VarKey) -> Arc<Self> {
        let vars = self.vars.without(key);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|a| a.vars = vars)
    }

    /// Returns the arc with ids rewritten through `mapper`.
    #[must_use]
    pub fn with_renamed_ids(self: &Arc<Self>, mapper: &IdMapper) -> Arc<Self> {
        let tail = mapper.port(self.tail.port);
        let head = mapper.port(self.head.port);
        if tail == self.tail.port && head == self.head.port {
            return Arc::clone(self);
        }
        self.rebuild(|a| {
            a.tail.port = tail;
            a.head.port = head;
        })
    }

    pub(crate) fn with_vars(self: &Arc<Self>, vars: Variables) -> Arc<Self> {
        self.rebuild(|a| a.vars = vars)
    }

    fn rebuild(&self, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut next = self.clone();
        f(&mut next);
        Arc::new(next)
    }
}

impl ElectricObject for ImmutableArcInst {
    fn vars(&self) -> &Variables {
        &self.vars
    }
}

/// Angle from `tail` to `head` in tenths of a degree, `None` for a point.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn default_angle(tail: GridPoint, head: GridPoint) -> Option<i16> {
    let dx = head.x as f64 - tail.x as f64;
    let dy = head.y as f64 - tail.y as f64;
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    let tenths = (dy.atan2(dx).to_degrees() * 10.0).round() as i32;
    Some(tenths.rem_euclid(3600) as i16)
}

fn check_width(width: i64) -> CoreResult<()> {
    if width < 0 {
        return Err(CoreError::invalid_argument(format!(
            "negative arc width {width}"
        )));
    }
    if width > MAX_COORD {
        return Err(CoreError::invalid_argument(format!(
            "arc width {width} out of range"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{PrimitiveNodeId, PrimitivePortId, TechId};

    fn port() -> PortProtoId {
        PortProtoId::Primitive(PrimitivePortId {
            node: PrimitiveNodeId {
                tech: TechId(0),
                index: 0,
            },
            index: 0,
        })
    }

    fn arc(tail: (i64, i64), head: (i64, i64)) -> Arc<ImmutableArcInst> {
        ImmutableArcInst::new(
            0,
            ArcProtoId {
                tech: TechId(0),
                index: 0,
            },
            "net@0",
            ArcEnd::new(0, port(), GridPoint::new(tail.0, tail.1)),
            ArcEnd::new(1, port(), GridPoint::new(head.0, head.1)),
            400,
        )
        .unwrap()
    }

    #[test]
    fn angle_from_ends() {
        assert_eq!(arc((0, 0), (10, 0)).angle(), 0);
        assert_eq!(arc((0, 0), (0, 10)).angle(), 900);
        assert_eq!(arc((0, 0), (-10, 0)).angle(), 1800);
        assert_eq!(arc((0, 0), (0, -10)).angle(), 2700);
        assert_eq!(arc((3, 3), (3, 3)).angle(), 0);
    }

    #[test]
    fn collapsing_keeps_angle() {
        let a = arc((0, 0), (0, 10));
        let b = a.with_locations(GridPoint::new(5, 5), GridPoint::new(5, 5));
        assert_eq!(b.angle(), 900);
        assert!(Arc::ptr_eq(&b, &b.with_locations(GridPoint::new(5, 5), GridPoint::new(5, 5))));
    }

    #[test]
    fn temp_names_and_touches() {
        let a = arc((0, 0), (1, 0));
        assert!(a.is_temp_name());
        assert!(!a.with_name("clk").unwrap().is_temp_name());
        assert!(a.touches(1));
        assert!(!a.touches(2));
        assert!(a.with_width(-4).is_err());
    }

    #[test]
    fn far_ends_rejected() {
        let proto = ArcProtoId {
            tech: TechId(0),
            index: 0,
        };
        let near = ArcEnd::new(0, port(), GridPoint::ORIGIN);
        let far = ArcEnd::new(1, port(), GridPoint::new(i64::MIN, 0));
        assert!(ImmutableArcInst::new(0, proto, "net@0", near, far, 0).is_err());
        assert!(ImmutableArcInst::new(0, proto, "net@0", near, near, MAX_COORD + 1).is_err());
        let a = arc((0, 0), (0, 10));
        let moved = a.with_locations(GridPoint::new(i64::MAX, 0), GridPoint::new(i64::MIN, 0));
        assert_eq!(moved.angle(), 1800);
    }
}
