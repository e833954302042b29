//! Export records.

use super::{ElectricObject, Variables};
use crate::error::CoreResult;
use crate::id::{ExportId, IdMapper, PortProtoId};
use crate::text::{check_object_name, TextDescriptor, VarKey, Variable};
use std::sync::Arc;

/// Electrical role of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PortCharacteristic {
    /// Not specified.
    #[default]
    Unknown = 0,
    /// Input.
    Input = 1,
    /// Output.
    Output = 2,
    /// Bidirectional.
    Bidirectional = 3,
    /// Power supply.
    Power = 4,
    /// Ground.
    Ground = 5,
    /// Clock.
    Clock = 6,
}

impl PortCharacteristic {
    /// Converts a byte to a characteristic.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Unknown),
            1 => Some(Self::Input),
            2 => Some(Self::Output),
            3 => Some(Self::Bidirectional),
            4 => Some(Self::Power),
            5 => Some(Self::Ground),
            6 => Some(Self::Clock),
            _ => None,
        }
    }

    /// Converts the characteristic to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A port of a node inside a cell, published as a port of the cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmutableExport {
    export_id: ExportId,
    name: String,
    name_descriptor: TextDescriptor,
    original_node_id: u32,
    original_port: PortProtoId,
    always_drawn: bool,
    body_only: bool,
    characteristic: PortCharacteristic,
    vars: Variables,
}

impl ImmutableExport {
    /// Creates an export record.
    pub fn new(
        export_id: ExportId,
        name: impl Into<String>,
        original_node_id: u32,
        original_port: PortProtoId,
    ) -> CoreResult<Arc<Self>> {
        let name = name.into();
        check_object_name(&name)?;
        Ok(Arc::new(Self {
            export_id,
            name,
            name_descriptor: TextDescriptor::DISPLAYED,
            original_node_id,
            original_port,
            always_drawn: false,
            body_only: false,
            characteristic: PortCharacteristic::Unknown,
            vars: Variables::default(),
        }))
    }

    /// The export id.
    #[must_use]
    pub fn export_id(&self) -> ExportId {
        self.export_id
    }

    /// Export name, unique within the parent.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptor of the name text.
    #[must_use]
    pub fn name_descriptor(&self) -> TextDescriptor {
        self.name_descriptor
    }

    /// Node id of the exported port's node.
    #[must_use]
    pub fn original_node_id(&self) -> u32 {
        self.original_node_id
    }

    /// The exported port.
    #[must_use]
    pub fn original_port(&self) -> PortProtoId {
        self.original_port
    }

    /// True when the export is drawn even if not connected.
    #[must_use]
    pub fn always_drawn(&self) -> bool {
        self.always_drawn
    }

    /// True when the export exists only in the body, not in icons.
    #[must_use]
    pub fn body_only(&self) -> bool {
        self.body_only
    }

    /// Electrical role.
    #[must_use]
    pub fn characteristic(&self) -> PortCharacteristic {
        self.characteristic
    }

    /// Returns the export with another name.
    pub fn with_name(self: &Arc<Self>, name: &str) -> CoreResult<Arc<Self>> {
        if self.name == name {
            return Ok(Arc::clone(self));
        }
        check_object_name(name)?;
        Ok(self.rebuild(|e| e.name = name.to_string()))
    }

    /// Returns the export with another name descriptor.
    #[must_use]
    pub fn with_name_descriptor(self: &Arc<Self>, td: TextDescriptor) -> Arc<Self> {
        if self.name_descriptor == td {
            return Arc::clone(self);
        }
        self.rebuild(|e| e.name_descriptor = td)
    }

    /// Returns the export rewired to another port.
    #[must_use]
    pub fn with_original(self: &Arc<Self>, node_id: u32, port: PortProtoId) -> Arc<Self> {
        if self.original_node_id == node_id && self.original_port == port {
            return Arc::clone(self);
        }
        self.rebuild(|e| {
            e.original_node_id = node_id;
            e.original_port = port;
        })
    }

    /// Returns the export with the always-drawn flag set or cleared.
    #[must_use]
    pub fn with_always_drawn(self: &Arc<Self>, value: bool) -> Arc<Self> {
        if self.always_drawn == value {
            return Arc::clone(self);
        }
        self.rebuild(|e| e.always_drawn = value)
    }

    /// Returns the export with the body-only flag set or cleared.
    #[must_use]
    pub fn with_body_only(self: &Arc<Self>, value: bool) -> Arc<Self> {
        if self.body_only == value {
            return Arc::clone(self);
        }
        self.rebuild(|e| e.body_only = value)
    }

    /// Returns the export with another characteristic.
    #[must_use]
    pub fn with_characteristic(self: &Arc<Self>, value: PortCharacteristic) -> Arc<Self> {
        if self.characteristic == value {
            return Arc::clone(self);
        }
        self.rebuild(|e| e.characteristic = value)
    }

    /// Returns the export with `var` added or replaced.
    #[must_use]
    pub fn with_variable(self: &Arc<Self>, var: Variable) -> Arc<Self> {
        let vars = self.vars.with(var);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|e| e.vars = vars)
    }

    /// Returns the export without `key`.
    #[must_use]
    pub fn without_variable(self: &Arc<Self>, key: &VarKey) -> Arc<Self> {
        let vars = self.vars.without(key);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|e| e.vars = vars)
    }

    /// Returns the export with ids rewritten through `mapper`.
    #[must_use]
    pub fn with_renamed_ids(self: &Arc<Self>, mapper: &IdMapper) -> Arc<Self> {
        let export_id = mapper.export(self.export_id);
        let original_port = mapper.port(self.original_port);
        if export_id == self.export_id && original_port == self.original_port {
            return Arc::clone(self);
        }
        self.rebuild(|e| {
            e.export_id = export_id;
            e.original_port = original_port;
        })
    }

    pub(crate) fn with_vars(self: &Arc<Self>, vars: Variables) -> Arc<Self> {
        self.rebuild(|e| e.vars = vars)
    }

    fn rebuild(&self, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut next = self.clone();
        f(&mut next);
        Arc::new(next)
    }
}

impl ElectricObject for ImmutableExport {
    fn vars(&self) -> &Variables {
        &self.vars
    }
}
