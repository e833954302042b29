//! Library records.

use super::{ElectricObject, Variables};
use crate::id::{IdMapper, LibId};
use crate::text::{VarKey, Variable};
use std::sync::Arc;

/// Per-library state. The library name lives in the id registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ImmutableLibrary {
    lib_id: LibId,
    file: Option<String>,
    version: Option<String>,
    flags: u32,
    vars: Variables,
}

impl ImmutableLibrary {
    /// Creates a library record.
    #[must_use]
    pub fn new(lib_id: LibId) -> Arc<Self> {
        Arc::new(Self {
            lib_id,
            file: None,
            version: None,
            flags: 0,
            vars: Variables::default(),
        })
    }

    /// The library id.
    #[must_use]
    pub fn lib_id(&self) -> LibId {
        self.lib_id
    }

    /// Location the library was read from, if any.
    #[must_use]
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    /// Version string of the program that wrote the library.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Flag bits.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Returns the library with another file location.
    #[must_use]
    pub fn with_file(self: &Arc<Self>, file: Option<String>) -> Arc<Self> {
        if self.file == file {
            return Arc::clone(self);
        }
        self.rebuild(|l| l.file = file)
    }

    /// Returns the library with another version string.
    #[must_use]
    pub fn with_version(self: &Arc<Self>, version: Option<String>) -> Arc<Self> {
        if self.version == version {
            return Arc::clone(self);
        }
        self.rebuild(|l| l.version = version)
    }

    /// Returns the library with other flag bits.
    #[must_use]
    pub fn with_flags(self: &Arc<Self>, flags: u32) -> Arc<Self> {
        if self.flags == flags {
            return Arc::clone(self);
        }
        self.rebuild(|l| l.flags = flags)
    }

    /// Returns the library with `var` added or replaced.
    #[must_use]
    pub fn with_variable(self: &Arc<Self>, var: Variable) -> Arc<Self> {
        let vars = self.vars.with(var);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|l| l.vars = vars)
    }

    /// Returns the library without `key`.
    #[must_use]
    pub fn without_variable(self: &Arc<Self>, key: &VarKey) -> Arc<Self> {
        let vars = self.vars.without(key);
        if vars.ptr_eq(&self.vars) {
            return Arc::clone(self);
        }
        self.rebuild(|l| l.vars = vars)
    }

    /// Returns the library with ids rewritten through `mapper`.
    #[must_use]
    pub fn with_renamed_ids(self: &Arc<Self>, mapper: &IdMapper) -> Arc<Self> {
        let lib_id = mapper.lib(self.lib_id);
        if lib_id == self.lib_id {
            return Arc::clone(self);
        }
        self.rebuild(|l| l.lib_id = lib_id)
    }

    pub(crate) fn with_vars(self: &Arc<Self>, vars: Variables) -> Arc<Self> {
        self.rebuild(|l| l.vars = vars)
    }

    fn rebuild(&self, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut next = self.clone();
        f(&mut next);
        Arc::new(next)
    }
}

impl ElectricObject for ImmutableLibrary {
    fn vars(&self) -> &Variables {
        &self.vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_file_and_version() {
        let lib = ImmutableLibrary::new(LibId(0));
        assert!(Arc::ptr_eq(&lib, &lib.with_file(None)));
        let saved = lib
            .with_file(Some("demo.jelib".into()))
            .with_version(Some("9.08".into()));
        assert_eq!(saved.file(), Some("demo.jelib"));
        assert_eq!(saved.version(), Some("9.08"));
    }

    #[test]
    fn renamed_library() {
        let lib = ImmutableLibrary::new(LibId(0));
        let mut mapper = IdMapper::new();
        mapper.add_lib(LibId(0), LibId(2));
        assert_eq!(lib.with_renamed_ids(&mapper).lib_id(), LibId(2));
    }
}
