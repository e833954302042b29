//! Core type definitions for CellDB.

use std::fmt;

/// Version number of a snapshot.
///
/// Every snapshot that differs from its predecessor gets the next version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SnapshotVersion(pub u64);

impl SnapshotVersion {
    /// Creates a new snapshot version.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next version.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_next() {
        let v = SnapshotVersion::new(5);
        assert_eq!(v.next().as_u64(), 6);
        assert!(v < v.next());
    }

    #[test]
    fn version_display() {
        assert_eq!(format!("{}", SnapshotVersion::new(3)), "v3");
    }
}
