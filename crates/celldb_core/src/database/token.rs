//! Owner tokens.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of the actor that owns a [`DatabaseThread`](super::DatabaseThread).
///
/// Tokens cannot be cloned, so only the holder of the original token can
/// mutate the projection it was handed to.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct OwnerToken(u64);

impl OwnerToken {
    /// Mints a token distinct from every other token in the process.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw token value, used in error reports.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}
