//! Snapshot streams.
//!
//! A stream is a sequence of diffs between consecutive snapshots. Each diff
//! starts with [`DIFF_TAG`]; the stream ends with [`END_TAG`]. Recurring
//! values such as variable keys, text descriptors and technology names are
//! interned: a reference is an `i32` table index, and an index equal to the
//! current table length announces a new entry whose payload follows.

mod reader;
mod writer;

pub use reader::SnapshotReader;
pub use writer::SnapshotWriter;

use std::collections::HashMap;
use std::hash::Hash;

/// Marks the start of a diff.
pub const DIFF_TAG: u8 = 1;
/// Marks the end of a stream.
pub const END_TAG: u8 = 0;

/// Terminates slot and export-group lists.
const END_OF_LIST: i32 = -1;
/// Reference to "no value" for optional interned values.
const NONE_REF: i32 = -1;

const VAR_INT: u8 = 0;
const VAR_LONG: u8 = 1;
const VAR_DOUBLE: u8 = 2;
const VAR_BOOL: u8 = 3;
const VAR_STR: u8 = 4;
const VAR_INTS: u8 = 5;
const VAR_STRS: u8 = 6;

/// Writer side of an interning table.
#[derive(Debug)]
struct Interner<K> {
    indices: HashMap<K, i32>,
}

impl<K: Hash + Eq> Interner<K> {
    fn new() -> Self {
        Self {
            indices: HashMap::new(),
        }
    }

    /// Returns the index of `key` and whether it was just added.
    fn intern(&mut self, key: K) -> (i32, bool) {
        let next = self.indices.len() as i32;
        match self.indices.get(&key) {
            Some(&i) => (i, false),
            None => {
                self.indices.insert(key, next);
                (next, true)
            }
        }
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}
