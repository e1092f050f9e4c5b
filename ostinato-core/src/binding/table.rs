//! Sparse binding tables.
//!
//! 256 buckets indexed by the low byte of the trigger code (key code, MIDI
//! note/program/controller number). Each bucket holds the entries in
//! registration order; the first entry whose qualifier matches wins.

use crate::action::Action;

pub const TABLE_SIZE: usize = 256;

/// One compiled binding.
#[derive(Debug, Clone)]
pub struct TableEntry {
    pub qualifier: u32,
    pub action: Action,
}

#[derive(Debug, Clone)]
pub struct BindingTable {
    buckets: Vec<Vec<TableEntry>>,
}

impl Default for BindingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingTable {
    pub fn new() -> Self {
        Self {
            buckets: (0..TABLE_SIZE).map(|_| Vec::new()).collect(),
        }
    }

    /// Empty every bucket. Tables are always repopulated from scratch.
    pub fn prepare(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    /// Append an entry to a bucket. The caller validates the index.
    pub fn add_entry(&mut self, index: usize, qualifier: u32, action: Action) {
        if let Some(bucket) = self.buckets.get_mut(index) {
            bucket.push(TableEntry { qualifier, action });
        }
    }

    fn position(&self, index: usize, qualifier: u32, wild_zero: bool) -> Option<usize> {
        self.buckets.get(index)?.iter().position(|entry| {
            entry.qualifier == qualifier || (wild_zero && entry.qualifier == 0)
        })
    }

    /// First entry in the bucket matching the qualifier, or any zero
    /// qualifier when `wild_zero` is set.
    pub fn lookup(&self, index: usize, qualifier: u32, wild_zero: bool) -> Option<&TableEntry> {
        let pos = self.position(index, qualifier, wild_zero)?;
        self.buckets.get(index)?.get(pos)
    }

    pub fn lookup_mut(
        &mut self,
        index: usize,
        qualifier: u32,
        wild_zero: bool,
    ) -> Option<&mut TableEntry> {
        let pos = self.position(index, qualifier, wild_zero)?;
        self.buckets.get_mut(index)?.get_mut(pos)
    }

    pub fn bucket(&self, index: usize) -> &[TableEntry] {
        self.buckets.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    pub fn entries(&self) -> impl Iterator<Item = (usize, &TableEntry)> {
        self.buckets
            .iter()
            .enumerate()
            .flat_map(|(i, bucket)| bucket.iter().map(move |e| (i, e)))
    }
}
