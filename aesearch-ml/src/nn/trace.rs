//! Pooling trace: the LIFO bridge between one encode and the decode that inverts it.

use ndarray::Array4;

use crate::arch::SpatialDim;

/// What one max-pool leaves behind for its unpool.
#[derive(Debug)]
pub struct PoolEntry {
    /// Flat per-plane argmax positions, one per pooled cell.
    pub indices: Array4<usize>,
    /// Spatial size of the pool's input.
    pub pre_pool: SpatialDim,
}

/// Stack of [`PoolEntry`] pushed in encoder order and popped in reverse by the decoder.
///
/// Not `Clone`: a trace is produced by one encode and moved into the decode that
/// inverts it.
#[derive(Debug, Default)]
pub struct PoolingTrace {
    entries: Vec<PoolEntry>,
}

impl PoolingTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: PoolEntry) {
        self.entries.push(entry);
    }

    /// Most recently pushed entry.
    pub fn pop(&mut self) -> Option<PoolEntry> {
        self.entries.pop()
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded pre-pool sizes, in encoder order.
    pub fn pre_pool_shapes(&self) -> Vec<SpatialDim> {
        self.entries.iter().map(|e| e.pre_pool).collect()
    }
}
