// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Block-partitioned fan-out over an integer range.
//!
//! Every inner loop of the scorer and the gradient passes runs through
//! this primitive: the half-open range `[lo, hi)` is cut into contiguous
//! blocks, each block runs sequentially on a worker thread, and results
//! come back in index order so callers reduce deterministically. The
//! caller blocks until every block has completed.

use crate::error::{ModelError, ModelResult};
use rayon::prelude::*;
use rayon::ThreadPool;

/// A fixed worker pool plus the block size used to partition ranges.
pub struct BlockExecutor {
    pool: ThreadPool,
    block_size: usize,
}

impl BlockExecutor {
    /// Builds the executor. `threads == 0` lets the pool pick its
    /// default size; `block_size` is clamped to at least 1.
    pub fn new(threads: usize, block_size: usize) -> ModelResult<Self> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if threads > 0 {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| ModelError::ThreadPool {
                message: e.to_string(),
            })?;
        Ok(Self {
            pool,
            block_size: block_size.max(1),
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Applies `f` to every index in `[lo, hi)`, block by block, and
    /// returns the results in index order. `hi <= lo` is a no-op.
    pub fn map_range<T, F>(&self, lo: usize, hi: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
    {
        if hi <= lo {
            return Vec::new();
        }
        let b = self.block_size;
        let blocks = (hi - lo + b - 1) / b;
        let nested: Vec<Vec<T>> = self.pool.install(|| {
            (0..blocks)
                .into_par_iter()
                .map(|block| {
                    let block_lo = lo + block * b;
                    let block_hi = (block_lo + b).min(hi);
                    (block_lo..block_hi).map(&f).collect()
                })
                .collect()
        });
        nested.into_iter().flatten().collect()
    }

    /// Side-effecting variant for callers whose per-index effects touch
    /// fully independent cells.
    pub fn for_each_range<F>(&self, lo: usize, hi: usize, f: F)
    where
        F: Fn(usize) + Sync,
    {
        if hi <= lo {
            return;
        }
        let b = self.block_size;
        let blocks = (hi - lo + b - 1) / b;
        self.pool.install(|| {
            (0..blocks).into_par_iter().for_each(|block| {
                let block_lo = lo + block * b;
                let block_hi = (block_lo + b).min(hi);
                for index in block_lo..block_hi {
                    f(index);
                }
            });
        });
    }
}

impl std::fmt::Debug for BlockExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockExecutor")
            .field("threads", &self.pool.current_num_threads())
            .field("block_size", &self.block_size)
            .finish()
    }
}

/// Chooses between inline loops and block-parallel fan-out. Both paths
/// visit indices in the same order from the reducer's point of view, so
/// results are bitwise identical.
#[derive(Clone, Copy, Debug)]
pub enum Execution<'a> {
    Sequential,
    Blocks(&'a BlockExecutor),
}

impl Execution<'_> {
    pub fn map_range<T, F>(&self, lo: usize, hi: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(usize) -> T + Sync,
    {
        match self {
            Execution::Sequential => (lo..hi).map(f).collect(),
            Execution::Blocks(executor) => executor.map_range(lo, hi, f),
        }
    }
}
