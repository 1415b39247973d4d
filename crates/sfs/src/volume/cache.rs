// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relative_path::{RelativePath, RelativePathBuf};

use crate::Result;

#[cfg(test)]
#[path = "./cache_test.rs"]
mod cache_test;

/// Whole-file buffers shared between concurrent positioned reads.
///
/// The first read of a file loads its full content, and every
/// overlapping read is then served from that buffer. An entry is
/// dropped once no reads are in flight and the ranges served from
/// it cover the whole file, or immediately by any read positioned
/// at or beyond the end.
#[derive(Debug, Default)]
pub(crate) struct ReadCache {
    entries: DashMap<RelativePathBuf, CacheEntry>,
    generations: AtomicU64,
}

#[derive(Debug)]
struct CacheEntry {
    buffer: Bytes,
    readers: usize,
    /// Disjoint, non-adjacent byte ranges copied out so far, by start
    served: Vec<Range<u64>>,
    // distinguishes an entry from one created after it was evicted
    generation: u64,
}

impl CacheEntry {
    fn mark_served(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }
        let mut merged = range;
        self.served.retain(|other| {
            if other.end < merged.start || other.start > merged.end {
                return true;
            }
            merged.start = merged.start.min(other.start);
            merged.end = merged.end.max(other.end);
            false
        });
        let at = self.served.partition_point(|other| other.start < merged.start);
        self.served.insert(at, merged);
    }

    fn fully_served(&self) -> bool {
        match self.served.as_slice() {
            [only] => only.start == 0 && only.end >= self.buffer.len() as u64,
            _ => false,
        }
    }
}

impl ReadCache {
    /// Copy the bytes of a `size` byte file beginning at `position` into `buf`.
    ///
    /// `load` is called to fetch the complete file when it is not
    /// already cached, and must return exactly `size` bytes.
    pub fn read<F>(
        &self,
        path: &RelativePath,
        size: u64,
        buf: &mut [u8],
        position: u64,
        load: F,
    ) -> Result<usize>
    where
        F: FnOnce() -> Result<Bytes>,
    {
        if position >= size {
            if self.entries.remove(path).is_some() {
                tracing::trace!(%path, "read past the end, evicted");
            }
            return Ok(0);
        }

        let (buffer, generation) = match self.entries.entry(path.to_owned()) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.readers += 1;
                (entry.buffer.clone(), entry.generation)
            }
            Entry::Vacant(entry) => {
                // the shard stays locked while loading, so concurrent
                // readers of this file wait for a single physical read
                let buffer = load()?;
                tracing::trace!(%path, size = buffer.len(), "cached");
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                entry.insert(CacheEntry {
                    buffer: buffer.clone(),
                    readers: 1,
                    served: Vec::new(),
                    generation,
                });
                (buffer, generation)
            }
        };

        let start = (position as usize).min(buffer.len());
        let end = start.saturating_add(buf.len()).min(buffer.len());
        let count = end - start;
        buf[..count].copy_from_slice(&buffer[start..end]);

        self.release(path, generation, start as u64..end as u64);
        Ok(count)
    }

    fn release(&self, path: &RelativePath, generation: u64, served: Range<u64>) {
        if let Some(mut entry) = self.entries.get_mut(path) {
            if entry.generation != generation {
                return;
            }
            entry.readers = entry.readers.saturating_sub(1);
            entry.mark_served(served);
        }
        let evicted = self.entries.remove_if(path, |_, entry| {
            entry.generation == generation && entry.readers == 0 && entry.fully_served()
        });
        if evicted.is_some() {
            tracing::trace!(%path, "evicted");
        }
    }

    /// Drop the entry for a path unless a read of it is in flight.
    ///
    /// Returns true if an entry was dropped.
    pub fn evict_idle(&self, path: &RelativePath) -> bool {
        let evicted = self
            .entries
            .remove_if(path, |_, entry| entry.readers == 0)
            .is_some();
        if evicted {
            tracing::trace!(%path, "idle entry evicted");
        }
        evicted
    }

    pub fn contains(&self, path: &RelativePath) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
