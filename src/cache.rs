//! C2 — the sector cache.
//!
//! An in-memory mapping from absolute sector number to sector bytes,
//! write-through on dirty and bulk-invalidated on close. The dirent/FAT
//! access pattern touches the same sectors repeatedly (cluster-chain
//! lookups, dirent packing); collapsing repeat reads to one and skipping
//! no-op writes is the entire point of this layer (spec §4.2).
//!
//! Modeled on the teacher's `BlockCacheManager`
//! (`examples/CelestialMelody-fat32-rs/src/cache.rs`), adapted from a single
//! fixed-size block to a cache keyed by sector and sized in whole sectors,
//! and from a bounded LRU eviction policy to the spec's simpler "keep
//! everything until `destroy`" rule — there is no concurrent reader to evict
//! for, so an unbounded `LruCache` (still the teacher's crate) just gives us
//! a `HashMap` with cheap iteration order for free.

use std::sync::Arc;

use lru::LruCache;

use crate::device::BackingStore;
use crate::error::Result;

pub struct SectorCache {
    store: Arc<dyn BackingStore>,
    sector_size: usize,
    sectors: LruCache<u64, Vec<u8>>,
}

impl SectorCache {
    pub fn new(store: Arc<dyn BackingStore>, sector_size: usize) -> Self {
        Self {
            store,
            sector_size,
            sectors: LruCache::unbounded(),
        }
    }

    /// Read `count` sectors starting at `sector`, satisfying each requested
    /// sector from the cache when present and fetching+inserting it from the
    /// backing store otherwise.
    pub fn read(&mut self, sector: u64, count: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(count * self.sector_size);
        for i in 0..count {
            let s = sector + i as u64;
            if let Some(cached) = self.sectors.get(&s) {
                out.extend_from_slice(cached);
            } else {
                let bytes = self
                    .store
                    .read(s * self.sector_size as u64, self.sector_size)?;
                self.sectors.put(s, bytes.clone());
                out.extend_from_slice(&bytes);
            }
        }
        Ok(out)
    }

    /// Write `count` sectors of `data` starting at `sector`. Only sectors
    /// whose bytes actually changed are forwarded to the backing store;
    /// sectors not yet cached are inserted and forwarded unconditionally.
    pub fn write(&mut self, sector: u64, count: usize, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), count * self.sector_size);
        for i in 0..count {
            let s = sector + i as u64;
            let chunk = &data[i * self.sector_size..(i + 1) * self.sector_size];
            let unchanged = self
                .sectors
                .peek(&s)
                .map(|cached| cached.as_slice() == chunk)
                .unwrap_or(false);
            if !unchanged {
                self.store.write(s * self.sector_size as u64, chunk)?;
            }
            self.sectors.put(s, chunk.to_vec());
        }
        Ok(())
    }

    /// Write `count` sectors of `data` starting at `sector`, bypassing the
    /// cache entirely. Used for bulk file-body writes where re-reading the
    /// freshly written bytes back into the cache would be wasted work.
    pub fn write_uncached(&mut self, sector: u64, count: usize, data: &[u8]) -> Result<()> {
        debug_assert_eq!(data.len(), count * self.sector_size);
        self.store.write(sector * self.sector_size as u64, data)?;
        self.sectors.pop(&sector);
        for i in 1..count {
            self.sectors.pop(&(sector + i as u64));
        }
        Ok(())
    }

    /// Free all cached buffers. Idempotent.
    pub fn destroy(&mut self) {
        self.sectors.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }
}
