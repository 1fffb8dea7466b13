//! Ties C1–C10 together behind the operation surface of spec §6: `open`,
//! `close`, `info`, `summary`, `list`, `find`, `hexdump`, `cat`, `extract`,
//! `remove`, `add`, `add_file`, `format`.
//!
//! A `Session` owns exactly the shared mutable state spec §5 allows: the
//! parsed boot record, the FAT copy, the sector cache, and the partition
//! table, for the lifetime of one open image. There is no cross-session or
//! cross-thread sharing — the engine is strictly single-threaded,
//! single-process (spec §5).

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::bpb::{BootRecord, FatVariant};
use crate::cache::SectorCache;
use crate::device::{BackingStore, FileBackingStore};
use crate::dirblock::DirBlock;
use crate::dirent::ShortDirEntry;
use crate::error::{InvalidImageError, Result, UserInputError};
use crate::fat::Fat;
use crate::filter::Filter;
use crate::format::{format as format_disk, FormatParams};
use crate::host;
use crate::partition::PartitionTable;
use crate::walk::{self, WalkCtx};
use crate::{fileio, name, ATTR_ARCHIVE, ATTR_DIRECTORY, DIRENT_SIZE};

/// Replaces the original tool's global mutable option booleans
/// (`opt_verbose`, `opt_quiet`, ...) per REDESIGN FLAGS: configuration is an
/// explicit value passed at open/format time, never a hidden global.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Enable the 256-byte-step boot-sector hunt (spec §6 Discovery) when no
    /// partition table entry names a FAT filesystem.
    pub hunt: bool,

    /// Sectors shaved off `sector_end` during `format` to dodge a reported
    /// hypervisor bug (spec §9 Open Questions). A configurable knob rather
    /// than a silent hardcoded shrink; defaults to
    /// [`crate::format::HYPERVISOR_SAFETY_MARGIN_SECTORS`].
    pub format_safety_margin_sectors: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            hunt: false,
            format_safety_margin_sectors: crate::format::HYPERVISOR_SAFETY_MARGIN_SECTORS,
        }
    }
}

/// Read-only geometry/identity summary for `info` (spec §6).
#[derive(Debug, Clone)]
pub struct Info {
    pub variant: &'static str,
    pub sector_size: u64,
    pub cluster_size: u64,
    pub total_sectors: u64,
    pub total_clusters: u32,
    pub free_clusters: u32,
    pub volume_label: String,
    pub base_offset: u64,
    pub media_type: &'static str,
}

pub struct Session {
    raw_store: Arc<dyn BackingStore>,
    boot: BootRecord,
    variant: FatVariant,
    fat: Fat,
    cache: SectorCache,
    partitions: PartitionTable,
    base_offset: u64,
}

impl Session {
    /// Open an existing FAT filesystem. `base_offset` is authoritative when
    /// given; otherwise the partition table (and, if `config.hunt`, a raw
    /// boot-sector scan) locates it (spec §6 Discovery).
    pub fn open(
        path: impl AsRef<Path>,
        base_offset: Option<u64>,
        partition_index: Option<usize>,
        config: &SessionConfig,
    ) -> Result<Session> {
        let path = path.as_ref();
        let raw_store: Arc<dyn BackingStore> = Arc::new(FileBackingStore::open(path, 0)?);
        let partitions = PartitionTable::read_all(raw_store.as_ref())?;

        let offset = match base_offset {
            Some(o) => o,
            None => discover(raw_store.as_ref(), &partitions, partition_index, config)?,
        };

        let fs_store: Arc<dyn BackingStore> = Arc::new(FileBackingStore::open(path, offset)?);
        let boot_bytes = fs_store.read(0, crate::bpb::BOOT_SECTOR_SIZE)?;
        let boot = BootRecord::decode(&boot_bytes)?;

        // Spec §3: the hosting partition's OS-ID is authoritative when known.
        // `offset` is in disk bytes; MBR partition `lba` is always in 512-byte
        // sectors regardless of the filesystem's own (possibly larger) sector
        // size, so the match is against that fixed unit, not `boot.sector_size()`.
        let os_id_hint = partitions
            .entries
            .iter()
            .find(|e| e.is_present() && e.lba as u64 * 512 == offset)
            .map(|e| e.os_id);
        let variant = boot.resolve_variant(os_id_hint);

        let mut cache = SectorCache::new(fs_store, boot.sector_size() as usize);
        let fat = Fat::load(&boot, variant, &mut cache)?;

        Ok(Session {
            raw_store,
            boot,
            variant,
            fat,
            cache,
            partitions,
            base_offset: offset,
        })
    }

    /// Flush every dirty FAT sector and release cached buffers. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.fat.flush(&mut self.cache)?;
        self.cache.destroy();
        Ok(())
    }

    pub fn info(&self) -> Info {
        Info {
            variant: self.variant.name(),
            sector_size: self.boot.sector_size(),
            cluster_size: self.boot.cluster_size(),
            total_sectors: self.boot.total_sectors(),
            total_clusters: self.boot.total_data_clusters(),
            free_clusters: self.fat.count_free(),
            volume_label: String::from_utf8_lossy(&self.boot.volume_label())
                .trim_end()
                .to_string(),
            base_offset: self.base_offset,
            media_type: crate::partition::msdos_get_media_type(self.boot.media_type),
        }
    }

    pub fn summary(&self) -> String {
        self.partitions.summary()
    }

    fn root_cluster(&self) -> u32 {
        if self.boot.is_fat32() {
            self.boot.root_cluster()
        } else {
            0
        }
    }

    fn ctx(&mut self) -> WalkCtx<'_> {
        WalkCtx {
            boot: &self.boot,
            fat: &mut self.fat,
            cache: &mut self.cache,
        }
    }

    /// List every matching file and directory to `out`, one path per line.
    pub fn list(&mut self, filter: &str, out: &mut dyn Write) -> Result<usize> {
        let filter = Filter::parse(filter);
        let root = self.root_cluster();
        let mut ctx = self.ctx();
        walk::for_each_match(&mut ctx, root, &filter, true, &mut |_ctx, _db, v| {
            writeln!(out, "{}", v.path).ok();
            Ok(false)
        })
    }

    /// Find matches; stops at the first one unless `walk_whole_tree`.
    pub fn find(&mut self, filter: &str, walk_whole_tree: bool, out: &mut dyn Write) -> Result<usize> {
        let filter = Filter::parse(filter);
        let root = self.root_cluster();
        let mut ctx = self.ctx();
        walk::for_each_match(&mut ctx, root, &filter, walk_whole_tree, &mut |_ctx, _db, v| {
            writeln!(out, "{}", v.path).ok();
            Ok(true)
        })
    }

    /// Hex-dump the body of every matching file (classic 16-bytes-per-line
    /// offset/hex/ascii layout).
    pub fn hexdump(&mut self, filter: &str, out: &mut dyn Write) -> Result<usize> {
        let filter = Filter::parse(filter);
        let root = self.root_cluster();
        let mut ctx = self.ctx();
        walk::for_each_match(&mut ctx, root, &filter, true, &mut |ctx, _db, v| {
            if v.entry.is_dir() {
                return Ok(false);
            }
            let body = fileio::read_body(ctx.boot, ctx.fat, ctx.cache, v.entry.first_cluster(), v.entry.size as u64)?;
            writeln!(out, "{}:", v.path).ok();
            for (i, chunk) in body.chunks(16).enumerate() {
                let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                let ascii: String = chunk
                    .iter()
                    .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
                    .collect();
                writeln!(out, "{:08x}  {:<47}  {}", i * 16, hex.join(" "), ascii).ok();
            }
            Ok(false)
        })
    }

    /// Write the raw body of every matching file to `out`, concatenated.
    pub fn cat(&mut self, filter: &str, out: &mut dyn Write) -> Result<usize> {
        let filter = Filter::parse(filter);
        let root = self.root_cluster();
        let mut ctx = self.ctx();
        walk::for_each_match(&mut ctx, root, &filter, true, &mut |ctx, _db, v| {
            if v.entry.is_dir() {
                return Ok(false);
            }
            let body = fileio::read_body(ctx.boot, ctx.fat, ctx.cache, v.entry.first_cluster(), v.entry.size as u64)?;
            out.write_all(&body).ok();
            Ok(false)
        })
    }

    /// Copy every matching file/directory onto the host filesystem under
    /// `dest_root`.
    pub fn extract(&mut self, filter: &str, dest_root: &Path) -> Result<usize> {
        let filter = Filter::parse(filter);
        let root = self.root_cluster();
        let mut ctx = self.ctx();
        walk::for_each_match(&mut ctx, root, &filter, true, &mut |ctx, _db, v| {
            let target = dest_root.join(&v.path);
            if v.entry.is_dir() {
                host::create_dir_all(&target)?;
            } else {
                let body =
                    fileio::read_body(ctx.boot, ctx.fat, ctx.cache, v.entry.first_cluster(), v.entry.size as u64)?;
                host::write_file(&target, &body)?;
            }
            Ok(false)
        })
    }

    /// Delete every matching file/directory, freeing its cluster chain (and,
    /// for a directory, every descendant's chain too). A match on the
    /// FAT32 root is a silent no-op (spec §8 scenario 5).
    pub fn remove(&mut self, filter: &str) -> Result<usize> {
        let filter = Filter::parse(filter);
        let root = self.root_cluster();
        let mut ctx = self.ctx();
        let n = walk::for_each_match(&mut ctx, root, &filter, true, &mut |ctx, db, v| {
            let first_cluster = v.entry.first_cluster();
            if v.entry.is_dir() && first_cluster == crate::FAT32_ROOT_CLUSTER && ctx.boot.is_fat32() {
                return Ok(false); // root deletion refused, no-op
            }
            if v.entry.is_dir() {
                walk::free_subtree(ctx, first_cluster)?;
            }
            if first_cluster != 0 {
                ctx.fat.free_chain(first_cluster);
            }
            for slot in (v.slot_index.saturating_sub(v.fragment_count))..=v.slot_index {
                db.set_slot_first_byte(slot, crate::DIR_ENTRY_UNUSED);
            }
            Ok(false)
        })?;
        self.fat.flush(&mut self.cache)?;
        Ok(n)
    }

    /// Add one host file or directory tree at `dos_path`. An existing file
    /// at the target is silently replaced; an existing directory there
    /// makes the add a no-op for that path (spec §4.8 "Replace semantics").
    pub fn add(&mut self, host_path: &Path, dos_path: &str) -> Result<usize> {
        if !host_path.exists() {
            return Err(UserInputError::SourceMissing(host_path.to_path_buf()).into());
        }
        let dos_path = dos_path.trim_matches('/');
        let mut count = 0usize;

        if host_path.is_dir() {
            let parent_cluster = self.ensure_dir_path(dos_path)?;
            let _ = parent_cluster;
            for entry in host::walk_host_tree(host_path).map_err(crate::error::Error::HostIo)? {
                let rel = host::to_fat_path(&entry.relative);
                let target_path = if rel.is_empty() {
                    dos_path.to_string()
                } else {
                    format!("{}/{}", dos_path, rel)
                };
                if entry.is_dir {
                    self.ensure_dir_path(&target_path)?;
                } else {
                    let data = host::read_file(&entry.absolute).map_err(crate::error::Error::HostIo)?;
                    self.add_single_file(&target_path, &data)?;
                    count += 1;
                }
            }
        } else {
            let data = host::read_file(host_path).map_err(crate::error::Error::HostIo)?;
            self.add_single_file(dos_path, &data)?;
            count += 1;
        }

        self.fat.flush(&mut self.cache)?;
        Ok(count)
    }

    /// Like `add`, but always treats `host_path` as a single file renamed to
    /// `dos_path`, even if `dos_path`'s last component looks directory-like.
    pub fn add_file(&mut self, host_path: &Path, dos_path: &str) -> Result<usize> {
        if !host_path.is_file() {
            return Err(UserInputError::SourceMissing(host_path.to_path_buf()).into());
        }
        let data = host::read_file(host_path).map_err(crate::error::Error::HostIo)?;
        self.add_single_file(dos_path.trim_matches('/'), &data)?;
        self.fat.flush(&mut self.cache)?;
        Ok(1)
    }

    /// Walk/create every ancestor component of `dos_path` (all but the last
    /// are intermediate directories, created idempotently), returning the
    /// cluster of the immediate parent directory.
    fn ensure_dir_path(&mut self, dos_path: &str) -> Result<u32> {
        let components: Vec<&str> = dos_path.split('/').filter(|c| !c.is_empty()).collect();
        let mut current = self.root_cluster();
        for component in &components {
            current = self.find_or_create_dir(current, component)?;
        }
        Ok(current)
    }

    fn find_or_create_dir(&mut self, parent_cluster: u32, name_str: &str) -> Result<u32> {
        let boot = self.boot.clone();
        let mut dirblock = DirBlock::load(&boot, &mut self.fat, &mut self.cache, parent_cluster)?;
        if let Some((_idx, entry)) = find_live_entry(&dirblock, name_str) {
            if entry.is_dir() {
                return Ok(entry.first_cluster());
            }
            return Err(UserInputError::TargetIsDirectory(name_str.to_string()).into());
        }

        let new_cluster = self.fat.alloc()?;
        let sector = boot.cluster_to_sector(new_cluster);
        let zeroed = vec![0u8; boot.cluster_size() as usize];
        self.cache.write(sector, boot.sectors_per_cluster as usize, &zeroed)?;

        let encoded = name::encode(name_str);
        let needed = encoded.slot_count();
        let start = loop {
            if let Some(i) = dirblock.find_free_contiguous(needed) {
                break i;
            }
            dirblock.grow(&boot, &mut self.fat, &mut self.cache)?;
        };
        write_name_slots(&mut dirblock, start, &encoded, ATTR_DIRECTORY, new_cluster, 0);

        // "." and ".." entries inside the freshly allocated cluster.
        let dot = ShortDirEntry::new_short(name::encode_short_name("."), ATTR_DIRECTORY, new_cluster, 0)
            .with_timestamp_now();
        let dotdot_target = if parent_cluster == self.root_cluster() && !boot.is_fat32() {
            0
        } else {
            parent_cluster
        };
        let dotdot = ShortDirEntry::new_short(name::encode_short_name(".."), ATTR_DIRECTORY, dotdot_target, 0)
            .with_timestamp_now();
        let mut child = DirBlock::load(&boot, &mut self.fat, &mut self.cache, new_cluster)?;
        child.set_slot(0, &dot.encode());
        child.set_slot(1, &dotdot.encode());
        child.write_back(&mut self.cache)?;

        dirblock.write_back(&mut self.cache)?;
        Ok(new_cluster)
    }

    fn add_single_file(&mut self, dos_path: &str, data: &[u8]) -> Result<()> {
        let dos_path = dos_path.trim_matches('/');
        let (parent_path, leaf) = match dos_path.rfind('/') {
            Some(pos) => (&dos_path[..pos], &dos_path[pos + 1..]),
            None => ("", dos_path),
        };
        let parent_cluster = if parent_path.is_empty() {
            self.root_cluster()
        } else {
            self.ensure_dir_path(parent_path)?
        };

        let boot = self.boot.clone();
        let mut dirblock = DirBlock::load(&boot, &mut self.fat, &mut self.cache, parent_cluster)?;

        if let Some((idx, entry)) = find_live_entry(&dirblock, leaf) {
            if entry.is_dir() {
                return Err(UserInputError::TargetIsDirectory(leaf.to_string()).into());
            }
            // Silent replace: free the old chain and mark its slots deleted
            // before placing the new body (spec §4.8 "Replace semantics").
            if entry.first_cluster() != 0 {
                self.fat.free_chain(entry.first_cluster());
            }
            let frag_start = find_fragment_start(&dirblock, idx);
            for slot in frag_start..=idx {
                dirblock.set_slot_first_byte(slot, crate::DIR_ENTRY_UNUSED);
            }
        }

        let first_cluster = if data.is_empty() {
            0
        } else {
            fileio::write_body(&boot, &mut self.fat, &mut self.cache, data)?
        };

        let encoded = name::encode(leaf);
        let needed = encoded.slot_count();
        let start = loop {
            if let Some(i) = dirblock.find_free_contiguous(needed) {
                break i;
            }
            dirblock.grow(&boot, &mut self.fat, &mut self.cache)?;
        };
        write_name_slots(&mut dirblock, start, &encoded, ATTR_ARCHIVE, first_cluster, data.len() as u32);
        dirblock.write_back(&mut self.cache)
    }

    /// Format a fresh image and immediately open it as a live session.
    pub fn format(params: &FormatParams, config: &SessionConfig) -> Result<Session> {
        let base_offset = format_disk(params, config.format_safety_margin_sectors)?;
        Session::open(&params.image_path, Some(base_offset), None, config)
    }
}

/// Write `encoded`'s fragments (disk order: highest ordinal first) followed
/// by its short-name slot, starting at `start`, filling in `attr`,
/// `first_cluster` and `size` on the short entry.
fn write_name_slots(
    dirblock: &mut DirBlock,
    start: usize,
    encoded: &name::EncodedName,
    attr: u8,
    first_cluster: u32,
    size: u32,
) {
    for (i, frag) in encoded.fragments.iter().enumerate() {
        dirblock.set_slot(start + i, &frag.encode());
    }
    let short_idx = start + encoded.fragments.len();
    let short = ShortDirEntry::new_short(encoded.short, attr, first_cluster, size).with_timestamp_now();
    dirblock.set_slot(short_idx, &short.encode());
}

/// Find a live entry in `dirblock` by display name (short or long),
/// case-insensitive. Returns its short-name slot index and decoded entry.
fn find_live_entry(dirblock: &DirBlock, name_str: &str) -> Option<(usize, ShortDirEntry)> {
    let mut acc = name::LongNameAccumulator::new();
    let mut i = 0usize;
    while i < dirblock.slot_count() {
        let raw = *dirblock.slot(i);
        match crate::dirent::DirSlotState::classify(&raw) {
            crate::dirent::DirSlotState::Absent => break,
            crate::dirent::DirSlotState::Deleted => {
                acc.reset();
                i += 1;
                continue;
            }
            crate::dirent::DirSlotState::Fragment => {
                acc.push(&raw);
                i += 1;
                continue;
            }
            crate::dirent::DirSlotState::Live => {}
        }
        let entry = ShortDirEntry::decode(&raw);
        let long = acc.finish(entry.checksum());
        acc.reset();
        let display = long.unwrap_or_else(|| entry.short_display_name());
        if display.eq_ignore_ascii_case(name_str) {
            return Some((i, entry));
        }
        i += 1;
    }
    None
}

fn find_fragment_start(dirblock: &DirBlock, short_idx: usize) -> usize {
    let mut start = short_idx;
    while start > 0 {
        let raw = *dirblock.slot(start - 1);
        if matches!(crate::dirent::DirSlotState::classify(&raw), crate::dirent::DirSlotState::Fragment) {
            start -= 1;
        } else {
            break;
        }
    }
    start
}

fn discover(
    raw_store: &dyn BackingStore,
    partitions: &PartitionTable,
    partition_index: Option<usize>,
    config: &SessionConfig,
) -> Result<u64> {
    let candidates: Vec<usize> = match partition_index {
        Some(i) => vec![i],
        None => (0..partitions.entries.len()).collect(),
    };

    for i in candidates {
        let entry = &partitions.entries[i];
        if entry.is_present() && entry.is_fat() {
            let offset = entry.lba as u64 * crate::format::SECTOR_SIZE;
            if let Ok(bytes) = raw_store.read(offset, crate::bpb::BOOT_SECTOR_SIZE) {
                if BootRecord::decode(&bytes).is_ok() {
                    return Ok(offset);
                }
            }
        }
    }

    if let Some(i) = partition_index {
        return Err(InvalidImageError::NoSuchPartition(i as u32).into());
    }

    if config.hunt {
        const STEP: u64 = 256;
        const LIMIT: u64 = 16 * 1024 * 1024;
        let mut offset = 0u64;
        while offset < LIMIT {
            if let Ok(bytes) = raw_store.read(offset, crate::bpb::BOOT_SECTOR_SIZE) {
                if plausible_boot_sector(&bytes) {
                    return Ok(offset);
                }
            }
            offset += STEP;
        }
    }

    Err(InvalidImageError::NotFound.into())
}

fn plausible_boot_sector(buf: &[u8]) -> bool {
    if buf.len() < 512 || buf[510..512] != [0x55, 0xAA] {
        return false;
    }
    let sector_size = crate::read_le_u16(&buf[11..13]);
    let spc = buf[13];
    let num_fats = buf[16];
    sector_size >= 512
        && sector_size.is_power_of_two()
        && spc.is_power_of_two()
        && spc > 0
        && (1..=2).contains(&num_fats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatParams;

    fn format_scratch(dir: &std::path::Path, os_id: u8, size_mb: u64) -> Session {
        let params = FormatParams {
            image_path: dir.join("fs.img"),
            size_bytes: size_mb * 1024 * 1024,
            partition_index: 0,
            base_offset: 0,
            volume_name: "TESTDISK".to_string(),
            sector_start: 0,
            sector_end: None,
            os_id,
            zero_sectors: true,
            bootloader: None,
        };
        Session::format(&params, &SessionConfig::default()).expect("format")
    }

    #[test]
    fn format_then_add_then_extract_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"hello\n").unwrap();

        let mut session = format_scratch(dir.path(), 0x06, 32);
        let n = session.add(&src, "/A_rather_long_filename.TXT").unwrap();
        assert_eq!(n, 1);

        let dest = dir.path().join("out");
        let matched = session.extract("A_rather_long_filename.TXT", &dest).unwrap();
        assert_eq!(matched, 1);
        let body = std::fs::read(dest.join("A_rather_long_filename.TXT")).unwrap();
        assert_eq!(body, b"hello\n");

        session.close().unwrap();
    }

    #[test]
    fn remove_then_list_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        std::fs::write(&src, b"data").unwrap();

        let mut session = format_scratch(dir.path(), 0x06, 32);
        session.add(&src, "/f.txt").unwrap();
        session.remove("f.txt").unwrap();

        let mut out = Vec::new();
        let count = session.list("*", &mut out).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn deep_add_creates_intermediate_directories() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("d.txt");
        std::fs::write(&src, vec![0x41u8; 10 * 1024]).unwrap();

        let mut session = format_scratch(dir.path(), 0x06, 32);
        session.add(&src, "/a/b/c/d.txt").unwrap();

        let mut out = Vec::new();
        let count = session.find("d.txt", false, &mut out).unwrap();
        assert_eq!(count, 1);
        assert!(String::from_utf8(out).unwrap().contains("a/b/c/d.txt"));
    }
}
