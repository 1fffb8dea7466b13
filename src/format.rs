//! C10 — the formatter.
//!
//! Builds a fresh filesystem from scratch: partition record, boot sector,
//! FAT, root directory, and an optional embedded bootloader image (spec
//! §4.10). Grounded on the teacher's `FileSystem::create`
//! (`examples/CelestialMelody-fat32-rs/src/fs.rs`), generalized from a
//! single hard-coded FAT32 geometry to the size-scaled FAT16/FAT32
//! breakpoints spec §4.10 specifies, and folding in `disk.c`'s partition
//! table + CHS synthesis from `original_source/` (supplemented feature,
//! see `SPEC_FULL.md` §C).

use std::sync::Arc;

use crate::bpb::{BootRecord, Extension, Fat1216Extension, Fat32Extension, FatVariant};
use crate::device::{BackingStore, FileBackingStore};
use crate::error::{Result, UserInputError};
use crate::partition::{PartitionEntry, PartitionTable};
use crate::{DIRENT_SIZE, FAT32_EOC, FAT32_ROOT_CLUSTER};

/// Parameters for constructing a fresh filesystem (spec §6's `format`
/// operation).
pub struct FormatParams {
    pub image_path: std::path::PathBuf,
    pub size_bytes: u64,
    pub partition_index: usize,
    pub base_offset: u64,
    pub volume_name: String,
    pub sector_start: u64,
    pub sector_end: Option<u64>,
    pub os_id: u8,
    pub zero_sectors: bool,
    pub bootloader: Option<Vec<u8>>,
}

pub const SECTOR_SIZE: u64 = 512;
const MIN_BOOTLOADER_SECTORS: u64 = 63;
/// Safety margin shrinking `sector_end` to work around a reported
/// hypervisor bug (spec §9 Open Questions) — a configurable margin, not a
/// hard requirement.
pub const HYPERVISOR_SAFETY_MARGIN_SECTORS: u64 = 1024;

struct FatGeometry {
    variant: FatVariant,
    sectors_per_cluster: u8,
    reserved_sector_count: u16,
    number_of_fats: u8,
    number_of_dirents: u16,
}

fn choose_geometry(variant: FatVariant, partition_sectors: u64) -> FatGeometry {
    let size_bytes = partition_sectors * SECTOR_SIZE;
    let sectors_per_cluster: u8 = match variant {
        FatVariant::Fat12 => 1,
        FatVariant::Fat16 => {
            if size_bytes < 128 * 1024 * 1024 {
                4
            } else if size_bytes < 256 * 1024 * 1024 {
                8
            } else if size_bytes < 512 * 1024 * 1024 {
                16
            } else if size_bytes < 1024 * 1024 * 1024 {
                32
            } else {
                64
            }
        }
        FatVariant::Fat32 => {
            let gib = 1024u64 * 1024 * 1024;
            if size_bytes < 8 * gib {
                8
            } else if size_bytes < 16 * gib {
                16
            } else if size_bytes < 32 * gib {
                32
            } else {
                64
            }
        }
    };
    FatGeometry {
        variant,
        sectors_per_cluster,
        reserved_sector_count: 32,
        number_of_fats: 2,
        number_of_dirents: if variant == FatVariant::Fat32 { 0 } else { 512 },
    }
}

/// `ceil((bits_per_cell/8) * total_clusters / sector_size)`, then nudged up
/// one sector at a time until the highest-addressable cluster's byte
/// offset fits within the computed size (spec §4.10 step 4).
fn fat_size_sectors(geom: &FatGeometry, total_clusters: u32) -> u64 {
    let bits = geom.variant.bits_per_cell() as u64;
    let mut size = (bits * total_clusters as u64 + 8 * SECTOR_SIZE - 1) / (8 * SECTOR_SIZE);
    size = size.max(1);
    loop {
        let highest_cluster = total_clusters as u64 + 1;
        let highest_byte_offset = match geom.variant {
            FatVariant::Fat12 => highest_cluster + highest_cluster / 2,
            FatVariant::Fat16 => highest_cluster * 2,
            FatVariant::Fat32 => highest_cluster * 4,
        };
        if highest_byte_offset < size * SECTOR_SIZE {
            return size;
        }
        size += 1;
    }
}

/// Construct a fresh FAT filesystem per `params`, returning the filesystem's
/// base offset within the image (`sector_start * 512`) so the caller
/// ([`crate::session::Session::format`]) can re-open it as an ordinary
/// session via [`crate::session::Session::open`].
///
/// `safety_margin_sectors` shrinks `sector_end` by that many sectors before
/// anything is written, working around a reported hypervisor bug (spec §9
/// Open Questions) — callers needing the original behavior pass
/// [`HYPERVISOR_SAFETY_MARGIN_SECTORS`]; it is a configurable knob
/// (`SessionConfig::format_safety_margin_sectors`), not a hardcoded shrink.
pub fn format(params: &FormatParams, safety_margin_sectors: u64) -> Result<u64> {
    let store: Arc<dyn BackingStore> = Arc::new(FileBackingStore::create(
        &params.image_path,
        params.size_bytes,
        0,
    )?);

    let sector_end = params
        .sector_end
        .unwrap_or(params.size_bytes / SECTOR_SIZE)
        .saturating_sub(safety_margin_sectors)
        .max(params.sector_start + 1);
    let partition_sectors = sector_end - params.sector_start;

    if !params.zero_sectors {
        let head = vec![0u8; SECTOR_SIZE as usize];
        store.write(params.sector_start * SECTOR_SIZE, &head)?;
        store.write((sector_end - 1) * SECTOR_SIZE, &head)?;
    } else {
        let chunk = vec![0u8; 1024 * 1024];
        let mut remaining = partition_sectors * SECTOR_SIZE;
        let mut offset = params.sector_start * SECTOR_SIZE;
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            store.write(offset, &chunk[..n])?;
            offset += n as u64;
            remaining -= n as u64;
        }
    }

    if let Some(bootloader) = &params.bootloader {
        let mut padded = bootloader.clone();
        let min_len = MIN_BOOTLOADER_SECTORS as usize * SECTOR_SIZE as usize;
        if padded.len() < min_len {
            padded.resize(min_len, 0);
        }
        store.write(params.sector_start * SECTOR_SIZE, &padded)?;
    }

    let variant = FatVariant::from_os_id(params.os_id)
        .ok_or_else(|| UserInputError::InfeasibleFormat(format!("unknown os-id 0x{:02x}", params.os_id)))?;
    let geom = choose_geometry(variant, partition_sectors);
    // One-pass estimate-then-refine: guess the FAT size from an upper bound
    // on cluster count (the whole partition divided into clusters, ignoring
    // reserved/FAT/root space), then recompute the real cluster count from
    // the resulting first data sector. The guess only overestimates, so the
    // refined total_data_clusters is never larger than what fat_size_sectors
    // was sized for.
    let first_data_sector_guess = geom.reserved_sector_count as u64
        + geom.number_of_fats as u64
            * fat_size_sectors(&geom, partition_sectors as u32 / geom.sectors_per_cluster as u32)
        + (geom.number_of_dirents as u64 * DIRENT_SIZE as u64 + SECTOR_SIZE - 1) / SECTOR_SIZE;
    let data_sectors = partition_sectors.saturating_sub(first_data_sector_guess);
    let total_data_clusters = (data_sectors / geom.sectors_per_cluster as u64) as u32;
    let fat_sz = fat_size_sectors(&geom, total_data_clusters);

    match variant {
        FatVariant::Fat12 if total_data_clusters >= crate::MAX_CLUSTER_FAT12 => {
            return Err(UserInputError::Fat12TooManyClusters(total_data_clusters, crate::MAX_CLUSTER_FAT12).into());
        }
        FatVariant::Fat16 if total_data_clusters >= crate::MAX_CLUSTER_FAT16 => {
            return Err(UserInputError::InfeasibleFormat(format!(
                "{} data clusters exceeds FAT16's {} limit",
                total_data_clusters,
                crate::MAX_CLUSTER_FAT16
            ))
            .into());
        }
        _ => {}
    }

    let boot = build_boot_record(&geom, partition_sectors, fat_sz, &params.volume_name);
    let encoded = boot.encode();
    store.write(params.sector_start * SECTOR_SIZE, &encoded)?;

    write_empty_fat(&store, &boot, &geom, params.sector_start)?;

    let mut table = PartitionTable::read_all(store.as_ref())?;
    let idx = params.partition_index.min(table.entries.len() - 1);
    let (sh, ss, sc, eh, es, ec) = PartitionEntry::synthesize_chs(
        params.sector_start as u32,
        partition_sectors as u32,
        boot.sectors_per_track,
        boot.nheads,
    );
    table.entries[idx] = PartitionEntry {
        bootable: 0,
        start_head: sh,
        start_sector: ss,
        start_cylinder: sc,
        os_id: params.os_id,
        end_head: eh,
        end_sector: es,
        end_cylinder: ec,
        lba: params.sector_start as u32,
        sectors_in_partition: partition_sectors as u32,
    };
    table.write_all(store.as_ref())?;

    Ok(params.sector_start * SECTOR_SIZE)
}

fn build_boot_record(geom: &FatGeometry, partition_sectors: u64, fat_sz: u64, volume_name: &str) -> BootRecord {
    let mut label = [b' '; 11];
    let name_bytes = volume_name.as_bytes();
    let n = name_bytes.len().min(11);
    label[..n].copy_from_slice(&name_bytes[..n]);

    // Volume serial is randomized per format, the way `mkfs.vfat` does it,
    // rather than a fixed constant every fresh image would otherwise share.
    let volume_id: u32 = rand::random();

    let sector_count_u16 = if partition_sectors <= u16::MAX as u64 {
        partition_sectors as u16
    } else {
        0
    };

    let extension = match geom.variant {
        FatVariant::Fat32 => Extension::Fat32(Fat32Extension {
            fat_size_sectors: fat_sz as u32,
            extended_flags: 0,
            fat_version: 0,
            root_cluster: FAT32_ROOT_CLUSTER,
            fsinfo_sector: 1,
            backup_boot_sector: 6,
            drive_number: 0x80,
            boot_signature: 0x29,
            volume_id,
            volume_label: label,
            fat_type_label: *b"FAT32   ",
        }),
        _ => Extension::Fat1216(Fat1216Extension {
            bios_drive_num: 0x80,
            boot_signature: 0x29,
            volume_id,
            volume_label: label,
            fat_type_label: if geom.variant == FatVariant::Fat12 {
                *b"FAT12   "
            } else {
                *b"FAT16   "
            },
        }),
    };

    BootRecord {
        bootjmp: [0xEB, 0x58, 0x90],
        oem_id: *b"FATDISK ",
        sector_size: SECTOR_SIZE as u16,
        sectors_per_cluster: geom.sectors_per_cluster,
        reserved_sector_count: geom.reserved_sector_count,
        number_of_fats: geom.number_of_fats,
        number_of_dirents: geom.number_of_dirents,
        sector_count: sector_count_u16,
        media_type: 0xF8,
        fat_size_sectors_12_16: if geom.variant == FatVariant::Fat32 { 0 } else { fat_sz as u16 },
        sectors_per_track: 63,
        nheads: 255,
        sectors_hidden: 0,
        sector_count_large: if sector_count_u16 == 0 { partition_sectors as u32 } else { 0 },
        extension,
    }
}

/// Write an empty FAT: cluster 0 and 1 reserved, the FAT32 root (if any)
/// end-of-chain, everything else zero (spec §4.10 step 5), to every FAT
/// copy.
fn write_empty_fat(store: &Arc<dyn BackingStore>, boot: &BootRecord, geom: &FatGeometry, sector_start: u64) -> Result<()> {
    let fat_sz = boot.fat_size_sectors();
    let mut raw = vec![0u8; (fat_sz * SECTOR_SIZE) as usize];

    let set_cell = |raw: &mut [u8], idx: u32, value: u32| match geom.variant {
        FatVariant::Fat12 => {
            let byte_off = (idx + idx / 2) as usize;
            let existing = u16::from_le_bytes([raw[byte_off], raw[byte_off + 1]]);
            let packed = if idx % 2 == 0 {
                (existing & 0xF000) | (value as u16 & 0x0FFF)
            } else {
                (existing & 0x000F) | ((value as u16) << 4)
            };
            raw[byte_off..byte_off + 2].copy_from_slice(&packed.to_le_bytes());
        }
        FatVariant::Fat16 => {
            let off = idx as usize * 2;
            raw[off..off + 2].copy_from_slice(&(value as u16).to_le_bytes());
        }
        FatVariant::Fat32 => {
            let off = idx as usize * 4;
            raw[off..off + 4].copy_from_slice(&(value & 0x0FFF_FFFF).to_le_bytes());
        }
    };

    let eoc = match geom.variant {
        FatVariant::Fat12 => 0xFFF,
        FatVariant::Fat16 => 0xFFFF,
        FatVariant::Fat32 => FAT32_EOC,
    };
    set_cell(&mut raw, 0, 0xFFFFFF00 | boot.media_type as u32);
    set_cell(&mut raw, 1, eoc);
    if geom.variant == FatVariant::Fat32 {
        set_cell(&mut raw, FAT32_ROOT_CLUSTER, eoc);
    }

    let fat_start = sector_start + boot.reserved_sector_count();
    for copy in 0..boot.number_of_fats as u64 {
        let offset = (fat_start + copy * fat_sz) * SECTOR_SIZE;
        store.write(offset, &raw)?;
    }

    // FAT32's root directory is an ordinary one-cluster chain; zero it.
    if geom.variant == FatVariant::Fat32 {
        let root_sector = fat_start + boot.number_of_fats as u64 * fat_sz;
        let zeroed = vec![0u8; geom.sectors_per_cluster as usize * SECTOR_SIZE as usize];
        store.write(root_sector * SECTOR_SIZE, &zeroed)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fat32_variant_resolves_from_os_id() {
        assert_eq!(FatVariant::from_os_id(0x0b), Some(FatVariant::Fat32));
        assert_eq!(FatVariant::from_os_id(0x06), Some(FatVariant::Fat16));
        assert_eq!(FatVariant::from_os_id(0xee), None);
    }

    #[test]
    fn fat_size_grows_to_cover_highest_cluster() {
        let geom = choose_geometry(FatVariant::Fat16, 64 * 1024 * 1024);
        let sz = fat_size_sectors(&geom, 60000);
        assert!(sz > 0);
    }
}
