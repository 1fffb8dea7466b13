//! C4 — the MBR partition table.
//!
//! Reads, writes and prints the four partition entries at offset `0x1BE` of
//! sector 0 (spec §3 "Partition entry", spec §4.4). Used both for discovery
//! (finding a FAT-labelled partition without an explicit base offset) and
//! during formatting, where it must be written back *after* the boot sector
//! because writing the boot sector zeroes the rest of sector 0.

use crate::device::BackingStore;
use crate::error::Result;

pub const PART_BASE: u64 = 0x1BE;
pub const PARTITION_ENTRY_SIZE: usize = 16;
pub const MAX_PARTITIONS: usize = 4;
const SIGNATURE_OFFSET: usize = 0x1FE;

/// One 16-byte MBR partition descriptor. An all-zero entry means "absent".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionEntry {
    pub bootable: u8,
    pub start_head: u8,
    pub start_sector: u8,
    pub start_cylinder: u8,
    pub os_id: u8,
    pub end_head: u8,
    pub end_sector: u8,
    pub end_cylinder: u8,
    pub lba: u32,
    pub sectors_in_partition: u32,
}

impl PartitionEntry {
    pub const BOOTABLE_FLAG: u8 = 0x80;

    pub fn is_present(&self) -> bool {
        *self != PartitionEntry::default()
    }

    pub fn is_bootable(&self) -> bool {
        self.bootable & Self::BOOTABLE_FLAG != 0
    }

    pub fn is_fat(&self) -> bool {
        matches!(
            self.os_id,
            0x01 | 0x04 | 0x06 | 0x0b | 0x0c | 0x0e | 0x11 | 0x14 | 0x16 | 0x1b | 0x1c | 0x1e
        )
    }

    fn decode(buf: &[u8]) -> Self {
        PartitionEntry {
            bootable: buf[0],
            start_head: buf[1],
            start_sector: buf[2],
            start_cylinder: buf[3],
            os_id: buf[4],
            end_head: buf[5],
            end_sector: buf[6],
            end_cylinder: buf[7],
            lba: crate::read_le_u32(&buf[8..12]),
            sectors_in_partition: crate::read_le_u32(&buf[12..16]),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.bootable;
        buf[1] = self.start_head;
        buf[2] = self.start_sector;
        buf[3] = self.start_cylinder;
        buf[4] = self.os_id;
        buf[5] = self.end_head;
        buf[6] = self.end_sector;
        buf[7] = self.end_cylinder;
        crate::write_le_u32(&mut buf[8..12], self.lba);
        crate::write_le_u32(&mut buf[12..16], self.sectors_in_partition);
    }

    /// CHS geometry is best-effort and, per spec §9 Open Questions, the
    /// source itself comments that the packing is "meaningless" — preserved
    /// for format-fidelity only, never consulted on read.
    pub fn synthesize_chs(
        lba: u32,
        sectors_in_partition: u32,
        sectors_per_track: u16,
        nheads: u16,
    ) -> (u8, u8, u8, u8, u8, u8) {
        let encode_chs = |lba_sector: u32| -> (u8, u8, u8) {
            let spt = sectors_per_track.max(1) as u32;
            let heads = nheads.max(1) as u32;
            let cyl = lba_sector / (spt * heads);
            let head = (lba_sector / spt) % heads;
            let sector = (lba_sector % spt) + 1;
            let sector_byte = (sector as u8 & 0x3f) | (((cyl >> 2) & 0xc0) as u8);
            let cyl_byte = (cyl & 0xff) as u8;
            (head as u8, sector_byte, cyl_byte)
        };
        let (sh, ss, sc) = encode_chs(lba);
        let (eh, es, ec) = encode_chs(lba + sectors_in_partition.saturating_sub(1));
        (sh, ss, sc, eh, es, ec)
    }
}

/// The four MBR partition entries.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    pub entries: [PartitionEntry; MAX_PARTITIONS],
}

impl PartitionTable {
    /// Read the four entries from sector 0 of `store` (not run through the
    /// sector cache — this is a one-shot 16-byte-granularity read done once
    /// at open/format time).
    pub fn read_all(store: &dyn BackingStore) -> Result<Self> {
        let sector0 = store.read(0, 512)?;
        let mut table = PartitionTable::default();
        for i in 0..MAX_PARTITIONS {
            let start = PART_BASE as usize + i * PARTITION_ENTRY_SIZE;
            table.entries[i] = PartitionEntry::decode(&sector0[start..start + PARTITION_ENTRY_SIZE]);
        }
        Ok(table)
    }

    /// Write the four entries back, along with the `0x55 0xAA` signature.
    /// Must be called after the boot sector is written during formatting,
    /// since the boot sector write zeroes bytes `0x000..0x1FE` of sector 0.
    pub fn write_all(&self, store: &dyn BackingStore) -> Result<()> {
        let mut buf = vec![0u8; PARTITION_ENTRY_SIZE * MAX_PARTITIONS + 2];
        for (i, entry) in self.entries.iter().enumerate() {
            entry.encode(&mut buf[i * PARTITION_ENTRY_SIZE..(i + 1) * PARTITION_ENTRY_SIZE]);
        }
        buf[PARTITION_ENTRY_SIZE * MAX_PARTITIONS..].copy_from_slice(&[0x55, 0xAA]);
        store.write(PART_BASE, &buf)?;
        debug_assert_eq!(PART_BASE as usize + buf.len(), SIGNATURE_OFFSET + 2);
        Ok(())
    }

    /// Render a human-readable summary table, mirroring `disk.c`'s
    /// `partition_table_print`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("part  boot  os-id  type              lba         sectors\n");
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.is_present() {
                continue;
            }
            out.push_str(&format!(
                "{:<4}  {:<4}  0x{:02x}   {:<16}  {:<10}  {}\n",
                i,
                if entry.is_bootable() { "*" } else { "" },
                entry.os_id,
                msdos_get_systype(entry.os_id as u32),
                entry.lba,
                entry.sectors_in_partition,
            ));
        }
        out
    }
}

/// Convert a partition OS-ID byte to its conventional name. Carried from
/// `disk.c`'s `msdos_get_systype` (spec §8 scenario 1 calls this directly).
pub fn msdos_get_systype(index: u32) -> &'static str {
    match index {
        0x00 => "Empty",
        0x01 => "FAT12",
        0x02 => "XENIX-root",
        0x03 => "XENIX-usr",
        0x04 => "Small-FAT16",
        0x05 => "Extended",
        0x06 => "FAT16",
        0x07 => "HPFS/NTFS",
        0x08 => "AIX",
        0x09 => "AIX-bootable",
        0x0a => "OS/2-boot-mgr",
        0x0b => "FAT32",
        0x0c => "FAT32-LBA",
        0x0e => "FAT16-LBA",
        0x0f => "Extended-LBA",
        0x10 => "OPUS",
        0x11 => "Hidden-FAT12",
        0x12 => "Compaq-diag",
        0x14 => "Hidd-Sm-FAT16",
        0x16 => "Hidd-FAT16",
        0x17 => "Hidd-HPFS/NTFS",
        0x18 => "AST-SmartSleep",
        0x1b => "Hidd-FAT32",
        0x1c => "Hidd-FAT32-LBA",
        0x1e => "Hidd-FAT16-LBA",
        0x24 => "NEC-DOS",
        0x39 => "Plan-9",
        0x3c => "PMagic-recovery",
        0x40 => "Venix-80286",
        0x41 => "PPC-PReP-Boot",
        0x42 => "SFS",
        0x4d => "QNX4.x",
        0x4e => "QNX4.x-2nd-part",
        0x4f => "QNX4.x-3rd-part",
        0x50 => "OnTrack-DM",
        0x51 => "OnTrackDM6-Aux1",
        0x52 => "CP/M",
        0x53 => "OnTrackDM6-Aux3",
        0x54 => "OnTrack-DM6",
        0x55 => "EZ-Drive",
        0x56 => "Golden-Bow",
        0x5c => "Priam-Edisk",
        0x61 => "SpeedStor",
        0x63 => "GNU-HURD/SysV",
        0x64 => "Netware-286",
        0x65 => "Netware-386",
        0x70 => "DiskSec-MltBoot",
        0x75 => "PC/IX",
        0x80 => "Minix-<1.4a",
        0x81 => "Minix->1.4b",
        0x82 => "Linux-swap",
        0x83 => "Linux",
        0x84 => "OS/2-hidden-C:",
        0x85 => "Linux-extended",
        0x86 | 0x87 => "NTFS-volume-set",
        0x88 => "Linux-plaintext",
        0x8e => "Linux-LVM",
        0x93 => "Amoeba",
        0x94 => "Amoeba-BBT",
        0x9f => "BSD/OS",
        0xa0 => "Thinkpad-hib",
        0xa5 => "FreeBSD",
        0xa6 => "OpenBSD",
        0xa7 => "NeXTSTEP",
        0xa8 => "Darwin-UFS",
        0xa9 => "NetBSD",
        0xab => "Darwin-boot",
        0xb7 => "BSDI-fs",
        0xb8 => "BSDI-swap",
        0xbb => "Boot-Wizard-Hid",
        0xbe => "Solaris-boot",
        0xbf => "Solaris",
        0xc1 => "DRDOS/2-FAT12",
        0xc4 => "DRDOS/2-smFAT16",
        0xc6 => "DRDOS/2-FAT16",
        0xc7 => "Syrinx",
        0xda => "Non-FS-data",
        0xdb => "CP/M/CTOS",
        0xde => "Dell-Utility",
        0xdf => "BootIt",
        0xe1 => "DOS-access",
        0xe3 => "DOS-R/O",
        0xe4 | 0xf1 | 0xf4 => "SpeedStor",
        0xeb => "BeOS-fs",
        0xee => "EFI-GPT",
        0xef => "EFI-FAT",
        0xf0 => "Lnx/PA-RISC-bt",
        0xf2 => "DOS-secondary",
        0xfd => "Lnx-RAID-auto",
        0xfe => "LANstep",
        0xff => "XENIX-BBT",
        _ => "Unknown",
    }
}

/// Convert a boot sector's `media_type` byte to a short descriptive name.
/// Carried from `disk.c`'s `msdos_get_media_type`, condensed to one line per
/// code (the original returns multi-paragraph historical floppy-geometry
/// prose; a CLI `info` line has no use for that much detail).
pub fn msdos_get_media_type(media_type: u8) -> &'static str {
    match media_type {
        0xE5 => "8-inch single-sided (243 KB, DR-DOS)",
        0xED => "5.25-inch double-sided (720 KB, Tandy 2000)",
        0xF0 => "3.5-inch 1.44/2.88 MB / superfloppy",
        0xF8 => "fixed disk",
        0xF9 => "3.5-inch 720 KB/1.44 MB or 5.25-inch 1.2 MB",
        0xFA => "320 KB single-sided / RAM or ROM disk",
        0xFB => "640 KB double-sided",
        0xFC => "180 KB 5.25-inch single-sided",
        0xFD => "360 KB 5.25-inch double-sided / 500.5 KB 8-inch",
        0xFE => "160 KB 5.25-inch single-sided / 8-inch",
        0xFF => "320 KB 5.25-inch double-sided",
        _ => "unknown",
    }
}

/// Inverse of [`msdos_get_systype`], case-insensitive. Returns `None` for an
/// unrecognized name, mirroring `disk.c`'s `msdos_parse_systype` which
/// returns 0 for "Empty" and any unmatched string alike — here a caller can
/// tell the two apart.
pub fn msdos_parse_systype(name: &str) -> Option<u8> {
    (0u32..=0xff).map(|i| i as u8).find(|&id| {
        msdos_get_systype(id as u32).eq_ignore_ascii_case(name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systype_round_trips_for_common_ids() {
        for id in [0x01u8, 0x04, 0x06, 0x0b, 0x0c, 0x83] {
            let name = msdos_get_systype(id as u32);
            assert_eq!(msdos_parse_systype(name), Some(id));
        }
    }

    #[test]
    fn absent_entry_detected() {
        let e = PartitionEntry::default();
        assert!(!e.is_present());
    }

    #[test]
    fn media_type_names_common_codes() {
        assert_eq!(msdos_get_media_type(0xF8), "fixed disk");
        assert_eq!(msdos_get_media_type(0xF0), "3.5-inch 1.44/2.88 MB / superfloppy");
        assert_eq!(msdos_get_media_type(0x00), "unknown");
    }
}
