//! The on-disk directory entry and VFAT long-name fragment (spec §3's
//! "Directory entry" and "VFAT long-name fragment").
//!
//! Both are 32-byte structures reached by raw offset arithmetic in the
//! teacher's `entry.rs` (`examples/CelestialMelody-fat32-rs/src/entry.rs`,
//! `ShortDirEntry`/`LongDirEntry`). Per REDESIGN FLAGS this module replaces
//! that with explicit `decode`/`encode` over a plain `[u8; 32]` slot and
//! keeps the two record kinds as separate owned types instead of one
//! `#[repr(packed)]` union reached through an attribute check.

use crate::{
    ATTR_ARCHIVE, ATTR_DIRECTORY, ATTR_LONG_NAME, DIRENT_SIZE, DIR_ENTRY_LAST_AND_UNUSED,
    DIR_ENTRY_UNUSED, LAST_LONG_ENTRY,
};

/// The lifecycle state of one 32-byte directory slot (spec §3 "Dirent
/// lifecycle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirSlotState {
    /// `name[0] == 0x00`: this and every following slot in the directory are
    /// unused. Scanning can stop here.
    Absent,
    /// `name[0] == 0xE5`: this slot held a live entry that was removed.
    Deleted,
    /// `attr == 0x0F`: a VFAT long-name fragment, not a short-name record.
    Fragment,
    /// An ordinary live short-name record.
    Live,
}

impl DirSlotState {
    pub fn classify(slot: &[u8; DIRENT_SIZE]) -> Self {
        if slot[0] == DIR_ENTRY_LAST_AND_UNUSED {
            DirSlotState::Absent
        } else if slot[0] == DIR_ENTRY_UNUSED {
            DirSlotState::Deleted
        } else if slot[11] == ATTR_LONG_NAME {
            DirSlotState::Fragment
        } else {
            DirSlotState::Live
        }
    }
}

/// A decoded 8.3 short-name directory entry (32 bytes).
#[derive(Debug, Clone)]
pub struct ShortDirEntry {
    pub name: [u8; 8],
    pub ext: [u8; 3],
    pub attr: u8,
    pub winnt_flags: u8,
    pub create_time_secs: u8,
    pub create_time: u16,
    pub create_date: u16,
    pub last_access_date: u16,
    pub high_first_cluster: u16,
    pub lm_time: u16,
    pub lm_date: u16,
    pub low_first_cluster: u16,
    pub size: u32,
}

impl ShortDirEntry {
    pub fn decode(buf: &[u8; DIRENT_SIZE]) -> Self {
        ShortDirEntry {
            name: buf[0..8].try_into().unwrap(),
            ext: buf[8..11].try_into().unwrap(),
            attr: buf[11],
            winnt_flags: buf[12],
            create_time_secs: buf[13],
            create_time: crate::read_le_u16(&buf[14..16]),
            create_date: crate::read_le_u16(&buf[16..18]),
            last_access_date: crate::read_le_u16(&buf[18..20]),
            high_first_cluster: crate::read_le_u16(&buf[20..22]),
            lm_time: crate::read_le_u16(&buf[22..24]),
            lm_date: crate::read_le_u16(&buf[24..26]),
            low_first_cluster: crate::read_le_u16(&buf[26..28]),
            size: crate::read_le_u32(&buf[28..32]),
        }
    }

    pub fn encode(&self) -> [u8; DIRENT_SIZE] {
        let mut buf = [0u8; DIRENT_SIZE];
        buf[0..8].copy_from_slice(&self.name);
        buf[8..11].copy_from_slice(&self.ext);
        buf[11] = self.attr;
        buf[12] = self.winnt_flags;
        buf[13] = self.create_time_secs;
        crate::write_le_u16(&mut buf[14..16], self.create_time);
        crate::write_le_u16(&mut buf[16..18], self.create_date);
        crate::write_le_u16(&mut buf[18..20], self.last_access_date);
        crate::write_le_u16(&mut buf[20..22], self.high_first_cluster);
        crate::write_le_u16(&mut buf[22..24], self.lm_time);
        crate::write_le_u16(&mut buf[24..26], self.lm_date);
        crate::write_le_u16(&mut buf[26..28], self.low_first_cluster);
        crate::write_le_u32(&mut buf[28..32], self.size);
        buf
    }

    pub fn first_cluster(&self) -> u32 {
        ((self.high_first_cluster as u32) << 16) | self.low_first_cluster as u32
    }

    pub fn set_first_cluster(&mut self, cluster: u32) {
        self.high_first_cluster = (cluster >> 16) as u16;
        self.low_first_cluster = (cluster & 0xFFFF) as u16;
    }

    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_DIRECTORY != 0
    }

    pub fn is_volume_id(&self) -> bool {
        self.attr & crate::ATTR_VOLUME_ID != 0
    }

    /// The 11 raw name bytes as stored on disk, used for the VFAT checksum
    /// (spec §3's checksum formula operates on exactly these bytes).
    pub fn name_bytes(&self) -> [u8; 11] {
        let mut out = [0u8; 11];
        out[0..8].copy_from_slice(&self.name);
        out[8..11].copy_from_slice(&self.ext);
        out
    }

    pub fn checksum(&self) -> u8 {
        crate::name::short_name_checksum(&self.name_bytes())
    }

    /// Render the 8.3 name as a display string, e.g. `A_RATHE~1.TXT`, or
    /// just the base when `ext` is all spaces. `.`/`..` are rendered
    /// literally.
    pub fn short_display_name(&self) -> String {
        if self.name == *b".       " && self.ext == *b"   " {
            return ".".to_string();
        }
        if self.name == *b"..      " && self.ext == *b"   " {
            return "..".to_string();
        }
        let base = String::from_utf8_lossy(&self.name)
            .trim_end()
            .to_string();
        let ext = String::from_utf8_lossy(&self.ext).trim_end().to_string();
        if ext.is_empty() {
            base
        } else {
            format!("{}.{}", base, ext)
        }
    }

    /// A blank entry for `.`/`..`/new-file construction, inheriting
    /// attribute, cluster and timestamp arguments from the caller.
    pub fn new_short(name_bytes: [u8; 11], attr: u8, first_cluster: u32, size: u32) -> Self {
        let mut e = ShortDirEntry {
            name: name_bytes[0..8].try_into().unwrap(),
            ext: name_bytes[8..11].try_into().unwrap(),
            attr,
            winnt_flags: 0,
            create_time_secs: 0,
            create_time: 0,
            create_date: 0,
            last_access_date: 0,
            high_first_cluster: 0,
            lm_time: 0,
            lm_date: 0,
            low_first_cluster: 0,
            size,
        };
        e.set_first_cluster(first_cluster);
        e
    }

    /// Stamp creation/modification/access times with the current local time
    /// (spec §4.7 step 5's "modification date from the host file where
    /// available" — the host's mtime isn't threaded through yet, so `add`
    /// uses wall-clock time at the moment of ingest instead).
    pub fn with_timestamp_now(mut self) -> Self {
        let (date, time, secs) = dos_date_time_now();
        self.create_date = date;
        self.create_time = time;
        self.create_time_secs = secs;
        self.last_access_date = date;
        self.lm_date = date;
        self.lm_time = time;
        self
    }

    /// Modification timestamp as a [`chrono::NaiveDateTime`], if the packed
    /// fields decode to a representable date (spec §3's `lm_time`/`lm_date`
    /// bit layout).
    pub fn modified_at(&self) -> Option<chrono::NaiveDateTime> {
        decode_dos_datetime(self.lm_date, self.lm_time)
    }

    pub fn is_archive_default(&self) -> bool {
        self.attr & ATTR_ARCHIVE != 0
    }
}

/// Pack the current local time into FAT's date/time fields (spec §3: date is
/// 5 bits day, 4 bits month, 7 bits year-since-1980; time is 5 bits
/// seconds÷2, 6 bits minutes, 5 bits hours). Returns `(date, time,
/// create_time_secs)`, the last being the two-second remainder FAT keeps
/// separately from the packed time field.
pub fn dos_date_time_now() -> (u16, u16, u8) {
    use chrono::{Datelike, Local, Timelike};
    let now = Local::now();
    encode_dos_datetime(now.year(), now.month(), now.day(), now.hour(), now.minute(), now.second())
}

fn encode_dos_datetime(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> (u16, u16, u8) {
    let year_since_1980 = (year - 1980).clamp(0, 127) as u16;
    let date = (year_since_1980 << 9) | ((month as u16 & 0xF) << 5) | (day as u16 & 0x1F);
    let time = ((hour as u16 & 0x1F) << 11) | ((minute as u16 & 0x3F) << 5) | ((second as u16 / 2) & 0x1F);
    let secs_remainder = ((second % 2) * 100) as u8;
    (date, time, secs_remainder)
}

/// Inverse of the packing [`dos_date_time_now`] performs. Returns `None` for
/// an all-zero (never-stamped) field pair or an otherwise invalid date.
fn decode_dos_datetime(date: u16, time: u16) -> Option<chrono::NaiveDateTime> {
    use chrono::{NaiveDate, NaiveTime};
    if date == 0 {
        return None;
    }
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0xF) as u32;
    let day = (date & 0x1F) as u32;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;
    let d = NaiveDate::from_ymd_opt(year, month, day)?;
    let t = NaiveTime::from_hms_opt(hour, minute, second)?;
    Some(d.and_time(t))
}

/// A decoded VFAT long-name fragment (32 bytes, `attr == 0x0F`).
#[derive(Debug, Clone)]
pub struct VfatFragment {
    pub order: u8,
    pub name1: [u16; 5],
    pub attr: u8,
    pub entry_type: u8,
    pub checksum: u8,
    pub name2: [u16; 6],
    pub name3: [u16; 2],
}

impl VfatFragment {
    pub fn decode(buf: &[u8; DIRENT_SIZE]) -> Self {
        let read_units = |src: &[u8], n: usize| -> Vec<u16> {
            (0..n)
                .map(|i| crate::read_le_u16(&src[i * 2..i * 2 + 2]))
                .collect()
        };
        let name1: Vec<u16> = read_units(&buf[1..11], 5);
        let name2: Vec<u16> = read_units(&buf[14..26], 6);
        let name3: Vec<u16> = read_units(&buf[28..32], 2);
        VfatFragment {
            order: buf[0],
            name1: name1.try_into().unwrap(),
            attr: buf[11],
            entry_type: buf[12],
            checksum: buf[13],
            name2: name2.try_into().unwrap(),
            name3: name3.try_into().unwrap(),
        }
    }

    pub fn encode(&self) -> [u8; DIRENT_SIZE] {
        let mut buf = [0u8; DIRENT_SIZE];
        buf[0] = self.order;
        for (i, unit) in self.name1.iter().enumerate() {
            crate::write_le_u16(&mut buf[1 + i * 2..3 + i * 2], *unit);
        }
        buf[11] = ATTR_LONG_NAME;
        buf[12] = self.entry_type;
        buf[13] = self.checksum;
        for (i, unit) in self.name2.iter().enumerate() {
            crate::write_le_u16(&mut buf[14 + i * 2..16 + i * 2], *unit);
        }
        buf[26] = 0;
        buf[27] = 0;
        for (i, unit) in self.name3.iter().enumerate() {
            crate::write_le_u16(&mut buf[28 + i * 2..30 + i * 2], *unit);
        }
        buf
    }

    /// 1-based position within its group, with the `0x40` "last fragment"
    /// marker bit stripped off.
    pub fn ordinal(&self) -> u8 {
        self.order & !LAST_LONG_ENTRY
    }

    pub fn is_last(&self) -> bool {
        self.order & LAST_LONG_ENTRY != 0
    }

    /// The 13 UTF-16 code units this fragment carries, in on-disk order.
    pub fn chars(&self) -> [u16; 13] {
        let mut out = [0u16; 13];
        out[0..5].copy_from_slice(&self.name1);
        out[5..11].copy_from_slice(&self.name2);
        out[11..13].copy_from_slice(&self.name3);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_absent_deleted_live() {
        let mut absent = [0u8; DIRENT_SIZE];
        absent[0] = 0x00;
        assert_eq!(DirSlotState::classify(&absent), DirSlotState::Absent);

        let mut deleted = [0u8; DIRENT_SIZE];
        deleted[0] = 0xE5;
        assert_eq!(DirSlotState::classify(&deleted), DirSlotState::Deleted);

        let mut live = [0x20u8; DIRENT_SIZE];
        live[0] = b'A';
        live[11] = ATTR_ARCHIVE;
        assert_eq!(DirSlotState::classify(&live), DirSlotState::Live);
    }

    #[test]
    fn short_entry_round_trips_cluster_split() {
        let mut e = ShortDirEntry::new_short(*b"README  TXT", ATTR_ARCHIVE, 0x0002_ABCD, 42);
        assert_eq!(e.first_cluster(), 0x0002_ABCD);
        e.set_first_cluster(0x0001_0000);
        assert_eq!(e.high_first_cluster, 1);
        assert_eq!(e.low_first_cluster, 0);
        let raw = e.encode();
        let back = ShortDirEntry::decode(&raw);
        assert_eq!(back.first_cluster(), 0x0001_0000);
        assert_eq!(back.size, 42);
    }

    #[test]
    fn fragment_round_trips() {
        let f = VfatFragment {
            order: 1 | LAST_LONG_ENTRY,
            name1: [b'h' as u16, b'e' as u16, b'l' as u16, b'l' as u16, b'o' as u16],
            attr: ATTR_LONG_NAME,
            entry_type: 0,
            checksum: 0x42,
            name2: [0, 0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF, 0xFFFF],
            name3: [0xFFFF, 0xFFFF],
        };
        let raw = f.encode();
        let back = VfatFragment::decode(&raw);
        assert_eq!(back.ordinal(), 1);
        assert!(back.is_last());
        assert_eq!(back.checksum, 0x42);
        assert_eq!(&back.chars()[0..5], &f.name1);
    }

    #[test]
    fn dos_datetime_round_trips_even_second() {
        let (date, time, secs) = encode_dos_datetime(2024, 3, 17, 13, 45, 30);
        assert_eq!(secs, 0);
        let decoded = decode_dos_datetime(date, time).unwrap();
        assert_eq!(decoded.to_string(), "2024-03-17 13:45:30");
    }

    #[test]
    fn dos_datetime_odd_second_rounds_down_into_remainder() {
        let (date, time, secs) = encode_dos_datetime(2024, 3, 17, 13, 45, 31);
        assert_eq!(secs, 100);
        let decoded = decode_dos_datetime(date, time).unwrap();
        assert_eq!(decoded.to_string(), "2024-03-17 13:45:30");
    }

    #[test]
    fn dos_datetime_zero_date_decodes_to_none() {
        assert!(decode_dos_datetime(0, 0).is_none());
    }

    #[test]
    fn with_timestamp_now_stamps_a_decodable_modification_time() {
        let e = ShortDirEntry::new_short(*b"README  TXT", ATTR_ARCHIVE, 2, 0).with_timestamp_now();
        assert!(e.modified_at().is_some());
    }
}
