//! C7 — the name codec.
//!
//! Encodes a Unix-style path component into an 8.3 short name plus its VFAT
//! long-name fragment chain, and decodes the inverse. The checksum formula
//! and fragment layout are carried byte-for-byte from `entry.rs`'s
//! `ShortDirEntry::gen_check_sum` / `LongDirEntry`
//! (`examples/CelestialMelody-fat32-rs/src/entry.rs`); short-name generation
//! is simplified per spec §4.7 and the Open Questions in spec §9 to the
//! documented single `~1` suffix, with no collision disambiguation.

use crate::dirent::VfatFragment;
use crate::{ATTR_LONG_NAME, LAST_LONG_ENTRY, LONG_NAME_CHUNK};

/// Characters invalid anywhere in an 8.3 short name (spec §4.7 step 2).
/// Carried from the teacher's doc comment on `ShortDirEntry::is_valid`,
/// minus the implied dot between base and extension.
const SHORT_NAME_ILLEGAL: &[u8] = &[
    0x22, 0x2A, 0x2B, 0x2C, 0x2F, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F, 0x5B, 0x5C, 0x5D, 0x7C,
];

/// Checksum over the canonical 11-byte short name (spec §3): `c_0 = 0;
/// c_{i+1} = ((c_i >> 1) | ((c_i & 1) << 7)) + name_byte_{i+1}`.
pub fn short_name_checksum(name11: &[u8; 11]) -> u8 {
    let mut sum: u8 = 0;
    for &b in name11 {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b);
    }
    sum
}

/// The result of encoding one path component: its 8.3 short name and the
/// ordered VFAT fragments that must precede it on disk (highest ordinal
/// first, i.e. disk order — callers write `fragments[0]` first).
pub struct EncodedName {
    pub short: [u8; 11],
    pub fragments: Vec<VfatFragment>,
}

/// Total directory slots this name occupies: fragments plus the short slot.
impl EncodedName {
    pub fn slot_count(&self) -> usize {
        self.fragments.len() + 1
    }
}

fn is_dot_name(name: &str) -> bool {
    name == "." || name == ".."
}

/// Split `name` into base/extension on the *last* dot, uppercasing and
/// replacing illegal bytes with `_`, the way `split_name_ext` /
/// `short_name_format` do in the teacher (`entry.rs`, `fs.rs` helpers).
fn split_and_sanitize(name: &str) -> (Vec<u8>, Vec<u8>) {
    let upper = name.to_ascii_uppercase();
    let (base, ext) = match upper.rfind('.') {
        Some(pos) if pos > 0 => (&upper[..pos], &upper[pos + 1..]),
        _ => (upper.as_str(), ""),
    };
    let sanitize = |s: &str| -> Vec<u8> {
        s.bytes()
            .filter(|b| *b != b' ')
            .map(|b| {
                if b < 0x20 || SHORT_NAME_ILLEGAL.contains(&b) {
                    b'_'
                } else {
                    b
                }
            })
            .collect()
    };
    (sanitize(base), sanitize(ext))
}

/// Build the canonical 11-byte short name for `name` (spec §4.7 step 2).
/// Oversized or sanitized-and-changed bases get the `~1` suffix at
/// positions 6..7 per spec — always, not just on an actual collision
/// (documented limitation, spec §9 Open Questions).
pub fn encode_short_name(name: &str) -> [u8; 11] {
    if name == "." {
        let mut out = [b' '; 11];
        out[0] = b'.';
        return out;
    }
    if name == ".." {
        let mut out = [b' '; 11];
        out[0] = b'.';
        out[1] = b'.';
        return out;
    }

    let (mut base, mut ext) = split_and_sanitize(name);
    let needs_suffix = base.len() > 8 || ext.len() > 3;

    if needs_suffix {
        base.truncate(6);
        base.push(b'~');
        base.push(b'1');
    } else {
        base.truncate(8);
    }
    ext.truncate(3);

    let mut out = [b' '; 11];
    out[0..base.len()].copy_from_slice(&base);
    out[8..8 + ext.len()].copy_from_slice(&ext);
    out
}

/// Encode one UTF-16 long name into its 8.3 short name plus VFAT fragments
/// (spec §4.7). `.`/`..` get zero fragments.
pub fn encode(name: &str) -> EncodedName {
    let short = encode_short_name(name);
    if is_dot_name(name) {
        return EncodedName {
            short,
            fragments: Vec::new(),
        };
    }

    let checksum = short_name_checksum(&short);
    let units: Vec<u16> = name.encode_utf16().collect();
    let k = (units.len() + LONG_NAME_CHUNK - 1) / LONG_NAME_CHUNK.max(1);
    let k = k.max(1);

    let mut fragments = Vec::with_capacity(k);
    // Ordinals k, k-1, ..., 1, in that disk order; the highest ordinal (the
    // fragment placed first on disk, i.e. last in logical file order) bears
    // the 0x40 "last" marker.
    for ordinal in (1..=k as u8).rev() {
        let chunk_start = (ordinal as usize - 1) * LONG_NAME_CHUNK;
        let mut chars = [0xFFFFu16; LONG_NAME_CHUNK];
        let mut terminated = false;
        for (slot, ch) in chars.iter_mut().enumerate() {
            let idx = chunk_start + slot;
            if idx < units.len() {
                *ch = units[idx];
            } else if !terminated {
                *ch = 0x0000;
                terminated = true;
            }
        }
        let order = if ordinal as usize == k {
            ordinal | LAST_LONG_ENTRY
        } else {
            ordinal
        };
        fragments.push(VfatFragment {
            order,
            name1: chars[0..5].try_into().unwrap(),
            attr: ATTR_LONG_NAME,
            entry_type: 0,
            checksum,
            name2: chars[5..11].try_into().unwrap(),
            name3: chars[11..13].try_into().unwrap(),
        });
    }

    EncodedName { short, fragments }
}

/// Accumulates VFAT fragments encountered while scanning a directory, in
/// whatever order they're stored on disk (ordinal k, k-1, ..., 1), and
/// reconstructs the long name once the short-name slot that terminates the
/// group is reached (spec §4.7 "Decoding a listing", invariant D-1).
#[derive(Default)]
pub struct LongNameAccumulator {
    fragments: Vec<VfatFragment>,
}

impl LongNameAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, raw: &[u8; crate::DIRENT_SIZE]) {
        self.fragments.push(VfatFragment::decode(raw));
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn reset(&mut self) {
        self.fragments.clear();
    }

    /// Validate the accumulated group against `short_checksum` (the checksum
    /// implied by the short-name slot that follows) and, if valid, return
    /// the reconstructed long name. A broken group — checksum mismatch,
    /// missing ordinal, more than one "last" marker — yields `None` and is
    /// silently ignored, per invariant D-1.
    pub fn finish(&self, short_checksum: u8) -> Option<String> {
        if self.fragments.is_empty() {
            return None;
        }
        let n = self.fragments.len();
        let mut seen = vec![false; n];
        let mut last_count = 0;
        for f in &self.fragments {
            if f.checksum != short_checksum {
                return None;
            }
            let ord = f.ordinal() as usize;
            if ord == 0 || ord > n || seen[ord - 1] {
                return None;
            }
            seen[ord - 1] = true;
            if f.is_last() {
                last_count += 1;
            }
        }
        if last_count != 1 || !seen.iter().all(|&b| b) {
            return None;
        }

        let mut ordered: Vec<&VfatFragment> = self.fragments.iter().collect();
        ordered.sort_by_key(|f| f.ordinal());

        let mut units: Vec<u16> = Vec::with_capacity(n * LONG_NAME_CHUNK);
        for f in ordered {
            units.extend_from_slice(&f.chars());
        }
        if let Some(term) = units.iter().position(|&u| u == 0x0000) {
            units.truncate(term);
        } else {
            units.retain(|&u| u != 0xFFFF);
        }
        String::from_utf16(&units).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_deterministic_and_sensitive_to_every_byte() {
        let name11 = *b"README  TXT";
        let sum = short_name_checksum(&name11);
        assert_eq!(sum, short_name_checksum(&name11));

        let mut changed = name11;
        changed[0] = b'X';
        assert_ne!(sum, short_name_checksum(&changed));
    }

    #[test]
    fn long_name_round_trips_through_fragments() {
        let long = "A_rather_long_filename.TXT";
        let encoded = encode(long);
        assert_eq!(encoded.fragments.len(), 2); // ceil(26/13) == 2
        assert!(encoded.fragments[0].is_last());
        assert_eq!(encoded.fragments[0].ordinal(), 2);
        assert_eq!(encoded.fragments[1].ordinal(), 1);

        let mut acc = LongNameAccumulator::new();
        for f in &encoded.fragments {
            let raw = f.encode();
            acc.push(&raw);
        }
        let checksum = short_name_checksum(&encoded.short);
        let decoded = acc.finish(checksum).unwrap();
        assert_eq!(decoded, long);
    }

    #[test]
    fn dot_and_dotdot_have_no_fragments() {
        assert_eq!(encode(".").fragments.len(), 0);
        assert_eq!(encode("..").fragments.len(), 0);
    }

    #[test]
    fn short_name_gets_tilde_suffix_when_oversized() {
        // Base truncates to 6 bytes (the name field is only 8 bytes wide;
        // the "~1" suffix takes the remaining 2) then gets the suffix.
        let short = encode_short_name("A_rather_long_filename.TXT");
        assert_eq!(&short[0..8], b"A_RATH~1");
        assert_eq!(&short[8..11], b"TXT");
    }

    #[test]
    fn broken_checksum_is_ignored() {
        let encoded = encode("longer_name.bin");
        let mut acc = LongNameAccumulator::new();
        for f in &encoded.fragments {
            acc.push(&f.encode());
        }
        assert!(acc.finish(encoded.fragments[0].checksum.wrapping_add(1)).is_none());
    }
}
