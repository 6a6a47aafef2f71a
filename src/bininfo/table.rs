//! Binary info header location and entry table walk.
//!
//! The header is a word-aligned `BI_MAGIC`, three little-endian words
//! (entry table start, entry table end, mapping table) and `BI_END`. The
//! entry table is an array of absolute pointers, one per record.

use crate::bininfo::entries::decoder_for;
use crate::bininfo::types::*;
use crate::config::DecodeConfig;
use crate::error::{DeclError, Result};
use crate::image::{le_u16, le_u32, AddressMap, AddressableImage, MappingEntry};
use memchr::memmem;
use tracing::{debug, trace, warn};

/// Upper bound on mapping table records read before giving up on a terminator.
pub const MAX_MAPPING_ENTRIES: usize = 16;

const MAPPING_ENTRY_SIZE: usize = 12;

/// Find the first word-aligned `BI_MAGIC` in the image.
///
/// Each span is read in windows of `config.scan_window` bytes; windows
/// overlap by three bytes so a magic split across two windows is still seen.
pub fn find_magic(image: &dyn AddressableImage, config: &DecodeConfig) -> Result<Option<u32>> {
    let window = config.scan_window.max(2 * BI_MAGIC.len());
    let finder = memmem::Finder::new(&BI_MAGIC);

    for span in image.spans() {
        let mut pos = span.start as u64;
        let end = span.end();
        while pos < end {
            let len = (end - pos).min(window as u64) as usize;
            let chunk = image.read(pos as u32, len)?;
            let hit = finder
                .find_iter(&chunk)
                .map(|i| pos + i as u64)
                .find(|addr| addr % 4 == 0);
            if let Some(addr) = hit {
                return Ok(Some(addr as u32));
            }
            if pos + len as u64 >= end {
                break;
            }
            pos += (len - (BI_MAGIC.len() - 1)) as u64;
        }
    }
    Ok(None)
}

/// Locate and validate the binary info header.
pub fn locate_header(
    image: &dyn AddressableImage,
    config: &DecodeConfig,
) -> Result<BinaryInfoHeader> {
    let address = find_magic(image, config)?.ok_or(DeclError::HeaderNotFound)?;
    debug!(address, "Found binary info magic");

    let malformed = |reason: &str| DeclError::HeaderMalformed {
        address,
        reason: reason.to_string(),
    };
    let body_len = (HEADER_WORDS + 1) * 4;
    let body = address
        .checked_add(BI_MAGIC.len() as u32)
        .ok_or_else(|| malformed("header runs past the address space"))
        .and_then(|start| {
            image
                .read(start, body_len)
                .map_err(|_| malformed("header truncated"))
        })?;

    if let Some(word) = (0..HEADER_WORDS).find(|w| body[w * 4..w * 4 + 4] == BI_END) {
        return Err(malformed(&format!("terminator after {} words, expected {}", word, HEADER_WORDS)));
    }
    if body[HEADER_WORDS * 4..] != BI_END {
        return Err(malformed("missing terminator"));
    }

    Ok(BinaryInfoHeader {
        address,
        entries_start: le_u32(&body, 0),
        entries_end: le_u32(&body, 4),
        mapping_table: le_u32(&body, 8),
    })
}

/// Read the entry pointer array described by the header.
pub fn read_entry_pointers(
    image: &dyn AddressableImage,
    header: &BinaryInfoHeader,
) -> Result<Vec<u32>> {
    let (start, end) = (header.entries_start, header.entries_end);
    if end < start || (end - start) % 4 != 0 {
        return Err(DeclError::InvalidRange { start, end });
    }
    let bytes = image.read(start, (end - start) as usize)?;
    Ok(bytes.chunks_exact(4).map(|w| le_u32(w, 0)).collect())
}

/// Read the RAM-to-flash mapping table; problems leave the map short, never fail.
pub fn read_address_map(image: &dyn AddressableImage, header: &BinaryInfoHeader) -> AddressMap {
    let mut entries = Vec::new();
    if header.mapping_table == 0 {
        return AddressMap::default();
    }

    for i in 0..MAX_MAPPING_ENTRIES {
        let address = (header.mapping_table as u64) + (i * MAPPING_ENTRY_SIZE) as u64;
        let record = match u32::try_from(address)
            .ok()
            .map(|a| image.read(a, MAPPING_ENTRY_SIZE))
        {
            Some(Ok(record)) => record,
            _ => {
                warn!(address, "Mapping table unreadable, using {} entries", entries.len());
                return AddressMap::new(entries);
            }
        };
        let source_start = le_u32(&record, 0);
        if source_start == 0 {
            return AddressMap::new(entries);
        }
        entries.push(MappingEntry {
            source_start,
            dest_start: le_u32(&record, 4),
            dest_end: le_u32(&record, 8),
        });
    }

    warn!(
        address = header.mapping_table,
        limit = MAX_MAPPING_ENTRIES,
        "Mapping table has no terminator within limit"
    );
    AddressMap::new(entries)
}

/// Decode the entry behind one pointer.
///
/// Entries from another source or of a type without a decoder come back
/// as a [`SkipReason`] alongside genuine failures.
pub fn decode_entry(
    image: &dyn AddressableImage,
    pointer: u32,
    config: &DecodeConfig,
) -> std::result::Result<DecodedEntry, SkipReason> {
    let prefix = image
        .read(pointer, ENTRY_PREFIX_SIZE)
        .map_err(SkipReason::Failed)?;
    let type_tag = le_u16(&prefix, 0);
    let source_tag = [prefix[2], prefix[3]];

    if !config.accepts_source_tag(source_tag) {
        return Err(SkipReason::UnknownSourceTag(source_tag));
    }
    let decoder = decoder_for(type_tag).ok_or(SkipReason::UnknownEntryType(type_tag))?;

    let payload = pointer
        .checked_add(ENTRY_PREFIX_SIZE as u32)
        .ok_or(DeclError::OutOfRange {
            address: pointer,
            len: ENTRY_PREFIX_SIZE + decoder.payload_len,
        })
        .and_then(|addr| image.read(addr, decoder.payload_len))
        .map_err(SkipReason::Failed)?;
    let raw = RawEntry {
        type_tag,
        source_tag,
        payload: &payload[..],
    };
    trace!(pointer, type_name = type_name(type_tag), "Decoding entry");
    decoder.decode(&raw, image, config).map_err(SkipReason::Failed)
}

/// Decode every pointer in order, folding results into an [`EntryMap`].
pub fn walk(
    image: &dyn AddressableImage,
    pointers: &[u32],
    config: &DecodeConfig,
) -> (EntryMap, Vec<SkippedEntry>) {
    let mut entries = EntryMap::new();
    let mut skipped = Vec::new();

    for &pointer in pointers {
        match decode_entry(image, pointer, config) {
            Ok(entry) => {
                trace!(pointer, key = %entry.key, "Decoded entry");
                entries.insert(entry);
            }
            Err(reason) => {
                match &reason {
                    SkipReason::Failed(err) => warn!(pointer, error = %err, "Dropping entry"),
                    other => debug!(pointer, reason = %other, "Skipping entry"),
                }
                skipped.push(SkippedEntry { pointer, reason });
            }
        }
    }

    (entries, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::FlatImage;

    const BASE: u32 = 0x1000_0000;

    fn words(ws: &[u32]) -> Vec<u8> {
        ws.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn with_header(at: usize, body: &[u8], total: usize) -> FlatImage {
        let mut data = vec![0u8; total];
        data[at..at + 4].copy_from_slice(&BI_MAGIC);
        data[at + 4..at + 4 + body.len()].copy_from_slice(body);
        FlatImage::new(data, BASE)
    }

    fn header_body(start: u32, end: u32, map: u32) -> Vec<u8> {
        let mut b = words(&[start, end, map]);
        b.extend_from_slice(&BI_END);
        b
    }

    #[test]
    fn finds_aligned_magic() {
        let img = with_header(0x100, &header_body(0, 0, 0), 0x200);
        let h = locate_header(&img, &DecodeConfig::default()).unwrap();
        assert_eq!(h.address, BASE + 0x100);
    }

    #[test]
    fn ignores_unaligned_magic() {
        let mut data = vec![0u8; 0x100];
        data[0x11..0x15].copy_from_slice(&BI_MAGIC);
        let img = FlatImage::new(data, BASE);
        assert_eq!(find_magic(&img, &DecodeConfig::default()).unwrap(), None);
    }

    #[test]
    fn finds_magic_across_window_boundary() {
        let img = with_header(0x1c, &header_body(0, 0, 0), 0x40);
        let cfg = DecodeConfig {
            scan_window: 0x1e,
            ..DecodeConfig::default()
        };
        assert_eq!(find_magic(&img, &cfg).unwrap(), Some(BASE + 0x1c));
    }

    #[test]
    fn missing_magic_is_header_not_found() {
        let img = FlatImage::new(vec![0u8; 0x400], BASE);
        let err = locate_header(&img, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, DeclError::HeaderNotFound));
    }

    #[test]
    fn missing_terminator_is_malformed() {
        let img = with_header(0, &words(&[1, 2, 3, 4]), 0x40);
        let err = locate_header(&img, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, DeclError::HeaderMalformed { address: BASE, .. }));
    }

    #[test]
    fn early_terminator_is_malformed() {
        let mut body = words(&[1, 2]);
        body.extend_from_slice(&BI_END);
        let img = with_header(0, &body, 0x40);
        let err = locate_header(&img, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, DeclError::HeaderMalformed { .. }));
    }

    #[test]
    fn truncated_header_is_malformed() {
        let img = with_header(0x38, &[], 0x40);
        let err = locate_header(&img, &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, DeclError::HeaderMalformed { ref reason, .. } if reason == "header truncated"));
    }

    #[test]
    fn pointer_range_validation() {
        let img = FlatImage::new(vec![0u8; 0x40], BASE);
        let mut h = BinaryInfoHeader {
            address: BASE,
            entries_start: BASE + 0x10,
            entries_end: BASE + 0x08,
            mapping_table: 0,
        };
        assert!(matches!(
            read_entry_pointers(&img, &h),
            Err(DeclError::InvalidRange { .. })
        ));
        h.entries_end = BASE + 0x13;
        assert!(matches!(
            read_entry_pointers(&img, &h),
            Err(DeclError::InvalidRange { .. })
        ));
        h.entries_end = BASE + 0x10;
        assert_eq!(read_entry_pointers(&img, &h).unwrap(), Vec::<u32>::new());
        h.entries_end = BASE + 0x80;
        assert!(matches!(
            read_entry_pointers(&img, &h),
            Err(DeclError::OutOfRange { .. })
        ));
    }

    #[test]
    fn reads_pointer_array() {
        let mut data = vec![0u8; 0x40];
        data[0x20..0x2c].copy_from_slice(&words(&[BASE + 4, BASE + 8, BASE + 12]));
        let img = FlatImage::new(data, BASE);
        let h = BinaryInfoHeader {
            address: BASE,
            entries_start: BASE + 0x20,
            entries_end: BASE + 0x2c,
            mapping_table: 0,
        };
        assert_eq!(
            read_entry_pointers(&img, &h).unwrap(),
            vec![BASE + 4, BASE + 8, BASE + 12]
        );
    }

    #[test]
    fn reads_mapping_table_until_terminator() {
        let mut data = vec![0u8; 0x40];
        data[0x10..0x1c].copy_from_slice(&words(&[BASE + 0x30, 0x2000_0000, 0x2000_0010]));
        let img = FlatImage::new(data, BASE);
        let h = BinaryInfoHeader {
            address: BASE,
            entries_start: 0,
            entries_end: 0,
            mapping_table: BASE + 0x10,
        };
        let map = read_address_map(&img, &h);
        assert_eq!(map.entries().len(), 1);
        assert_eq!(map.translate(0x2000_0004), BASE + 0x34);
    }

    #[test]
    fn unreadable_mapping_table_is_empty() {
        let img = FlatImage::new(vec![0u8; 0x10], BASE);
        let h = BinaryInfoHeader {
            address: BASE,
            entries_start: 0,
            entries_end: 0,
            mapping_table: 0x2000_0000,
        };
        assert!(read_address_map(&img, &h).is_empty());
    }

    #[test]
    fn skips_foreign_source_and_unknown_type() {
        let mut data = words(&[0, 0]);
        data[0..2].copy_from_slice(&TYPE_ID_AND_INT.to_le_bytes());
        data[2..4].copy_from_slice(b"JP");
        data[4..6].copy_from_slice(&TYPE_BSON.to_le_bytes());
        data[6..8].copy_from_slice(b"RP");
        let img = FlatImage::new(data, BASE);
        let cfg = DecodeConfig::default();

        assert!(matches!(
            decode_entry(&img, BASE, &cfg),
            Err(SkipReason::UnknownSourceTag(t)) if &t == b"JP"
        ));
        assert!(matches!(
            decode_entry(&img, BASE + 4, &cfg),
            Err(SkipReason::UnknownEntryType(TYPE_BSON))
        ));
    }

    #[test]
    fn truncated_payload_fails_entry() {
        let mut data = TYPE_ID_AND_INT.to_le_bytes().to_vec();
        data.extend_from_slice(b"RP");
        data.extend_from_slice(&[1, 2, 3]);
        let img = FlatImage::new(data, BASE);
        assert!(matches!(
            decode_entry(&img, BASE, &DecodeConfig::default()),
            Err(SkipReason::Failed(DeclError::OutOfRange { .. }))
        ));
    }
}
