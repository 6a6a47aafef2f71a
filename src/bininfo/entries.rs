//! Per-type entry decoders.
//!
//! Each decoder gets the fixed-width payload that follows the 4-byte entry
//! prefix, plus the image for resolving string pointers inside it. Dispatch
//! goes through [`decoder_for`]; a type without a decoder is a defined skip,
//! not an error.

use crate::bininfo::types::*;
use crate::config::DecodeConfig;
use crate::error::Result;
use crate::image::{le_u16, le_u32, AddressableImage};

/// Signature shared by all entry decoders.
pub type DecodeFn = fn(&[u8], &dyn AddressableImage, &DecodeConfig) -> Result<DecodedEntry>;

/// A registered decoder for one entry type.
#[derive(Clone, Copy)]
pub struct EntryDecoder {
    pub type_tag: u16,
    /// Payload bytes after the entry prefix.
    pub payload_len: usize,
    pub func: DecodeFn,
}

impl EntryDecoder {
    /// Decode a raw entry whose payload was read with `payload_len` bytes.
    pub fn decode(
        &self,
        raw: &RawEntry<'_>,
        image: &dyn AddressableImage,
        config: &DecodeConfig,
    ) -> Result<DecodedEntry> {
        debug_assert_eq!(raw.type_tag, self.type_tag);
        debug_assert_eq!(raw.payload.len(), self.payload_len);
        (self.func)(raw.payload, image, config)
    }
}

static DECODERS: [EntryDecoder; 4] = [
    EntryDecoder {
        type_tag: TYPE_ID_AND_INT,
        payload_len: 8,
        func: decode_id_and_int,
    },
    EntryDecoder {
        type_tag: TYPE_ID_AND_STRING,
        payload_len: 8,
        func: decode_id_and_string,
    },
    EntryDecoder {
        type_tag: TYPE_BLOCK_DEVICE,
        payload_len: 18,
        func: decode_block_device,
    },
    EntryDecoder {
        type_tag: TYPE_NAMED_GROUP,
        payload_len: 16,
        func: decode_named_group,
    },
];

/// Look up the decoder registered for an entry type.
pub fn decoder_for(type_tag: u16) -> Option<&'static EntryDecoder> {
    DECODERS.iter().find(|d| d.type_tag == type_tag)
}

fn decode_id_and_int(
    payload: &[u8],
    _image: &dyn AddressableImage,
    _config: &DecodeConfig,
) -> Result<DecodedEntry> {
    let id = le_u32(payload, 0);
    let value = le_u32(payload, 4);
    Ok(DecodedEntry::new(Key::for_id(id), EntryValue::Int(value)))
}

fn decode_id_and_string(
    payload: &[u8],
    image: &dyn AddressableImage,
    config: &DecodeConfig,
) -> Result<DecodedEntry> {
    let id = le_u32(payload, 0);
    let text = image.read_cstring(le_u32(payload, 4), config.max_string_len)?;
    Ok(DecodedEntry::new(Key::for_id(id), EntryValue::Text(text)))
}

fn decode_block_device(
    payload: &[u8],
    image: &dyn AddressableImage,
    config: &DecodeConfig,
) -> Result<DecodedEntry> {
    let name_addr = le_u32(payload, 0);
    let address = le_u32(payload, 4);
    let size = le_u32(payload, 8);
    // payload[12..16] points at an extension record no format revision defines yet.
    let flags = le_u16(payload, 16);
    let name = image.read_cstring(name_addr, config.max_string_len)?;
    Ok(DecodedEntry::new(
        Key::Named(KEY_BLOCK_DEVICE),
        EntryValue::BlockDevice(BlockDevice {
            name,
            address,
            size,
            flags,
        }),
    ))
}

fn decode_named_group(
    payload: &[u8],
    image: &dyn AddressableImage,
    config: &DecodeConfig,
) -> Result<DecodedEntry> {
    let parent = le_u32(payload, 0);
    let flags = le_u16(payload, 4);
    let tag = le_u16(payload, 6);
    let id = le_u32(payload, 8);
    let label = image.read_cstring(le_u32(payload, 12), config.max_string_len)?;
    Ok(DecodedEntry::new(
        Key::Named(KEY_NAMED_GROUP),
        EntryValue::NamedGroup(NamedGroup {
            label,
            parent,
            flags,
            tag,
            id,
            data: None,
        }),
    ))
}
