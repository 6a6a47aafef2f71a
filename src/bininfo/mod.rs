//! Binary info decoding.
//!
//! Decoding runs in fixed stages: locate the header, read the entry pointer
//! array, read the optional mapping table, decode each entry through the
//! registry, then nest grouped entries under their named group. Header and
//! pointer array failures abort; everything after that degrades per entry.

pub mod assemble;
pub mod entries;
pub mod table;
pub mod types;

pub use assemble::assemble;
pub use entries::{decoder_for, EntryDecoder};
pub use table::{locate_header, read_address_map, read_entry_pointers};
pub use types::{
    BinaryInfoHeader, BlockDevice, DecodedEntry, EntryMap, EntryValue, Key, NamedGroup,
    ParsedImage, RawEntry, SkipReason, SkippedEntry, Slot,
};

use crate::config::DecodeConfig;
use crate::error::Result;
use crate::image::{AddressMap, AddressableImage, MappedImage};
use tracing::{debug, info};

/// Decode the binary info of an addressable image.
///
/// The returned [`ParsedImage`] has no container kind; callers that know
/// where the image came from fill it in.
pub fn parse(image: &dyn AddressableImage, config: &DecodeConfig) -> Result<ParsedImage> {
    let header = locate_header(image, config)?;
    let pointers = read_entry_pointers(image, &header)?;
    debug!(
        header = header.address,
        entries = pointers.len(),
        mapping_table = header.mapping_table,
        "Binary info header"
    );

    let address_map = if config.follow_mapping_table {
        read_address_map(image, &header)
    } else {
        AddressMap::default()
    };

    let (mut entries, skipped) = if address_map.is_empty() {
        table::walk(image, &pointers, config)
    } else {
        let view = MappedImage::new(image, &address_map);
        table::walk(&view, &pointers, config)
    };
    let adopted = assemble(&mut entries);

    info!(
        keys = entries.len(),
        skipped = skipped.len(),
        groups_filled = adopted,
        "Decoded binary info"
    );

    Ok(ParsedImage {
        header,
        container: None,
        address_map,
        entries,
        skipped,
    })
}
