//! UF2 container images.
//!
//! A UF2 file is a sequence of 512-byte blocks, each carrying a slice of the
//! flash image together with its target address. Blocks are validated one by
//! one; a bad block is dropped and only matters if a later read needs an
//! address it would have covered.
//!
//! Block layout (little-endian):
//!
//! | Offset | Field            |
//! |--------|------------------|
//! | 0      | magic_start0     |
//! | 4      | magic_start1     |
//! | 8      | flags            |
//! | 12     | target_address   |
//! | 16     | payload_size     |
//! | 20     | block_index      |
//! | 24     | block_count      |
//! | 28     | family_id        |
//! | 32     | data (476 bytes) |
//! | 508    | magic_end        |

use crate::error::{DeclError, Result};
use crate::image::{le_u32, AddressableImage, Span};
use bitflags::bitflags;
use bytes::Bytes;
use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

pub const UF2_MAGIC_START0: u32 = 0x0A32_4655; // "UF2\n"
pub const UF2_MAGIC_START1: u32 = 0x9E5D_5157;
pub const UF2_MAGIC_END: u32 = 0x0AB1_6F30;

pub const BLOCK_SIZE: usize = 512;
pub const HEADER_SIZE: usize = 32;
pub const DATA_AREA_SIZE: usize = 476;
/// Payload size used by the RP2040/RP2350 boot ROM.
pub const FLASH_PAGE_SIZE: usize = 256;

pub const RP2040_FAMILY_ID: u32 = 0xe48b_ff56;
pub const ABSOLUTE_FAMILY_ID: u32 = 0xe48b_ff57;
pub const DATA_FAMILY_ID: u32 = 0xe48b_ff58;
pub const RP2350_ARM_S_FAMILY_ID: u32 = 0xe48b_ff59;
pub const RP2350_RISCV_FAMILY_ID: u32 = 0xe48b_ff5a;
pub const RP2350_ARM_NS_FAMILY_ID: u32 = 0xe48b_ff5b;

bitflags! {
    /// Per-block UF2 flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Uf2Flags: u32 {
        const NOT_MAIN_FLASH = 0x0000_0001;
        const FILE_CONTAINER = 0x0000_1000;
        const FAMILY_ID_PRESENT = 0x0000_2000;
        const MD5_PRESENT = 0x0000_4000;
        const EXTENSION_TAGS = 0x0000_8000;
    }
}

/// Why a block was left out of the address index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockRejection {
    #[error("truncated block of {0} bytes")]
    Truncated(usize),
    #[error("bad start magic")]
    BadStartMagic,
    #[error("bad end magic")]
    BadEndMagic,
    #[error("payload size {0} outside 1..=476")]
    BadPayloadSize(u32),
    #[error("family id {0:#010x} filtered out")]
    FamilyMismatch(u32),
}

/// Decoded header of one UF2 block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uf2BlockHeader {
    pub flags: Uf2Flags,
    pub target_address: u32,
    pub payload_size: u32,
    pub block_index: u32,
    pub block_count: u32,
    pub family_id: u32,
}

impl Uf2BlockHeader {
    /// Validate a raw block and decode its header.
    pub fn parse(block: &[u8]) -> std::result::Result<Self, BlockRejection> {
        if block.len() < BLOCK_SIZE {
            return Err(BlockRejection::Truncated(block.len()));
        }
        if le_u32(block, 0) != UF2_MAGIC_START0 || le_u32(block, 4) != UF2_MAGIC_START1 {
            return Err(BlockRejection::BadStartMagic);
        }
        if le_u32(block, BLOCK_SIZE - 4) != UF2_MAGIC_END {
            return Err(BlockRejection::BadEndMagic);
        }
        let payload_size = le_u32(block, 16);
        if payload_size == 0 || payload_size as usize > DATA_AREA_SIZE {
            return Err(BlockRejection::BadPayloadSize(payload_size));
        }
        Ok(Self {
            flags: Uf2Flags::from_bits_retain(le_u32(block, 8)),
            target_address: le_u32(block, 12),
            payload_size,
            block_index: le_u32(block, 20),
            block_count: le_u32(block, 24),
            family_id: le_u32(block, 28),
        })
    }

    fn check_family(&self, wanted: Option<u32>) -> std::result::Result<(), BlockRejection> {
        match wanted {
            Some(id) if self.flags.contains(Uf2Flags::FAMILY_ID_PRESENT) && self.family_id != id => {
                Err(BlockRejection::FamilyMismatch(self.family_id))
            }
            _ => Ok(()),
        }
    }
}

/// Check for the two start magics at the head of `data`.
pub fn is_uf2(data: &[u8]) -> bool {
    data.len() >= 8 && le_u32(data, 0) == UF2_MAGIC_START0 && le_u32(data, 4) == UF2_MAGIC_START1
}

struct Block {
    header: Uf2BlockHeader,
    payload: Bytes,
}

/// A UF2 file indexed by target address.
pub struct Uf2Image {
    blocks: BTreeMap<u32, Block>,
    discarded: usize,
}

impl Uf2Image {
    /// Index every valid block of `data` in a single pass.
    ///
    /// When `family_id` is set, blocks that declare a different family are
    /// dropped. A later block with the same target address replaces an
    /// earlier one.
    pub fn parse(data: Bytes, family_id: Option<u32>) -> Self {
        let mut blocks = BTreeMap::new();
        let mut discarded = 0;

        for (position, start) in (0..data.len()).step_by(BLOCK_SIZE).enumerate() {
            let raw = &data[start..data.len().min(start + BLOCK_SIZE)];
            let header = match Uf2BlockHeader::parse(raw).and_then(|h| {
                h.check_family(family_id)?;
                Ok(h)
            }) {
                Ok(h) => h,
                Err(reason) => {
                    warn!(block = position, offset = start, %reason, "Discarding UF2 block");
                    discarded += 1;
                    continue;
                }
            };
            let payload_start = start + HEADER_SIZE;
            let payload = data.slice(payload_start..payload_start + header.payload_size as usize);
            if let Some(old) = blocks.insert(header.target_address, Block { header, payload }) {
                debug!(
                    target_address = old.header.target_address,
                    "Duplicate UF2 target address, keeping the later block"
                );
            }
        }

        debug!(blocks = blocks.len(), discarded, "Indexed UF2 image");
        Self { blocks, discarded }
    }

    /// Number of blocks kept in the index.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of blocks dropped during ingestion.
    pub fn discarded_blocks(&self) -> usize {
        self.discarded
    }

    /// Headers of the indexed blocks, ordered by target address.
    pub fn headers(&self) -> impl Iterator<Item = &Uf2BlockHeader> {
        self.blocks.values().map(|b| &b.header)
    }

    /// The block whose payload covers `address`.
    fn block_at(&self, address: u32) -> Option<(u32, &Block)> {
        self.blocks
            .range(..=address)
            .next_back()
            .filter(|&(&start, block)| ((address - start) as usize) < block.payload.len())
            .map(|(&start, block)| (start, block))
    }
}

impl AddressableImage for Uf2Image {
    /// Reads may continue into the block whose target address follows the
    /// previous block's payload, wherever that block sits in the file. Runs
    /// are contiguous by address, not by file position.
    fn read(&self, address: u32, len: usize) -> Result<Cow<'_, [u8]>> {
        let out_of_range = || DeclError::OutOfRange { address, len };
        if len == 0 {
            return Ok(Cow::Borrowed(&[]));
        }
        let (start, first) = self.block_at(address).ok_or_else(out_of_range)?;
        let offset = (address - start) as usize;
        let available = first.payload.len() - offset;
        if len <= available {
            return Ok(Cow::Borrowed(&first.payload[offset..offset + len]));
        }

        // Spill over into the blocks that directly follow in address order.
        // The chain is checked before allocating so a bogus length fails
        // without reserving memory for it.
        let mut chain = Vec::new();
        let mut covered = available;
        let mut next = start as u64 + first.payload.len() as u64;
        while covered < len {
            let next_addr = u32::try_from(next).map_err(|_| out_of_range())?;
            let block = self.blocks.get(&next_addr).ok_or_else(out_of_range)?;
            covered += block.payload.len();
            next += block.payload.len() as u64;
            chain.push(block);
        }

        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(&first.payload[offset..]);
        for block in chain {
            let take = (len - buf.len()).min(block.payload.len());
            buf.extend_from_slice(&block.payload[..take]);
        }
        Ok(Cow::Owned(buf))
    }

    fn spans(&self) -> Vec<Span> {
        let mut spans: Vec<Span> = Vec::new();
        for (&start, block) in &self.blocks {
            match spans.last_mut() {
                Some(last) if last.end() == start as u64 => last.len += block.payload.len(),
                _ => spans.push(Span {
                    start,
                    len: block.payload.len(),
                }),
            }
        }
        spans
    }
}
