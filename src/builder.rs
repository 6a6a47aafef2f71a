//! Synthetic firmware images carrying a binary info table.
//!
//! Produces flat images laid out the way the SDK linker script does it:
//! header, entry pointer array, entry records, then the strings they point
//! at. Optional RAM-resident strings are placed in a copied data region that
//! the header's mapping table describes. A built image can be wrapped in UF2
//! blocks for container tests.

use crate::bininfo::types::*;
use crate::config::FLASH_BASE;
use crate::image::uf2::{
    Uf2Flags, BLOCK_SIZE, DATA_AREA_SIZE, FLASH_PAGE_SIZE, HEADER_SIZE, UF2_MAGIC_END,
    UF2_MAGIC_START0, UF2_MAGIC_START1,
};
use crate::image::MappingEntry;

const HEADER_LEN: usize = BI_MAGIC.len() + HEADER_WORDS * 4 + BI_END.len();

/// Where a string field of a record points.
#[derive(Debug, Clone)]
enum StrRef {
    /// Stored in flash after the records.
    Flash(String),
    /// Stored in the copied data region; the record holds the RAM address.
    Ram(String),
    /// An arbitrary address, for dangling pointers.
    Address(u32),
}

#[derive(Debug, Clone)]
enum Record {
    IdAndInt {
        id: u32,
        value: u32,
    },
    IdAndString {
        id: u32,
        text: StrRef,
    },
    BlockDevice {
        name: StrRef,
        address: u32,
        size: u32,
        flags: u16,
    },
    NamedGroup {
        parent: u32,
        flags: u16,
        tag: u16,
        id: u32,
        label: StrRef,
    },
    Raw {
        type_tag: u16,
        payload: Vec<u8>,
    },
}

impl Record {
    fn type_tag(&self) -> u16 {
        match self {
            Record::IdAndInt { .. } => TYPE_ID_AND_INT,
            Record::IdAndString { .. } => TYPE_ID_AND_STRING,
            Record::BlockDevice { .. } => TYPE_BLOCK_DEVICE,
            Record::NamedGroup { .. } => TYPE_NAMED_GROUP,
            Record::Raw { type_tag, .. } => *type_tag,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Record::IdAndInt { .. } | Record::IdAndString { .. } => 8,
            Record::BlockDevice { .. } => 18,
            Record::NamedGroup { .. } => 16,
            Record::Raw { payload, .. } => payload.len(),
        }
    }

    fn strings(&self) -> Option<&StrRef> {
        match self {
            Record::IdAndString { text, .. } => Some(text),
            Record::BlockDevice { name, .. } => Some(name),
            Record::NamedGroup { label, .. } => Some(label),
            _ => None,
        }
    }

    fn encode_payload(&self, string_addr: u32, out: &mut Vec<u8>) {
        match self {
            Record::IdAndInt { id, value } => {
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&value.to_le_bytes());
            }
            Record::IdAndString { id, .. } => {
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&string_addr.to_le_bytes());
            }
            Record::BlockDevice {
                address,
                size,
                flags,
                ..
            } => {
                out.extend_from_slice(&string_addr.to_le_bytes());
                out.extend_from_slice(&address.to_le_bytes());
                out.extend_from_slice(&size.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
                out.extend_from_slice(&flags.to_le_bytes());
            }
            Record::NamedGroup {
                parent,
                flags,
                tag,
                id,
                ..
            } => {
                out.extend_from_slice(&parent.to_le_bytes());
                out.extend_from_slice(&flags.to_le_bytes());
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&string_addr.to_le_bytes());
            }
            Record::Raw { payload, .. } => out.extend_from_slice(payload),
        }
    }
}

/// Builder for flat images with a binary info table.
#[derive(Debug, Clone)]
pub struct BinaryInfoBuilder {
    base: u32,
    header_offset: usize,
    ram_base: u32,
    source_tag: [u8; 2],
    records: Vec<([u8; 2], Record)>,
    terminator: bool,
    min_size: usize,
}

impl Default for BinaryInfoBuilder {
    fn default() -> Self {
        Self {
            base: FLASH_BASE,
            header_offset: 0x100,
            ram_base: 0x2000_0000,
            source_tag: TAG_RASPBERRY_PI,
            records: Vec::new(),
            terminator: true,
            min_size: 0,
        }
    }
}

/// A built image plus the addresses the builder chose.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub data: Vec<u8>,
    pub base: u32,
    pub header_address: u32,
    pub entries_start: u32,
    /// Entry pointers in array order.
    pub pointers: Vec<u32>,
    /// Encoded bytes of each record (prefix and payload), in pointer order.
    pub records: Vec<Vec<u8>>,
    /// 0 when no string lives in RAM.
    pub mapping_table: u32,
}

impl BinaryInfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the address of the first byte of the image.
    pub fn with_base(mut self, base: u32) -> Self {
        self.base = base;
        self
    }

    /// Sets the file offset of the header; rounded up to a word.
    pub fn with_header_offset(mut self, offset: usize) -> Self {
        self.header_offset = offset.next_multiple_of(4);
        self
    }

    /// Sets the RAM address RAM-resident strings are copied to.
    pub fn with_ram_base(mut self, ram_base: u32) -> Self {
        self.ram_base = ram_base;
        self
    }

    /// Source tag for records added after this call.
    pub fn with_source_tag(mut self, tag: [u8; 2]) -> Self {
        self.source_tag = tag;
        self
    }

    /// Pads the image with zeros to at least `len` bytes.
    pub fn with_min_size(mut self, len: usize) -> Self {
        self.min_size = len;
        self
    }

    /// Leaves the header without its `BI_END` word.
    pub fn without_terminator(mut self) -> Self {
        self.terminator = false;
        self
    }

    fn push(mut self, record: Record) -> Self {
        self.records.push((self.source_tag, record));
        self
    }

    pub fn id_and_int(self, id: u32, value: u32) -> Self {
        self.push(Record::IdAndInt { id, value })
    }

    pub fn id_and_string<S: Into<String>>(self, id: u32, text: S) -> Self {
        self.push(Record::IdAndString {
            id,
            text: StrRef::Flash(text.into()),
        })
    }

    /// A string record whose text lives in the RAM data region.
    pub fn id_and_ram_string<S: Into<String>>(self, id: u32, text: S) -> Self {
        self.push(Record::IdAndString {
            id,
            text: StrRef::Ram(text.into()),
        })
    }

    /// A string record pointing at an arbitrary address.
    pub fn id_and_string_at(self, id: u32, address: u32) -> Self {
        self.push(Record::IdAndString {
            id,
            text: StrRef::Address(address),
        })
    }

    pub fn block_device<S: Into<String>>(self, name: S, address: u32, size: u32, flags: u16) -> Self {
        self.push(Record::BlockDevice {
            name: StrRef::Flash(name.into()),
            address,
            size,
            flags,
        })
    }

    pub fn named_group<S: Into<String>>(self, parent: u32, flags: u16, tag: u16, id: u32, label: S) -> Self {
        self.push(Record::NamedGroup {
            parent,
            flags,
            tag,
            id,
            label: StrRef::Flash(label.into()),
        })
    }

    /// A record of any type with a caller-encoded payload.
    pub fn raw_entry(self, type_tag: u16, payload: Vec<u8>) -> Self {
        self.push(Record::Raw { type_tag, payload })
    }

    pub fn build(&self) -> BuiltImage {
        let header_address = self.base + self.header_offset as u32;
        let ptr_off = self.header_offset + HEADER_LEN;
        let entries_off = ptr_off + 4 * self.records.len();

        let mut record_offs = Vec::with_capacity(self.records.len());
        let mut off = entries_off;
        for (_, record) in &self.records {
            record_offs.push(off);
            off += (ENTRY_PREFIX_SIZE + record.payload_len()).next_multiple_of(4);
        }

        // String pools: flash strings first, RAM copies in their own region.
        let pool_off = off;
        let mut pool = Vec::new();
        let mut ram = Vec::new();
        let mut string_addrs = Vec::with_capacity(self.records.len());
        for (_, record) in &self.records {
            let addr = match record.strings() {
                Some(StrRef::Flash(s)) => {
                    let a = self.base + (pool_off + pool.len()) as u32;
                    pool.extend_from_slice(s.as_bytes());
                    pool.push(0);
                    a
                }
                Some(StrRef::Ram(s)) => {
                    let a = self.ram_base + ram.len() as u32;
                    ram.extend_from_slice(s.as_bytes());
                    ram.push(0);
                    a
                }
                Some(StrRef::Address(a)) => *a,
                None => 0,
            };
            string_addrs.push(addr);
        }

        let ram_off = (pool_off + pool.len()).next_multiple_of(4);
        ram.resize(ram.len().next_multiple_of(4), 0);
        let map_off = ram_off + ram.len();
        let mapping = (!ram.is_empty()).then(|| MappingEntry {
            source_start: self.base + ram_off as u32,
            dest_start: self.ram_base,
            dest_end: self.ram_base + ram.len() as u32,
        });
        let end = map_off + if mapping.is_some() { 24 } else { 0 };

        let mut data = vec![0u8; end.max(self.min_size)];
        let mapping_table = mapping.map_or(0, |_| self.base + map_off as u32);
        let entries_start = self.base + ptr_off as u32;
        let entries_end = entries_start + 4 * self.records.len() as u32;

        let h = self.header_offset;
        data[h..h + 4].copy_from_slice(&BI_MAGIC);
        data[h + 4..h + 8].copy_from_slice(&entries_start.to_le_bytes());
        data[h + 8..h + 12].copy_from_slice(&entries_end.to_le_bytes());
        data[h + 12..h + 16].copy_from_slice(&mapping_table.to_le_bytes());
        if self.terminator {
            data[h + 16..h + 20].copy_from_slice(&BI_END);
        }

        let mut pointers = Vec::with_capacity(self.records.len());
        let mut records = Vec::with_capacity(self.records.len());
        for (i, ((tag, record), &roff)) in self.records.iter().zip(&record_offs).enumerate() {
            let pointer = self.base + roff as u32;
            data[ptr_off + 4 * i..ptr_off + 4 * i + 4].copy_from_slice(&pointer.to_le_bytes());

            let mut bytes = record.type_tag().to_le_bytes().to_vec();
            bytes.extend_from_slice(tag);
            record.encode_payload(string_addrs[i], &mut bytes);
            data[roff..roff + bytes.len()].copy_from_slice(&bytes);

            pointers.push(pointer);
            records.push(bytes);
        }

        data[pool_off..pool_off + pool.len()].copy_from_slice(&pool);
        data[ram_off..ram_off + ram.len()].copy_from_slice(&ram);
        if let Some(m) = mapping {
            data[map_off..map_off + 4].copy_from_slice(&m.source_start.to_le_bytes());
            data[map_off + 4..map_off + 8].copy_from_slice(&m.dest_start.to_le_bytes());
            data[map_off + 8..map_off + 12].copy_from_slice(&m.dest_end.to_le_bytes());
        }

        BuiltImage {
            data,
            base: self.base,
            header_address,
            entries_start,
            pointers,
            records,
            mapping_table,
        }
    }
}

impl BuiltImage {
    /// Wraps the image in UF2 blocks of one flash page each.
    pub fn to_uf2(&self, family_id: u32) -> Vec<u8> {
        flat_to_uf2(&self.data, self.base, family_id)
    }
}

/// Splits `data` into 256-byte UF2 blocks starting at `base`.
///
/// The last page is zero padded; every block declares `family_id`.
pub fn flat_to_uf2(data: &[u8], base: u32, family_id: u32) -> Vec<u8> {
    let pages: Vec<&[u8]> = data.chunks(FLASH_PAGE_SIZE).collect();
    let mut out = Vec::with_capacity(pages.len() * BLOCK_SIZE);

    for (i, page) in pages.iter().enumerate() {
        let mut block = [0u8; BLOCK_SIZE];
        let words = [
            UF2_MAGIC_START0,
            UF2_MAGIC_START1,
            Uf2Flags::FAMILY_ID_PRESENT.bits(),
            base + (i * FLASH_PAGE_SIZE) as u32,
            FLASH_PAGE_SIZE as u32,
            i as u32,
            pages.len() as u32,
            family_id,
        ];
        for (j, w) in words.iter().enumerate() {
            block[j * 4..j * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        block[HEADER_SIZE..HEADER_SIZE + page.len()].copy_from_slice(page);
        let end = HEADER_SIZE + DATA_AREA_SIZE;
        block[end..end + 4].copy_from_slice(&UF2_MAGIC_END.to_le_bytes());
        out.extend_from_slice(&block);
    }
    out
}
