//! Core binary info types and constants

use crate::error::DeclError;
use crate::image::{AddressMap, ContainerKind};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Start of the binary info header.
pub const BI_MAGIC: [u8; 4] = [0xf2, 0xeb, 0x88, 0x71];
/// End of the binary info header.
pub const BI_END: [u8; 4] = [0x90, 0xa3, 0x1a, 0xe7];

/// Words between the two header magics.
pub const HEADER_WORDS: usize = 3;
/// Size of the type/source prefix shared by every entry.
pub const ENTRY_PREFIX_SIZE: usize = 4;

pub const TYPE_RAW_DATA: u16 = 1;
pub const TYPE_SIZED_DATA: u16 = 2;
pub const TYPE_LIST_ZERO_TERMINATED: u16 = 3;
pub const TYPE_BSON: u16 = 4;
pub const TYPE_ID_AND_INT: u16 = 5;
pub const TYPE_ID_AND_STRING: u16 = 6;
pub const TYPE_BLOCK_DEVICE: u16 = 7;
pub const TYPE_PINS_WITH_FUNC: u16 = 8;
pub const TYPE_PINS_WITH_NAME: u16 = 9;
pub const TYPE_NAMED_GROUP: u16 = 10;

/// Source tag of entries emitted by the Raspberry Pi SDK.
pub const TAG_RASPBERRY_PI: [u8; 2] = *b"RP";
/// Source tag of entries emitted by MicroPython.
pub const TAG_MICROPYTHON: [u8; 2] = *b"MP";

pub const ID_PROGRAM_NAME: u32 = 0x02031c86;
pub const ID_PROGRAM_VERSION_STRING: u32 = 0x11a9bc3a;
pub const ID_PROGRAM_BUILD_DATE_STRING: u32 = 0x9da22254;
pub const ID_BINARY_END: u32 = 0x68f465de;
pub const ID_PROGRAM_URL: u32 = 0x1856239a;
pub const ID_PROGRAM_DESCRIPTION: u32 = 0xb6a07c19;
pub const ID_PROGRAM_FEATURE: u32 = 0xa1f4b453;
pub const ID_PROGRAM_BUILD_ATTRIBUTE: u32 = 0x4275f0d3;
pub const ID_SDK_VERSION: u32 = 0x5360b3ab;
pub const ID_PICO_BOARD: u32 = 0xb63cffbb;
pub const ID_BOOT2_NAME: u32 = 0x7f8882e1;
// Not in KNOWN_IDS: entries carrying these ids are adopted by named groups.
pub const ID_FILESYSTEM: u32 = 0x1009be7e;
pub const ID_MP_BUILTIN_MODULE: u32 = 0x4a99d719;

/// A well-known entry id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownId {
    pub id: u32,
    /// Human readable name.
    pub name: &'static str,
    /// Key used in decoded output (the name without spaces).
    pub key: &'static str,
}

const fn known(id: u32, name: &'static str, key: &'static str) -> KnownId {
    KnownId { id, name, key }
}

pub const KNOWN_IDS: [KnownId; 11] = [
    known(ID_PROGRAM_NAME, "Program Name", "ProgramName"),
    known(ID_PROGRAM_VERSION_STRING, "Program Version", "ProgramVersion"),
    known(ID_PROGRAM_BUILD_DATE_STRING, "Build Date", "BuildDate"),
    known(ID_BINARY_END, "Binary End Address", "BinaryEndAddress"),
    known(ID_PROGRAM_URL, "Program URL", "ProgramURL"),
    known(ID_PROGRAM_DESCRIPTION, "Program Description", "ProgramDescription"),
    known(ID_PROGRAM_FEATURE, "Program Feature", "ProgramFeature"),
    known(ID_PROGRAM_BUILD_ATTRIBUTE, "Program Build Attribute", "ProgramBuildAttribute"),
    known(ID_SDK_VERSION, "SDK Version", "SDKVersion"),
    known(ID_PICO_BOARD, "Pico Board", "PicoBoard"),
    known(ID_BOOT2_NAME, "Boot Stage 2 Name", "BootStage2Name"),
];

pub fn known_id(id: u32) -> Option<&'static KnownId> {
    KNOWN_IDS.iter().find(|k| k.id == id)
}

/// Human readable name of an entry type, for diagnostics.
pub fn type_name(type_tag: u16) -> &'static str {
    match type_tag {
        TYPE_RAW_DATA => "Raw Data",
        TYPE_SIZED_DATA => "Sized Data",
        TYPE_LIST_ZERO_TERMINATED => "Zero Terminated List",
        TYPE_BSON => "BSON",
        TYPE_ID_AND_INT => "ID & Int",
        TYPE_ID_AND_STRING => "ID & Str",
        TYPE_BLOCK_DEVICE => "Block Device",
        TYPE_PINS_WITH_FUNC => "Pins With Func",
        TYPE_PINS_WITH_NAME => "Pins With Name",
        TYPE_NAMED_GROUP => "Named Group",
        _ => "Unknown",
    }
}

pub const KEY_BLOCK_DEVICE: &str = "BlockDevice";
pub const KEY_NAMED_GROUP: &str = "NamedGroup";
pub const KEY_PROGRAM_FEATURE: &str = "ProgramFeature";
pub const KEY_BINARY_END: &str = "BinaryEndAddress";
pub const KEY_PROGRAM_NAME: &str = "ProgramName";

/// Keys stored as a list even when only one entry carries them, so the
/// output shape does not depend on the input.
pub const ALWAYS_A_LIST: [&str; 3] = [KEY_NAMED_GROUP, KEY_BLOCK_DEVICE, KEY_PROGRAM_FEATURE];

/// Key of a decoded entry: a well-known name, or the raw id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Named(&'static str),
    Id(u32),
}

impl Key {
    /// Key for an entry id, named if the id is well known.
    pub fn for_id(id: u32) -> Self {
        match known_id(id) {
            Some(k) => Key::Named(k.key),
            None => Key::Id(id),
        }
    }

    pub fn always_a_list(&self) -> bool {
        matches!(self, Key::Named(name) if ALWAYS_A_LIST.contains(name))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Named(name) => write!(f, "{}", name),
            Key::Id(id) => write!(f, "{:#010x}", id),
        }
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Key::Named(name) => serializer.serialize_str(name),
            Key::Id(id) => serializer.serialize_u32(*id),
        }
    }
}

/// A storage region declared by the firmware, e.g. a filesystem partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDevice {
    pub name: String,
    pub address: u32,
    pub size: u32,
    pub flags: u16,
}

impl BlockDevice {
    /// One past the last byte of the device, widened to avoid overflow.
    pub fn end(&self) -> u64 {
        self.address as u64 + self.size as u64
    }
}

/// A labelled group that adopts the entries keyed by its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedGroup {
    pub label: String,
    /// Id of the enclosing group, 0 for the root.
    pub parent: u32,
    pub flags: u16,
    pub tag: u16,
    pub id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<Slot>>,
}

/// Value carried by one decoded entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EntryValue {
    Int(u32),
    Text(String),
    BlockDevice(BlockDevice),
    NamedGroup(NamedGroup),
}

impl EntryValue {
    pub fn as_int(&self) -> Option<u32> {
        match self {
            EntryValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            EntryValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_block_device(&self) -> Option<&BlockDevice> {
        match self {
            EntryValue::BlockDevice(bd) => Some(bd),
            _ => None,
        }
    }

    pub fn as_named_group(&self) -> Option<&NamedGroup> {
        match self {
            EntryValue::NamedGroup(g) => Some(g),
            _ => None,
        }
    }
}

/// Everything stored under one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Slot {
    Single(EntryValue),
    List(Vec<EntryValue>),
}

impl Slot {
    /// All values in entry order.
    pub fn values(&self) -> &[EntryValue] {
        match self {
            Slot::Single(v) => std::slice::from_ref(v),
            Slot::List(vs) => vs,
        }
    }

    pub(crate) fn values_mut(&mut self) -> &mut [EntryValue] {
        match self {
            Slot::Single(v) => std::slice::from_mut(v),
            Slot::List(vs) => vs.as_mut_slice(),
        }
    }

    /// The first value, the only one for a `Single`.
    pub fn first(&self) -> Option<&EntryValue> {
        self.values().first()
    }

    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }
}

/// A `(key, value)` pair produced by an entry decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub key: Key,
    pub value: EntryValue,
}

impl DecodedEntry {
    pub fn new(key: Key, value: EntryValue) -> Self {
        Self { key, value }
    }
}

/// One entry as found behind a pointer, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry<'a> {
    pub type_tag: u16,
    pub source_tag: [u8; 2],
    pub payload: &'a [u8],
}

/// The located binary info header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BinaryInfoHeader {
    /// Address of `BI_MAGIC`.
    pub address: u32,
    pub entries_start: u32,
    pub entries_end: u32,
    pub mapping_table: u32,
}

impl BinaryInfoHeader {
    pub fn entry_count(&self) -> usize {
        (self.entries_end.saturating_sub(self.entries_start) / 4) as usize
    }
}

/// Why an entry did not make it into the result.
#[derive(Debug)]
pub enum SkipReason {
    /// Entry belongs to another subsystem's metadata.
    UnknownSourceTag([u8; 2]),
    /// No decoder is registered for this type.
    UnknownEntryType(u16),
    /// Decoding the entry failed.
    Failed(DeclError),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownSourceTag(tag) => {
                write!(f, "unknown source tag {:?}", String::from_utf8_lossy(tag))
            }
            SkipReason::UnknownEntryType(t) => {
                write!(f, "no decoder for type {} ({})", t, type_name(*t))
            }
            SkipReason::Failed(e) => write!(f, "{}", e),
        }
    }
}

/// Diagnostic record of a skipped entry.
#[derive(Debug)]
pub struct SkippedEntry {
    /// Address the entry pointer referred to.
    pub pointer: u32,
    pub reason: SkipReason,
}

/// Decoded entries keyed by name or id, in first-insertion order.
///
/// Insertion follows the list coercion rule: keys in [`ALWAYS_A_LIST`] are
/// always lists; any other key holds a bare value until it occurs a second
/// time, then becomes a list. A key keeps the position of its first
/// occurrence when later values fold into it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMap {
    slots: Vec<(Key, Slot)>,
    names: HashMap<&'static str, usize>,
    ids: HashMap<u32, usize>,
}

impl EntryMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &Key) -> Option<usize> {
        match key {
            Key::Named(name) => self.names.get(name).copied(),
            Key::Id(id) => self.ids.get(id).copied(),
        }
    }

    fn index(&mut self, key: Key, at: usize) {
        match key {
            Key::Named(name) => self.names.insert(name, at),
            Key::Id(id) => self.ids.insert(id, at),
        };
    }

    /// Fold one decoded entry into the map.
    pub fn insert(&mut self, entry: DecodedEntry) {
        let DecodedEntry { key, value } = entry;
        let Some(at) = self.position(&key) else {
            let slot = if key.always_a_list() {
                Slot::List(vec![value])
            } else {
                Slot::Single(value)
            };
            self.put(key, slot);
            return;
        };
        let slot = &mut self.slots[at].1;
        *slot = match std::mem::replace(slot, Slot::List(Vec::new())) {
            Slot::Single(first) => Slot::List(vec![first, value]),
            Slot::List(mut values) => {
                values.push(value);
                Slot::List(values)
            }
        };
    }

    pub fn get(&self, key: &Key) -> Option<&Slot> {
        self.position(key).map(|at| &self.slots[at].1)
    }

    pub(crate) fn get_mut(&mut self, key: &Key) -> Option<&mut Slot> {
        self.position(key).map(|at| &mut self.slots[at].1)
    }

    pub fn get_named(&self, name: &str) -> Option<&Slot> {
        self.names.get(name).map(|&at| &self.slots[at].1)
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        self.position(key).is_some()
    }

    /// Remove a key; later keys keep their relative order.
    pub fn remove(&mut self, key: &Key) -> Option<Slot> {
        let at = self.position(key)?;
        match key {
            Key::Named(name) => self.names.remove(name),
            Key::Id(id) => self.ids.remove(id),
        };
        let (_, slot) = self.slots.remove(at);
        for pos in self.names.values_mut().chain(self.ids.values_mut()) {
            if *pos > at {
                *pos -= 1;
            }
        }
        Some(slot)
    }

    /// Store a slot as-is, bypassing list coercion. An existing key is
    /// replaced in place; a new key goes last.
    pub(crate) fn put(&mut self, key: Key, slot: Slot) {
        match self.position(&key) {
            Some(at) => self.slots[at].1 = slot,
            None => {
                self.index(key, self.slots.len());
                self.slots.push((key, slot));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Slot)> {
        self.slots.iter().map(|(k, s)| (k, s))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.slots.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Serialize for EntryMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// Result of decoding one image.
#[derive(Debug)]
pub struct ParsedImage {
    pub(crate) header: BinaryInfoHeader,
    pub(crate) container: Option<ContainerKind>,
    pub(crate) address_map: AddressMap,
    pub(crate) entries: EntryMap,
    pub(crate) skipped: Vec<SkippedEntry>,
}

impl ParsedImage {
    pub fn header(&self) -> &BinaryInfoHeader {
        &self.header
    }

    /// Container the image came from; `None` for caller-provided images.
    pub fn container(&self) -> Option<ContainerKind> {
        self.container
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.address_map
    }

    pub fn entries(&self) -> &EntryMap {
        &self.entries
    }

    /// Entries dropped while decoding, in pointer order.
    pub fn skipped(&self) -> &[SkippedEntry] {
        &self.skipped
    }

    pub fn get(&self, key: &Key) -> Option<&Slot> {
        self.entries.get(key)
    }

    pub fn get_named(&self, name: &str) -> Option<&Slot> {
        self.entries.get_named(name)
    }

    pub fn program_name(&self) -> Option<&str> {
        self.get_named(KEY_PROGRAM_NAME)
            .and_then(Slot::first)
            .and_then(EntryValue::as_text)
    }

    pub fn binary_end(&self) -> Option<u32> {
        self.get_named(KEY_BINARY_END)
            .and_then(Slot::first)
            .and_then(EntryValue::as_int)
    }

    pub fn block_devices(&self) -> Vec<&BlockDevice> {
        self.get_named(KEY_BLOCK_DEVICE)
            .map(|slot| slot.values().iter().filter_map(EntryValue::as_block_device).collect())
            .unwrap_or_default()
    }

    pub fn named_groups(&self) -> Vec<&NamedGroup> {
        self.get_named(KEY_NAMED_GROUP)
            .map(|slot| slot.values().iter().filter_map(EntryValue::as_named_group).collect())
            .unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for ParsedImage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}
