//! End-to-end decoding of flat images.

mod common;

use common::*;
use picodecl::bininfo::types::*;
use picodecl::bininfo::{locate_header, read_entry_pointers};
use picodecl::builder::BinaryInfoBuilder;
use picodecl::image::{FlatImage, Span};
use picodecl::{
    decode, decode_image, decode_with_config, AddressableImage, ContainerKind, DeclError,
    DecodeConfig, EntryValue, Key, SkipReason, Slot,
};
use std::borrow::Cow;

#[test]
fn test_sdk_image_fields() {
    let parsed = decode(sdk_builder().build().data).unwrap();

    assert_eq!(parsed.container(), Some(ContainerKind::Flat));
    assert_eq!(parsed.program_name(), Some("blink"));
    assert_eq!(parsed.binary_end(), Some(0x1000_7a3c));
    assert_eq!(
        parsed.get_named("PicoBoard"),
        Some(&Slot::Single(EntryValue::Text("pico".into())))
    );
    assert_eq!(
        parsed.get_named("BootStage2Name").and_then(Slot::first),
        Some(&EntryValue::Text("boot2_w25q080".into()))
    );
    assert_eq!(
        parsed.get_named("ProgramFeature"),
        Some(&Slot::List(vec![EntryValue::Text("UART stdin / stdout".into())]))
    );
    assert!(parsed.skipped().is_empty());
}

#[test]
fn test_n_int_entries_give_n_keys() {
    let n = 24u32;
    let mut b = BinaryInfoBuilder::new();
    for i in 0..n {
        b = b.id_and_int(0x5000 + i, i * 3);
    }
    let parsed = decode(b.build().data).unwrap();

    assert_eq!(parsed.entries().len(), n as usize);
    for i in 0..n {
        assert_eq!(
            parsed.get(&Key::Id(0x5000 + i)),
            Some(&Slot::Single(EntryValue::Int(i * 3)))
        );
    }
}

#[test]
fn test_colliding_ids_become_list() {
    let parsed = decode(
        BinaryInfoBuilder::new()
            .id_and_int(0x77, 1)
            .id_and_int(0x78, 2)
            .id_and_int(0x77, 3)
            .build()
            .data,
    )
    .unwrap();

    assert_eq!(parsed.entries().len(), 2);
    assert_eq!(
        parsed.get(&Key::Id(0x77)),
        Some(&Slot::List(vec![EntryValue::Int(1), EntryValue::Int(3)]))
    );
}

#[test]
fn test_header_and_pointers_round_trip() {
    let built = sdk_builder()
        .block_device("fs", 0x1010_0000, 0x1000, 1)
        .with_header_offset(0x1f4)
        .build();
    let image = FlatImage::new(built.data.clone(), FLASH_BASE);
    let cfg = DecodeConfig::default();

    let header = locate_header(&image, &cfg).unwrap();
    assert_eq!(header.address, built.header_address);
    assert_eq!(header.entries_start, built.entries_start);
    assert_eq!(header.entry_count(), built.pointers.len());

    let pointers = read_entry_pointers(&image, &header).unwrap();
    assert_eq!(pointers, built.pointers);
    for (ptr, record) in pointers.iter().zip(&built.records) {
        assert_eq!(&image.read(*ptr, record.len()).unwrap()[..], &record[..]);
    }
}

#[test]
fn test_missing_terminator_is_malformed() {
    let built = sdk_builder().without_terminator().build();
    let err = decode(built.data).unwrap_err();
    assert!(
        matches!(err, DeclError::HeaderMalformed { address, .. } if address == built.header_address)
    );
}

#[test]
fn test_no_header_is_not_found() {
    let err = decode(vec![0xffu8; 4096]).unwrap_err();
    assert!(matches!(err, DeclError::HeaderNotFound));
}

#[test]
fn test_long_string_drops_only_its_entry() {
    let built = sdk_builder()
        .id_and_string(ID_PROGRAM_DESCRIPTION, "x".repeat(600))
        .build();
    let bad_pointer = *built.pointers.last().unwrap();
    let parsed = decode(built.data).unwrap();

    assert_eq!(parsed.program_name(), Some("blink"));
    assert!(parsed.get_named("ProgramDescription").is_none());
    assert_eq!(parsed.skipped().len(), 1);
    let skipped = &parsed.skipped()[0];
    assert_eq!(skipped.pointer, bad_pointer);
    assert!(matches!(
        skipped.reason,
        SkipReason::Failed(DeclError::StringUnterminated { max_len: 512, .. })
    ));

    // A longer limit accepts it.
    let cfg = DecodeConfig {
        max_string_len: 1024,
        ..DecodeConfig::default()
    };
    let parsed = decode_with_config(
        sdk_builder()
            .id_and_string(ID_PROGRAM_DESCRIPTION, "x".repeat(600))
            .build()
            .data,
        &cfg,
    )
    .unwrap();
    assert!(parsed.skipped().is_empty());
}

#[test]
fn test_dangling_string_pointer_is_skipped() {
    let parsed = decode(
        BinaryInfoBuilder::new()
            .id_and_string_at(ID_PROGRAM_URL, 0x1fff_0000)
            .id_and_int(ID_BINARY_END, 0x1000_4000)
            .build()
            .data,
    )
    .unwrap();
    assert_eq!(parsed.binary_end(), Some(0x1000_4000));
    assert!(matches!(
        parsed.skipped()[0].reason,
        SkipReason::Failed(DeclError::OutOfRange { address: 0x1fff_0000, .. })
    ));
}

#[test]
fn test_named_group_adopts_modules() {
    let parsed = decode(micropython_builder(0x1004_0000, 0x1010_0000).build().data).unwrap();

    assert!(parsed.get(&Key::Id(ID_MP_BUILTIN_MODULE)).is_none());
    let groups = parsed.named_groups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].label, "modules");
    assert_eq!(groups[0].id, ID_MP_BUILTIN_MODULE);
    assert_eq!(groups[0].tag, 0x504d);
    assert_eq!(
        groups[0].data.as_deref(),
        Some(&Slot::List(vec![
            EntryValue::Text("machine".into()),
            EntryValue::Text("network".into()),
            EntryValue::Text("rp2".into()),
        ]))
    );

    let devices = parsed.block_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "rp2 flash");
    assert_eq!(devices[0].flags, 3);
}

#[test]
fn test_unknown_tags_are_skipped() {
    let built = BinaryInfoBuilder::new()
        .id_and_string(ID_PROGRAM_NAME, "pins")
        .raw_entry(TYPE_PINS_WITH_FUNC, vec![0x44, 0x33, 0x22, 0x11])
        .with_source_tag(*b"XY")
        .id_and_int(ID_BINARY_END, 0x1000_2000)
        .build();
    let parsed = decode(built.data).unwrap();

    assert_eq!(parsed.entries().len(), 1);
    assert_eq!(parsed.program_name(), Some("pins"));
    let reasons: Vec<_> = parsed.skipped().iter().map(|s| &s.reason).collect();
    assert!(matches!(reasons[0], SkipReason::UnknownEntryType(TYPE_PINS_WITH_FUNC)));
    assert!(matches!(reasons[1], SkipReason::UnknownSourceTag(t) if t == b"XY"));
}

#[test]
fn test_extra_source_tag_from_config() {
    let data = BinaryInfoBuilder::new()
        .with_source_tag(*b"XY")
        .id_and_int(ID_BINARY_END, 0x1000_2000)
        .build()
        .data;
    let cfg = DecodeConfig {
        source_tags: vec!["XY".into()],
        ..DecodeConfig::default()
    };
    assert_eq!(decode_with_config(data, &cfg).unwrap().binary_end(), Some(0x1000_2000));
}

#[test]
fn test_ram_strings_resolve_through_mapping_table() {
    let built = BinaryInfoBuilder::new()
        .id_and_ram_string(ID_PROGRAM_NAME, "from ram")
        .id_and_string(ID_PROGRAM_VERSION_STRING, "from flash")
        .build();
    let parsed = decode(built.data.clone()).unwrap();
    assert_eq!(parsed.program_name(), Some("from ram"));
    assert_eq!(parsed.address_map().entries().len(), 1);
    assert_eq!(parsed.address_map().entries()[0].dest_start, 0x2000_0000);

    let cfg = DecodeConfig {
        follow_mapping_table: false,
        ..DecodeConfig::default()
    };
    let parsed = decode_with_config(built.data, &cfg).unwrap();
    assert!(parsed.program_name().is_none());
    assert!(parsed.address_map().is_empty());
    assert!(matches!(
        parsed.skipped()[0].reason,
        SkipReason::Failed(DeclError::OutOfRange { address: 0x2000_0000, .. })
    ));
}

#[test]
fn test_json_shape() {
    let parsed = decode(
        micropython_builder(0x1004_0000, 0x1010_0000)
            .with_source_tag(TAG_RASPBERRY_PI)
            .id_and_int(0x1234, 7)
            .build()
            .data,
    )
    .unwrap();
    let json: serde_json::Value = serde_json::from_str(&parsed.to_json_pretty().unwrap()).unwrap();

    assert_eq!(json["ProgramName"], "MicroPython");
    assert_eq!(json["BinaryEndAddress"], 0x1004_0000u32);
    assert_eq!(json["4660"], 7);
    assert!(json["BlockDevice"].is_array());
    assert_eq!(json["BlockDevice"][0]["address"], 0x1010_0000u32);
    assert_eq!(json["BlockDevice"][0]["size"], 0x10_0000u32);
    let group = &json["NamedGroup"][0];
    assert_eq!(group["label"], "modules");
    assert_eq!(group["data"][1], "network");
    assert!(json.get(ID_MP_BUILTIN_MODULE.to_string()).is_none());
}

#[test]
fn test_json_keys_follow_entry_order() {
    let parsed = decode(
        BinaryInfoBuilder::new()
            .id_and_int(0x1234, 7)
            .id_and_int(ID_BINARY_END, 0x1004_0000)
            .id_and_string(ID_PROGRAM_NAME, "late")
            .build()
            .data,
    )
    .unwrap();

    assert_eq!(
        parsed.entries().keys().copied().collect::<Vec<_>>(),
        vec![
            Key::Id(0x1234),
            Key::Named("BinaryEndAddress"),
            Key::Named("ProgramName")
        ]
    );
    let json = parsed.to_json_pretty().unwrap();
    let at = |k: &str| json.find(k).unwrap();
    assert!(at("\"4660\"") < at("\"BinaryEndAddress\"") && at("\"BinaryEndAddress\"") < at("\"ProgramName\""));
}

/// Memory of a running device, read a word at a time.
struct DeviceMemory {
    base: u32,
    ram: Vec<u8>,
}

impl AddressableImage for DeviceMemory {
    fn read(&self, address: u32, len: usize) -> picodecl::Result<Cow<'_, [u8]>> {
        let out = DeclError::OutOfRange { address, len };
        let off = address.checked_sub(self.base).ok_or(out)? as usize;
        match self.ram.get(off..off + len) {
            Some(bytes) => Ok(Cow::Owned(bytes.to_vec())),
            None => Err(DeclError::OutOfRange { address, len }),
        }
    }

    fn spans(&self) -> Vec<Span> {
        vec![Span {
            start: self.base,
            len: self.ram.len(),
        }]
    }
}

#[test]
fn test_decode_caller_image() {
    let built = sdk_builder().with_base(0x1100_0000).build();
    let device = DeviceMemory {
        base: 0x1100_0000,
        ram: built.data,
    };
    let parsed = decode_image(&device, &DecodeConfig::default()).unwrap();
    assert_eq!(parsed.container(), None);
    assert_eq!(parsed.program_name(), Some("blink"));
    assert_eq!(parsed.header().address, 0x1100_0100);
}
