#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let cfg = picodecl::DecodeConfig {
        max_string_len: 64,
        scan_window: 256,
        ..picodecl::DecodeConfig::default()
    };
    let _ = picodecl::decode_with_config(data.to_vec(), &cfg);
});
