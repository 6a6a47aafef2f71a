#![no_main]
use libfuzzer_sys::fuzz_target;
use picodecl::image::Uf2Image;
use picodecl::AddressableImage;

fuzz_target!(|data: &[u8]| {
    if data.len() < 6 {
        return;
    }
    let address = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let len = u16::from_le_bytes([data[4], data[5]]) as usize;
    let image = Uf2Image::parse(bytes::Bytes::copy_from_slice(&data[6..]), None);
    if let Ok(read) = image.read(address, len) {
        assert_eq!(read.len(), len);
    }
    for span in image.spans() {
        let _ = image.read(span.start, span.len);
    }
});
