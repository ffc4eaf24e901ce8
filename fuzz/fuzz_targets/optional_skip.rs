#![no_main]
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use slicewire_proto::{InputStream, TagHeader};

// Walk a run of tagged optional members the way a decoder skips unknown
// ones. Must stop cleanly at the end marker or with an error.
fuzz_target!(|data: &[u8]| {
    let mut input = InputStream::new(Bytes::copy_from_slice(data));
    while let Ok(Some(header)) = TagHeader::read(&mut input) {
        if header.format.skip(&mut input).is_err() {
            break;
        }
    }
});
