#![no_main]
use folio_events::balance;
use folio_events::encoding::{CanonicalDecode, CanonicalEncode};
use folio_events::EventBuffer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Stored cache entries come back through this path
    if let Ok(buffer) = EventBuffer::decode(data) {
        let _ = balance::validate(buffer.events());
        if let Ok(encoded) = buffer.encode() {
            assert_eq!(EventBuffer::decode(&encoded).ok(), Some(buffer));
        }
    }
});
