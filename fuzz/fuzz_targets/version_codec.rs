#![no_main]

use abicheck_types::Version;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(v) = Version::parse(s) {
            let formatted = v.to_string();
            assert_eq!(Version::parse(&formatted), Ok(v));
        }
    }

    if data.len() >= 4 {
        let h = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let v = Version::from_hex(h);
        let _ = v.hex();
    }
});
