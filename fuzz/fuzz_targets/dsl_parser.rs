#![no_main]

use abicheck_core::dsl;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // The parser must never panic on arbitrary input, whatever it decides
    // about well-formedness.
    let _ = dsl::parse(data);
});
