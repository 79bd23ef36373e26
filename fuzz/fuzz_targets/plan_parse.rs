#![no_main]

//! Fuzz target for pipeline descriptor parsing (§6).
//!
//! `parse_pipeline` must never panic on arbitrary bytes, regardless of how
//! malformed the JSON or the `steps[].scripts` shape is.

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let _ = svpatch_runtime::pipeline::parse_pipeline(s);
});
