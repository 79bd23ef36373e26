#![no_main]

//! Fuzz target for patch-script parsing (§3).
//!
//! `parse_script` must never panic on arbitrary bytes, regardless of how
//! the pipe-escaping, heredoc, or implicit-multiline rules are abused.

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let _ = svpatch_dsl::parse_script(s);
});
