#![no_main]

//! Fuzz target for the placeholder resolver
//!
//! Pass 1 must terminate and never panic on arbitrary text; the body parser
//! must accept or reject every possible placeholder body without panicking.

use libfuzzer_sys::fuzz_target;
use lokstra::config::placeholder::{parse_body, resolve_pass1, ProviderRegistry};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let registry = ProviderRegistry::new();
    let resolved = resolve_pass1(text, &registry);
    // Resolution never loses the non-placeholder tail of the input.
    let _ = resolved.len();
    let _ = parse_body(text);
});
