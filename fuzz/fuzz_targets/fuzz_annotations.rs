#![no_main]

//! Fuzz target for the annotation lexer
//!
//! Feeds arbitrary text through the scanner and the argument reader; neither
//! may panic, whatever the input looks like.

use libfuzzer_sys::fuzz_target;
use lokstra_codegen::annotation;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(annotations) = annotation::scan("fuzz.rs", text) else {
        return;
    };
    for ann in &annotations {
        // Arguments must read cleanly or fail cleanly.
        let _ = ann.read_args("fuzz.rs", &["name", "prefix", "middlewares"]);
        let _ = ann.read_args("fuzz.rs", &[]);
    }
});
