#![no_main]

use libfuzzer_sys::fuzz_target;

use huella::events::TraceEvent;

fuzz_target!(|data: &[u8]| {
    // Convert arbitrary bytes to UTF-8 string (lossy conversion)
    if let Ok(input) = std::str::from_utf8(data) {
        // Attempt to decode the event line
        // This should not panic regardless of input
        let _ = serde_json::from_str::<TraceEvent>(input);
    }
});
