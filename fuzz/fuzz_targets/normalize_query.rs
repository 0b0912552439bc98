#![no_main]

use libfuzzer_sys::fuzz_target;
use querylens::normalize::{classify, normalize, truncate};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Never panics, and a second pass is a no-op
        let once = normalize(input);
        assert_eq!(normalize(&once), once);
        let _ = classify(input);
        let _ = truncate(input, 100);
    }
});
