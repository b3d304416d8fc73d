#![no_main]

use libfuzzer_sys::fuzz_target;

use shellgram::channels::telegram::{fit_message_text, MAX_MESSAGE_CHARS};
use shellgram::exec::normalize_to_text;

fuzz_target!(|data: &[u8]| {
    let text = normalize_to_text(data);

    // Valid UTF-8 passes through untouched.
    if let Ok(utf8) = std::str::from_utf8(data) {
        assert_eq!(text, utf8);
    }

    // The single-byte fallback never produces more chars than input bytes.
    assert!(text.chars().count() <= data.len());

    let fitted = fit_message_text(&text);
    assert!(!fitted.is_empty());
    assert!(fitted.chars().count() <= MAX_MESSAGE_CHARS);
});
