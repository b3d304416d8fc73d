//! Output text normalization.
//!
//! Subprocess output is taken as-is when it is valid UTF-8. Anything else is
//! assumed to be Windows-1251 (the legacy Cyrillic code page that `cmd.exe`
//! and older tools emit) and transcoded. There is no charset detection; other
//! legacy encodings come out garbled but always as valid text.

use std::borrow::Cow;

use encoding_rs::WINDOWS_1251;

/// Convert raw process output into valid UTF-8 text.
pub fn normalize_to_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => decode_windows_1251(bytes).into_owned(),
    }
}

fn decode_windows_1251(bytes: &[u8]) -> Cow<'_, str> {
    // Single-byte table: each input byte yields exactly one char.
    let (text, _had_errors) = WINDOWS_1251.decode_without_bom_handling(bytes);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_utf8_is_unchanged() {
        let input = "total 0\nпривет 🚀\n";
        assert_eq!(normalize_to_text(input.as_bytes()), input);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize_to_text(b""), "");
    }

    #[test]
    fn test_windows_1251_cyrillic_is_transcoded() {
        // "Привет" in Windows-1251
        let bytes = [0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        assert_eq!(normalize_to_text(&bytes), "Привет");
    }

    #[test]
    fn test_mixed_ascii_and_legacy_bytes() {
        // "dir: Том" with the Cyrillic part in Windows-1251
        let mut bytes = b"dir: ".to_vec();
        bytes.extend_from_slice(&[0xD2, 0xEE, 0xEC]);
        assert_eq!(normalize_to_text(&bytes), "dir: Том");
    }

    #[test]
    fn test_invalid_utf8_always_yields_valid_text() {
        let bytes: Vec<u8> = (0u8..=255).collect();
        let text = normalize_to_text(&bytes);
        // Round-trips through &str, so it is valid by construction; check the
        // length in chars matches the byte count (one char per byte).
        assert_eq!(text.chars().count(), 256);
    }

    #[test]
    fn test_truncated_utf8_sequence_falls_back() {
        // Lone lead byte of a two-byte UTF-8 sequence.
        let bytes = [b'o', b'k', 0xD0];
        assert_eq!(normalize_to_text(&bytes), "okР");
    }
}
