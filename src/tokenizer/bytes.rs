//! GPT-2 byte-to-unicode bijection
//!
//! Printable bytes (`!`..=`~`, 0xA1..=0xAC, 0xAE..=0xFF) map to the code
//! point of the same value. The remaining 68 bytes map in ascending order to
//! U+0100 onward, so every byte has a visible, non-whitespace character.

use std::collections::HashMap;
use std::sync::OnceLock;

fn is_direct(b: u8) -> bool {
    matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF)
}

fn build_encoder() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut n = 0u32;
    for b in 0u8..=255 {
        table[b as usize] = if is_direct(b) {
            char::from(b)
        } else {
            n += 1;
            // 256 + 67 is the largest value reached, always a valid scalar
            char::from_u32(256 + n - 1).unwrap_or(char::REPLACEMENT_CHARACTER)
        };
    }
    table
}

fn encoder() -> &'static [char; 256] {
    static ENCODER: OnceLock<[char; 256]> = OnceLock::new();
    ENCODER.get_or_init(build_encoder)
}

fn decoder() -> &'static HashMap<char, u8> {
    static DECODER: OnceLock<HashMap<char, u8>> = OnceLock::new();
    DECODER.get_or_init(|| {
        encoder()
            .iter()
            .enumerate()
            .map(|(b, &c)| (c, b as u8))
            .collect()
    })
}

/// Character standing for byte `b`
#[inline]
pub fn byte_to_char(b: u8) -> char {
    encoder()[b as usize]
}

/// Byte a character stands for, if it is in the mapping
#[inline]
pub fn char_to_byte(c: char) -> Option<u8> {
    decoder().get(&c).copied()
}

/// Reverse the mapping over a token string; unmapped characters pass
/// through as their UTF-8 encoding
pub fn decode_str(token: &str, out: &mut Vec<u8>) {
    for c in token.chars() {
        match char_to_byte(c) {
            Some(b) => out.push(b),
            None => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bijection() {
        let mut seen = std::collections::HashSet::new();
        for b in 0u8..=255 {
            let c = byte_to_char(b);
            assert!(seen.insert(c));
            assert_eq!(char_to_byte(c), Some(b));
        }
    }

    #[test]
    fn test_known_points() {
        assert_eq!(byte_to_char(b'A'), 'A');
        assert_eq!(byte_to_char(0), '\u{100}');
        // space is the 33rd remapped byte
        assert_eq!(byte_to_char(b' '), '\u{120}');
        assert_eq!(byte_to_char(b'\n'), '\u{10A}');
        assert_eq!(byte_to_char(0xAD), '\u{143}');
    }

    #[test]
    fn test_decode_passthrough() {
        let mut out = Vec::new();
        decode_str("Ġhi<|eot_id|>", &mut out);
        assert_eq!(out, b" hi<|eot_id|>");
    }
}
