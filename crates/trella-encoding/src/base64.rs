//! Base64 with line wrapping and a lenient decoder.
//!
//! Credential material crosses two text surfaces: custom HTTP
//! authentication headers and PEM bodies. Both need an encoder that
//! can break lines at a configurable interval and a decoder that
//! tolerates whatever whitespace the other side (or a proxy) has
//! inserted. The alphabet engine comes from the `base64` crate; the
//! wrapping and the skip-anything decode are layered on top.
//!
//! Law: `decode(&encode(x, bpl)) == x` for every byte sequence `x`
//! and every `bpl >= 1`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Exact encoded size of `size` input bytes wrapped every `bpl`
/// plaintext bytes, including padding and line breaks.
pub fn encoded_len(size: usize, bpl: usize) -> usize {
    let chars = size.div_ceil(3) * 4;
    let breaks = if bpl > 0 && size > bpl {
        (size - 1) / bpl
    } else {
        0
    };
    chars + breaks
}

/// Encode `src`, inserting a line break after every `bpl` plaintext
/// bytes. Output carries standard `=` padding at the end.
pub fn encode(src: &[u8], bpl: usize) -> String {
    let flat = STANDARD.encode(src);
    if bpl == 0 || src.len() <= bpl {
        return flat;
    }

    // Break positions expressed in output characters: a break goes in
    // front of the character that begins with plaintext byte i * bpl.
    let breaks = (src.len() - 1) / bpl;
    let mut out = String::with_capacity(flat.len() + breaks);
    let mut next = 1;
    for (pos, ch) in flat.chars().enumerate() {
        if next <= breaks && pos == next * bpl * 4 / 3 {
            out.push('\n');
            next += 1;
        }
        out.push(ch);
    }
    out
}

/// Encode without any line breaks, for single-line carriers such as
/// HTTP header values and search-query rewrites.
pub fn encode_compact(src: &[u8]) -> String {
    STANDARD.encode(src)
}

/// Decode leniently: any byte outside the Base64 alphabet (newlines,
/// whitespace, padding, header punctuation) is skipped, and the rest
/// is consumed as a 6-bit stream that simply stops at end of input.
pub fn decode(src: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len() / 4 * 3);
    let mut acc: u32 = 0;
    let mut bits = 0u8;
    for &b in src {
        let val = match b {
            b'A'..=b'Z' => b - b'A',
            b'a'..=b'z' => b - b'a' + 26,
            b'0'..=b'9' => b - b'0' + 52,
            b'+' => 62,
            b'/' => 63,
            _ => continue,
        };
        acc = (acc << 6) | u32::from(val);
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
        }
    }
    out
}

/// Decode a string slice leniently.
pub fn decode_str(src: &str) -> Vec<u8> {
    decode(src.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(encode(b"", 64), "");
        assert_eq!(encode(b"f", 64), "Zg==");
        assert_eq!(encode(b"fo", 64), "Zm8=");
        assert_eq!(encode(b"foo", 64), "Zm9v");
        assert_eq!(encode(b"foobar", 64), "Zm9vYmFy");
    }

    #[test]
    fn test_decode_skips_noise() {
        assert_eq!(decode(b"Zm9v\r\nYmFy"), b"foobar");
        assert_eq!(decode(b"  Zg = = "), b"f");
        assert_eq!(decode(b"Z|m!9v"), b"foo");
    }

    #[test]
    fn test_wrap_break_count() {
        let data = [0u8; 10];
        let wrapped = encode(&data, 3);
        assert_eq!(wrapped.matches('\n').count(), 3);
        assert_eq!(wrapped.len(), encoded_len(data.len(), 3));
        assert_eq!(decode(wrapped.as_bytes()), data);
    }

    #[test]
    fn test_no_wrap_when_short() {
        let data = [7u8; 8];
        assert!(!encode(&data, 8).contains('\n'));
        assert!(encode(&data, 7).contains('\n'));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512),
                          bpl in 1usize..96) {
            let text = encode(&data, bpl);
            prop_assert_eq!(text.len(), encoded_len(data.len(), bpl));
            prop_assert_eq!(decode(text.as_bytes()), data);
        }
    }
}
