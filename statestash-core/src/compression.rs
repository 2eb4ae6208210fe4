/*!
String compression for persisted store state.

Persisted values live in string-only key-value backends, so the codec maps a
string to a shorter ASCII string rather than to raw bytes. It is an LZW-family
coder over the UTF-8 bytes of its input. Emitted codes are written with a
64-symbol alphabet for values below 64 and a `|`-prefixed, `.`-terminated
base-36 escape for everything else, which keeps the output URL-safe.

The dictionary lives only for the duration of one call.
*/

use std::collections::HashMap;

use crate::{PersistError, Result};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
const ESCAPE: char = '|';
const ESCAPE_END: char = '.';

/// Codes 0..=255 are the single-byte phrases every dictionary starts with.
const SEED_CODES: u32 = 256;

/// Compression abstraction for persisted state strings
///
/// The persistence coordinator only talks to this trait, so strategies can
/// switch between the LZW codec and a pass-through without knowing either.
pub trait CompressionAdapter: Send + Sync {
    /// Compress a serialized snapshot
    fn compress(&self, data: &str) -> Result<String>;

    /// Reverse [`CompressionAdapter::compress`]
    ///
    /// # Errors
    /// * `PersistError::Compression` - If the input is not valid codec output
    fn decompress(&self, compressed: &str) -> Result<String>;

    /// Get the name of the compression algorithm
    fn algorithm_name(&self) -> &str;
}

/// LZW string compressor with an ASCII-safe output alphabet
///
/// # Example
/// ```rust
/// use statestash_core::{CompressionAdapter, LzwCompressor};
///
/// let compressor = LzwCompressor::new();
/// let compressed = compressor.compress(r#"{"rows":[1,1,1,1,1,1,1,1]}"#)?;
/// assert_eq!(compressor.decompress(&compressed)?, r#"{"rows":[1,1,1,1,1,1,1,1]}"#);
/// # Ok::<(), statestash_core::PersistError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct LzwCompressor;

impl LzwCompressor {
    pub fn new() -> Self {
        Self
    }
}

impl CompressionAdapter for LzwCompressor {
    fn compress(&self, data: &str) -> Result<String> {
        Ok(compress(data))
    }

    fn decompress(&self, compressed: &str) -> Result<String> {
        decompress(compressed)
    }

    fn algorithm_name(&self) -> &str {
        "lzw"
    }
}

/// Pass-through adapter used by strategies that do not compress
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &str) -> Result<String> {
        Ok(data.to_string())
    }

    fn decompress(&self, compressed: &str) -> Result<String> {
        Ok(compressed.to_string())
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }
}

/// Compress a string
///
/// The empty string compresses to the empty string.
pub fn compress(input: &str) -> String {
    let mut bytes = input.bytes();
    let Some(first) = bytes.next() else {
        return String::new();
    };

    // (prefix code, next byte) -> code of the extended phrase
    let mut dictionary: HashMap<(u32, u8), u32> = HashMap::new();
    let mut next_code = SEED_CODES;
    let mut current = u32::from(first);
    let mut output = String::with_capacity(input.len() / 2 + 4);

    for byte in bytes {
        match dictionary.get(&(current, byte)) {
            Some(&code) => current = code,
            None => {
                write_code(&mut output, current);
                dictionary.insert((current, byte), next_code);
                next_code += 1;
                current = u32::from(byte);
            }
        }
    }
    write_code(&mut output, current);

    output
}

/// Decompress a string produced by [`compress`]
///
/// # Errors
/// * `PersistError::Compression` - If the input contains characters outside the
///   codec alphabet, a malformed escape, a code that was never defined, or
///   decodes to bytes that are not UTF-8
pub fn decompress(compressed: &str) -> Result<String> {
    if compressed.is_empty() {
        return Ok(String::new());
    }

    let codes = parse_codes(compressed)?;
    let mut codes = codes.into_iter();
    let first = codes
        .next()
        .ok_or_else(|| PersistError::compression("compressed input contains no codes"))?;

    // The encoder's first phrase is always a single byte.
    if first >= SEED_CODES {
        return Err(PersistError::compression(format!(
            "compressed input must start with a single-byte code, found {first}"
        )));
    }

    let mut dictionary: Vec<Vec<u8>> = (0..=u8::MAX).map(|b| vec![b]).collect();
    let mut previous = dictionary[first as usize].clone();
    let mut output = previous.clone();

    for code in codes {
        let index = code as usize;
        let entry = if index < dictionary.len() {
            dictionary[index].clone()
        } else if index == dictionary.len() {
            // The code being defined right now: previous phrase + its first byte.
            let mut entry = previous.clone();
            entry.push(previous[0]);
            entry
        } else {
            return Err(PersistError::compression(format!(
                "code {code} is not defined (dictionary has {} entries)",
                dictionary.len()
            )));
        };

        output.extend_from_slice(&entry);

        let mut defined = previous;
        defined.push(entry[0]);
        dictionary.push(defined);
        previous = entry;
    }

    String::from_utf8(output).map_err(|e| {
        PersistError::compression(format!("decompressed data is not valid UTF-8: {e}"))
    })
}

/// Percentage of bytes saved by `compressed` relative to `original`
///
/// Sizes are UTF-8 byte lengths. Returns 0 for an empty original and a
/// negative value when the "compressed" form is larger.
pub fn compression_ratio(original: &str, compressed: &str) -> f64 {
    if original.is_empty() {
        return 0.0;
    }
    (1.0 - compressed.len() as f64 / original.len() as f64) * 100.0
}

fn write_code(output: &mut String, code: u32) {
    if code < ALPHABET.len() as u32 {
        output.push(char::from(ALPHABET[code as usize]));
        return;
    }

    output.push(ESCAPE);
    let mut digits = [0u8; 8];
    let mut len = 0;
    let mut value = code;
    while value > 0 {
        digits[len] = (value % 36) as u8;
        value /= 36;
        len += 1;
    }
    for &digit in digits[..len].iter().rev() {
        if let Some(ch) = char::from_digit(u32::from(digit), 36) {
            output.push(ch);
        }
    }
    output.push(ESCAPE_END);
}

fn alphabet_index(ch: char) -> Option<u32> {
    let value = ch as u32;
    match ch {
        'A'..='Z' => Some(value - 'A' as u32),
        'a'..='z' => Some(26 + value - 'a' as u32),
        '0'..='9' => Some(52 + value - '0' as u32),
        '+' => Some(62),
        '/' => Some(63),
        _ => None,
    }
}

fn parse_codes(compressed: &str) -> Result<Vec<u32>> {
    let mut codes = Vec::with_capacity(compressed.len());
    let mut chars = compressed.char_indices();

    while let Some((position, ch)) = chars.next() {
        if ch != ESCAPE {
            let code = alphabet_index(ch).ok_or_else(|| {
                PersistError::compression(format!(
                    "unexpected character {ch:?} at byte {position}"
                ))
            })?;
            codes.push(code);
            continue;
        }

        let mut value: u32 = 0;
        let mut digits = 0;
        let mut terminated = false;
        for (_, digit_char) in chars.by_ref() {
            if digit_char == ESCAPE_END {
                terminated = true;
                break;
            }
            let digit = digit_char
                .to_digit(36)
                .filter(|_| !digit_char.is_ascii_uppercase())
                .ok_or_else(|| {
                    PersistError::compression(format!(
                        "invalid base-36 digit {digit_char:?} in escape at byte {position}"
                    ))
                })?;
            value = value
                .checked_mul(36)
                .and_then(|v| v.checked_add(digit))
                .ok_or_else(|| {
                    PersistError::compression(format!("escape at byte {position} overflows"))
                })?;
            digits += 1;
        }

        if !terminated {
            return Err(PersistError::compression(format!(
                "unterminated escape at byte {position}"
            )));
        }
        if digits == 0 {
            return Err(PersistError::compression(format!(
                "empty escape at byte {position}"
            )));
        }
        if value < ALPHABET.len() as u32 {
            return Err(PersistError::compression(format!(
                "escape at byte {position} encodes {value}, which has a single-character form"
            )));
        }
        codes.push(value);
    }

    Ok(codes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_empty_input() {
        assert_eq!(compress(""), "");
        assert_eq!(decompress("").unwrap(), "");
    }

    #[test]
    fn test_single_character() {
        // 'A' is byte 65, one past the single-character range
        assert_eq!(compress("A"), "|1t.");
        assert_eq!(compress("\u{1}"), "B");
        assert_eq!(decompress("|1t.").unwrap(), "A");
    }

    #[test]
    fn test_code_defined_by_previous_step() {
        // "aaa" emits 97 and then 256, the entry created by that same step
        let compressed = compress("aaa");
        assert_eq!(compressed, "|2p.|74.");
        assert_eq!(decompress(&compressed).unwrap(), "aaa");
    }

    #[test]
    fn test_escape_followed_by_digit_like_code() {
        // Codes [48, 256, 48]: the trailing 'w' must not be read as a base-36 digit
        let compressed = compress("0000");
        assert_eq!(compressed, "w|74.w");
        assert_eq!(decompress(&compressed).unwrap(), "0000");
    }

    #[test]
    fn test_roundtrip_random_printable_ascii() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let len = rng.gen_range(0..400);
            let input: String = (0..len)
                .map(|_| char::from(rng.gen_range(0x20u8..0x7f)))
                .collect();
            assert_eq!(decompress(&compress(&input)).unwrap(), input);
        }
    }

    #[test]
    fn test_roundtrip_small_alphabet() {
        // A tiny alphabet drives the dictionary deep into multi-byte phrases
        let mut rng = StdRng::seed_from_u64(42);
        let symbols = b"ab0 ";
        for _ in 0..100 {
            let len = rng.gen_range(1..2000);
            let input: String = (0..len)
                .map(|_| char::from(symbols[rng.gen_range(0..symbols.len())]))
                .collect();
            assert_eq!(decompress(&compress(&input)).unwrap(), input);
        }
    }

    #[test]
    fn test_roundtrip_control_and_latin1_characters() {
        let all: String = (0u8..=255).map(char::from).collect();
        assert_eq!(decompress(&compress(&all)).unwrap(), all);

        let with_nulls = "\0\0\0state\0\u{7f}\u{ff}\u{ff}\u{ff}\u{ff}\r\n\t";
        assert_eq!(decompress(&compress(with_nulls)).unwrap(), with_nulls);
    }

    #[test]
    fn test_roundtrip_multibyte_text() {
        let input = "héllo wörld — ステート ステート ステート 🦀🦀🦀";
        assert_eq!(decompress(&compress(input)).unwrap(), input);
    }

    #[test]
    fn test_output_alphabet_is_url_safe() {
        let compressed = compress(&"{\"key\":\"value\",\"n\":[1,2,3]}".repeat(50));
        assert!(compressed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '|' | '.')));
    }

    #[test]
    fn test_repetitive_input_compresses_well() {
        let input = "a".repeat(10_000);
        let compressed = compress(&input);

        assert!(compressed.len() * 10 < input.len());
        assert!(compression_ratio(&input, &compressed) > 0.0);
        assert_eq!(decompress(&compressed).unwrap(), input);
    }

    #[test]
    fn test_compression_ratio_uses_bytes() {
        assert_eq!(compression_ratio("", "anything"), 0.0);
        assert_eq!(compression_ratio("abcd", "ab"), 50.0);
        // four two-byte characters against four ASCII bytes
        assert_eq!(compression_ratio("éééé", "abcd"), 50.0);
        assert!(compression_ratio("ab", "abcd") < 0.0);
    }

    #[test]
    fn test_first_code_outside_seed_range_is_rejected() {
        let result = decompress("|74.");
        assert!(matches!(result, Err(PersistError::Compression(_))));
    }

    #[test]
    fn test_undefined_code_is_rejected() {
        // 1295 is far beyond the next dictionary slot (256)
        let result = decompress("B|zz.");
        assert!(matches!(result, Err(PersistError::Compression(_))));
    }

    #[test]
    fn test_malformed_escapes_are_rejected() {
        assert!(decompress("|").is_err());
        assert!(decompress("|2p").is_err());
        assert!(decompress("|.").is_err());
        assert!(decompress("|2P.").is_err());
        assert!(decompress("|1.").is_err());
        assert!(decompress("|zzzzzzzzzzzz.").is_err());
    }

    #[test]
    fn test_character_outside_alphabet_is_rejected() {
        let result = decompress("AB!C");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("byte 2"));
    }

    #[test]
    fn test_invalid_utf8_output_is_rejected() {
        // 195 is a lone UTF-8 lead byte
        let result = decompress("|5f.");
        assert!(matches!(result, Err(PersistError::Compression(_))));
    }

    #[test]
    fn test_adapters() {
        let lzw = LzwCompressor::new();
        let none = NoCompression::new();
        let data = r#"{"tables":["users","orders"],"filter":"","page":1}"#;

        assert_eq!(lzw.decompress(&lzw.compress(data).unwrap()).unwrap(), data);
        assert_eq!(none.compress(data).unwrap(), data);
        assert_eq!(none.decompress(data).unwrap(), data);
        assert_eq!(lzw.algorithm_name(), "lzw");
        assert_eq!(none.algorithm_name(), "none");
    }
}
