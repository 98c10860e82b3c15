//! Hex text helpers: parsing byte strings typed by a user and the classic
//! address / hex / ASCII dump layout.

use regex::Regex;
use std::fmt::Write;
use std::sync::LazyLock;

pub const DEFAULT_BYTES_PER_LINE: usize = 16;
pub const MIN_ADDRESS_WIDTH: usize = 4;

static HEX_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9A-Fa-f]{2})*$").expect("hex pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("invalid hex string: {0:?}")]
    InvalidDigits(String),
}

/// Parse a hex byte string such as `"de ad be ef"`, `"DEADBEEF"` or
/// `"0x0a,0x0b"`. Separators (whitespace, `,`, `:`, `-`) and `0x` prefixes
/// are ignored.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, HexError> {
    let digits: String = input
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ':' | '-'))
        .map(|token| {
            token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token)
        })
        .collect();

    if !HEX_DIGITS.is_match(&digits) {
        return Err(HexError::InvalidDigits(input.to_string()));
    }

    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| HexError::InvalidDigits(input.to_string()))
        })
        .collect()
}

/// Number of hex digits needed to print addresses up to `end`, never fewer
/// than `minimum`.
pub fn address_width(end: u64, minimum: usize) -> usize {
    let digits = if end == 0 {
        1
    } else {
        (64 - end.leading_zeros() as usize).div_ceil(4)
    };
    digits.max(minimum)
}

/// Printable ASCII or `.`.
pub fn printable(byte: u8) -> char {
    if (0x20..=0x7e).contains(&byte) {
        byte as char
    } else {
        '.'
    }
}

/// Render `bytes` as rows of `address  hex  ascii`, addresses starting at
/// `address_offset`.
pub fn to_readable(bytes: &[u8], address_offset: u64, bytes_per_line: usize) -> String {
    let bytes_per_line = bytes_per_line.max(1);
    let width = address_width(address_offset + bytes.len() as u64, MIN_ADDRESS_WIDTH);
    let mut result = String::new();

    for (row, line) in bytes.chunks(bytes_per_line).enumerate() {
        let address = address_offset + (row * bytes_per_line) as u64;
        let hex: String = line.iter().map(|byte| format!(" {byte:02x}")).collect();
        let ascii: String = line.iter().copied().map(printable).collect();
        let _ = writeln!(
            result,
            "{address:0width$x} {hex:<hex_width$}  {ascii:<ascii_width$}",
            hex_width = bytes_per_line * 3,
            ascii_width = bytes_per_line + 1,
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_forms() {
        assert_eq!(parse_hex("deadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_hex("DE AD").unwrap(), vec![0xde, 0xad]);
        assert_eq!(parse_hex("0x0a,0x0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(parse_hex("00:ff").unwrap(), vec![0x00, 0xff]);
        assert_eq!(parse_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_parse_hex_rejects_garbage() {
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
        assert!(parse_hex("12 3").is_err());
    }

    #[test]
    fn test_address_width() {
        assert_eq!(address_width(0, 4), 4);
        assert_eq!(address_width(0xffff, 4), 4);
        assert_eq!(address_width(0x10000, 4), 5);
        assert_eq!(address_width(0x1_0000_0000, 4), 9);
    }

    #[test]
    fn test_to_readable_layout() {
        let bytes: Vec<u8> = (0x41..0x41 + 18).collect();
        let dump = to_readable(&bytes, 0, 16);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000  41 42 43"));
        assert!(lines[0].contains("ABCDEFGHIJKLMNOP"));
        assert!(lines[1].starts_with("0010  51 52"));
        assert!(lines[1].contains("QR"));
    }

    #[test]
    fn test_non_printables_become_dots() {
        let dump = to_readable(&[0x00, 0x41, 0x7f], 0x100, 16);
        assert!(dump.starts_with("0100  00 41 7f"));
        assert!(dump.contains(".A."));
    }
}
