//! Hexadecimal and decimal byte renderings, plus outbound hex parsing

use super::CodecError;
use bytes::Bytes;

/// Uppercase hex (e.g., "48 65 6C 6C 6F")
pub fn format_hex(data: &[u8]) -> String {
    let mut output = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            output.push(' ');
        }
        output.push_str(&format!("{:02X}", byte));
    }
    output
}

/// Decimal byte values (e.g., "72 101 108")
pub fn format_decimal(data: &[u8]) -> String {
    data.iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a user-typed hex payload such as "AA 55 01".
///
/// Whitespace is ignored. Odd digit counts and non-hex characters are
/// rejected so nothing reaches the adapter.
pub fn parse_hex_payload(text: &str) -> Result<Bytes, CodecError> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();

    if let Some((pos, c)) = cleaned.char_indices().find(|(_, c)| !c.is_ascii_hexdigit()) {
        return Err(CodecError::InvalidCharacter(pos, c));
    }

    if cleaned.len() % 2 != 0 {
        return Err(CodecError::InvalidFormat(
            "Hex string must have even number of digits".to_string(),
        ));
    }

    ::hex::decode(&cleaned)
        .map(Bytes::from)
        .map_err(|e| CodecError::InvalidFormat(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hex_upper() {
        assert_eq!(format_hex(b"Hello"), "48 65 6C 6C 6F");
        assert_eq!(format_hex(&[]), "");
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(b"Hi"), "72 105");
    }

    #[test]
    fn test_parse_hex_payload() {
        let result = parse_hex_payload("aa 55  0F").unwrap();
        assert_eq!(&result[..], &[0xAA, 0x55, 0x0F]);
    }

    #[test]
    fn test_parse_hex_rejects_odd_length() {
        assert!(matches!(
            parse_hex_payload("ABC"),
            Err(CodecError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_hex_rejects_non_hex() {
        assert_eq!(
            parse_hex_payload("0G"),
            Err(CodecError::InvalidCharacter(1, 'G'))
        );
    }
}
