//! Hex byte strings on the command line.

/// Bytes given as hex digits, e.g. `01 00 02 03`, `01000203` or `0x01,0x00,0x02,0x03`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

pub fn parse_hex(text: &str) -> Result<Bytes, String> {
    let mut bytes = Vec::new();
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let token = token.trim_start_matches("0x");
        let decoded = hex::decode(token).map_err(|e| format!("'{}': {}", token, e))?;
        bytes.extend(decoded);
    }
    Ok(Bytes(bytes))
}

pub fn format_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn separators_are_optional() {
        let expected = Bytes(vec![0x01, 0x00, 0x02, 0x03]);
        assert_eq!(parse_hex("01 00 02 03"), Ok(expected.clone()));
        assert_eq!(parse_hex("01000203"), Ok(expected.clone()));
        assert_eq!(parse_hex("0x01,0x00, 0x0203"), Ok(expected));
        assert_eq!(parse_hex("DEADbeef"), Ok(Bytes(vec![0xde, 0xad, 0xbe, 0xef])));
        assert_eq!(parse_hex(""), Ok(Bytes::default()));
    }

    #[test]
    fn malformed_input() {
        // digits never pair up across separators
        assert!(parse_hex("0 1").is_err());
        assert!(parse_hex("123").is_err());
        assert!(parse_hex("zz").is_err());
    }

    #[test]
    fn formatting_parses_back() {
        assert_eq!(format_hex(&[0x02, 0x01, 0xff]), "0201ff");
        assert_eq!(format_hex(&[]), "");
        assert_eq!(parse_hex(&format_hex(&[0x00, 0x7f])), Ok(Bytes(vec![0x00, 0x7f])));
    }
}
