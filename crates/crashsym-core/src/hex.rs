//! Lenient hexadecimal parsing for report addresses.
//!
//! Crash logs are frequently truncated or mangled in transit, so address text
//! is never rejected: any byte outside `[0-9a-fA-F]` counts as the digit `0`.
//! Digits accumulate by shifting, which silently drops bits past 64 instead of
//! panicking on overflow.

/// Parse up to `length` bytes of `text` as a base-16 number.
///
/// ```rust
/// use crashsym_core::hex::parse_hex;
///
/// assert_eq!(parse_hex("00001f40", 8), 0x1f40);
/// assert_eq!(parse_hex("1g", 2), 0x10);
/// assert_eq!(parse_hex("abcdef", 2), 0xab);
/// ```
pub fn parse_hex(text: &str, length: usize) -> u64
{
    text.bytes()
        .take(length)
        .fold(0u64, |acc, byte| (acc << 4) | u64::from(nibble(byte)))
}

/// Parse a whole address token, ignoring an optional `0x` prefix.
///
/// ```rust
/// use crashsym_core::hex::parse_hex_str;
///
/// assert_eq!(parse_hex_str("0x100004000"), 0x1_0000_4000);
/// assert_eq!(parse_hex_str("7fff"), 0x7fff);
/// ```
pub fn parse_hex_str(text: &str) -> u64
{
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    parse_hex(digits, digits.len())
}

const fn nibble(byte: u8) -> u8
{
    match byte {
        b'0'..=b'9' => byte - b'0',
        b'a'..=b'f' => byte - b'a' + 10,
        b'A'..=b'F' => byte - b'A' + 10,
        _ => 0,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_hex_valid_digits()
    {
        assert_eq!(parse_hex("0", 1), 0);
        assert_eq!(parse_hex("ff", 2), 0xff);
        assert_eq!(parse_hex("FF", 2), 0xff);
        assert_eq!(parse_hex("DeadBeef", 8), 0xdead_beef);
        assert_eq!(parse_hex("ffffffffffffffff", 16), u64::MAX);
    }

    #[test]
    fn test_parse_hex_respects_length()
    {
        assert_eq!(parse_hex("12345678", 4), 0x1234);
        assert_eq!(parse_hex("12", 10), 0x12);
        assert_eq!(parse_hex("12", 0), 0);
    }

    #[test]
    fn test_parse_hex_invalid_digits_count_as_zero()
    {
        assert_eq!(parse_hex("1z", 2), 0x10);
        assert_eq!(parse_hex("z1", 2), 0x01);
        assert_eq!(parse_hex("zzzz", 4), 0);
        assert_eq!(parse_hex("0x10", 4), 0x010);
    }

    #[test]
    fn test_parse_hex_overlong_input_does_not_panic()
    {
        assert_eq!(parse_hex("1ffffffffffffffff", 17), u64::MAX);
    }

    #[test]
    fn test_parse_hex_str_prefix()
    {
        assert_eq!(parse_hex_str("0x1000"), 0x1000);
        assert_eq!(parse_hex_str("0X1000"), 0x1000);
        assert_eq!(parse_hex_str("1000"), 0x1000);
        assert_eq!(parse_hex_str(""), 0);
    }
}
