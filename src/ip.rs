//! IP address field helpers.
//!
//! IP values are stored as raw octet arrays: 4 bytes for IPv4, 16 for IPv6.
//! Prefix and suffix tests strip trailing zero octets from the operand first,
//! so "129.0.116.0" matches any address in 129.0.116/24.

use std::net::Ipv6Addr;

/// Renders an IP octet array to canonical text: dotted-quad for 4 bytes,
/// RFC 5952 text for 16. Other lengths have no canonical form.
pub fn render_ip(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => Some(format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3])),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Some(Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}

/// Parses dotted-quad IPv4 text into 4 octets.
pub fn parse_ipv4(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(4);
    for part in text.split('.') {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        out.push(part.parse::<u8>().ok()?);
    }
    if out.len() == 4 {
        Some(out)
    } else {
        None
    }
}

/// Parses IPv6 text into 16 octets.
pub fn parse_ipv6(text: &str) -> Option<Vec<u8>> {
    text.parse::<Ipv6Addr>().ok().map(|a| a.octets().to_vec())
}

/// Byte-exact address equality.
pub fn ips_equal(a: &[u8], b: &[u8]) -> bool {
    a == b
}

/// True if `addr` begins with `operand`, after stripping trailing zero
/// octets from the operand.
pub fn ip_begins_with(addr: &[u8], operand: &[u8]) -> bool {
    let prefix = strip_trailing_zeros(operand);
    prefix.len() <= addr.len() && addr[..prefix.len()] == *prefix
}

/// True if `addr` ends with `operand`, after stripping trailing zero
/// octets from the operand.
pub fn ip_ends_with(addr: &[u8], operand: &[u8]) -> bool {
    let suffix = strip_trailing_zeros(operand);
    suffix.len() <= addr.len() && addr[addr.len() - suffix.len()..] == *suffix
}

/// Drops the trailing all-zero octets: 129.0.116.0 becomes [129, 0, 116],
/// 129.116.0.0 becomes [129, 116].
fn strip_trailing_zeros(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && bytes[end - 1] == 0 {
        end -= 1;
    }
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn renders_v4_and_v6() {
        assert_eq!(render_ip(&[129, 0, 116, 55]).unwrap(), "129.0.116.55");
        let v6 = parse_ipv6("fe80::1").unwrap();
        assert_eq!(render_ip(&v6).unwrap(), "fe80::1");
        assert_eq!(render_ip(&[1, 2, 3]), None);
    }

    #[test]
    fn parses_v4_strictly() {
        assert_eq!(parse_ipv4("10.0.0.1").unwrap(), vec![10, 0, 0, 1]);
        assert_eq!(parse_ipv4("10.0.0"), None);
        assert_eq!(parse_ipv4("10.0.0.256"), None);
        assert_eq!(parse_ipv4("fe80::1"), None);
    }

    #[test]
    fn prefix_test_strips_trailing_zero_octets() {
        assert!(ip_begins_with(&[129, 0, 116, 55], &[129, 0, 116, 0]));
        assert!(ip_begins_with(&[129, 116, 4, 9], &[129, 116, 0, 0]));
        assert!(!ip_begins_with(&[129, 1, 116, 55], &[129, 0, 116, 0]));
    }

    #[test]
    fn suffix_test_mirrors_prefix() {
        assert!(ip_ends_with(&[10, 20, 30, 40], &[30, 40, 0, 0]));
        assert!(!ip_ends_with(&[10, 20, 30, 40], &[20, 40, 0, 0]));
    }

    proptest! {
        #[test]
        fn v4_text_roundtrip(octets in prop::array::uniform4(any::<u8>())) {
            let text = render_ip(&octets).unwrap();
            prop_assert_eq!(parse_ipv4(&text).unwrap(), octets.to_vec());
        }

        #[test]
        fn every_address_begins_and_ends_with_itself(octets in prop::collection::vec(any::<u8>(), 4..=4)) {
            prop_assert!(ip_begins_with(&octets, &octets));
            // Trailing zeros are stripped from the operand, so the suffix
            // identity only holds when the address ends in a nonzero octet.
            if octets.last() != Some(&0) {
                prop_assert!(ip_ends_with(&octets, &octets));
            }
        }

        #[test]
        fn trailing_zero_operand_never_suffix_matches_its_own_address(
            head in prop::collection::vec(1u8..=255, 3..=3),
        ) {
            let mut octets = head;
            octets.push(0);
            // The stripped operand loses its final zero, shifting the suffix
            // window off by one.
            prop_assert!(!ip_ends_with(&octets, &octets));
        }
    }
}
