//! Identifier validation and canonicalization.
//!
//! These functions are pure: they never touch the network and always return a
//! `Result`, whatever the input. [`parse_identifier`] is the only way to build
//! an [`Identifier`].

use crate::error::RdapError;
use crate::types::{Identifier, IdentifierKind, IpNetwork};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Maximum length of a domain name in presentation form, without root dot.
const MAX_DOMAIN_LEN: usize = 253;

/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

/// Parse and canonicalize a raw identifier.
///
/// Without a hint the class is detected from the input's shape:
/// - contains `/` → CIDR block
/// - contains `:` → IPv6 address
/// - `AS`-prefixed or purely numeric → ASN
/// - digits and dots only → IPv4 address (never falls back to a domain)
/// - anything else → domain name
///
/// With a hint the input must fit that class.
///
/// # Examples
///
/// ```rust
/// use rdap_client_lib::{parse_identifier, Identifier};
///
/// let id = parse_identifier("Example.COM.", None).unwrap();
/// assert_eq!(id.canonical(), "example.com");
///
/// let asn = parse_identifier("AS15169", None).unwrap();
/// assert_eq!(asn, Identifier::Asn(15169));
/// ```
pub fn parse_identifier(
    raw: &str,
    hint: Option<IdentifierKind>,
) -> Result<Identifier, RdapError> {
    let input = raw.trim();

    if input.is_empty() {
        return Err(RdapError::validation(raw, "identifier cannot be empty"));
    }

    match hint {
        Some(IdentifierKind::Domain) => input.parse().map(Identifier::Domain),
        Some(IdentifierKind::Ip) => parse_ip_target(input),
        Some(IdentifierKind::Asn) => parse_asn(input).map(Identifier::Asn),
        None => {
            if input.contains('/') || input.contains(':') {
                parse_ip_target(input)
            } else if looks_like_asn(input) {
                parse_asn(input).map(Identifier::Asn)
            } else if input.chars().all(|c| c.is_ascii_digit() || c == '.') {
                parse_ipv4(input).map(|v4| Identifier::Ip(IpAddr::V4(v4)))
            } else {
                input.parse().map(Identifier::Domain)
            }
        }
    }
}

fn looks_like_asn(input: &str) -> bool {
    let digits = strip_as_prefix(input);
    let digits = digits.strip_prefix('-').unwrap_or(digits);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn strip_as_prefix(input: &str) -> &str {
    if input.len() >= 2 && input[..2].eq_ignore_ascii_case("as") {
        &input[2..]
    } else {
        input
    }
}

/// Parse an autonomous system number, with or without `AS` prefix.
pub fn parse_asn(input: &str) -> Result<u32, RdapError> {
    let digits = strip_as_prefix(input.trim());

    if digits.starts_with('-') {
        return Err(RdapError::validation(input, "ASN cannot be negative"));
    }

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(RdapError::validation(input, "ASN must be a decimal integer"));
    }

    // Long digit strings overflow u64 too; they are out of range either way.
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| RdapError::validation(input, "ASN must be between 0 and 4294967295"))
}

/// Parse a dotted-quad IPv4 address in strict canonical form.
///
/// Leading zeros, short forms (`10.1`) and out-of-range octets are rejected.
pub fn parse_ipv4(input: &str) -> Result<Ipv4Addr, RdapError> {
    let parts: Vec<&str> = input.split('.').collect();

    if parts.len() != 4 {
        return Err(RdapError::validation(
            input,
            "IPv4 address must have exactly four octets",
        ));
    }

    let mut octets = [0u8; 4];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || part.len() > 3 || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(RdapError::validation(input, "invalid IPv4 octet"));
        }
        if part.len() > 1 && part.starts_with('0') {
            return Err(RdapError::validation(
                input,
                "IPv4 octets cannot have leading zeros",
            ));
        }
        octets[i] = part
            .parse::<u8>()
            .map_err(|_| RdapError::validation(input, "IPv4 octet out of range"))?;
    }

    Ok(Ipv4Addr::from(octets))
}

/// Parse an IPv6 address in compressed or expanded form. Zone indices are
/// not accepted.
pub fn parse_ipv6(input: &str) -> Result<Ipv6Addr, RdapError> {
    if input.contains('%') {
        return Err(RdapError::validation(
            input,
            "IPv6 zone identifiers are not allowed",
        ));
    }
    input
        .parse::<Ipv6Addr>()
        .map_err(|_| RdapError::validation(input, "invalid IPv6 address"))
}

/// Parse a single address of either family.
pub fn parse_ip(input: &str) -> Result<IpAddr, RdapError> {
    if input.contains(':') {
        parse_ipv6(input).map(IpAddr::V6)
    } else {
        parse_ipv4(input).map(IpAddr::V4)
    }
}

fn parse_ip_target(input: &str) -> Result<Identifier, RdapError> {
    match input.split_once('/') {
        Some((addr, prefix)) => {
            let addr = parse_ip(addr)?;
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) || prefix.len() > 3
            {
                return Err(RdapError::validation(input, "invalid prefix length"));
            }
            let prefix: u8 = prefix
                .parse()
                .map_err(|_| RdapError::validation(input, "invalid prefix length"))?;
            IpNetwork::new(addr, prefix)
                .map(Identifier::Network)
                .ok_or_else(|| RdapError::validation(input, "prefix length exceeds address width"))
        }
        None => parse_ip(input).map(Identifier::Ip),
    }
}

/// Validate and canonicalize a domain name.
///
/// Returns the lowercase ASCII (punycode) form without the root dot.
pub fn parse_domain(input: &str) -> Result<String, RdapError> {
    let trimmed = input.trim();

    let name = trimmed.strip_suffix('.').unwrap_or(trimmed);

    if name.is_empty() {
        return Err(RdapError::validation(input, "domain name cannot be empty"));
    }
    if name.ends_with('.') {
        return Err(RdapError::validation(
            input,
            "only a single trailing root dot is allowed",
        ));
    }
    if name.starts_with('.') {
        return Err(RdapError::validation(input, "domain name cannot start with a dot"));
    }

    let ascii = idna::domain_to_ascii(name)
        .map_err(|e| RdapError::validation(input, format!("IDNA conversion failed: {:?}", e)))?;

    if ascii.is_empty() {
        return Err(RdapError::validation(input, "domain name cannot be empty"));
    }
    if ascii.len() > MAX_DOMAIN_LEN {
        return Err(RdapError::validation(
            input,
            format!("domain name exceeds {} bytes", MAX_DOMAIN_LEN),
        ));
    }

    let labels: Vec<&str> = ascii.split('.').collect();
    for label in &labels {
        validate_label(input, label)?;
    }

    if let Some(tld) = labels.last() {
        if tld.chars().all(|c| c.is_ascii_digit()) {
            return Err(RdapError::validation(
                input,
                "top-level label cannot be numeric",
            ));
        }
    }

    Ok(ascii)
}

fn validate_label(input: &str, label: &str) -> Result<(), RdapError> {
    if label.is_empty() {
        return Err(RdapError::validation(input, "domain name contains an empty label"));
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(RdapError::validation(
            input,
            format!("label '{}' exceeds {} bytes", label, MAX_LABEL_LEN),
        ));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(RdapError::validation(
            input,
            format!("label '{}' cannot start or end with a hyphen", label),
        ));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(RdapError::validation(
            input,
            format!("label '{}' contains invalid characters", label),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_canonicalization() {
        assert_eq!(parse_domain("Example.COM").unwrap(), "example.com");
        assert_eq!(parse_domain("example.com.").unwrap(), "example.com");
        assert_eq!(parse_domain("bücher.de").unwrap(), "xn--bcher-kva.de");
        assert_eq!(parse_domain("com").unwrap(), "com");
    }

    #[test]
    fn test_domain_rejections() {
        assert!(parse_domain("").is_err());
        assert!(parse_domain(".").is_err());
        assert!(parse_domain("example.com..").is_err());
        assert!(parse_domain(".example.com").is_err());
        assert!(parse_domain("exa..mple.com").is_err());
        assert!(parse_domain("-example.com").is_err());
        assert!(parse_domain("example-.com").is_err());
        assert!(parse_domain("not a domain!").is_err());
        assert!(parse_domain("under_score.com").is_err());
        assert!(parse_domain("example.123").is_err());
    }

    #[test]
    fn test_domain_length_limits() {
        let label63 = "a".repeat(63);
        let label64 = "a".repeat(64);
        assert!(parse_domain(&format!("{}.com", label63)).is_ok());
        assert!(parse_domain(&format!("{}.com", label64)).is_err());

        // 4 * 63 + 3 dots = 255 bytes
        let long = vec![label63.as_str(); 4].join(".");
        assert!(parse_domain(&long).is_err());

        // 3 * 63 + 59 + 3 dots = 251 bytes
        let ok = format!("{}.{}", vec![label63.as_str(); 3].join("."), "a".repeat(59));
        assert!(parse_domain(&ok).is_ok());
    }

    #[test]
    fn test_ipv4_strictness() {
        assert_eq!(parse_ipv4("8.8.8.8").unwrap(), Ipv4Addr::new(8, 8, 8, 8));
        assert!(parse_ipv4("999.999.999.999").is_err());
        assert!(parse_ipv4("08.8.8.8").is_err());
        assert!(parse_ipv4("10.1").is_err());
        assert!(parse_ipv4("1.2.3.4.5").is_err());
        assert!(parse_ipv4("1..3.4").is_err());
        assert!(parse_ipv4("256.0.0.1").is_err());
        assert_eq!(parse_ipv4("0.0.0.0").unwrap(), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_ipv6_canonicalization() {
        let expanded = "2001:0DB8:0000:0000:0000:0000:0000:0001";
        let id = parse_identifier(expanded, None).unwrap();
        assert_eq!(id.canonical(), "2001:db8::1");
        assert!(parse_ipv6("fe80::1%eth0").is_err());
        assert!(parse_ipv6("2001:db8:::1").is_err());
    }

    #[test]
    fn test_asn_parsing() {
        assert_eq!(parse_asn("AS15169").unwrap(), 15169);
        assert_eq!(parse_asn("as15169").unwrap(), 15169);
        assert_eq!(parse_asn("0").unwrap(), 0);
        assert_eq!(parse_asn("4294967295").unwrap(), u32::MAX);
        assert!(parse_asn("4294967296").is_err());
        assert!(parse_asn("AS999999999999").is_err());
        assert!(parse_asn("-1").is_err());
        assert!(parse_asn("AS").is_err());
        assert!(parse_asn("AS12a").is_err());
    }

    #[test]
    fn test_detection() {
        assert_eq!(parse_identifier("15169", None).unwrap(), Identifier::Asn(15169));
        assert!(matches!(
            parse_identifier("8.8.8.8", None).unwrap(),
            Identifier::Ip(IpAddr::V4(_))
        ));
        assert!(matches!(
            parse_identifier("2001:db8::/32", None).unwrap(),
            Identifier::Network(_)
        ));
        assert!(matches!(
            parse_identifier("example.org", None).unwrap(),
            Identifier::Domain(_)
        ));

        let err = parse_identifier("999.999.999.999", None).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(parse_identifier("AS999999999999", None).is_err());
        assert!(parse_identifier("-42", None).is_err());
        assert!(parse_identifier("   ", None).is_err());
    }

    #[test]
    fn test_hints() {
        assert!(parse_identifier("example.com", Some(IdentifierKind::Ip)).is_err());
        assert!(parse_identifier("8.8.8.8", Some(IdentifierKind::Asn)).is_err());
        assert_eq!(
            parse_identifier("64512", Some(IdentifierKind::Asn)).unwrap(),
            Identifier::Asn(64512)
        );
    }

    #[test]
    fn test_cidr_parsing() {
        let id = parse_identifier("10.1.2.3/8", None).unwrap();
        assert_eq!(id.canonical(), "10.0.0.0/8");
        assert!(parse_identifier("10.0.0.0/33", None).is_err());
        assert!(parse_identifier("10.0.0.0/", None).is_err());
        assert!(parse_identifier("010.0.0.0/8", None).is_err());
    }

    #[test]
    fn test_round_trip() {
        let inputs = [
            "example.com",
            "xn--bcher-kva.de",
            "8.8.8.8",
            "2001:db8::1",
            "::ffff:192.0.2.1",
            "192.0.2.0/24",
            "2001:db8::/32",
            "0",
            "4294967295",
            "AS64496",
        ];
        for input in inputs {
            let first = parse_identifier(input, None).unwrap();
            let second = parse_identifier(&first.canonical(), None).unwrap();
            assert_eq!(first, second, "round trip failed for {}", input);
            let third = parse_identifier(&first.to_string(), None).unwrap();
            assert_eq!(first, third, "display round trip failed for {}", input);
        }
    }
}
