//! Outbound request policy.
//!
//! Every URL the library fetches, whether it came from configuration or from
//! the bootstrap dataset, passes [`SsrfGuard`] twice: once on the URL itself
//! (scheme, host lists, literal addresses) and once on every address the host
//! resolves to. Blocked ranges:
//!
//! - loopback (127.0.0.0/8, ::1)
//! - private networks (10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16, fc00::/7)
//! - link-local (169.254.0.0/16 including 169.254.169.254, fe80::/10)
//! - multicast, unspecified, broadcast and reserved ranges
//! - IPv4-mapped and NAT64 forms of any of the above

use crate::error::RdapError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Address of the cloud instance metadata service.
const METADATA_V4: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

/// IPv4 ranges that are never contacted, as (network, prefix, reason).
const BLOCKED_V4: &[(Ipv4Addr, u8, &str)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8, "unspecified network"),
    (Ipv4Addr::new(10, 0, 0, 0), 8, "private network"),
    (Ipv4Addr::new(100, 64, 0, 0), 10, "carrier-grade NAT"),
    (Ipv4Addr::new(127, 0, 0, 0), 8, "loopback"),
    (Ipv4Addr::new(169, 254, 0, 0), 16, "link-local"),
    (Ipv4Addr::new(172, 16, 0, 0), 12, "private network"),
    (Ipv4Addr::new(192, 0, 0, 0), 24, "IETF protocol assignment"),
    (Ipv4Addr::new(192, 0, 2, 0), 24, "documentation range"),
    (Ipv4Addr::new(192, 168, 0, 0), 16, "private network"),
    (Ipv4Addr::new(198, 18, 0, 0), 15, "benchmarking range"),
    (Ipv4Addr::new(198, 51, 100, 0), 24, "documentation range"),
    (Ipv4Addr::new(203, 0, 113, 0), 24, "documentation range"),
    (Ipv4Addr::new(224, 0, 0, 0), 4, "multicast"),
    (Ipv4Addr::new(240, 0, 0, 0), 4, "reserved"),
];

/// IPv6 ranges that are never contacted.
const BLOCKED_V6: &[(Ipv6Addr, u8, &str)] = &[
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 128, "unspecified"),
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1), 128, "loopback"),
    (Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 0), 96, "IPv4-compatible"),
    (Ipv6Addr::new(0x100, 0, 0, 0, 0, 0, 0, 0), 64, "discard prefix"),
    (Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0), 32, "documentation range"),
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7, "unique local"),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10, "link-local"),
    (Ipv6Addr::new(0xfec0, 0, 0, 0, 0, 0, 0, 0), 10, "site-local"),
    (Ipv6Addr::new(0xff00, 0, 0, 0, 0, 0, 0, 0), 8, "multicast"),
];

/// Return why `ip` must not be contacted, or `None` if it is a public address.
pub fn blocked_reason(ip: &IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => blocked_reason_v4(v4),
        IpAddr::V6(v6) => blocked_reason_v6(v6),
    }
}

/// Whether `ip` is a globally routable address the library may contact.
pub fn is_public_ip(ip: &IpAddr) -> bool {
    blocked_reason(ip).is_none()
}

fn blocked_reason_v4(ip: &Ipv4Addr) -> Option<&'static str> {
    if *ip == METADATA_V4 {
        return Some("cloud metadata endpoint");
    }
    if ip.is_broadcast() {
        return Some("broadcast");
    }
    let bits = u32::from(*ip);
    BLOCKED_V4.iter().find_map(|(net, prefix, reason)| {
        let mask = u32::MAX << (32 - *prefix as u32);
        (bits & mask == u32::from(*net)).then_some(*reason)
    })
}

fn blocked_reason_v6(ip: &Ipv6Addr) -> Option<&'static str> {
    let bits = u128::from(*ip);

    // ::ffff:a.b.c.d and 64:ff9b::a.b.c.d reach IPv4 targets
    let prefix96 = bits >> 32;
    if prefix96 == 0xffff || prefix96 == 0x0064_ff9b_0000_0000_0000_0000 {
        return blocked_reason_v4(&Ipv4Addr::from(bits as u32));
    }

    BLOCKED_V6.iter().find_map(|(net, prefix, reason)| {
        let mask = if *prefix == 128 {
            u128::MAX
        } else {
            !(u128::MAX >> *prefix as u32)
        };
        (bits & mask == u128::from(*net)).then_some(*reason)
    })
}

/// Policy applied to every outbound URL.
#[derive(Debug, Clone, Default)]
pub struct SsrfGuard {
    /// If non-empty, only these hosts (and their subdomains) may be contacted.
    allowed_hosts: Vec<String>,
    /// Hosts (and their subdomains) that are never contacted.
    blocked_hosts: Vec<String>,
}

impl SsrfGuard {
    pub fn new(allowed_hosts: Vec<String>, blocked_hosts: Vec<String>) -> Self {
        let normalize = |hosts: Vec<String>| {
            hosts
                .into_iter()
                .map(|h| h.trim().trim_end_matches('.').to_lowercase())
                .filter(|h| !h.is_empty())
                .collect()
        };
        Self {
            allowed_hosts: normalize(allowed_hosts),
            blocked_hosts: normalize(blocked_hosts),
        }
    }

    /// Check scheme and host of a URL before any DNS resolution.
    ///
    /// Returns the literal address when the host is an IP literal.
    pub fn check_url(&self, url: &Url) -> Result<Option<IpAddr>, RdapError> {
        if url.scheme() != "https" {
            return Err(RdapError::ssrf(
                url.as_str(),
                format!("scheme '{}' is not allowed, HTTPS is required", url.scheme()),
            ));
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err(RdapError::ssrf(url.as_str(), "credentials in URL are not allowed"));
        }

        match url.host() {
            None => Err(RdapError::ssrf(url.as_str(), "URL has no host")),
            Some(Host::Ipv4(v4)) => {
                let ip = IpAddr::V4(v4);
                self.check_ip(url.as_str(), &ip)?;
                Ok(Some(ip))
            }
            Some(Host::Ipv6(v6)) => {
                let ip = IpAddr::V6(v6);
                self.check_ip(url.as_str(), &ip)?;
                Ok(Some(ip))
            }
            Some(Host::Domain(host)) => {
                self.check_host_name(url.as_str(), host)?;
                Ok(None)
            }
        }
    }

    fn check_host_name(&self, target: &str, host: &str) -> Result<(), RdapError> {
        let host = host.trim_end_matches('.').to_lowercase();

        if host == "localhost" || host.ends_with(".localhost") {
            return Err(RdapError::ssrf(target, "localhost is not allowed"));
        }

        if self
            .blocked_hosts
            .iter()
            .any(|blocked| host_matches(&host, blocked))
        {
            return Err(RdapError::ssrf(target, format!("host '{}' is blocked", host)));
        }

        if !self.allowed_hosts.is_empty()
            && !self
                .allowed_hosts
                .iter()
                .any(|allowed| host_matches(&host, allowed))
        {
            return Err(RdapError::ssrf(
                target,
                format!("host '{}' is not in the allow list", host),
            ));
        }

        Ok(())
    }

    /// Reject a single address if it falls in a blocked range.
    pub fn check_ip(&self, target: &str, ip: &IpAddr) -> Result<(), RdapError> {
        match blocked_reason(ip) {
            Some(reason) => Err(RdapError::ssrf(
                target,
                format!("{} resolves to {} address", ip, reason),
            )),
            None => Ok(()),
        }
    }

    /// Reject the host if *any* resolved address is blocked, and return the
    /// address to pin the connection to.
    pub fn check_resolved(&self, target: &str, addrs: &[IpAddr]) -> Result<IpAddr, RdapError> {
        let first = addrs
            .first()
            .copied()
            .ok_or_else(|| RdapError::network(format!("no addresses found for {}", target)))?;
        for ip in addrs {
            self.check_ip(target, ip)?;
        }
        Ok(first)
    }
}

fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern || host.ends_with(&format!(".{}", pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_blocked_ranges() {
        for addr in [
            "127.0.0.1",
            "127.255.0.9",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.1",
            "169.254.169.254",
            "169.254.1.1",
            "100.64.0.1",
            "0.0.0.0",
            "224.0.0.1",
            "255.255.255.255",
            "::1",
            "::",
            "fe80::1",
            "febf::1",
            "fd00::1",
            "ff02::1",
            "::ffff:127.0.0.1",
            "::ffff:10.0.0.1",
            "::127.0.0.1",
            "64:ff9b::a9fe:a9fe",
        ] {
            assert!(!is_public_ip(&ip(addr)), "{} should be blocked", addr);
        }
    }

    #[test]
    fn test_public_addresses() {
        for addr in [
            "8.8.8.8",
            "1.1.1.1",
            "172.32.0.1",
            "192.169.0.1",
            "199.71.0.63",
            "2001:500:13::63",
            "2606:4700::1111",
            "::ffff:8.8.8.8",
        ] {
            assert!(is_public_ip(&ip(addr)), "{} should be allowed", addr);
        }
    }

    #[test]
    fn test_metadata_reason() {
        assert_eq!(
            blocked_reason(&ip("169.254.169.254")),
            Some("cloud metadata endpoint")
        );
    }

    #[test]
    fn test_check_url_scheme() {
        let guard = SsrfGuard::default();
        let err = guard
            .check_url(&Url::parse("http://rdap.arin.net/registry/").unwrap())
            .unwrap_err();
        assert_eq!(err.code(), "SSRF_PROTECTION_ERROR");
        assert!(guard
            .check_url(&Url::parse("https://rdap.arin.net/registry/").unwrap())
            .is_ok());
        assert!(guard
            .check_url(&Url::parse("file:///etc/passwd").unwrap())
            .is_err());
    }

    #[test]
    fn test_check_url_literals_and_localhost() {
        let guard = SsrfGuard::default();
        assert!(guard
            .check_url(&Url::parse("https://127.0.0.1/domain/x").unwrap())
            .is_err());
        assert!(guard
            .check_url(&Url::parse("https://[::1]/domain/x").unwrap())
            .is_err());
        assert!(guard
            .check_url(&Url::parse("https://localhost/domain/x").unwrap())
            .is_err());
        assert_eq!(
            guard
                .check_url(&Url::parse("https://8.8.8.8/x").unwrap())
                .unwrap(),
            Some(ip("8.8.8.8"))
        );
        assert!(guard
            .check_url(&Url::parse("https://user:pw@rdap.example.net/").unwrap())
            .is_err());
    }

    #[test]
    fn test_host_lists() {
        let guard = SsrfGuard::new(
            vec!["arin.net".to_string()],
            vec!["evil.arin.net".to_string()],
        );
        assert!(guard
            .check_url(&Url::parse("https://rdap.arin.net/").unwrap())
            .is_ok());
        assert!(guard
            .check_url(&Url::parse("https://x.evil.arin.net/").unwrap())
            .is_err());
        assert!(guard
            .check_url(&Url::parse("https://rdap.db.ripe.net/").unwrap())
            .is_err());
    }

    #[test]
    fn test_check_resolved_rejects_any_bad_address() {
        let guard = SsrfGuard::default();
        let mixed = vec![ip("8.8.8.8"), ip("10.0.0.1")];
        assert!(guard.check_resolved("rdap.example.net", &mixed).is_err());
        let good = vec![ip("8.8.8.8"), ip("8.8.4.4")];
        assert_eq!(
            guard.check_resolved("rdap.example.net", &good).unwrap(),
            ip("8.8.8.8")
        );
        assert_eq!(
            guard.check_resolved("rdap.example.net", &[]).unwrap_err().code(),
            "NETWORK_ERROR"
        );
    }
}
