//! Core data types for RDAP queries.
//!
//! This module defines the validated identifiers that flow through the
//! pipeline, the per-query options, the raw registry payload and the
//! canonical response shape returned to callers.

use crate::error::RdapError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

/// Class of a query identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Domain,
    Ip,
    Asn,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Domain => "domain",
            IdentifierKind::Ip => "ip",
            IdentifierKind::Asn => "asn",
        }
    }

    /// The `objectClassName` a registry is expected to answer with.
    pub fn object_class(&self) -> &'static str {
        match self {
            IdentifierKind::Domain => "domain",
            IdentifierKind::Ip => "ip network",
            IdentifierKind::Asn => "autnum",
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An IPv4 or IPv6 CIDR block whose host bits are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    /// Build a network, masking host bits. Fails if the prefix is too long
    /// for the address family.
    pub fn new(addr: IpAddr, prefix: u8) -> Option<Self> {
        let max = max_prefix(&addr);
        if prefix > max {
            return None;
        }
        Some(Self {
            addr: mask(addr, prefix),
            prefix,
        })
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    /// Whether `ip` lies inside this block.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                mask(*ip, self.prefix) == self.addr
            }
            _ => false,
        }
    }

    /// Whether `other` is entirely inside this block.
    pub fn contains_network(&self, other: &IpNetwork) -> bool {
        other.prefix >= self.prefix && self.contains(&other.addr)
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for IpNetwork {
    type Err = RdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| RdapError::validation(s, "CIDR block must contain '/'"))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|_| RdapError::validation(s, "invalid network address"))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| RdapError::validation(s, "invalid prefix length"))?;
        IpNetwork::new(addr, prefix)
            .ok_or_else(|| RdapError::validation(s, "prefix length exceeds address width"))
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn mask(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let m = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix as u32) };
            IpAddr::V4(Ipv4Addr::from(bits & m))
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let m = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix as u32) };
            IpAddr::V6(Ipv6Addr::from(bits & m))
        }
    }
}

/// A validated domain name: lowercase ASCII (punycode), no root dot.
///
/// The only way to get one is through [`crate::parse_domain`] rules, either
/// via `str::parse` or [`crate::parse_identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainName(String);

impl DomainName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for DomainName {
    type Err = RdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::validate::parse_domain(s).map(DomainName)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated, canonical query target.
///
/// Only [`crate::parse_identifier`] constructs these, so every value held by
/// the pipeline has already passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Domain(DomainName),
    /// Single IPv4 or IPv6 address.
    Ip(IpAddr),
    /// CIDR block.
    Network(IpNetwork),
    /// Autonomous system number.
    Asn(u32),
}

impl Identifier {
    pub fn kind(&self) -> IdentifierKind {
        match self {
            Identifier::Domain(_) => IdentifierKind::Domain,
            Identifier::Ip(_) | Identifier::Network(_) => IdentifierKind::Ip,
            Identifier::Asn(_) => IdentifierKind::Asn,
        }
    }

    /// Canonical string form. Parsing it again yields an equal identifier.
    pub fn canonical(&self) -> String {
        match self {
            Identifier::Domain(name) => name.to_string(),
            Identifier::Ip(ip) => ip.to_string(),
            Identifier::Network(net) => net.to_string(),
            Identifier::Asn(asn) => asn.to_string(),
        }
    }

    /// Path segment appended to a service base URL.
    pub fn rdap_path(&self) -> String {
        match self {
            Identifier::Domain(name) => format!("domain/{}", name),
            Identifier::Ip(ip) => format!("ip/{}", ip),
            Identifier::Network(net) => format!("ip/{}/{}", net.addr(), net.prefix()),
            Identifier::Asn(asn) => format!("autnum/{}", asn),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Asn(asn) => write!(f, "AS{}", asn),
            other => f.write_str(&other.canonical()),
        }
    }
}

/// Admission priority propagated to the fetcher's rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl FromStr for Priority {
    type Err = RdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(RdapError::validation(
                other,
                "priority must be one of: low, normal, high",
            )),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Lawful basis under which registration data is processed (GDPR Art. 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LegalBasis {
    Consent,
    Contract,
    LegalObligation,
    VitalInterests,
    PublicTask,
    #[default]
    LegitimateInterest,
}

impl LegalBasis {
    pub const ALL: [LegalBasis; 6] = [
        LegalBasis::Consent,
        LegalBasis::Contract,
        LegalBasis::LegalObligation,
        LegalBasis::VitalInterests,
        LegalBasis::PublicTask,
        LegalBasis::LegitimateInterest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LegalBasis::Consent => "consent",
            LegalBasis::Contract => "contract",
            LegalBasis::LegalObligation => "legal-obligation",
            LegalBasis::VitalInterests => "vital-interests",
            LegalBasis::PublicTask => "public-task",
            LegalBasis::LegitimateInterest => "legitimate-interest",
        }
    }
}

impl FromStr for LegalBasis {
    type Err = RdapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        LegalBasis::ALL
            .iter()
            .copied()
            .find(|basis| basis.as_str() == wanted)
            .ok_or_else(|| RdapError::validation(s, "unrecognized legal basis"))
    }
}

impl fmt::Display for LegalBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-query options accepted by [`crate::RdapClient::query`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Use the cache. When false the query always goes upstream and the
    /// result is not stored.
    pub cache: bool,

    /// Admission priority for the registry rate limiter.
    pub priority: Priority,

    /// Legal basis as supplied by the caller. Unrecognized values are
    /// rejected before any network activity; `None` falls back to the
    /// client's default unless the client requires an explicit basis.
    pub legal_basis: Option<String>,

    /// Override the client's PII redaction setting for this query.
    pub redact_pii: Option<bool>,

    /// Caller deadline for the whole query.
    pub timeout: Option<Duration>,

    /// Keep the full upstream document in `NormalizedResponse::raw`.
    pub include_raw: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            cache: true,
            priority: Priority::Normal,
            legal_basis: None,
            redact_pii: None,
            timeout: None,
            include_raw: false,
        }
    }
}

impl QueryOptions {
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = enabled;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_legal_basis<S: Into<String>>(mut self, basis: S) -> Self {
        self.legal_basis = Some(basis.into());
        self
    }

    pub fn with_redaction(mut self, redact_pii: bool) -> Self {
        self.redact_pii = Some(redact_pii);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_raw(mut self, include_raw: bool) -> Self {
        self.include_raw = include_raw;
        self
    }
}

/// The unmodified registry answer.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code of the final response.
    pub status: u16,
    /// Response body as received.
    pub body: Vec<u8>,
    /// Short registry identity (e.g. "arin").
    pub registry: String,
    /// URL of the final response after any redirects.
    pub url: url::Url,
    /// Address the connection was pinned to.
    pub remote_addr: IpAddr,
    /// Wall time spent on the successful attempt.
    pub latency: Duration,
}

/// A lifecycle event of the queried object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub action: String,
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

/// Contact data extracted from an entity's vCard.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// An entity (registrar, registrant, abuse contact, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Entity {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    pub roles: Vec<String>,
    pub contact: Contact,
    /// The entity's vCard as published, subject to redaction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcard: Option<serde_json::Value>,
    pub public_ids: Vec<String>,
    pub entities: Vec<Entity>,
}

/// A nameserver attached to a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nameserver {
    pub ldh_name: String,
    pub ip_addresses: Vec<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remark {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: Vec<String>,
}

/// Address range details of an `ip network` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub start_address: IpAddr,
    pub end_address: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_handle: Option<String>,
}

/// Number range details of an `autnum` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutnumInfo {
    pub start_autnum: u32,
    pub end_autnum: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autnum_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// Provenance attached to every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Served from a cache tier rather than upstream.
    pub cached: bool,
    /// Short registry identity.
    pub registry: String,
    /// PII redaction was applied.
    pub redacted: bool,
    pub legal_basis: LegalBasis,
    /// URL the document was fetched from.
    pub source_url: String,
}

/// Canonical RDAP response, identical in shape across registries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse {
    /// Canonical form of the queried identifier.
    pub identifier: String,
    pub object_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Domain `ldhName`, or the network / autnum `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unicode_name: Option<String>,
    pub status: Vec<String>,
    pub events: Vec<Event>,
    pub entities: Vec<Entity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nameservers: Option<Vec<Nameserver>>,
    pub links: Vec<Link>,
    pub remarks: Vec<Remark>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autnum: Option<AutnumInfo>,
    /// Registry-specific top-level members not mapped above.
    pub extensions: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
    pub meta: ResponseMeta,
}

impl NormalizedResponse {
    /// First event with the given action, if any.
    pub fn event(&self, action: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.action == action)
    }

    /// All entities, depth first, including nested ones.
    pub fn all_entities(&self) -> Vec<&Entity> {
        fn walk<'a>(entities: &'a [Entity], out: &mut Vec<&'a Entity>) {
            for entity in entities {
                out.push(entity);
                walk(&entity.entities, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.entities, &mut out);
        out
    }
}
