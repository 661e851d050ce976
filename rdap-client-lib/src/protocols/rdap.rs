//! RDAP response normalization.
//!
//! Registries agree on the RDAP object model but differ in the details:
//! status spelling, optional members, contact layout. [`Normalizer`] maps any
//! conforming document onto [`NormalizedResponse`] so callers see one shape
//! whichever registry answered, and keeps everything it does not map in
//! `extensions`.

use crate::error::RdapError;
use crate::redact::{RedactionPolicy, Redactor};
use crate::types::{
    AutnumInfo, Contact, Entity, Event, Identifier, Link, Nameserver, NetworkInfo,
    NormalizedResponse, RawResponse, Remark, ResponseMeta,
};
use crate::validate::parse_domain;
use serde_json::{Map, Value};
use std::net::IpAddr;

/// Members every object class maps, whatever their content.
const COMMON_MEMBERS: &[&str] = &[
    "objectClassName",
    "status",
    "events",
    "entities",
    "links",
    "remarks",
];

/// Free-text members that are only consumed when they hold a string.
const NETWORK_TEXT_MEMBERS: &[&str] = &["type", "country", "parentHandle"];
const AUTNUM_TEXT_MEMBERS: &[&str] = &["type", "country"];

/// Converts raw registry documents into [`NormalizedResponse`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    include_raw: bool,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the full upstream document in `raw`.
    pub fn with_raw(mut self, include_raw: bool) -> Self {
        self.include_raw = include_raw;
        self
    }

    /// Parse, validate and map `raw`, then apply `policy`.
    ///
    /// # Errors
    ///
    /// Returns `RdapError::Parse` if the body is not a JSON object, if its
    /// `objectClassName` is missing or does not match the identifier class,
    /// or if a member that must be an array is not one.
    pub fn normalize(
        &self,
        raw: &RawResponse,
        identifier: &Identifier,
        policy: &RedactionPolicy,
    ) -> Result<NormalizedResponse, RdapError> {
        let document: Value = serde_json::from_slice(&raw.body)?;
        let object = document
            .as_object()
            .ok_or_else(|| RdapError::parse("RDAP response is not a JSON object"))?;

        let expected = identifier.kind().object_class();
        let object_class = opt_str(object, "objectClassName")
            .ok_or_else(|| RdapError::parse("RDAP response has no objectClassName"))?
            .trim()
            .to_lowercase();
        if object_class != expected {
            return Err(RdapError::parse(format!(
                "expected objectClassName '{}', got '{}'",
                expected, object_class
            )));
        }

        let name = match identifier {
            Identifier::Domain(_) => opt_str(object, "ldhName").map(|n| n.to_lowercase()),
            _ => opt_str(object, "name").map(String::from),
        };

        let nameservers = match (identifier, object.get("nameservers")) {
            (Identifier::Domain(_), Some(_)) => Some(
                array(object, "nameservers")?
                    .iter()
                    .map(parse_nameserver)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            _ => None,
        };

        let network = match identifier {
            Identifier::Ip(_) | Identifier::Network(_) => parse_network(object)?,
            _ => None,
        };
        let autnum = match identifier {
            Identifier::Asn(_) => parse_autnum(object),
            _ => None,
        };

        let mut consumed: Vec<&str> = COMMON_MEMBERS.to_vec();
        let name_member = match identifier {
            Identifier::Domain(_) => "ldhName",
            _ => "name",
        };
        consumed.extend(
            ["handle", "unicodeName", name_member]
                .into_iter()
                .filter(|key| opt_str(object, key).is_some()),
        );
        if nameservers.is_some() {
            consumed.push("nameservers");
        }
        if network.is_some() {
            consumed.extend(["startAddress", "endAddress"]);
            consumed.extend(
                NETWORK_TEXT_MEMBERS
                    .iter()
                    .copied()
                    .filter(|key| opt_str(object, key).is_some()),
            );
        }
        if autnum.is_some() {
            consumed.extend(["startAutnum", "endAutnum"]);
            consumed.extend(
                AUTNUM_TEXT_MEMBERS
                    .iter()
                    .copied()
                    .filter(|key| opt_str(object, key).is_some()),
            );
        }

        let extensions: Map<String, Value> = object
            .iter()
            .filter(|(key, _)| !consumed.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let response = NormalizedResponse {
            identifier: identifier.canonical(),
            object_class,
            handle: opt_str(object, "handle").map(String::from),
            name,
            unicode_name: opt_str(object, "unicodeName").map(String::from),
            status: parse_status(object)?,
            events: parse_events(object)?,
            entities: array(object, "entities")?
                .iter()
                .map(parse_entity)
                .collect::<Result<Vec<_>, _>>()?,
            nameservers,
            links: parse_links(object)?,
            remarks: parse_remarks(object)?,
            network,
            autnum,
            extensions,
            raw: self.include_raw.then(|| document.clone()),
            meta: ResponseMeta {
                cached: false,
                registry: raw.registry.clone(),
                redacted: false,
                legal_basis: policy.legal_basis,
                source_url: raw.url.to_string(),
            },
        };

        Ok(if policy.redact_pii {
            Redactor::redact(response)
        } else {
            response
        })
    }
}

fn opt_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

/// A member that must be an array when present. Missing or null means empty.
fn array<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], RdapError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(_) => Err(RdapError::parse(format!("'{}' must be an array", key))),
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, RdapError> {
    value
        .as_object()
        .ok_or_else(|| RdapError::parse(format!("{} must be a JSON object", what)))
}

/// RFC 8056 spelling: `clientTransferProhibited` becomes
/// `client transfer prohibited`.
pub fn normalize_status(status: &str) -> String {
    let mut spaced = String::with_capacity(status.len() + 8);
    let mut prev: Option<char> = None;
    for c in status.trim().chars() {
        if c.is_ascii_uppercase()
            && prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit())
        {
            spaced.push(' ');
        }
        spaced.push(if c == '_' { ' ' } else { c.to_ascii_lowercase() });
        prev = Some(c);
    }
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_status(object: &Map<String, Value>) -> Result<Vec<String>, RdapError> {
    Ok(array(object, "status")?
        .iter()
        .filter_map(Value::as_str)
        .map(normalize_status)
        .filter(|s| !s.is_empty())
        .collect())
}

fn parse_events(object: &Map<String, Value>) -> Result<Vec<Event>, RdapError> {
    let mut events = Vec::new();
    for event in array(object, "events")? {
        let event = as_object(event, "event")?;
        if let (Some(action), Some(date)) =
            (opt_str(event, "eventAction"), opt_str(event, "eventDate"))
        {
            events.push(Event {
                action: action.to_lowercase(),
                date: date.to_string(),
                actor: opt_str(event, "eventActor").map(String::from),
            });
        }
    }
    Ok(events)
}

fn parse_entity(value: &Value) -> Result<Entity, RdapError> {
    let object = as_object(value, "entity")?;

    let roles = array(object, "roles")?
        .iter()
        .filter_map(Value::as_str)
        .map(|r| r.trim().to_lowercase())
        .collect();

    let public_ids = array(object, "publicIds")?
        .iter()
        .filter_map(|id| id.get("identifier").and_then(Value::as_str))
        .map(String::from)
        .collect();

    let vcard = object.get("vcardArray").filter(|v| v.is_array()).cloned();
    let contact = vcard.as_ref().map(extract_contact).unwrap_or_default();

    let entities = array(object, "entities")?
        .iter()
        .map(parse_entity)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Entity {
        handle: opt_str(object, "handle").map(String::from),
        roles,
        contact,
        vcard,
        public_ids,
        entities,
    })
}

/// Properties of a jCard, `[name, params, type, value...]` each.
fn vcard_properties(vcard: &Value) -> &[Value] {
    vcard
        .get(1)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// First value of the named vCard property, flattened to text.
fn vcard_text(vcard: &Value, property: &str) -> Option<String> {
    vcard_properties(vcard).iter().find_map(|item| {
        let parts = item.as_array()?;
        if parts.len() < 4 || !parts[0].as_str()?.eq_ignore_ascii_case(property) {
            return None;
        }
        let text = flatten_text(&parts[3]);
        if !text.is_empty() {
            return Some(text);
        }
        // Postal addresses may only carry a `label` parameter.
        parts[1]
            .get("label")
            .and_then(Value::as_str)
            .map(|label| label.replace('\n', ", "))
    })
}

fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(flatten_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    }
}

fn extract_contact(vcard: &Value) -> Contact {
    Contact {
        name: vcard_text(vcard, "fn"),
        organization: vcard_text(vcard, "org"),
        email: vcard_text(vcard, "email"),
        phone: vcard_text(vcard, "tel"),
        address: vcard_text(vcard, "adr"),
    }
}

fn parse_nameserver(value: &Value) -> Result<Nameserver, RdapError> {
    let object = as_object(value, "nameserver")?;
    let raw_name = opt_str(object, "ldhName")
        .or_else(|| opt_str(object, "unicodeName"))
        .ok_or_else(|| RdapError::parse("nameserver has no ldhName"))?;
    let ldh_name = parse_domain(raw_name)
        .map_err(|_| RdapError::parse(format!("invalid nameserver name '{}'", raw_name)))?;

    let mut ip_addresses = Vec::new();
    if let Some(addresses) = object.get("ipAddresses").and_then(Value::as_object) {
        for family in ["v4", "v6"] {
            let listed = addresses
                .get(family)
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            ip_addresses.extend(
                listed
                    .iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| s.trim().parse::<IpAddr>().ok()),
            );
        }
    }

    Ok(Nameserver {
        ldh_name,
        ip_addresses,
    })
}

fn parse_links(object: &Map<String, Value>) -> Result<Vec<Link>, RdapError> {
    let mut links = Vec::new();
    for link in array(object, "links")? {
        let link = as_object(link, "link")?;
        if let Some(href) = opt_str(link, "href") {
            links.push(Link {
                href: href.to_string(),
                rel: opt_str(link, "rel").map(String::from),
                media_type: opt_str(link, "type").map(String::from),
            });
        }
    }
    Ok(links)
}

fn parse_remarks(object: &Map<String, Value>) -> Result<Vec<Remark>, RdapError> {
    let mut remarks = Vec::new();
    for remark in array(object, "remarks")? {
        let remark = as_object(remark, "remark")?;
        remarks.push(Remark {
            title: opt_str(remark, "title").map(String::from),
            description: array(remark, "description")?
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
        });
    }
    Ok(remarks)
}

fn parse_network(object: &Map<String, Value>) -> Result<Option<NetworkInfo>, RdapError> {
    let address = |key: &str| opt_str(object, key).and_then(|s| s.trim().parse::<IpAddr>().ok());
    let (Some(start_address), Some(end_address)) = (address("startAddress"), address("endAddress"))
    else {
        return Ok(None);
    };

    if start_address.is_ipv4() != end_address.is_ipv4() {
        return Err(RdapError::parse("startAddress and endAddress differ in IP version"));
    }
    let version_matches = match opt_str(object, "ipVersion") {
        Some("v4") => start_address.is_ipv4(),
        Some("v6") => start_address.is_ipv6(),
        _ => true,
    };
    if !version_matches {
        return Err(RdapError::parse("ipVersion does not match network addresses"));
    }

    Ok(Some(NetworkInfo {
        start_address,
        end_address,
        network_type: opt_str(object, "type").map(String::from),
        country: opt_str(object, "country").map(String::from),
        parent_handle: opt_str(object, "parentHandle").map(String::from),
    }))
}

fn parse_autnum(object: &Map<String, Value>) -> Option<AutnumInfo> {
    let number = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
    };
    Some(AutnumInfo {
        start_autnum: number("startAutnum")?,
        end_autnum: number("endAutnum")?,
        autnum_type: opt_str(object, "type").map(String::from),
        country: opt_str(object, "country").map(String::from),
    })
}
