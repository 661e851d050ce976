//! PII redaction.
//!
//! Redaction runs as its own pass over a [`NormalizedResponse`]. It replaces
//! email addresses, telephone numbers and postal addresses with
//! [`REDACTED`], both in the extracted contacts and in every vCard found in
//! entities, the raw document and extension members. Running it twice gives
//! the same result as running it once.

use crate::types::{Contact, Entity, LegalBasis, NormalizedResponse};
use serde_json::Value;

/// Replacement for redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// vCard properties treated as PII.
const PII_PROPERTIES: [&str; 4] = ["email", "tel", "adr", "label"];

/// How responses are treated for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RedactionPolicy {
    pub legal_basis: LegalBasis,
    pub redact_pii: bool,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            legal_basis: LegalBasis::default(),
            redact_pii: true,
        }
    }
}

impl RedactionPolicy {
    pub fn new(legal_basis: LegalBasis, redact_pii: bool) -> Self {
        Self {
            legal_basis,
            redact_pii,
        }
    }

    /// Stable identifier used in cache keys.
    pub fn policy_id(&self) -> String {
        format!(
            "{}+{}",
            self.legal_basis,
            if self.redact_pii { "redact" } else { "full" }
        )
    }
}

/// The redaction pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct Redactor;

impl Redactor {
    /// Return `response` with all PII replaced and `meta.redacted` set.
    pub fn redact(mut response: NormalizedResponse) -> NormalizedResponse {
        for entity in &mut response.entities {
            redact_entity(entity);
        }
        for value in response.extensions.values_mut() {
            redact_json(value);
        }
        if let Some(raw) = response.raw.as_mut() {
            redact_json(raw);
        }
        response.meta.redacted = true;
        response
    }
}

fn redact_entity(entity: &mut Entity) {
    redact_contact(&mut entity.contact);
    if let Some(vcard) = entity.vcard.as_mut() {
        redact_vcard(vcard);
    }
    for nested in &mut entity.entities {
        redact_entity(nested);
    }
}

fn redact_contact(contact: &mut Contact) {
    for field in [&mut contact.email, &mut contact.phone, &mut contact.address] {
        if field.is_some() {
            *field = Some(REDACTED.to_string());
        }
    }
}

/// Walk arbitrary JSON and redact every `vcardArray` member found.
fn redact_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "vcardArray" {
                    redact_vcard(child);
                } else {
                    redact_json(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_json),
        _ => {}
    }
}

/// Redact a jCard: `["vcard", [[name, params, type, value...], ...]]`.
fn redact_vcard(vcard: &mut Value) {
    let Some(properties) = vcard.get_mut(1).and_then(Value::as_array_mut) else {
        return;
    };

    for property in properties {
        let Some(parts) = property.as_array_mut() else {
            continue;
        };
        let is_pii = parts
            .first()
            .and_then(Value::as_str)
            .is_some_and(|name| PII_PROPERTIES.contains(&name.to_ascii_lowercase().as_str()));
        if !is_pii {
            continue;
        }

        if let Some(params) = parts.get_mut(1).and_then(Value::as_object_mut) {
            if let Some(label) = params.get_mut("label") {
                *label = Value::String(REDACTED.to_string());
            }
        }
        for value in parts.iter_mut().skip(3) {
            *value = Value::String(REDACTED.to_string());
        }
    }
}
