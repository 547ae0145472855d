use std::collections::HashMap;

use serde_json::Value;

use crate::models::{ParsedLead, Provider};

/// Default `lead_source` stamped on every parsed lead. The customer record
/// later carries the provider name instead.
pub const DEFAULT_LEAD_SOURCE: &str = "webhook";

/// Sentinel target field: the resolved value is split into first/last name.
const FULL_NAME_FIELD: &str = "full_name";

const HOMEADVISOR_MAPPING: &[(&str, &str)] = &[
    ("lead.firstName", "first_name"),
    ("lead.lastName", "last_name"),
    ("lead.email", "email"),
    ("lead.phone", "phone"),
    ("lead.address.street", "address_line1"),
    ("lead.address.city", "city"),
    ("lead.address.state", "state"),
    ("lead.address.zip", "zip"),
    ("lead.description", "notes"),
];

const THUMBTACK_MAPPING: &[(&str, &str)] = &[
    ("request.customer.name", "full_name"),
    ("request.customer.email", "email"),
    ("request.customer.phone", "phone"),
    ("request.location.city", "city"),
    ("request.location.state", "state"),
    ("request.location.zipCode", "zip"),
    ("request.description", "notes"),
    ("request.category", "hazard_types"),
];

const ANGI_MAPPING: &[(&str, &str)] = &[
    ("firstName", "first_name"),
    ("lastName", "last_name"),
    ("email", "email"),
    ("phoneNumber", "phone"),
    ("address", "address_line1"),
    ("city", "city"),
    ("stateProvince", "state"),
    ("postalCode", "zip"),
    ("comments", "notes"),
    ("taskName", "hazard_types"),
];

const CUSTOM_MAPPING: &[(&str, &str)] = &[
    ("first_name", "first_name"),
    ("last_name", "last_name"),
    ("email", "email"),
    ("phone", "phone"),
    ("company", "company_name"),
    ("address", "address_line1"),
    ("city", "city"),
    ("state", "state"),
    ("zip", "zip"),
    ("notes", "notes"),
];

/// Seed mapping for a provider: dotted source path -> canonical field name.
pub fn default_field_mapping(provider: Provider) -> HashMap<String, String> {
    let table = match provider {
        Provider::HomeAdvisor => HOMEADVISOR_MAPPING,
        Provider::Thumbtack => THUMBTACK_MAPPING,
        Provider::Angi => ANGI_MAPPING,
        Provider::Custom => CUSTOM_MAPPING,
    };
    table
        .iter()
        .map(|(source, target)| (source.to_string(), target.to_string()))
        .collect()
}

/// Walk a dot-separated path through a JSON value.
///
/// Returns `None` when any intermediate segment is missing, `null`, or not an
/// object, so absent paths are skipped rather than treated as errors.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let node = path
        .split('.')
        .fold(Some(value), |current, key| current.and_then(|v| v.get(key)))?;
    if node.is_null() { None } else { Some(node) }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Normalize an arbitrary provider payload into a [`ParsedLead`] using the
/// endpoint's field mapping. Pure: no I/O, no shared state.
pub fn parse_lead(payload: &Value, mapping: &HashMap<String, String>) -> ParsedLead {
    let mut lead = ParsedLead {
        lead_source: Some(DEFAULT_LEAD_SOURCE.to_string()),
        ..ParsedLead::default()
    };

    for (source_path, target_field) in mapping {
        let Some(raw) = resolve_path(payload, source_path) else {
            continue;
        };
        let Some(value) = value_to_string(raw) else {
            continue;
        };

        if target_field == FULL_NAME_FIELD {
            let mut parts = value.split_whitespace();
            if let Some(first) = parts.next() {
                lead.first_name = Some(first.to_string());
                let rest = parts.collect::<Vec<_>>().join(" ");
                if !rest.is_empty() {
                    lead.last_name = Some(rest);
                }
            }
            continue;
        }

        match target_field.as_str() {
            "first_name" => lead.first_name = Some(value),
            "last_name" => lead.last_name = Some(value),
            "email" => lead.email = Some(value),
            "phone" => lead.phone = Some(value),
            "company_name" => lead.company_name = Some(value),
            "address_line1" => lead.address_line1 = Some(value),
            "city" => lead.city = Some(value),
            "state" => lead.state = Some(value),
            "zip" => lead.zip = Some(value),
            "notes" => lead.notes = Some(value),
            "hazard_types" => lead.hazard_types = Some(value),
            "lead_source" => lead.lead_source = Some(value),
            // Unknown target fields are ignored rather than rejected.
            _ => {}
        }
    }

    lead
}
