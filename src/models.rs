use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// External lead source a webhook endpoint is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    HomeAdvisor,
    Thumbtack,
    Angi,
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::HomeAdvisor => "homeadvisor",
            Provider::Thumbtack => "thumbtack",
            Provider::Angi => "angi",
            Provider::Custom => "custom",
        }
    }

    /// Capitalized form used in opportunity names, e.g. "Homeadvisor".
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::HomeAdvisor => "Homeadvisor",
            Provider::Thumbtack => "Thumbtack",
            Provider::Angi => "Angi",
            Provider::Custom => "Custom",
        }
    }

    pub fn parse(s: &str) -> Option<Provider> {
        match s {
            "homeadvisor" => Some(Provider::HomeAdvisor),
            "thumbtack" => Some(Provider::Thumbtack),
            "angi" => Some(Provider::Angi),
            "custom" => Some(Provider::Custom),
            _ => None,
        }
    }
}

/// A per-organization inbound webhook target, dispatched by its slug.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub slug: String,
    pub provider: Provider,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub field_mapping: HashMap<String, String>,
    pub webhook_url: String,
    pub is_active: bool,
    pub leads_received: i64,
    pub last_lead_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    pub organization_id: String,
    pub name: String,
    pub provider: Provider,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    /// Per-endpoint overrides merged over the provider's default mapping.
    #[serde(default)]
    pub field_mapping: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEndpointRequest {
    pub name: Option<String>,
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub field_mapping: Option<HashMap<String, String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListEndpointsQuery {
    pub organization_id: String,
}

/// Outcome recorded for an inbound call in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failed,
    Duplicate,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Failed => "failed",
            EventStatus::Duplicate => "duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<EventStatus> {
        match s {
            "success" => Some(EventStatus::Success),
            "failed" => Some(EventStatus::Failed),
            "duplicate" => Some(EventStatus::Duplicate),
            _ => None,
        }
    }
}

/// Immutable audit record, one per inbound call that resolves to an endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct InboundLeadEvent {
    pub id: String,
    pub endpoint_id: String,
    pub organization_id: String,
    pub payload: String,
    pub headers: HashMap<String, Vec<String>>,
    pub source_ip: String,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub customer_id: Option<String>,
    pub opportunity_id: Option<String>,
    pub created_at: String,
}

/// Canonical lead extracted from a provider payload. Produced purely from
/// (payload, field mapping) with no I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedLead {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub notes: Option<String>,
    pub hazard_types: Option<String>,
    pub lead_source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Customer {
    pub id: String,
    pub organization_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company_name: Option<String>,
    pub address_line1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub notes: Option<String>,
    pub hazard_types: Option<String>,
    pub status: String,
    pub lead_source: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct Opportunity {
    pub id: String,
    pub organization_id: String,
    pub customer_id: String,
    pub stage_id: String,
    pub name: String,
    pub created_at: String,
}

/// Sales-pipeline stage, managed outside this service and read here only to
/// find the lead-intake stage.
#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub stage_type: String,
    pub sort_order: i64,
    pub is_active: bool,
}

/// Response contract of the inbound webhook receiver.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadIngestResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
