use std::collections::HashMap;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::database::Database;
use crate::error::AppError;
use crate::mapping::{default_field_mapping, parse_lead};
use crate::models::{
    CreateEndpointRequest, Customer, EventStatus, InboundLeadEvent, Opportunity, Provider,
    UpdateEndpointRequest, WebhookEndpoint,
};

/// Hours a lead's email suppresses re-creation of a customer.
const DEDUP_WINDOW_HOURS: i64 = 24;

/// URL-safe random slug: 12 bytes, base64url without padding. No collision
/// check at generation time; the UNIQUE constraint on the slug column is the
/// actual guard.
pub fn generate_slug() -> String {
    let bytes: [u8; 12] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate the public webhook URL for a slug based on configuration or
/// request headers
pub fn generate_webhook_url(
    base_url: &Option<String>,
    headers: &HashMap<String, Vec<String>>,
    slug: &str,
) -> String {
    // First try to use configured BASE_URL
    if let Some(configured_base) = base_url {
        let normalized_base = configured_base.trim_end_matches('/');
        return format!("{}/hooks/{}", normalized_base, slug);
    }

    // Fallback: extract from request headers
    // Prefer forwarded headers set by proxies/CDNs
    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|values| values.first())
            .map(|s| s.split(',').next().unwrap_or("").trim())
    };
    let fwd_proto = first("x-forwarded-proto");
    let fwd_host = first("x-forwarded-host");
    let (scheme, host) = match (fwd_proto, fwd_host) {
        (Some(proto), Some(h)) if matches!(proto, "http" | "https") && !h.is_empty() => (proto, h),
        _ => {
            let host = headers.get("host").and_then(|values| values.first());
            let host = host.map(|s| s.as_str()).unwrap_or("localhost:3000");
            let scheme = if host.starts_with("localhost") || host.starts_with("127.0.0.1") {
                "http"
            } else {
                "https"
            };
            (scheme, host)
        }
    };

    format!("{}://{}/hooks/{}", scheme, host, slug)
}

#[derive(Clone)]
pub struct EndpointService {
    db: Arc<Database>,
    base_url: Option<String>,
}

impl EndpointService {
    pub fn new(db: Arc<Database>, base_url: Option<String>) -> Self {
        Self { db, base_url }
    }

    pub async fn create_endpoint(
        &self,
        headers: &HashMap<String, Vec<String>>,
        request: CreateEndpointRequest,
    ) -> Result<WebhookEndpoint, AppError> {
        // Provider defaults first, caller overrides win key-by-key
        let mut field_mapping = default_field_mapping(request.provider);
        field_mapping.extend(request.field_mapping);

        let slug = generate_slug();
        let webhook_url = generate_webhook_url(&self.base_url, headers, &slug);
        let now = Utc::now().to_rfc3339();

        let endpoint = WebhookEndpoint {
            id: Uuid::new_v4().to_string(),
            organization_id: request.organization_id,
            name: request.name,
            slug,
            provider: request.provider,
            api_key: request.api_key,
            secret_key: request.secret_key,
            field_mapping,
            webhook_url,
            is_active: true,
            leads_received: 0,
            last_lead_at: None,
            created_at: now.clone(),
            updated_at: now,
        };

        self.db.create_endpoint(&endpoint).await.map_err(|e| {
            warn!("Failed to create webhook endpoint: {}", e);
            AppError::InternalServerError
        })?;

        info!(
            "Created webhook endpoint {} (slug {})",
            endpoint.id, endpoint.slug
        );
        Ok(endpoint)
    }

    pub async fn list_endpoints(
        &self,
        organization_id: &str,
    ) -> Result<Vec<WebhookEndpoint>, AppError> {
        self.db.list_endpoints(organization_id).await.map_err(|e| {
            warn!("Failed to list webhook endpoints: {}", e);
            AppError::InternalServerError
        })
    }

    pub async fn get_endpoint(&self, id: &str) -> Result<WebhookEndpoint, AppError> {
        self.db
            .get_endpoint(id)
            .await
            .map_err(|e| {
                warn!("Failed to get webhook endpoint {}: {}", id, e);
                AppError::InternalServerError
            })?
            .ok_or(AppError::EndpointNotFound)
    }

    pub async fn update_endpoint(
        &self,
        id: &str,
        patch: UpdateEndpointRequest,
    ) -> Result<WebhookEndpoint, AppError> {
        let mut endpoint = self.get_endpoint(id).await?;

        if let Some(name) = patch.name {
            endpoint.name = name;
        }
        if let Some(api_key) = patch.api_key {
            endpoint.api_key = Some(api_key);
        }
        if let Some(secret_key) = patch.secret_key {
            endpoint.secret_key = Some(secret_key);
        }
        if let Some(field_mapping) = patch.field_mapping {
            endpoint.field_mapping = field_mapping;
        }
        if let Some(is_active) = patch.is_active {
            endpoint.is_active = is_active;
        }
        endpoint.updated_at = Utc::now().to_rfc3339();

        self.db.update_endpoint(&endpoint).await.map_err(|e| {
            warn!("Failed to update webhook endpoint {}: {}", id, e);
            AppError::InternalServerError
        })?;

        Ok(endpoint)
    }

    pub async fn delete_endpoint(&self, id: &str) -> Result<(), AppError> {
        let deleted = self.db.delete_endpoint(id).await.map_err(|e| {
            warn!("Failed to delete webhook endpoint {}: {}", id, e);
            AppError::InternalServerError
        })?;

        if !deleted {
            return Err(AppError::EndpointNotFound);
        }
        info!("Deleted webhook endpoint {}", id);
        Ok(())
    }

    pub async fn get_lead_events(
        &self,
        endpoint_id: &str,
        count: u32,
    ) -> Result<Vec<InboundLeadEvent>, AppError> {
        let count = count.min(1000);
        self.db
            .get_lead_events(endpoint_id, count)
            .await
            .map_err(|e| {
                warn!("Failed to get lead events: {}", e);
                AppError::InternalServerError
            })
    }
}

/// Ingestion result for an accepted lead. Opportunity auto-creation is a
/// second phase that can be skipped (`None`) or fail without failing the
/// lead (`Some(Err)`).
#[derive(Debug)]
pub struct LeadIngestResult {
    pub customer: Customer,
    pub opportunity: Option<Result<Opportunity, anyhow::Error>>,
}

#[derive(Debug)]
pub enum IngestOutcome {
    Accepted(LeadIngestResult),
    Duplicate { customer_id: String },
    /// Credential checks failed; the specific reason is in the audit log.
    Rejected,
    Failed { message: String },
    EndpointNotFound,
}

#[derive(Clone)]
pub struct LeadIngestService {
    db: Arc<Database>,
}

impl LeadIngestService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Run the full ingestion pipeline for one inbound call: slug lookup,
    /// credential checks, parse, dedup, persistence, opportunity
    /// auto-creation, counters, audit.
    ///
    /// The dedup check is read-then-insert with no transaction; two
    /// near-simultaneous submissions with the same email can both pass it.
    /// Every branch that resolves to an endpoint writes exactly one audit
    /// event; failures never propagate out of this method.
    pub async fn ingest(
        &self,
        slug: &str,
        headers: HashMap<String, Vec<String>>,
        source_ip: String,
        raw_body: &[u8],
    ) -> IngestOutcome {
        let endpoint = match self.db.get_endpoint_by_slug(slug).await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return IngestOutcome::EndpointNotFound,
            Err(e) => {
                warn!("Failed to look up endpoint for slug {}: {}", slug, e);
                return IngestOutcome::Failed {
                    message: "internal error".to_string(),
                };
            }
        };

        let body_text = String::from_utf8_lossy(raw_body).to_string();

        // Credential checks run before any parsing
        if let Err(failure) = auth::verify_request(
            &headers,
            raw_body,
            endpoint.api_key.as_deref(),
            endpoint.secret_key.as_deref(),
        ) {
            warn!(
                "Rejected lead for endpoint {}: {}",
                endpoint.id,
                failure.reason()
            );
            self.write_audit(
                &endpoint,
                &body_text,
                &headers,
                &source_ip,
                EventStatus::Failed,
                Some(failure.reason().to_string()),
                None,
                None,
            )
            .await;
            return IngestOutcome::Rejected;
        }

        let payload: Value = match serde_json::from_slice(raw_body) {
            Ok(payload) => payload,
            Err(e) => {
                let message = format!("invalid JSON payload: {}", e);
                self.write_audit(
                    &endpoint,
                    &body_text,
                    &headers,
                    &source_ip,
                    EventStatus::Failed,
                    Some(message.clone()),
                    None,
                    None,
                )
                .await;
                return IngestOutcome::Failed { message };
            }
        };

        let lead = parse_lead(&payload, &endpoint.field_mapping);

        // Dedup: same organization, same email, trailing 24-hour window.
        // Leads without an email are always treated as new.
        if let Some(email) = &lead.email {
            let since = (Utc::now() - Duration::hours(DEDUP_WINDOW_HOURS)).to_rfc3339();
            match self
                .db
                .find_recent_customer_by_email(&endpoint.organization_id, email, &since)
                .await
            {
                Ok(Some(existing)) => {
                    info!(
                        "Duplicate lead for endpoint {}: existing customer {}",
                        endpoint.id, existing.id
                    );
                    self.write_audit(
                        &endpoint,
                        &body_text,
                        &headers,
                        &source_ip,
                        EventStatus::Duplicate,
                        None,
                        Some(existing.id.clone()),
                        None,
                    )
                    .await;
                    return IngestOutcome::Duplicate {
                        customer_id: existing.id,
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    let message = format!("dedup check failed: {}", e);
                    warn!("{}", message);
                    self.write_audit(
                        &endpoint,
                        &body_text,
                        &headers,
                        &source_ip,
                        EventStatus::Failed,
                        Some(message.clone()),
                        None,
                        None,
                    )
                    .await;
                    return IngestOutcome::Failed { message };
                }
            }
        }

        let now = Utc::now().to_rfc3339();
        let customer = Customer {
            id: Uuid::new_v4().to_string(),
            organization_id: endpoint.organization_id.clone(),
            first_name: lead.first_name,
            last_name: lead.last_name,
            email: lead.email,
            phone: lead.phone,
            company_name: lead.company_name,
            address_line1: lead.address_line1,
            city: lead.city,
            state: lead.state,
            zip: lead.zip,
            notes: lead.notes,
            hazard_types: lead.hazard_types,
            status: "lead".to_string(),
            lead_source: Some(endpoint.provider.as_str().to_string()),
            created_at: now.clone(),
        };

        if let Err(e) = self.db.create_customer(&customer).await {
            let message = format!("failed to create customer: {}", e);
            warn!("{}", message);
            self.write_audit(
                &endpoint,
                &body_text,
                &headers,
                &source_ip,
                EventStatus::Failed,
                Some(message.clone()),
                None,
                None,
            )
            .await;
            return IngestOutcome::Failed { message };
        }

        let opportunity = self.try_create_opportunity(&endpoint, &customer).await;
        let result = LeadIngestResult {
            customer,
            opportunity,
        };
        let opportunity_id = result
            .opportunity
            .as_ref()
            .and_then(|outcome| outcome.as_ref().ok())
            .map(|opp| opp.id.clone());

        // Best-effort counter bump, not transactional with the insert
        if let Err(e) = self.db.record_lead_received(&endpoint.id, &now).await {
            warn!(
                "Failed to update counters for endpoint {}: {}",
                endpoint.id, e
            );
        }

        self.write_audit(
            &endpoint,
            &body_text,
            &headers,
            &source_ip,
            EventStatus::Success,
            None,
            Some(result.customer.id.clone()),
            opportunity_id,
        )
        .await;

        info!(
            "Ingested lead for endpoint {}: customer {}",
            endpoint.id, result.customer.id
        );
        IngestOutcome::Accepted(result)
    }

    /// Second phase of ingestion. `None` means auto-creation was skipped
    /// (disabled for the organization, or no lead stage configured);
    /// `Some(Err)` means it was attempted and failed, which never fails the
    /// lead itself.
    async fn try_create_opportunity(
        &self,
        endpoint: &WebhookEndpoint,
        customer: &Customer,
    ) -> Option<Result<Opportunity, anyhow::Error>> {
        match self.build_opportunity(endpoint, customer).await {
            Ok(Some(opportunity)) => Some(Ok(opportunity)),
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "Opportunity auto-creation failed for customer {}: {}",
                    customer.id, e
                );
                Some(Err(e))
            }
        }
    }

    async fn build_opportunity(
        &self,
        endpoint: &WebhookEndpoint,
        customer: &Customer,
    ) -> anyhow::Result<Option<Opportunity>> {
        if !self
            .db
            .auto_create_opportunity_enabled(&endpoint.organization_id)
            .await?
        {
            return Ok(None);
        }

        let Some(stage) = self
            .db
            .lead_pipeline_stage(&endpoint.organization_id)
            .await?
        else {
            // No lead stage configured is normal, not an error
            return Ok(None);
        };
        tracing::debug!(
            "Attaching opportunity to stage '{}' (sort order {})",
            stage.name,
            stage.sort_order
        );

        let opportunity = Opportunity {
            id: Uuid::new_v4().to_string(),
            organization_id: endpoint.organization_id.clone(),
            customer_id: customer.id.clone(),
            stage_id: stage.id,
            name: opportunity_name(customer, endpoint.provider),
            created_at: Utc::now().to_rfc3339(),
        };
        self.db.create_opportunity(&opportunity).await?;
        Ok(Some(opportunity))
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_audit(
        &self,
        endpoint: &WebhookEndpoint,
        payload: &str,
        headers: &HashMap<String, Vec<String>>,
        source_ip: &str,
        status: EventStatus,
        error_message: Option<String>,
        customer_id: Option<String>,
        opportunity_id: Option<String>,
    ) {
        let event = InboundLeadEvent {
            id: Uuid::new_v4().to_string(),
            endpoint_id: endpoint.id.clone(),
            organization_id: endpoint.organization_id.clone(),
            payload: payload.to_string(),
            headers: headers.clone(),
            source_ip: source_ip.to_string(),
            status,
            error_message,
            customer_id,
            opportunity_id,
            created_at: Utc::now().to_rfc3339(),
        };

        if let Err(e) = self.db.insert_lead_event(&event).await {
            warn!(
                "Failed to write lead event for endpoint {}: {}",
                endpoint.id, e
            );
        }
    }
}

/// Human-readable opportunity name: company, else first/last name, else
/// "New Lead", suffixed with the capitalized provider.
fn opportunity_name(customer: &Customer, provider: Provider) -> String {
    let subject = customer.company_name.clone().unwrap_or_else(|| {
        let parts: Vec<&str> = customer
            .first_name
            .as_deref()
            .into_iter()
            .chain(customer.last_name.as_deref())
            .collect();
        if parts.is_empty() {
            "New Lead".to_string()
        } else {
            parts.join(" ")
        }
    });
    format!("{} - {} Lead", subject, provider.display_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(
        first: Option<&str>,
        last: Option<&str>,
        company: Option<&str>,
    ) -> Customer {
        Customer {
            id: "c1".to_string(),
            organization_id: "org1".to_string(),
            first_name: first.map(String::from),
            last_name: last.map(String::from),
            email: None,
            phone: None,
            company_name: company.map(String::from),
            address_line1: None,
            city: None,
            state: None,
            zip: None,
            notes: None,
            hazard_types: None,
            status: "lead".to_string(),
            lead_source: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn slug_is_url_safe_and_unpadded() {
        let slug = generate_slug();
        // 12 bytes -> 16 base64url characters, no padding
        assert_eq!(slug.len(), 16);
        assert!(
            slug.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(generate_slug(), slug);
    }

    #[test]
    fn webhook_url_prefers_configured_base() {
        let url = generate_webhook_url(
            &Some("https://api.example.com/".to_string()),
            &HashMap::new(),
            "abc123",
        );
        assert_eq!(url, "https://api.example.com/hooks/abc123");
    }

    #[test]
    fn webhook_url_falls_back_to_forwarded_headers() {
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        headers.insert("x-forwarded-proto".into(), vec!["https".into()]);
        headers.insert("x-forwarded-host".into(), vec!["hooks.example.com".into()]);
        let url = generate_webhook_url(&None, &headers, "abc123");
        assert_eq!(url, "https://hooks.example.com/hooks/abc123");
    }

    #[test]
    fn opportunity_name_uses_person_name_and_provider() {
        let name = opportunity_name(
            &customer(Some("Sam"), Some("Rivera"), None),
            Provider::HomeAdvisor,
        );
        assert_eq!(name, "Sam Rivera - Homeadvisor Lead");
    }

    #[test]
    fn opportunity_name_prefers_company() {
        let name = opportunity_name(
            &customer(Some("Sam"), None, Some("Rivera Remediation LLC")),
            Provider::Thumbtack,
        );
        assert_eq!(name, "Rivera Remediation LLC - Thumbtack Lead");
    }

    #[test]
    fn opportunity_name_falls_back_to_new_lead() {
        let name = opportunity_name(&customer(None, None, None), Provider::Custom);
        assert_eq!(name, "New Lead - Custom Lead");
    }
}
