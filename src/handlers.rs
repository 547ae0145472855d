use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::Json,
    routing::{get, post},
};
use std::collections::HashMap;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::error::AppError;
use crate::models::{
    CreateEndpointRequest, InboundLeadEvent, LeadIngestResponse, ListEndpointsQuery,
    UpdateEndpointRequest, WebhookEndpoint,
};
use crate::services::{EndpointService, IngestOutcome, LeadIngestService};

/// Basic size cap on inbound payloads (1 MiB)
const MAX_BODY_BYTES: usize = 1_048_576;

#[derive(Clone)]
pub struct AppState {
    pub endpoint_service: EndpointService,
    pub ingest_service: LeadIngestService,
}

pub fn create_router(app_state: AppState, config: &Config) -> Router {
    Router::new()
        // Registry management API
        .route("/api/endpoints", post(create_endpoint).get(list_endpoints))
        .route(
            "/api/endpoints/{id}",
            get(get_endpoint).patch(update_endpoint).delete(delete_endpoint),
        )
        .route("/api/endpoints/{id}/events/{count}", get(get_lead_events))
        // Inbound webhook receiver, dispatched by slug
        .route("/hooks/{slug}", post(receive_lead))
        // Apply middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(config)),
        )
        .with_state(app_state)
}

fn create_cors_layer(config: &Config) -> CorsLayer {
    if config.cors_permissive {
        CorsLayer::permissive()
    } else {
        use axum::http::HeaderValue;
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .iter()
            .filter_map(|s| match s.parse() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Ignoring invalid origin '{}': {e}", s);
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE])
    }
}

/// Convert headers to the lowercased multi-value format used by the services
/// and the audit log
fn collect_headers(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut header_map: HashMap<String, Vec<String>> = HashMap::new();
    for (key, value) in headers.iter() {
        let key_str = key.as_str().to_string();
        let value_str = String::from_utf8_lossy(value.as_bytes()).to_string();
        header_map.entry(key_str).or_default().push(value_str);
    }
    header_map
}

/// Caller IP for the audit log: first forwarded address when behind a proxy
fn client_ip(headers: &HashMap<String, Vec<String>>) -> String {
    for name in ["x-forwarded-for", "x-real-ip"] {
        if let Some(value) = headers.get(name).and_then(|values| values.first()) {
            let ip = value.split(',').next().unwrap_or("").trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }
    "unknown".to_string()
}

async fn receive_lead(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<LeadIngestResponse>), AppError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(AppError::PayloadTooLarge);
    }

    let header_map = collect_headers(&headers);
    let source_ip = client_ip(&header_map);

    let outcome = state
        .ingest_service
        .ingest(&slug, header_map, source_ip, &body)
        .await;

    let (status, response) = match outcome {
        IngestOutcome::Accepted(result) => (
            StatusCode::OK,
            LeadIngestResponse {
                success: true,
                customer_id: Some(result.customer.id),
                error: None,
            },
        ),
        IngestOutcome::Duplicate { customer_id } => (
            StatusCode::OK,
            LeadIngestResponse {
                success: true,
                customer_id: Some(customer_id),
                error: None,
            },
        ),
        // Do not reveal which credential check failed
        IngestOutcome::Rejected => (
            StatusCode::UNAUTHORIZED,
            LeadIngestResponse {
                success: false,
                customer_id: None,
                error: Some("Invalid credentials".to_string()),
            },
        ),
        IngestOutcome::Failed { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            LeadIngestResponse {
                success: false,
                customer_id: None,
                error: Some(message),
            },
        ),
        IngestOutcome::EndpointNotFound => (
            StatusCode::NOT_FOUND,
            LeadIngestResponse {
                success: false,
                customer_id: None,
                error: Some("Webhook endpoint not found".to_string()),
            },
        ),
    };

    Ok((status, Json(response)))
}

async fn create_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateEndpointRequest>,
) -> Result<Json<WebhookEndpoint>, AppError> {
    let header_map = collect_headers(&headers);
    let endpoint = state
        .endpoint_service
        .create_endpoint(&header_map, request)
        .await?;
    Ok(Json(endpoint))
}

async fn list_endpoints(
    State(state): State<AppState>,
    Query(query): Query<ListEndpointsQuery>,
) -> Result<Json<Vec<WebhookEndpoint>>, AppError> {
    let endpoints = state
        .endpoint_service
        .list_endpoints(&query.organization_id)
        .await?;
    Ok(Json(endpoints))
}

async fn get_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WebhookEndpoint>, AppError> {
    let endpoint = state.endpoint_service.get_endpoint(&id).await?;
    Ok(Json(endpoint))
}

async fn update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<UpdateEndpointRequest>,
) -> Result<Json<WebhookEndpoint>, AppError> {
    let endpoint = state.endpoint_service.update_endpoint(&id, patch).await?;
    Ok(Json(endpoint))
}

async fn delete_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.endpoint_service.delete_endpoint(&id).await?;
    Ok(Json(serde_json::json!({ "status": "deleted" })))
}

async fn get_lead_events(
    State(state): State<AppState>,
    Path((id, count)): Path<(String, u32)>,
) -> Result<Json<Vec<InboundLeadEvent>>, AppError> {
    let events = state.endpoint_service.get_lead_events(&id, count).await?;
    Ok(Json(events))
}
