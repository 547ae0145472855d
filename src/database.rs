use anyhow::{Result, anyhow};
use sqlx::{
    Row,
    sqlite::{SqliteConnectOptions, SqlitePool, SqliteRow},
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::models::{
    Customer, EventStatus, InboundLeadEvent, Opportunity, PipelineStage, Provider, WebhookEndpoint,
};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Ensure the directory exists and is writable
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Create connection options with concurrency-friendly settings
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePool::connect_with(options).await?;
        Self::initialize(pool).await
    }

    async fn initialize(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_endpoints (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                provider TEXT NOT NULL,
                api_key TEXT,
                secret_key TEXT,
                field_mapping TEXT NOT NULL,
                webhook_url TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                leads_received INTEGER NOT NULL DEFAULT 0,
                last_lead_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lead_events (
                id TEXT PRIMARY KEY,
                endpoint_id TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                headers TEXT NOT NULL,
                source_ip TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                customer_id TEXT,
                opportunity_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS customers (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                first_name TEXT,
                last_name TEXT,
                email TEXT,
                phone TEXT,
                company_name TEXT,
                address_line1 TEXT,
                city TEXT,
                state TEXT,
                zip TEXT,
                notes TEXT,
                hazard_types TEXT,
                status TEXT NOT NULL,
                lead_source TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS opportunities (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                stage_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (customer_id) REFERENCES customers (id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_stages (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                name TEXT NOT NULL,
                stage_type TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS organization_settings (
                organization_id TEXT PRIMARY KEY,
                settings TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        // Indexes for the hot lookups: slug dispatch, audit reads, dedup
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_lead_events_endpoint_id ON lead_events (endpoint_id)")
            .execute(&pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_customers_org_email ON customers (organization_id, email)")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    // ---- webhook endpoints ----

    pub async fn create_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<()> {
        let field_mapping_json = serde_json::to_string(&endpoint.field_mapping)?;

        sqlx::query(
            r#"
            INSERT INTO webhook_endpoints
            (id, organization_id, name, slug, provider, api_key, secret_key, field_mapping,
             webhook_url, is_active, leads_received, last_lead_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&endpoint.id)
        .bind(&endpoint.organization_id)
        .bind(&endpoint.name)
        .bind(&endpoint.slug)
        .bind(endpoint.provider.as_str())
        .bind(&endpoint.api_key)
        .bind(&endpoint.secret_key)
        .bind(field_mapping_json)
        .bind(&endpoint.webhook_url)
        .bind(endpoint.is_active)
        .bind(endpoint.leads_received)
        .bind(&endpoint.last_lead_at)
        .bind(&endpoint.created_at)
        .bind(&endpoint.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_endpoint(&self, id: &str) -> Result<Option<WebhookEndpoint>> {
        let row = sqlx::query("SELECT * FROM webhook_endpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| endpoint_from_row(&r)).transpose()
    }

    /// Slug dispatch for the inbound path. Deactivated endpoints are
    /// indistinguishable from absent ones.
    pub async fn get_endpoint_by_slug(&self, slug: &str) -> Result<Option<WebhookEndpoint>> {
        let row = sqlx::query("SELECT * FROM webhook_endpoints WHERE slug = ? AND is_active = 1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| endpoint_from_row(&r)).transpose()
    }

    pub async fn list_endpoints(&self, organization_id: &str) -> Result<Vec<WebhookEndpoint>> {
        let rows = sqlx::query(
            "SELECT * FROM webhook_endpoints WHERE organization_id = ? ORDER BY created_at DESC",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(endpoint_from_row).collect()
    }

    pub async fn update_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<()> {
        let field_mapping_json = serde_json::to_string(&endpoint.field_mapping)?;

        sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET name = ?, api_key = ?, secret_key = ?, field_mapping = ?, is_active = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&endpoint.name)
        .bind(&endpoint.api_key)
        .bind(&endpoint.secret_key)
        .bind(field_mapping_json)
        .bind(endpoint.is_active)
        .bind(&endpoint.updated_at)
        .bind(&endpoint.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_endpoint(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhook_endpoints WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Bump the ingestion counters after a successful lead. Not transactional
    /// with the customer insert.
    pub async fn record_lead_received(&self, endpoint_id: &str, timestamp: &str) -> Result<()> {
        sqlx::query(
            "UPDATE webhook_endpoints SET leads_received = leads_received + 1, last_lead_at = ? WHERE id = ?",
        )
        .bind(timestamp)
        .bind(endpoint_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ---- customers ----

    pub async fn create_customer(&self, customer: &Customer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers
            (id, organization_id, first_name, last_name, email, phone, company_name,
             address_line1, city, state, zip, notes, hazard_types, status, lead_source, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&customer.id)
        .bind(&customer.organization_id)
        .bind(&customer.first_name)
        .bind(&customer.last_name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.company_name)
        .bind(&customer.address_line1)
        .bind(&customer.city)
        .bind(&customer.state)
        .bind(&customer.zip)
        .bind(&customer.notes)
        .bind(&customer.hazard_types)
        .bind(&customer.status)
        .bind(&customer.lead_source)
        .bind(&customer.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent customer in the organization with this email created
    /// after `since` (RFC3339). Used by the dedup check.
    pub async fn find_recent_customer_by_email(
        &self,
        organization_id: &str,
        email: &str,
        since: &str,
    ) -> Result<Option<Customer>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM customers
            WHERE organization_id = ? AND email = ? AND created_at > ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .bind(email)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| customer_from_row(&r)))
    }

    // ---- opportunities & pipeline stages ----

    pub async fn create_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO opportunities (id, organization_id, customer_id, stage_id, name, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&opportunity.id)
        .bind(&opportunity.organization_id)
        .bind(&opportunity.customer_id)
        .bind(&opportunity.stage_id)
        .bind(&opportunity.name)
        .bind(&opportunity.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The organization's lead-intake stage: the active `stage_type = "lead"`
    /// row with the lowest sort order, if any.
    pub async fn lead_pipeline_stage(&self, organization_id: &str) -> Result<Option<PipelineStage>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM pipeline_stages
            WHERE organization_id = ? AND stage_type = 'lead' AND is_active = 1
            ORDER BY sort_order ASC
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| PipelineStage {
            id: r.get("id"),
            organization_id: r.get("organization_id"),
            name: r.get("name"),
            stage_type: r.get("stage_type"),
            sort_order: r.get("sort_order"),
            is_active: r.get("is_active"),
        }))
    }

    /// Opportunity auto-creation is opt-out: enabled unless the settings blob
    /// carries an explicit `false`.
    pub async fn auto_create_opportunity_enabled(&self, organization_id: &str) -> Result<bool> {
        let settings: Option<String> =
            sqlx::query_scalar("SELECT settings FROM organization_settings WHERE organization_id = ?")
                .bind(organization_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(settings) = settings else {
            return Ok(true);
        };
        let settings: serde_json::Value = serde_json::from_str(&settings)?;
        Ok(settings
            .get("auto_create_opportunity_from_lead")
            .and_then(|v| v.as_bool())
            .unwrap_or(true))
    }

    // ---- audit log ----

    pub async fn insert_lead_event(&self, event: &InboundLeadEvent) -> Result<()> {
        let headers_json = serde_json::to_string(&event.headers)?;

        sqlx::query(
            r#"
            INSERT INTO lead_events
            (id, endpoint_id, organization_id, payload, headers, source_ip, status,
             error_message, customer_id, opportunity_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.id)
        .bind(&event.endpoint_id)
        .bind(&event.organization_id)
        .bind(&event.payload)
        .bind(headers_json)
        .bind(&event.source_ip)
        .bind(event.status.as_str())
        .bind(&event.error_message)
        .bind(&event.customer_id)
        .bind(&event.opportunity_id)
        .bind(&event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_lead_events(
        &self,
        endpoint_id: &str,
        count: u32,
    ) -> Result<Vec<InboundLeadEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM lead_events
            WHERE endpoint_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(endpoint_id)
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }
}

fn endpoint_from_row(row: &SqliteRow) -> Result<WebhookEndpoint> {
    let provider_str: String = row.get("provider");
    let provider = Provider::parse(&provider_str)
        .ok_or_else(|| anyhow!("unknown provider in database: {provider_str}"))?;
    let field_mapping: HashMap<String, String> =
        serde_json::from_str(row.get::<&str, _>("field_mapping"))?;

    Ok(WebhookEndpoint {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        name: row.get("name"),
        slug: row.get("slug"),
        provider,
        api_key: row.get("api_key"),
        secret_key: row.get("secret_key"),
        field_mapping,
        webhook_url: row.get("webhook_url"),
        is_active: row.get("is_active"),
        leads_received: row.get("leads_received"),
        last_lead_at: row.get("last_lead_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn customer_from_row(row: &SqliteRow) -> Customer {
    Customer {
        id: row.get("id"),
        organization_id: row.get("organization_id"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        email: row.get("email"),
        phone: row.get("phone"),
        company_name: row.get("company_name"),
        address_line1: row.get("address_line1"),
        city: row.get("city"),
        state: row.get("state"),
        zip: row.get("zip"),
        notes: row.get("notes"),
        hazard_types: row.get("hazard_types"),
        status: row.get("status"),
        lead_source: row.get("lead_source"),
        created_at: row.get("created_at"),
    }
}

fn event_from_row(row: &SqliteRow) -> Result<InboundLeadEvent> {
    let status_str: String = row.get("status");
    let status = EventStatus::parse(&status_str)
        .ok_or_else(|| anyhow!("unknown event status in database: {status_str}"))?;
    let headers: HashMap<String, Vec<String>> =
        serde_json::from_str(row.get::<&str, _>("headers"))?;

    Ok(InboundLeadEvent {
        id: row.get("id"),
        endpoint_id: row.get("endpoint_id"),
        organization_id: row.get("organization_id"),
        payload: row.get("payload"),
        headers,
        source_ip: row.get("source_ip"),
        status,
        error_message: row.get("error_message"),
        customer_id: row.get("customer_id"),
        opportunity_id: row.get("opportunity_id"),
        created_at: row.get("created_at"),
    })
}

/// Seed and inspection helpers for tests. Pipeline stages and organization
/// settings are managed by the wider CRM, not this service, so production
/// code only ever reads them.
#[cfg(test)]
impl Database {
    /// In-memory database. A single pooled connection keeps it alive for the
    /// pool's lifetime.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::initialize(pool).await
    }

    pub async fn create_pipeline_stage(&self, stage: &PipelineStage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_stages (id, organization_id, name, stage_type, sort_order, is_active)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&stage.id)
        .bind(&stage.organization_id)
        .bind(&stage.name)
        .bind(&stage.stage_type)
        .bind(stage.sort_order)
        .bind(stage.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_organization_settings(
        &self,
        organization_id: &str,
        settings: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organization_settings (organization_id, settings)
            VALUES (?, ?)
            ON CONFLICT (organization_id) DO UPDATE SET settings = excluded.settings
            "#,
        )
        .bind(organization_id)
        .bind(settings.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count_customers(&self, organization_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM customers WHERE organization_id = ?")
                .bind(organization_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    pub async fn get_customer(&self, id: &str) -> Result<Option<Customer>> {
        let row = sqlx::query("SELECT * FROM customers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| customer_from_row(&r)))
    }

    pub async fn list_opportunities(&self, organization_id: &str) -> Result<Vec<Opportunity>> {
        let rows = sqlx::query(
            "SELECT * FROM opportunities WHERE organization_id = ? ORDER BY created_at DESC",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| Opportunity {
                id: r.get("id"),
                organization_id: r.get("organization_id"),
                customer_id: r.get("customer_id"),
                stage_id: r.get("stage_id"),
                name: r.get("name"),
                created_at: r.get("created_at"),
            })
            .collect())
    }
}
