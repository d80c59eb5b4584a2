//! Hand-off of new content records to the external enrichment service.
//!
//! Dispatch is fire-and-forget. Each call runs in its own detached task with
//! its own timeout, unaffected by the poll loop's shutdown signal; its outcome
//! is only ever logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::EnrichmentConfig;
use crate::sanitize::redact_endpoint;

#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("Enrichment request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Enrichment endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("Enrichment failed: {0}")]
    Failed(String),
}

/// Opaque enrichment capability.
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn process(&self, content_id: &str) -> Result<(), EnrichmentError>;
}

/// Used when no enrichment endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEnrichment;

#[async_trait]
impl EnrichmentService for NoopEnrichment {
    async fn process(&self, content_id: &str) -> Result<(), EnrichmentError> {
        debug!(content_id, "no enrichment endpoint configured");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EnrichmentRequest<'a> {
    content_id: &'a str,
}

/// POSTs `{"contentId": "..."}` to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookEnrichment {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookEnrichment {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, EnrichmentError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("intake/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl EnrichmentService for WebhookEnrichment {
    async fn process(&self, content_id: &str) -> Result<(), EnrichmentError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EnrichmentRequest { content_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Builds the enrichment adapter for the configuration.
pub fn service_from_config(
    config: &EnrichmentConfig,
) -> Result<Arc<dyn EnrichmentService>, EnrichmentError> {
    match config.endpoint.as_deref().map(str::trim) {
        Some(endpoint) if !endpoint.is_empty() => {
            info!(endpoint = %redact_endpoint(endpoint), "enrichment webhook configured");
            Ok(Arc::new(WebhookEnrichment::new(endpoint)?))
        }
        _ => Ok(Arc::new(NoopEnrichment)),
    }
}

/// Spawns detached enrichment calls.
#[derive(Clone)]
pub struct EnrichmentDispatcher {
    service: Arc<dyn EnrichmentService>,
    timeout: Duration,
}

impl EnrichmentDispatcher {
    pub fn new(service: Arc<dyn EnrichmentService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Starts enrichment for one content record and returns immediately.
    ///
    /// The returned handle is only useful to tests; dropping it detaches the
    /// task. Failures and timeouts are logged, never propagated.
    pub fn dispatch(&self, content_id: String) -> JoinHandle<()> {
        let service = Arc::clone(&self.service);
        let timeout = self.timeout;
        let span = info_span!("enrichment", content_id = %content_id);

        tokio::spawn(
            async move {
                match tokio::time::timeout(timeout, service.process(&content_id)).await {
                    Ok(Ok(())) => debug!("enrichment completed"),
                    Ok(Err(e)) => warn!(error = %e, "enrichment failed"),
                    Err(_) => warn!(timeout_secs = timeout.as_secs(), "enrichment timed out"),
                }
            }
            .instrument(span),
        )
    }
}
