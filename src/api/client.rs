//! Rate-limited document registration client.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::document::Document;
use super::request::CreateDocumentRequest;
use super::submitter::{HttpSubmitter, Submission, SubmitError, SubmitResponse, Submitter};
use crate::config::{ClientConfig, TimeUnit};
use crate::error::Result;
use crate::gate::{AdmissionGate, GateConfig};

/// Client for the CRPT document creation API.
///
/// At most `request_limit` documents are sent per window; callers beyond
/// that wait for a slot. Share it between tasks behind an `Arc`.
pub struct CrptApi<S = HttpSubmitter> {
    gate: AdmissionGate,
    submitter: S,
    document_format: String,
    document_type: String,
    close_grace: Duration,
}

impl CrptApi<HttpSubmitter> {
    /// Create a client allowing `request_limit` documents per `time_unit`,
    /// with default endpoint settings.
    pub fn new(time_unit: TimeUnit, request_limit: usize) -> Result<Self> {
        let mut config = ClientConfig::default();
        config.throttle.time_unit = time_unit;
        config.throttle.request_limit = request_limit;
        Self::from_config(&config)
    }

    /// Create an HTTP client from configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let submitter = HttpSubmitter::new(&config.api)?;
        Self::with_submitter(config, submitter)
    }
}

impl<S: Submitter> CrptApi<S> {
    /// Create a client sending through `submitter`.
    pub fn with_submitter(config: &ClientConfig, submitter: S) -> Result<Self> {
        let gate_config = GateConfig::new(config.throttle.window(), config.throttle.request_limit)?;
        Ok(Self {
            gate: AdmissionGate::with_config(gate_config),
            submitter,
            document_format: config.api.document_format.clone(),
            document_type: config.api.document_type.clone(),
            close_grace: config.throttle.close_grace(),
        })
    }

    /// Register a document.
    ///
    /// Waits for admission, then sends without holding the gate. Fails with
    /// [`GateError::GateClosed`](crate::gate::GateError::GateClosed) once the
    /// client is closed; endpoint errors are returned unchanged.
    #[instrument(
        skip(self, document, signature, token),
        fields(request_id = %uuid::Uuid::new_v4(), grant = tracing::field::Empty)
    )]
    pub async fn create_document(
        &self,
        document: &Document,
        signature: &str,
        token: &str,
        product_group: &str,
    ) -> Result<SubmitResponse> {
        let grant = self.gate.acquire().await?;
        tracing::Span::current().record("grant", grant.id());
        debug!("Admitted");

        let request = CreateDocumentRequest::encode(
            &self.document_format,
            &self.document_type,
            document,
            signature,
        )
        .map_err(SubmitError::from)?;

        let submission = Submission {
            product_group: product_group.to_string(),
            token: token.to_string(),
            payload: request.to_body().map_err(SubmitError::from)?,
        };

        match self.submitter.send(submission).await {
            Ok(response) => {
                debug!(status = response.status, "Document registered");
                Ok(response)
            }
            Err(e) => {
                warn!(error = %e, "Document submission failed");
                Err(e.into())
            }
        }
    }

    /// Stop admitting documents, waiting for the configured grace period.
    pub async fn close(&self) -> Result<()> {
        self.gate.close(self.close_grace).await?;
        Ok(())
    }

    /// The admission gate in front of the submitter.
    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }
}
