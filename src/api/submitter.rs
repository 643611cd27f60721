//! Transport for admitted submissions.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ApiConfig;

/// Errors returned by a [`Submitter`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The request never got a response
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with something other than 200 or 201
    #[error("Request failed with status {status}: {body}")]
    Protocol { status: u16, body: String },

    /// The document could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// One document creation call, ready to send.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Product group, sent as the `pg` query parameter
    pub product_group: String,
    /// Bearer token
    pub token: String,
    /// JSON request body
    pub payload: Vec<u8>,
}

/// Successful endpoint response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    pub status: u16,
    pub body: String,
}

/// Sends submissions that have already been admitted.
///
/// Implementations report failures as they are; callers do not retry.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn send(&self, submission: Submission) -> Result<SubmitResponse, SubmitError>;
}

/// Submitter posting to the registration endpoint over HTTP.
pub struct HttpSubmitter {
    client: reqwest::Client,
    url: String,
}

impl HttpSubmitter {
    /// Create a submitter for the endpoint described by `config`.
    pub fn new(config: &ApiConfig) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.create_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn send(&self, submission: Submission) -> Result<SubmitResponse, SubmitError> {
        debug!(
            url = %self.url,
            product_group = %submission.product_group,
            bytes = submission.payload.len(),
            "Sending document"
        );

        let response = self
            .client
            .post(&self.url)
            .query(&[("pg", submission.product_group.as_str())])
            .bearer_auth(&submission.token)
            .header(CONTENT_TYPE, "application/json")
            .body(submission.payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        if status != 200 && status != 201 {
            warn!(status, "Document rejected by endpoint");
            return Err(SubmitError::Protocol { status, body });
        }

        Ok(SubmitResponse { status, body })
    }
}

/// Offline submitter that pretends every document was accepted.
#[derive(Debug, Clone, Default)]
pub struct DryRunSubmitter {
    latency: Duration,
}

impl DryRunSubmitter {
    /// Each send completes after `latency`.
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl Submitter for DryRunSubmitter {
    async fn send(&self, submission: Submission) -> Result<SubmitResponse, SubmitError> {
        tokio::time::sleep(self.latency).await;
        debug!(
            product_group = %submission.product_group,
            bytes = submission.payload.len(),
            "Dry run, document not sent"
        );
        Ok(SubmitResponse {
            status: 200,
            body: "{}".to_string(),
        })
    }
}
