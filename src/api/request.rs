//! Request envelope for the document creation endpoint.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use super::document::Document;

/// Body of a document creation call.
///
/// The document itself travels base64-encoded inside `product_document`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDocumentRequest {
    pub document_format: String,
    #[serde(rename = "type")]
    pub document_type: String,
    pub product_document: String,
    pub signature: String,
}

impl CreateDocumentRequest {
    /// Encode `document` and `signature` into a request envelope.
    pub fn encode(
        document_format: &str,
        document_type: &str,
        document: &Document,
        signature: &str,
    ) -> serde_json::Result<Self> {
        let document_json = serde_json::to_vec_pretty(document)?;

        Ok(Self {
            document_format: document_format.to_string(),
            document_type: document_type.to_string(),
            product_document: general_purpose::STANDARD.encode(document_json),
            signature: general_purpose::STANDARD.encode(signature.as_bytes()),
        })
    }

    /// Serialize to the JSON body sent over the wire.
    pub fn to_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
