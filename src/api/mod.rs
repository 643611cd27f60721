//! Client for the CRPT document registration endpoint.

mod client;
mod document;
mod request;
mod submitter;

pub use client::CrptApi;
pub use document::{Description, Document, Product};
pub use request::CreateDocumentRequest;
pub use submitter::{
    DryRunSubmitter, HttpSubmitter, Submission, SubmitError, SubmitResponse, Submitter,
};
