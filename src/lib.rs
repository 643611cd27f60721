//! CRPT client - rate-limited document registration
//!
//! This crate submits documents to the CRPT registration API while keeping
//! outbound traffic under a fixed number of requests per time window. Every
//! submission first passes an admission gate whose slots are released by a
//! timer one window after they were granted.

pub mod api;
pub mod config;
pub mod error;
pub mod gate;
