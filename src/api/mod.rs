//! HTTP API Module
//!
//! Exposes the local node's election status over HTTP.

mod http;

pub use http::{HealthResponse, HttpServer};
