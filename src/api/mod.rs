//! HTTP API Module
//!
//! Provides a read-only REST API for node status and the peer directory.

mod http;

pub use http::HttpServer;
