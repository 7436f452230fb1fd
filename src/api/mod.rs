// src/api/mod.rs
// HTTP/SSE API surface

pub mod http;

pub use http::router;
