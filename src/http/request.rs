//! Virtual requests.
//!
//! # Responsibilities
//! - Carry method, url, path params, query, headers and body to hooks and handlers
//! - Identify every invocation with its own request ID
//! - Encode and decode query strings
//!
//! # Design Decisions
//! - One request per invocation, never reused
//! - The same type is built from a wire request and from an in-process call,
//!   so handlers cannot tell the two apart

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use url::form_urlencoded;
use uuid::Uuid;

use crate::routing::template::PathParams;

pub const X_REQUEST_ID: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct VirtualRequest {
    /// Request ID (taken from `x-request-id` when present).
    pub request_id: String,
    pub method: Method,
    /// Path plus query string.
    pub url: String,
    pub params: PathParams,
    pub query: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl VirtualRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        let query = parse_query(url.split_once('?').map(|(_, q)| q));
        Self {
            request_id: new_request_id(),
            method,
            url,
            params: PathParams::new(),
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// The url without its query string.
    pub fn path(&self) -> &str {
        self.url.split_once('?').map(|(p, _)| p).unwrap_or(&self.url)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Deserialize the body as JSON, `None` when it is not valid for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_slice(&self.body).ok()
    }
}

pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Decode a raw query string. Repeated keys keep the last value.
pub fn parse_query(raw: Option<&str>) -> BTreeMap<String, String> {
    raw.map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Append an encoded query string to `path`; no `?` when `query` is empty.
pub fn with_query(path: &str, query: &BTreeMap<String, String>) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish();
    format!("{}?{}", path, encoded)
}
