//! Structured invocation results.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;

use crate::http::Payload;

/// The normalized outcome of an invocation, whichever strategy produced it.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    parsed: OnceLock<Option<Value>>,
}

impl ApiResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            parsed: OnceLock::new(),
        }
    }

    /// Serialize a payload the way the wire would.
    pub fn from_payload(status: StatusCode, headers: HeaderMap, payload: Payload) -> Self {
        let (headers, body) = payload.finalize(headers);
        Self::new(status, headers, body)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Raw body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Body parsed as JSON on first access. Malformed content yields `None`.
    pub fn json(&self) -> Option<&Value> {
        self.parsed
            .get_or_init(|| serde_json::from_slice(&self.body).ok())
            .as_ref()
    }

    /// Deserialize the body into `T`, `None` if it does not fit.
    pub fn json_as<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

/// Relays the result unchanged.
impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// `{ "status": 201, "headers": {...}, "body": <json or text> }`
impl Serialize for ApiResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let headers: BTreeMap<&str, &str> = self
            .headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
            .collect();
        let body = match self.json() {
            Some(value) => value.clone(),
            None => Value::String(String::from_utf8_lossy(&self.body).into_owned()),
        };

        let mut state = serializer.serialize_struct("ApiResponse", 3)?;
        state.serialize_field("status", &self.status.as_u16())?;
        state.serialize_field("headers", &headers)?;
        state.serialize_field("body", &body)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_malformed_json_is_absent() {
        let response = ApiResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{nope"));
        assert!(response.json().is_none());
        assert_eq!(response.text(), Some("{nope"));
    }

    #[test]
    fn test_json_parsed_lazily_and_cached() {
        let response = ApiResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(br#"{"id":"1"}"#));
        let first = response.json().unwrap() as *const Value;
        let second = response.json().unwrap() as *const Value;
        assert_eq!(first, second);
        assert_eq!(response.json(), Some(&json!({"id": "1"})));
    }

    #[test]
    fn test_envelope_serialization() {
        let response = ApiResponse::from_payload(
            StatusCode::CREATED,
            HeaderMap::new(),
            Payload::Text("Hello".into()),
        );
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "status": 201,
                "headers": { "content-type": "text/plain; charset=utf-8" },
                "body": "Hello"
            })
        );
    }
}
