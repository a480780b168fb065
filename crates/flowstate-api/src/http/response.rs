//! JSON envelope shared by every `/api/v1` response.
//!
//! ```json
//! {
//!   "data": { "execution_id": "..." },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 3 },
//!   "errors": [{ "code": "EXECUTION_FAILED", "message": "...", "details": { "error": "...", "cause": "..." } }],
//!   "_links": { "trace": "/api/v1/executions/.../trace" }
//! }
//! ```
//!
//! `errors` and `_links` are omitted when empty; `data` is omitted on errors.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub meta: ApiMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,
    #[serde(rename = "_links", skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ApiMeta {
    pub request_id: String,
    /// RFC 3339.
    pub timestamp: String,
    pub response_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    /// Structured payload, e.g. the `{error, cause}` of a failed execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Request id and start time, captured at the top of every handler.
pub struct RequestTimer {
    request_id: String,
    start: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            request_id: Uuid::now_v7().to_string(),
            start: Instant::now(),
        }
    }

    fn meta(self) -> ApiMeta {
        ApiMeta {
            request_id: self.request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            response_time_ms: self.start.elapsed().as_millis() as u64,
        }
    }

    pub fn success<T: Serialize>(self, data: T) -> ApiResponse<T> {
        ApiResponse {
            data: Some(data),
            meta: self.meta(),
            errors: Vec::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn failure(self, code: &str, message: String, details: Option<serde_json::Value>) -> ApiResponse<()> {
        ApiResponse {
            data: None,
            meta: self.meta(),
            errors: vec![ApiErrorDetail {
                code: code.to_string(),
                message,
                details,
            }],
            links: BTreeMap::new(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn with_link(mut self, rel: &str, href: &str) -> Self {
        self.links.insert(rel.to_string(), href.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_envelope_omits_errors_and_empty_links() {
        let resp = RequestTimer::start().success(json!({"ok": true}));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["data"], json!({"ok": true}));
        assert!(value.get("errors").is_none());
        assert!(value.get("_links").is_none());
        assert!(value["meta"]["request_id"].is_string());
    }

    #[test]
    fn links_are_serialized_under_underscore_links() {
        let resp = RequestTimer::start()
            .success(1)
            .with_link("self", "/api/v1/executions");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["_links"]["self"], "/api/v1/executions");
    }

    #[test]
    fn failure_envelope_carries_details() {
        let resp = RequestTimer::start().failure(
            "EXECUTION_FAILED",
            "Invalid OTP".to_string(),
            Some(json!({"error": "Invalid OTP"})),
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("data").is_none());
        assert_eq!(value["errors"][0]["code"], "EXECUTION_FAILED");
        assert_eq!(value["errors"][0]["details"]["error"], "Invalid OTP");
    }
}
