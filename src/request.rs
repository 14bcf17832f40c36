// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Chat-completion request decoding and API error bodies
//
// Responsibilities:
// - Decode a raw body into a ChatRequest and validate it
// - Apply the X-Session-Id header fallback
// - Serialize every failure as an OpenAI-style error body

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::message::{ChatRequest, Role, ToolChoice};

/// Header carrying the session id when the body does not.
pub const SESSION_HEADER: &str = "x-session-id";

/// Most stop sequences a request may carry.
pub const MAX_STOP_SEQUENCES: usize = 4;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A request body that cannot be served.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request body is empty")]
    EmptyBody,

    #[error("request body is not a valid chat completion request: {0}")]
    InvalidJson(String),

    #[error("{message}")]
    Invalid {
        message: String,
        param: Option<String>,
    },
}

impl RequestError {
    fn invalid(param: impl Into<String>, message: impl Into<String>) -> Self {
        RequestError::Invalid {
            message: message.into(),
            param: Some(param.into()),
        }
    }
}

/// Every error the gateway returns over HTTP.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    BadRequest(#[from] RequestError),

    #[error("The model `{0}` does not exist or is not available")]
    ModelNotFound(String),

    #[error("Unknown request URL: {method} {path}")]
    NotFound { method: String, path: String },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelNotFound(_) | ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Internal(_) => "server_error",
            _ => "invalid_request_error",
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            ApiError::BadRequest(_) => None,
            ApiError::ModelNotFound(_) => Some("model_not_found"),
            ApiError::NotFound { .. } => Some("not_found"),
            ApiError::Internal(_) => Some("internal_error"),
        }
    }

    fn param(&self) -> Option<&str> {
        match self {
            ApiError::BadRequest(RequestError::Invalid { param, .. }) => param.as_deref(),
            ApiError::ModelNotFound(_) => Some("model"),
            _ => None,
        }
    }

    /// The `{error:{message,type,param,code}}` body.
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "param": self.param(),
                "code": self.code(),
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode and validate a chat-completion body.
///
/// The session id falls back to the `X-Session-Id` header when the body
/// omits it. Blank ids are treated as absent.
pub fn decode_chat_request(body: &[u8], headers: &HeaderMap) -> Result<ChatRequest, RequestError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(RequestError::EmptyBody);
    }

    let mut request: ChatRequest =
        serde_json::from_slice(body).map_err(|e| RequestError::InvalidJson(e.to_string()))?;

    validate(&request)?;

    let from_body = request
        .session_id
        .take()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    request.session_id = from_body.or_else(|| {
        headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    });

    Ok(request)
}

fn validate(request: &ChatRequest) -> Result<(), RequestError> {
    if request.model.trim().is_empty() {
        return Err(RequestError::invalid("model", "`model` must not be empty"));
    }
    if request.messages.is_empty() {
        return Err(RequestError::invalid(
            "messages",
            "`messages` must contain at least one message",
        ));
    }

    for (i, message) in request.messages.iter().enumerate() {
        let has_call_id = message
            .tool_call_id
            .as_deref()
            .is_some_and(|id| !id.is_empty());
        if message.role == Role::Tool && !has_call_id {
            return Err(RequestError::invalid(
                format!("messages[{i}].tool_call_id"),
                format!("messages[{i}] has role `tool` but no `tool_call_id`"),
            ));
        }
        if message.role != Role::Assistant && !message.tool_calls.is_empty() {
            return Err(RequestError::invalid(
                format!("messages[{i}].tool_calls"),
                format!("messages[{i}] carries `tool_calls` but is not an assistant message"),
            ));
        }
    }

    if let Some(t) = request.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(RequestError::invalid(
                "temperature",
                format!("`temperature` must be between 0 and 2, got {t}"),
            ));
        }
    }
    if let Some(p) = request.top_p {
        if !(0.0..=1.0).contains(&p) {
            return Err(RequestError::invalid(
                "top_p",
                format!("`top_p` must be between 0 and 1, got {p}"),
            ));
        }
    }
    if request.max_tokens == Some(0) {
        return Err(RequestError::invalid("max_tokens", "`max_tokens` must be at least 1"));
    }
    if request.stop.as_slice().len() > MAX_STOP_SEQUENCES {
        return Err(RequestError::invalid(
            "stop",
            format!("`stop` accepts at most {MAX_STOP_SEQUENCES} sequences"),
        ));
    }

    if let Some(ToolChoice::Function(name)) = &request.tool_choice {
        let declared = request
            .tools
            .iter()
            .flatten()
            .any(|t| &t.function.name == name);
        if !declared {
            return Err(RequestError::invalid(
                "tool_choice",
                format!("`tool_choice` names function `{name}` which is not in `tools`"),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn decode(body: serde_json::Value) -> Result<ChatRequest, RequestError> {
        decode_chat_request(body.to_string().as_bytes(), &HeaderMap::new())
    }

    fn user_only() -> serde_json::Value {
        json!({"model": "llama", "messages": [{"role": "user", "content": "hi"}]})
    }

    #[test]
    fn minimal_request_decodes() {
        let req = decode(user_only()).unwrap();
        assert_eq!(req.model, "llama");
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn empty_body_rejected() {
        let err = decode_chat_request(b"  \n", &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, RequestError::EmptyBody));
    }

    #[test]
    fn malformed_json_rejected() {
        let err = decode_chat_request(b"{\"model\": ", &HeaderMap::new()).unwrap_err();
        assert!(matches!(err, RequestError::InvalidJson(_)));
    }

    #[test]
    fn wrong_schema_rejected() {
        let err = decode(json!({"model": "m", "messages": "hello"})).unwrap_err();
        assert!(matches!(err, RequestError::InvalidJson(_)));
    }

    #[test]
    fn empty_messages_rejected() {
        let err = decode(json!({"model": "m", "messages": []})).unwrap_err();
        assert!(err.to_string().contains("messages"));
    }

    #[test]
    fn tool_message_requires_call_id() {
        let err = decode(json!({
            "model": "m",
            "messages": [{"role": "tool", "content": "42"}]
        }))
        .unwrap_err();
        match err {
            RequestError::Invalid { param, .. } => {
                assert_eq!(param.as_deref(), Some("messages[0].tool_call_id"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let mut body = user_only();
        body["temperature"] = json!(3.5);
        assert!(decode(body).is_err());
    }

    #[test]
    fn too_many_stop_sequences_rejected() {
        let mut body = user_only();
        body["stop"] = json!(["a", "b", "c", "d", "e"]);
        assert!(decode(body).is_err());
    }

    #[test]
    fn named_tool_choice_must_be_declared() {
        let mut body = user_only();
        body["tools"] = json!([{"type": "function", "function": {"name": "a"}}]);
        body["tool_choice"] = json!({"type": "function", "function": {"name": "b"}});
        assert!(decode(body).is_err());
    }

    #[test]
    fn session_header_used_when_body_omits_id() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static(" sess-7 "));
        let req = decode_chat_request(user_only().to_string().as_bytes(), &headers).unwrap();
        assert_eq!(req.session_id.as_deref(), Some("sess-7"));
    }

    #[test]
    fn body_session_id_wins_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("from-header"));
        let mut body = user_only();
        body["session_id"] = json!("from-body");
        let req = decode_chat_request(body.to_string().as_bytes(), &headers).unwrap();
        assert_eq!(req.session_id.as_deref(), Some("from-body"));
    }

    #[test]
    fn blank_session_id_is_absent() {
        let mut body = user_only();
        body["session_id"] = json!("   ");
        assert_eq!(decode(body).unwrap().session_id, None);
    }

    #[test]
    fn api_error_bodies() {
        let not_found = ApiError::ModelNotFound("ghost".into());
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        let body = not_found.body();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["code"], "model_not_found");
        assert_eq!(body["error"]["param"], "model");

        let bad = ApiError::from(RequestError::EmptyBody);
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert!(bad.body()["error"]["code"].is_null());

        let internal = ApiError::Internal("backend unavailable".into());
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.body()["error"]["type"], "server_error");
        assert_eq!(internal.body()["error"]["message"], "backend unavailable");
    }
}
