// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Cross-origin headers
//
// The allow-list comes from `server.cors_origins`. `"*"` allows every
// origin; otherwise the request's `Origin` is reflected only when it is
// listed, with `Vary: Origin`.

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, ALLOW,
    ORIGIN, VARY,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::ServerConfig;

pub const DEFAULT_ALLOW_METHODS: &str = "GET, POST, OPTIONS";
pub const DEFAULT_ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Session-Id";
/// `Allow` header for a plain OPTIONS request.
pub const ALLOWED_METHODS: &str = "GET, POST, HEAD, OPTIONS";

/// Which `Access-Control-Allow-Origin` value to send, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowOrigin {
    Any,
    Exact(HeaderValue),
}

/// Apply the origin rule to a request's `Origin` header.
pub fn allow_origin(allowed: &[String], origin: Option<&HeaderValue>) -> Option<AllowOrigin> {
    if allowed.iter().any(|o| o == "*") {
        return Some(AllowOrigin::Any);
    }
    let origin = origin?;
    let requested = origin.to_str().ok()?.trim_end_matches('/');
    allowed
        .iter()
        .any(|o| o == requested)
        .then(|| AllowOrigin::Exact(origin.clone()))
}

/// Merge the allow-origin header (and `Vary`) into a response.
pub fn apply_allow_origin(headers: &mut HeaderMap, allowed: &[String], origin: Option<&HeaderValue>) {
    match allow_origin(allowed, origin) {
        Some(AllowOrigin::Any) => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
        Some(AllowOrigin::Exact(value)) => {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            headers.append(VARY, HeaderValue::from_static("Origin"));
        }
        None => {}
    }
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

/// Reduce a requested method/header list to token characters, commas and
/// spaces.
///
/// Returns `None` for values carrying a control character, or nothing
/// left after filtering.
pub fn sanitize_token_list(value: &HeaderValue) -> Option<HeaderValue> {
    let bytes = value.as_bytes();
    if bytes.iter().any(|b| b.is_ascii_control()) {
        return None;
    }
    let kept: String = bytes
        .iter()
        .copied()
        .filter(|&b| is_tchar(b) || b == b',' || b == b' ')
        .map(char::from)
        .collect();
    let kept = kept.trim();
    if kept.is_empty() {
        return None;
    }
    HeaderValue::from_str(kept).ok()
}

/// Response to an OPTIONS request.
pub fn options(config: &ServerConfig, headers: &HeaderMap) -> Response {
    let Some(origin) = headers.get(ORIGIN) else {
        return (
            StatusCode::NO_CONTENT,
            [(ALLOW, HeaderValue::from_static(ALLOWED_METHODS))],
        )
            .into_response();
    };

    let mut response = StatusCode::NO_CONTENT.into_response();
    let out = response.headers_mut();
    apply_allow_origin(out, &config.cors_origins, Some(origin));

    let reflected = [
        (ACCESS_CONTROL_REQUEST_METHOD, ACCESS_CONTROL_ALLOW_METHODS, DEFAULT_ALLOW_METHODS),
        (ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_ALLOW_HEADERS, DEFAULT_ALLOW_HEADERS),
    ];
    for (request_header, allow_header, default) in reflected {
        match headers.get(&request_header) {
            Some(requested) => {
                if let Some(value) = sanitize_token_list(requested) {
                    out.insert(allow_header, value);
                }
            }
            None => {
                out.insert(allow_header, HeaderValue::from_static(default));
            }
        }
    }
    out.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(config.cors_max_age_secs));
    response
}
