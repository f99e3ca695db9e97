//! Request normalization (C3). Turns the raw bytes the HTTP framing layer
//! hands the WAF into the `RequestRecord` every later stage reads.

use std::collections::BTreeMap;

use waf_common::model::{RequestRecord, TlsFeatures};

use crate::headless::HeadlessDetector;

/// Raw request data as received from the HTTP framing layer, before
/// normalization. Transient: built by the caller (the axum handler) for
/// one request and discarded after `analyze` runs.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub query_string: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub socket_remote_ip: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RequestAnalyzer {
    headless: HeadlessDetector,
}

impl RequestAnalyzer {
    pub fn new() -> Self {
        Self {
            headless: HeadlessDetector::new(),
        }
    }

    pub fn analyze(&self, raw: &RawRequest) -> RequestRecord {
        let headers = normalize_headers(&raw.headers);
        let ip = derive_client_ip(&headers, &raw.socket_remote_ip);
        let query_params = parse_urlencoded(raw.query_string.as_bytes());
        let (form_data, json_data) = parse_body(raw.content_type.as_deref(), &raw.body);
        let payload_string = build_payload_string(&query_params, &form_data, json_data.as_ref());
        let user_agent = headers.get("user-agent").cloned().unwrap_or_default();
        let method = raw.method.clone();
        let tls_features = parse_tls_features(&headers);
        let headless = self.headless.analyze(&headers, &method, &user_agent);

        RequestRecord {
            ip,
            endpoint: raw.path.clone(),
            method,
            user_agent,
            headers,
            query_params,
            form_data: form_data.into_iter().collect(),
            json_data,
            payload_string,
            tls_features,
            headless,
        }
    }
}

fn normalize_headers(headers: &[(String, String)]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (k, v) in headers {
        map.insert(k.to_ascii_lowercase(), v.clone());
    }
    map
}

/// First of `X-Forwarded-For[0]`, `X-Real-IP`, socket remote, per §4.3.
fn derive_client_ip(headers: &BTreeMap<String, String>, socket_remote_ip: &str) -> String {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Some(candidate) = xff.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return candidate.to_string();
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip") {
        let candidate = real_ip.trim();
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }
    socket_remote_ip.to_string()
}

fn parse_urlencoded(bytes: &[u8]) -> Vec<(String, String)> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(bytes).unwrap_or_default()
}

/// Body is parsed only when the content type is JSON or form-urlencoded;
/// any other type yields empty parsed fields (§4.3) and the raw bytes are
/// simply not represented in the payload string.
fn parse_body(
    content_type: Option<&str>,
    body: &[u8],
) -> (Vec<(String, String)>, Option<serde_json::Value>) {
    if body.is_empty() {
        return (Vec::new(), None);
    }
    match content_type.map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase()) {
        Some(ct) if ct == "application/x-www-form-urlencoded" => (parse_urlencoded(body), None),
        Some(ct) if ct == "application/json" || ct.ends_with("+json") => {
            let value = serde_json::from_slice::<serde_json::Value>(body).ok();
            (Vec::new(), value)
        }
        _ => (Vec::new(), None),
    }
}

/// Concatenates stringified query, form, and JSON data into the single
/// string the content detectors (C1) scan.
fn build_payload_string(
    query: &[(String, String)],
    form: &[(String, String)],
    json: Option<&serde_json::Value>,
) -> String {
    let mut parts = Vec::new();
    for (k, v) in query {
        parts.push(format!("{k}={v}"));
    }
    for (k, v) in form {
        parts.push(format!("{k}={v}"));
    }
    if let Some(value) = json {
        parts.push(value.to_string());
    }
    parts.join("&")
}

/// Reconstructs TLS ClientHello features from the pre-parsed headers the
/// terminator forwards (§6): `X-TLS-Version`, `X-TLS-Cipher-Suites`, etc.
/// Non-goal: this crate never terminates or parses TLS itself.
fn parse_tls_features(headers: &BTreeMap<String, String>) -> Option<TlsFeatures> {
    let version = headers.get("x-tls-version")?.clone();
    let split = |key: &str| -> Vec<String> {
        headers
            .get(key)
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    };
    Some(TlsFeatures {
        version,
        cipher_suites: split("x-tls-cipher-suites"),
        extensions: split("x-tls-extensions"),
        curves: split("x-tls-curves"),
        point_formats: split("x-tls-point-formats"),
    })
}
