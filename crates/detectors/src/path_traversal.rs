//! Path traversal detector (C1). Covers raw `../` / `..\`, single and
//! double URL-encoded variants, overlong-UTF-8 encoded dots, and absolute
//! paths into sensitive directories.

use once_cell::sync::Lazy;
use regex::Regex;
use waf_common::model::ThreatLevel;

use crate::Detection;

fn ci_dotall(pattern: &str) -> Regex {
    Regex::new(&format!("(?is){pattern}")).expect("static path traversal pattern is valid")
}

static RAW_TRAVERSAL: Lazy<Regex> = Lazy::new(|| ci_dotall(r"\.\.[/\\]|[/\\]\.\."));

static ENCODED_TRAVERSAL: Lazy<Regex> = Lazy::new(|| {
    ci_dotall(r"%2e%2e(%2f|%5c|/|\\)|%252e%252e(%252f|%255c)|\.%2e[/\\]|%2e\.[/\\]")
});

static OVERLONG_UTF8_TRAVERSAL: Lazy<Regex> =
    Lazy::new(|| ci_dotall(r"%c0%ae%c0%ae|%e0%80%ae%e0%80%ae|%c0%af|%c1%9c"));

static ABSOLUTE_SENSITIVE_PATH: Lazy<Regex> =
    Lazy::new(|| ci_dotall(r"(^|[=/\\])(/etc/|/proc/|/sys/|c:\\windows\\|c:/windows/)"));

#[derive(Debug, Default, Clone, Copy)]
pub struct PathTraversalDetector;

impl PathTraversalDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn is_raw_traversal(&self, payload: &str) -> bool {
        RAW_TRAVERSAL.is_match(payload)
    }

    pub fn is_encoded_traversal(&self, payload: &str) -> bool {
        ENCODED_TRAVERSAL.is_match(payload) || OVERLONG_UTF8_TRAVERSAL.is_match(payload)
    }

    pub fn is_absolute_sensitive_path(&self, payload: &str) -> bool {
        ABSOLUTE_SENSITIVE_PATH.is_match(payload)
    }

    pub fn detect(&self, payload: &str) -> Option<Detection> {
        let technique = if self.is_raw_traversal(payload) {
            "raw_traversal"
        } else if self.is_encoded_traversal(payload) {
            "encoded_traversal"
        } else if self.is_absolute_sensitive_path(payload) {
            "absolute_sensitive_path"
        } else {
            return None;
        };

        Some(Detection {
            threat_type: "path_traversal",
            threat_level: ThreatLevel::High,
            technique,
            reason: format!("path traversal via {technique}"),
        })
    }
}
