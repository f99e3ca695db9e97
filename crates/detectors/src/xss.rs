//! Cross-site scripting detector (C1). Matches dangerous tags, `javascript:`
//! / `vbscript:` URI schemes, inline event handlers, and known DOM sink
//! APIs independently.

use once_cell::sync::Lazy;
use regex::Regex;
use waf_common::model::ThreatLevel;

use crate::Detection;

fn ci_dotall(pattern: &str) -> Regex {
    Regex::new(&format!("(?is){pattern}")).expect("static xss pattern is valid")
}

static DANGEROUS_TAG: Lazy<Regex> =
    Lazy::new(|| ci_dotall(r"<\s*(script|iframe|object|embed|svg\s+onload|link)\b"));

static DANGEROUS_URI: Lazy<Regex> = Lazy::new(|| ci_dotall(r"\b(javascript|vbscript):"));

static EVENT_HANDLER: Lazy<Regex> = Lazy::new(|| ci_dotall(r#"\bon[a-z]+\s*=\s*['\x22]?[^\s'\x22>]"#));

static DOM_SINK: Lazy<Regex> = Lazy::new(|| {
    ci_dotall(r"document\.cookie|document\.write|\.innerHTML\s*=|eval\s*\(|String\.fromCharCode")
});

#[derive(Debug, Default, Clone, Copy)]
pub struct XssDetector;

impl XssDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn has_dangerous_tag(&self, payload: &str) -> bool {
        DANGEROUS_TAG.is_match(payload)
    }

    pub fn has_dangerous_uri(&self, payload: &str) -> bool {
        DANGEROUS_URI.is_match(payload)
    }

    pub fn has_event_handler(&self, payload: &str) -> bool {
        EVENT_HANDLER.is_match(payload)
    }

    pub fn has_dom_sink(&self, payload: &str) -> bool {
        DOM_SINK.is_match(payload)
    }

    pub fn detect(&self, payload: &str) -> Option<Detection> {
        let technique = if self.has_dangerous_tag(payload) {
            "dangerous_tag"
        } else if self.has_dangerous_uri(payload) {
            "dangerous_uri"
        } else if self.has_event_handler(payload) {
            "event_handler"
        } else if self.has_dom_sink(payload) {
            "dom_sink"
        } else {
            return None;
        };

        Some(Detection {
            threat_type: "xss",
            threat_level: ThreatLevel::High,
            technique,
            reason: format!("cross-site scripting via {technique}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_tag_is_detected() {
        let d = XssDetector::new();
        let hit = d.detect("<script>alert(document.cookie)</script>").unwrap();
        assert_eq!(hit.threat_level, ThreatLevel::High);
        assert_eq!(hit.technique, "dangerous_tag");
    }

    #[test]
    fn javascript_uri_is_detected() {
        let d = XssDetector::new();
        assert!(d.has_dangerous_uri("<a href=\"javascript:alert(1)\">click</a>"));
    }

    #[test]
    fn event_handler_is_detected() {
        let d = XssDetector::new();
        assert!(d.has_event_handler("<img src=x onerror=alert(1)>"));
    }

    #[test]
    fn dom_sink_is_detected() {
        let d = XssDetector::new();
        assert!(d.has_dom_sink("el.innerHTML = userInput"));
    }

    #[test]
    fn plain_text_is_clean() {
        let d = XssDetector::new();
        assert!(d.detect("just some plain search text").is_none());
    }
}
