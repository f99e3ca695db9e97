//! Error taxonomy for the WAF pipeline.
//!
//! The categories mirror the error handling design: decision errors fail
//! open, verification errors always fail closed, persistence errors roll
//! back without blocking the decision, input errors degrade to an empty
//! payload, and budget overruns are logged without aborting an
//! already-computed decision.

use std::fmt;

#[derive(Debug, Clone)]
pub enum WafError {
    /// A component failed to produce a verdict. The component is skipped
    /// for this request and the failure is logged.
    Decision { component: String, detail: String },

    /// Challenge payload malformed, expired, or replayed. Always fail-closed.
    Verification { reason: String },

    /// Record-store write failed. Transaction rolled back; the decision
    /// already made for this request is unaffected.
    Persistence { detail: String },

    /// Request body failed to parse; treated as an empty parsed payload.
    Input { detail: String },

    /// The per-request latency budget was exceeded. The decision already
    /// computed is still honored.
    BudgetExceeded { elapsed_ms: u64, budget_ms: u64 },
}

impl fmt::Display for WafError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WafError::Decision { component, detail } => {
                write!(f, "{} failed to produce a verdict: {}", component, detail)
            }
            WafError::Verification { reason } => {
                write!(f, "challenge verification failed: {}", reason)
            }
            WafError::Persistence { detail } => {
                write!(f, "record store write failed: {}", detail)
            }
            WafError::Input { detail } => {
                write!(f, "request body could not be parsed: {}", detail)
            }
            WafError::BudgetExceeded {
                elapsed_ms,
                budget_ms,
            } => {
                write!(
                    f,
                    "latency budget exceeded: {}ms elapsed, budget is {}ms",
                    elapsed_ms, budget_ms
                )
            }
        }
    }
}

impl std::error::Error for WafError {}

impl WafError {
    /// Whether the pipeline should let the request continue (skipping the
    /// failed component) rather than deny it outright.
    pub fn fails_open(&self) -> bool {
        !matches!(self, WafError::Verification { .. })
    }

    pub fn decision(component: impl Into<String>, detail: impl Into<String>) -> Self {
        WafError::Decision {
            component: component.into(),
            detail: detail.into(),
        }
    }

    pub fn verification(reason: impl Into<String>) -> Self {
        WafError::Verification {
            reason: reason.into(),
        }
    }

    pub fn persistence(detail: impl Into<String>) -> Self {
        WafError::Persistence {
            detail: detail.into(),
        }
    }

    pub fn input(detail: impl Into<String>) -> Self {
        WafError::Input {
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_errors_fail_open() {
        let err = WafError::decision("reputation", "kv timeout");
        assert!(err.fails_open());
        assert!(err.to_string().contains("reputation"));
    }

    #[test]
    fn verification_errors_fail_closed() {
        let err = WafError::verification("replayed token");
        assert!(!err.fails_open());
    }

    #[test]
    fn persistence_errors_do_not_block_the_decision() {
        let err = WafError::persistence("connection reset");
        assert!(err.fails_open());
        assert!(err.to_string().contains("record store"));
    }

    #[test]
    fn budget_overruns_fail_open() {
        let err = WafError::BudgetExceeded {
            elapsed_ms: 80,
            budget_ms: 50,
        };
        assert!(err.fails_open());
        assert!(err.to_string().contains("80ms"));
    }
}
