// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Failure taxonomy for the forwarding/ingestion/diagnostic pipeline.
///
/// `Parse` is record-scoped and never escalates to a batch failure. The
/// batch-scoped variants map onto how a caller should react: retry
/// (`Retryable`), fix configuration (`Misconfigured`), or investigate an
/// unreachable probe target (`Unreachable`).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("malformed record: {0}")]
    Parse(String),

    #[error("transient failure: {0}")]
    Retryable(String),

    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("diagnostic run cancelled")]
    Cancelled,
}

impl RelayError {
    /// True when the caller may safely retry the whole batch. Idempotent
    /// deduplication in the processor makes redelivery safe.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Retryable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RelayError::Misconfigured("subscription missing".to_string());
        assert_eq!(error.to_string(), "misconfigured: subscription missing");
    }

    #[test]
    fn test_is_retryable() {
        assert!(RelayError::Retryable("timeout".into()).is_retryable());
        assert!(!RelayError::Parse("bad json".into()).is_retryable());
        assert!(!RelayError::Misconfigured("bad target".into()).is_retryable());
        assert!(!RelayError::Unreachable("probe failed".into()).is_retryable());
        assert!(!RelayError::Cancelled.is_retryable());
    }

    #[test]
    fn test_all_error_variants() {
        // Ensure all variants can be constructed
        let _e1 = RelayError::Parse("test".into());
        let _e2 = RelayError::Retryable("test".into());
        let _e3 = RelayError::Misconfigured("test".into());
        let _e4 = RelayError::Unreachable("test".into());
        let _e5 = RelayError::Cancelled;
    }
}
