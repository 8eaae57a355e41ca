use thiserror::Error;

/// Error taxonomy shared by every layer.
///
/// `Validation`, `Exhausted` and `NotFound` are detected before any mutation
/// and carry operator-facing messages. `Backend` and `Timeout` come from
/// external processes or file operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("address pool exhausted: {0}")]
    Exhausted(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("operation timed out: {0}")]
    Timeout(String),
}

impl DomainError {
    /// True for failures the caller may retry as-is.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// True for errors raised before any state was touched.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Exhausted(_) | Self::NotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_retriable() {
        assert!(DomainError::Timeout("iptables".to_string()).is_retriable());
        assert!(!DomainError::Backend("exit 1".to_string()).is_retriable());
        assert!(!DomainError::Validation("bad port".to_string()).is_retriable());
    }

    #[test]
    fn user_correctable_classification() {
        assert!(DomainError::Validation("x".to_string()).is_user_correctable());
        assert!(DomainError::Exhausted("x".to_string()).is_user_correctable());
        assert!(DomainError::NotFound("x".to_string()).is_user_correctable());
        assert!(!DomainError::Backend("x".to_string()).is_user_correctable());
        assert!(!DomainError::Registry("x".to_string()).is_user_correctable());
    }

    #[test]
    fn display_prefixes() {
        let e = DomainError::NotFound("peer 3".to_string());
        assert_eq!(e.to_string(), "not found: peer 3");
    }
}
