// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::provider::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("Invalid specification: {0}")]
    InvalidSpec(String),

    #[error("Provider context not found: {0}")]
    ContextNotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OperatorError {
    /// The referenced resource does not exist (or is redacted)
    pub fn is_not_found(&self) -> bool {
        match self {
            OperatorError::Provider(e) => e.is_not_found(),
            OperatorError::ContextNotFound(_) => true,
            OperatorError::KubeError(kube::Error::Api(err)) => err.code == 404,
            _ => false,
        }
    }

    /// Provider endpoints could not be resolved; a signal of provider-side overload
    pub fn is_unreachable(&self) -> bool {
        matches!(self, OperatorError::Provider(ProviderError::Unreachable(_)))
    }

    /// Only a spec edit can fix this, so retrying is pointless
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperatorError::InvalidSpec(_))
    }
}

pub type Result<T> = std::result::Result<T, OperatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_counts_as_not_found() {
        let err = OperatorError::from(ProviderError::Redacted("key-1".to_string()));
        assert!(err.is_not_found());
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_unreachable_is_not_terminal() {
        let err = OperatorError::from(ProviderError::Unreachable("dns error".to_string()));
        assert!(err.is_unreachable());
        assert!(!err.is_terminal());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_invalid_spec_is_terminal() {
        let err = OperatorError::InvalidSpec("both value and valueFrom set".to_string());
        assert!(err.is_terminal());
    }

    #[test]
    fn test_missing_context_is_not_found() {
        assert!(OperatorError::ContextNotFound("secret".to_string()).is_not_found());
    }
}
