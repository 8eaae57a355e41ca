use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("invalid peer name: {reason}")]
    InvalidName { reason: String },

    #[error("peer name \"{name}\" already exists")]
    DuplicateName { name: String },

    #[error("tunnel address {address} is already assigned")]
    DuplicateAddress { address: String },

    #[error("public key is already registered to another peer")]
    DuplicateKey,

    #[error("peer not found: {reference}")]
    NotFound { reference: String },
}

impl From<PeerError> for DomainError {
    fn from(e: PeerError) -> Self {
        match e {
            PeerError::NotFound { .. } => DomainError::NotFound(e.to_string()),
            other => DomainError::Validation(other.to_string()),
        }
    }
}
