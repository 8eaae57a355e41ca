use thiserror::Error;

use crate::common::entity::Protocol;
use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("public port {port} must be between {min} and {max}")]
    PublicPortOutOfRange { port: u16, min: u16, max: u16 },

    #[error("target port {port} must be between 1 and 65535")]
    TargetPortOutOfRange { port: u16 },

    #[error("port {port} ({protocol}) is already in use")]
    PortInUse { port: u16, protocol: Protocol },

    #[error("port forward not found: {id}")]
    NotFound { id: String },
}

impl From<ForwardError> for DomainError {
    fn from(e: ForwardError) -> Self {
        match e {
            ForwardError::NotFound { .. } => DomainError::NotFound(e.to_string()),
            other => DomainError::Validation(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_in_use_message_names_protocol() {
        let e = ForwardError::PortInUse {
            port: 8022,
            protocol: Protocol::Udp,
        };
        assert_eq!(e.to_string(), "port 8022 (udp) is already in use");
        assert!(matches!(DomainError::from(e), DomainError::Validation(_)));
    }

    #[test]
    fn not_found_maps_to_not_found() {
        let e: DomainError = ForwardError::NotFound {
            id: "4".to_string(),
        }
        .into();
        assert!(matches!(e, DomainError::NotFound(_)));
    }
}
