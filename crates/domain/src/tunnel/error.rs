use std::net::Ipv4Addr;

use thiserror::Error;

use crate::common::error::DomainError;

#[derive(Debug, Error)]
pub enum AllocatorError {
    #[error("no free address left in {subnet}")]
    Exhausted { subnet: String },

    #[error("invalid subnet: {0}")]
    InvalidSubnet(String),

    #[error("{address} is not a host address of {subnet}")]
    NotInSubnet { address: Ipv4Addr, subnet: String },

    #[error("server address {address} is not a host address of {subnet}")]
    ServerOutsideSubnet { address: Ipv4Addr, subnet: String },
}

impl From<AllocatorError> for DomainError {
    fn from(e: AllocatorError) -> Self {
        match e {
            AllocatorError::Exhausted { .. } => Self::Exhausted(e.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}
