#![forbid(unsafe_code)]

pub mod common;
pub mod forward;
pub mod peer;
pub mod status;
pub mod tunnel;
