#![forbid(unsafe_code)]

pub mod reconciliation_service_impl;
pub mod retry;
pub mod status_probe;
pub mod system_report;
