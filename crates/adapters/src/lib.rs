#![deny(unsafe_code)]

pub mod firewall;
pub mod fs_util;
pub mod storage;
pub mod system;
pub mod tunnel;
