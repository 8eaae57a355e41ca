// Tunnel address pool and configuration-file text surgery
pub mod allocator;
pub mod client_config;
pub mod error;
pub mod peer_block;
