pub mod wg_config_file;
pub mod wg_daemon;
pub mod wg_keys;
