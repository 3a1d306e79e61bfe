//! Application settings
//!
//! Typed configuration and the layered loader (embedded defaults, optional
//! files, `WARDEN_*` environment overrides).

pub mod config;
pub mod loader;

pub use config::AppConfig;
pub use loader::load_config;
