//! Configuration for nori builds
//!
//! Project metadata is read from `nori-config.yaml` (see [`NoriConfig`]) and may
//! be adjusted with `key:value` overrides before a build starts.

pub mod nori_config;

pub use nori_config::{CONFIG_FILE_NAME, ConfigError, NoriConfig, OVERRIDABLE_KEYS};
