//! Result type alias for nori operations

use crate::error::NoriError;

/// Standard Result type for nori operations
pub type Result<T> = std::result::Result<T, NoriError>;
