//! Shared utilities for convoy.
//!
//! This crate provides common utilities used across the convoy workspace:
//! - Error handling patterns
//! - ULID-based identifier generation
//! - Logging setup with tracing
//! - Terminal output sanitization

pub mod error;
pub mod id;
pub mod log;
pub mod sanitizer;

pub use error::{Error, Result};
pub use id::{IdPrefix, Identifier};
pub use sanitizer::sanitize;
