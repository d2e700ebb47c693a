//! Common configuration and helper types shared across the data lake harness crates.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for service configuration fragments and launch environment rendering
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;
