//! Shared data types for the token-cleaner control plane.

pub mod config;
pub mod secret;
