//! Control loops for the token-cleaner control plane.

pub mod cache;
pub mod expiry;
pub mod tokencleaner;
