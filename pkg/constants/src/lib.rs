//! Centralized constants for the token-cleaner project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod paths;
pub mod state;
pub mod tokens;
