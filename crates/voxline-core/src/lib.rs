//! Shared types for Voxline — configuration, errors, audio parameters.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{Result, VoxlineError};
