//! Infrastructure layer.
//!
//! Adapters for external dependencies: configuration loading, logging
//! setup, the git VCS, agent process backends, and the review-request
//! service.

pub mod agents;
pub mod config;
pub mod logging;
pub mod review;
pub mod vcs;

pub use config::{Config, ConfigError, ConfigLoader};
