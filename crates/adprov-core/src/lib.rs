//! # adprov-core
//!
//! Core types shared by the directory account-provisioning client.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy, stable error codes and HTTP status mapping
//! - [`config`] - Pool, cache, circuit-breaker and password-policy tuning
//! - [`credentials`] - Service-account bind credentials
//! - [`ids`] - Strongly-typed identifiers for log correlation

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod ids;

// Re-export commonly used types
pub use config::{BreakerConfig, CacheConfig, PasswordPolicy, PasswordReport, PoolConfig};
pub use credentials::BindCredentials;
pub use error::{Error, FailureClass, Result};
pub use ids::{ClientId, ConnectionId};
