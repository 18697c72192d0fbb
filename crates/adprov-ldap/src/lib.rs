//! Pooled, circuit-protected LDAP client for directory account provisioning.
//!
//! This crate checks whether logins exist, reads account profiles, provisions new accounts
//! and suggests free logins against an Active Directory style server. Every call goes through
//! a [`CircuitBreaker`], borrows a session from a bounded [`ConnectionPool`] and is memoized
//! in a [`ResultCache`]. [`DirectoryClient`] ties those together.

#![deny(missing_docs)]

mod account;
mod breaker;
mod cache;
mod client;
mod config;
mod dn;
mod filter;
mod operations;
mod pool;
mod session;

pub use account::{
    encode_unicode_password, is_reserved_login, parse_directory_timestamp, validate_login,
    AccountCreationRequest, AccountRecord, MAX_LOGIN_LENGTH, RESERVED_LOGINS,
};
pub use breaker::{CircuitBreaker, CircuitState};
pub use cache::{CacheKey, CacheKind, CacheStats, CachedValue, ResultCache};
pub use client::DirectoryClient;
pub use config::{
    DirectoryConfig, DEFAULT_BIND_TIMEOUT_SECS, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_SEARCH_SIZE_LIMIT,
};
pub use dn::{DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use filter::{login_filter, sanitize};
pub use operations::{suggestion_base, DirectoryOperations, SUGGESTION_ATTEMPTS};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use session::{
    LdapConnector, LdapEntry, LdapSession, NewEntry, RealLdapConnector, SearchScope,
    RC_ENTRY_ALREADY_EXISTS, RC_INVALID_CREDENTIALS,
};

/// Convenient result alias that reuses the core error type.
pub type Result<T> = adprov_core::Result<T>;
