//! Configuration for the directory client.

use crate::{dn::DistinguishedName, Result};
use adprov_core::{
    BindCredentials, BreakerConfig, CacheConfig, Error, PasswordPolicy, PoolConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;
/// Default bind timeout (seconds).
pub const DEFAULT_BIND_TIMEOUT_SECS: u64 = 15;
/// Default search/add timeout (seconds).
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;
/// Default server-side search size limit.
pub const DEFAULT_SEARCH_SIZE_LIMIT: i32 = 1000;

/// Configuration for connecting to the directory and provisioning accounts.
#[derive(Debug)]
pub struct DirectoryConfig {
    url: String,
    credentials: BindCredentials,
    domain: String,
    base_dn: DistinguishedName,
    users_ou: DistinguishedName,
    login_filter_template: String,
    tls_verify: bool,
    tls_ca_cert: Option<PathBuf>,
    connection_timeout_secs: u64,
    bind_timeout_secs: u64,
    operation_timeout_secs: u64,
    search_size_limit: i32,
    pool: PoolConfig,
    cache: CacheConfig,
    breaker: BreakerConfig,
    password_policy: PasswordPolicy,
}

impl DirectoryConfig {
    /// Creates a new directory configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an `ldap://` or `ldaps://` URL, if the domain is empty,
    /// or if the users OU is not inside the base DN.
    pub fn new(
        url: impl Into<String>,
        credentials: BindCredentials,
        domain: impl Into<String>,
        base_dn: DistinguishedName,
        users_ou: DistinguishedName,
    ) -> Result<Self> {
        let url_string = url.into();
        let parsed = Url::parse(&url_string)?;
        if !matches!(parsed.scheme(), "ldap" | "ldaps") {
            return Err(Error::ConfigError(format!(
                "unsupported directory URL scheme `{}`",
                parsed.scheme()
            )));
        }

        let domain = domain.into();
        if domain.trim().is_empty() {
            return Err(Error::ConfigError("directory domain cannot be empty".to_string()));
        }

        if !users_ou.is_within(&base_dn) {
            return Err(Error::ConfigError(format!(
                "users OU `{users_ou}` is outside base DN `{base_dn}`"
            )));
        }

        Ok(Self {
            url: url_string,
            credentials,
            domain,
            base_dn,
            users_ou,
            login_filter_template: "(sAMAccountName={login})".to_string(),
            tls_verify: true,
            tls_ca_cert: None,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            bind_timeout_secs: DEFAULT_BIND_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            search_size_limit: DEFAULT_SEARCH_SIZE_LIMIT,
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            breaker: BreakerConfig::default(),
            password_policy: PasswordPolicy::default(),
        })
    }

    /// Returns the directory endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns true when the endpoint uses `ldaps://`.
    #[must_use]
    pub fn uses_tls(&self) -> bool {
        self.url.starts_with("ldaps://")
    }

    /// Returns the service-account credentials.
    #[must_use]
    pub const fn credentials(&self) -> &BindCredentials {
        &self.credentials
    }

    /// Returns the directory domain used for principal names and email addresses.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Returns the search root.
    #[must_use]
    pub const fn base_dn(&self) -> &DistinguishedName {
        &self.base_dn
    }

    /// Returns the organizational unit new accounts are created under.
    #[must_use]
    pub const fn users_ou(&self) -> &DistinguishedName {
        &self.users_ou
    }

    /// Returns the filter template used for login lookups.
    #[must_use]
    pub fn login_filter_template(&self) -> &str {
        &self.login_filter_template
    }

    /// Returns whether TLS certificate verification is enabled.
    #[must_use]
    pub const fn tls_verify(&self) -> bool {
        self.tls_verify
    }

    /// Optional custom CA certificate path.
    #[must_use]
    pub fn tls_ca_cert(&self) -> Option<&PathBuf> {
        self.tls_ca_cert.as_ref()
    }

    /// Returns the connection timeout duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Returns the bind timeout duration.
    #[must_use]
    pub const fn bind_timeout(&self) -> Duration {
        Duration::from_secs(self.bind_timeout_secs)
    }

    /// Returns the search/add timeout duration.
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Returns the server-side search size limit.
    #[must_use]
    pub const fn search_size_limit(&self) -> i32 {
        self.search_size_limit
    }

    /// Returns the pool bounds.
    #[must_use]
    pub const fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    /// Returns the cache lifetimes.
    #[must_use]
    pub const fn cache(&self) -> &CacheConfig {
        &self.cache
    }

    /// Returns the breaker thresholds.
    #[must_use]
    pub const fn breaker(&self) -> &BreakerConfig {
        &self.breaker
    }

    /// Returns the password policy.
    #[must_use]
    pub const fn password_policy(&self) -> &PasswordPolicy {
        &self.password_policy
    }

    /// Overrides the login lookup filter template.
    ///
    /// The string should contain `{login}` where the sanitized login will be substituted.
    #[must_use]
    pub fn with_login_filter_template(mut self, template: impl Into<String>) -> Self {
        self.login_filter_template = template.into();
        self
    }

    /// Enables or disables TLS certificate verification.
    #[must_use]
    pub const fn with_tls_verification(mut self, verify: bool) -> Self {
        self.tls_verify = verify;
        self
    }

    /// Sets the custom CA certificate path for TLS verification.
    #[must_use]
    pub fn with_tls_ca_cert(mut self, path: PathBuf) -> Self {
        self.tls_ca_cert = Some(path);
        self
    }

    /// Overrides the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Overrides the bind timeout in seconds.
    #[must_use]
    pub const fn with_bind_timeout_secs(mut self, seconds: u64) -> Self {
        self.bind_timeout_secs = seconds;
        self
    }

    /// Overrides the search/add timeout in seconds.
    #[must_use]
    pub const fn with_operation_timeout_secs(mut self, seconds: u64) -> Self {
        self.operation_timeout_secs = seconds;
        self
    }

    /// Overrides the server-side search size limit.
    #[must_use]
    pub const fn with_search_size_limit(mut self, limit: i32) -> Self {
        self.search_size_limit = limit;
        self
    }

    /// Replaces the pool bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if the bounds fail validation.
    pub fn with_pool(mut self, pool: PoolConfig) -> Result<Self> {
        pool.validate()
            .map_err(|e| Error::ConfigError(format!("invalid pool configuration: {e}")))?;
        self.pool = pool;
        Ok(self)
    }

    /// Replaces the cache lifetimes.
    ///
    /// # Errors
    ///
    /// Returns an error if the lifetimes fail validation.
    pub fn with_cache(mut self, cache: CacheConfig) -> Result<Self> {
        cache
            .validate()
            .map_err(|e| Error::ConfigError(format!("invalid cache configuration: {e}")))?;
        self.cache = cache;
        Ok(self)
    }

    /// Replaces the breaker thresholds.
    ///
    /// # Errors
    ///
    /// Returns an error if the thresholds fail validation.
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Result<Self> {
        breaker
            .validate()
            .map_err(|e| Error::ConfigError(format!("invalid breaker configuration: {e}")))?;
        self.breaker = breaker;
        Ok(self)
    }

    /// Replaces the password policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy fails validation.
    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Result<Self> {
        policy
            .validate()
            .map_err(|e| Error::ConfigError(format!("invalid password policy: {e}")))?;
        self.password_policy = policy;
        Ok(self)
    }
}
