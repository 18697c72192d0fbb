//! Directory client facade.

use crate::{
    account::{is_reserved_login, validate_login, AccountCreationRequest, AccountRecord},
    breaker::{CircuitBreaker, CircuitState},
    cache::{CacheKey, CacheStats, CachedValue, ResultCache},
    config::DirectoryConfig,
    operations::DirectoryOperations,
    pool::{ConnectionPool, PoolStatus, PooledConnection},
    session::{LdapConnector, RealLdapConnector},
    Result,
};
use adprov_core::{ClientId, Error, PasswordReport};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Entry point for handlers: cached, circuit-protected, pooled directory access.
///
/// Each instance owns its pool, breaker and cache; two clients never share state.
pub struct DirectoryClient {
    id: ClientId,
    config: Arc<DirectoryConfig>,
    pool: ConnectionPool,
    breaker: CircuitBreaker,
    cache: ResultCache,
    operations: DirectoryOperations,
}

impl DirectoryClient {
    /// Creates a client that talks to the configured directory through `ldap3`.
    #[must_use]
    pub fn new(config: DirectoryConfig) -> Self {
        let config = Arc::new(config);
        let connector: Arc<dyn LdapConnector> =
            Arc::new(RealLdapConnector::new(Arc::clone(&config)));
        Self::build(config, connector)
    }

    /// Creates a client with a custom session backend.
    #[must_use]
    pub fn with_connector(config: DirectoryConfig, connector: Arc<dyn LdapConnector>) -> Self {
        Self::build(Arc::new(config), connector)
    }

    fn build(config: Arc<DirectoryConfig>, connector: Arc<dyn LdapConnector>) -> Self {
        let id = ClientId::new_v4();
        info!(client_id = %id, url = config.url(), "directory client created");
        Self {
            id,
            pool: ConnectionPool::new(connector, *config.pool()),
            breaker: CircuitBreaker::new(*config.breaker()),
            cache: ResultCache::new(*config.cache()),
            operations: DirectoryOperations::new(Arc::clone(&config)),
            config,
        }
    }

    /// Identifier used to correlate this client's log lines.
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Returns true when an account with `login` exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank or overlong login, a gate error
    /// ([`Error::CircuitOpen`], [`Error::PoolExhausted`], [`Error::PoolClosed`]) or a directory
    /// error.
    #[instrument(skip(self), fields(client_id = %self.id))]
    pub async fn exists(&self, login: &str) -> Result<bool> {
        validate_login(login)?;
        let key = CacheKey::exists(login);
        if let Some(CachedValue::Exists(found)) = self.cache.get(&key) {
            return Ok(found);
        }
        let generation = self.cache.generation();

        let found = self
            .breaker
            .call(|| async {
                let mut conn = self.pool.acquire().await?;
                let outcome = self.operations.exists(&mut *conn, login).await;
                discard_on_failure(&mut conn, outcome)
            })
            .await?;

        self.cache.store_if_current(key, CachedValue::Exists(found), generation);
        Ok(found)
    }

    /// Returns the profile of `login`, or `None` when there is no such account.
    ///
    /// # Errors
    ///
    /// Same as [`DirectoryClient::exists`].
    #[instrument(skip(self), fields(client_id = %self.id))]
    pub async fn get_profile(&self, login: &str) -> Result<Option<AccountRecord>> {
        validate_login(login)?;
        let key = CacheKey::profile(login);
        if let Some(CachedValue::Profile(profile)) = self.cache.get(&key) {
            return Ok(profile);
        }
        let generation = self.cache.generation();

        let profile = self
            .breaker
            .call(|| async {
                let mut conn = self.pool.acquire().await?;
                let outcome = self.operations.get_profile(&mut *conn, login).await;
                discard_on_failure(&mut conn, outcome)
            })
            .await?;

        self.cache.store_if_current(key, CachedValue::Profile(profile.clone()), generation);
        Ok(profile)
    }

    /// Provisions a new account.
    ///
    /// The request is checked before any directory round trip: shape, reserved logins, the
    /// password policy, and that the password does not contain the person's names or login.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a check fails, [`Error::AlreadyExists`] when the
    /// login is taken, [`Error::CreationFailed`] when the directory rejects the entry, or a gate
    /// or directory error.
    #[instrument(skip(self, request), fields(client_id = %self.id, login = %request.login))]
    pub async fn create(&self, request: &AccountCreationRequest) -> Result<AccountRecord> {
        validate_login(&request.login)?;
        request.validate()?;
        if is_reserved_login(&request.login) {
            return Err(Error::InvalidInput(format!(
                "login `{}` is reserved",
                request.login
            )));
        }
        self.config
            .password_policy()
            .enforce(request.password.expose_secret())?;
        request.check_password_personal_data()?;

        let outcome = self
            .breaker
            .call(|| async {
                let mut conn = self.pool.acquire().await?;
                let outcome = self.operations.create(&mut *conn, request).await;
                discard_on_failure(&mut conn, outcome)
            })
            .await;

        if matches!(outcome, Ok(_) | Err(Error::AlreadyExists(_))) {
            self.cache.invalidate_subject(&request.login);
            self.cache.invalidate_suggestions_of(&request.login);
        }
        outcome
    }

    /// Suggests the first free login derived from `first.last`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for blank names, [`Error::SuggestionExhausted`] when every
    /// candidate is taken, or a gate or directory error.
    #[instrument(skip(self), fields(client_id = %self.id))]
    pub async fn suggest_name(&self, first_name: &str, last_name: &str) -> Result<String> {
        if first_name.trim().is_empty() || last_name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "first and last name are required".to_string(),
            ));
        }
        let key = CacheKey::suggestion(first_name, last_name);
        if let Some(CachedValue::Suggestion(login)) = self.cache.get(&key) {
            return Ok(login);
        }
        let generation = self.cache.generation();

        let suggestion = self
            .breaker
            .call(|| async {
                let mut conn = self.pool.acquire().await?;
                let outcome = self
                    .operations
                    .suggest_name(&mut *conn, first_name, last_name)
                    .await;
                discard_on_failure(&mut conn, outcome)
            })
            .await?;

        self.cache
            .store_if_current(key, CachedValue::Suggestion(suggestion.clone()), generation);
        Ok(suggestion)
    }

    /// Binds on a freshly opened connection; true when the directory accepted the bind.
    #[instrument(skip(self), fields(client_id = %self.id))]
    pub async fn test_connection(&self) -> bool {
        let outcome = self
            .breaker
            .call(|| async {
                let mut conn = self.pool.acquire_fresh().await?;
                let outcome = self.operations.test_connection(&mut *conn).await;
                discard_on_failure(&mut conn, outcome)
            })
            .await;

        match outcome {
            Ok(()) => {
                info!("directory connection test succeeded");
                true
            }
            Err(err) => {
                warn!(error = %err, "directory connection test failed");
                false
            }
        }
    }

    /// Checks a password against the configured policy without touching the directory.
    #[must_use]
    pub fn validate_password(&self, password: &str) -> PasswordReport {
        self.config.password_policy().evaluate(password)
    }

    /// Closes every idle connection, closes the breaker and empties the cache.
    ///
    /// Also reopens a client after [`DirectoryClient::shutdown`]. Calls already in flight finish
    /// on their connections, which are destroyed on release and hold their pool slots until then.
    #[instrument(skip(self), fields(client_id = %self.id))]
    pub async fn force_reset(&self) {
        warn!("forcing directory client reset");
        self.pool.reset().await;
        self.breaker.reset();
        self.cache.clear();
    }

    /// Closes the pool; every later directory call fails with [`Error::PoolClosed`].
    #[instrument(skip(self), fields(client_id = %self.id))]
    pub async fn shutdown(&self) {
        info!("shutting down directory client");
        self.pool.destroy_all().await;
    }

    /// Pool occupancy snapshot.
    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Current breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Cache hit/miss counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("id", &self.id)
            .field("url", &self.config.url())
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

/// Marks the connection broken when the error says the session can no longer be trusted.
fn discard_on_failure<T>(conn: &mut PooledConnection, outcome: Result<T>) -> Result<T> {
    if let Err(err) = &outcome {
        if err.poisons_connection() {
            warn!(connection_id = %conn.id(), error = %err, "discarding directory connection");
            conn.mark_broken();
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_config;
    use crate::session::{LdapEntry, LdapSession, MockLdapConnector, MockLdapSession};
    use adprov_core::BreakerConfig;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Session backed by a single shared "john.doe exists" flag.
    fn directory_session(created: Arc<AtomicBool>) -> Box<dyn LdapSession> {
        let mut session = MockLdapSession::new();
        session.expect_simple_bind().returning(|_, _| Ok(()));
        session.expect_deauthenticate().returning(|| Ok(()));
        session.expect_is_alive().return_const(true);
        let searched = Arc::clone(&created);
        session.expect_search().returning(move |_, _, filter, _| {
            if searched.load(Ordering::SeqCst) && filter == "(sAMAccountName=john.doe)" {
                Ok(vec![LdapEntry::new("CN=John Doe,OU=Users,DC=corp,DC=example,DC=com")
                    .with_attribute("sAMAccountName", "john.doe")])
            } else {
                Ok(Vec::new())
            }
        });
        session.expect_add().returning(move |_| {
            created.store(true, Ordering::SeqCst);
            Ok(())
        });
        Box::new(session)
    }

    fn client_with_directory() -> (DirectoryClient, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicBool::new(false));
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connects);
        let mut connector = MockLdapConnector::new();
        connector.expect_connect().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(directory_session(Arc::clone(&created)))
        });
        (
            DirectoryClient::with_connector(sample_config(), Arc::new(connector)),
            connects,
        )
    }

    fn unreachable_connector() -> Arc<dyn LdapConnector> {
        let mut connector = MockLdapConnector::new();
        connector.expect_connect().never();
        Arc::new(connector)
    }

    #[tokio::test]
    async fn exists_is_cached() {
        let (client, connects) = client_with_directory();
        assert!(!client.exists("john.doe").await.unwrap());
        assert!(!client.exists("John.Doe").await.unwrap());

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        let stats = client.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn create_invalidates_cached_lookups() {
        let (client, _) = client_with_directory();
        assert!(!client.exists("john.doe").await.unwrap());
        assert_eq!(client.get_profile("john.doe").await.unwrap(), None);
        assert_eq!(client.suggest_name("John", "Doe").await.unwrap(), "john.doe");

        let request = AccountCreationRequest::new("John", "Doe", "john.doe", "Xy7#kLmq");
        let record = client.create(&request).await.unwrap();
        assert_eq!(
            record.distinguished_name,
            "CN=John Doe,OU=Users,DC=corp,DC=example,DC=com"
        );

        assert!(client.exists("john.doe").await.unwrap());
        assert!(client.get_profile("john.doe").await.unwrap().is_some());
        assert_eq!(client.suggest_name("John", "Doe").await.unwrap(), "john.doe1");
    }

    #[tokio::test]
    async fn input_checks_run_before_the_directory() {
        let client = DirectoryClient::with_connector(sample_config(), unreachable_connector());

        assert!(matches!(client.exists("  ").await, Err(Error::InvalidInput(_))));
        assert!(matches!(
            client.get_profile(&"x".repeat(51)).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            client.suggest_name("", "Doe").await,
            Err(Error::InvalidInput(_))
        ));

        let rejected = [
            AccountCreationRequest::new("John", "Doe", "admin", "Xy7#kLmq"),
            AccountCreationRequest::new("John", "Doe", "john.doe", "weak"),
            AccountCreationRequest::new("John", "Doe", "john.doe", "John#2024x"),
            AccountCreationRequest::new("John", "Doe", "..john", "Xy7#kLmq"),
        ];
        for request in &rejected {
            assert!(matches!(
                client.create(request).await,
                Err(Error::InvalidInput(_))
            ));
        }
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn breaker_opens_on_unreachable_directory() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut connector = MockLdapConnector::new();
        connector.expect_connect().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::ConnectionUnavailable("connection refused".to_string()))
        });
        let config = sample_config()
            .with_breaker(BreakerConfig::new().with_failure_threshold(2))
            .unwrap();
        let client = DirectoryClient::with_connector(config, Arc::new(connector));

        for _ in 0..2 {
            assert!(matches!(
                client.exists("jdoe").await,
                Err(Error::ConnectionUnavailable(_))
            ));
        }
        assert_eq!(client.circuit_state(), CircuitState::Open);
        assert!(matches!(
            client.exists("jdoe").await,
            Err(Error::CircuitOpen { .. })
        ));
        assert!(!client.test_connection().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        client.force_reset().await;
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn failed_operation_discards_connection() {
        let mut connector = MockLdapConnector::new();
        connector.expect_connect().returning(|| {
            let mut session = MockLdapSession::new();
            session.expect_simple_bind().returning(|_, _| Ok(()));
            session.expect_deauthenticate().returning(|| Ok(()));
            session.expect_is_alive().return_const(true);
            session
                .expect_search()
                .returning(|_, _, _, _| Err(Error::Timeout("search".to_string())));
            Ok(Box::new(session))
        });
        let client = DirectoryClient::with_connector(sample_config(), Arc::new(connector));

        assert!(matches!(
            client.exists("jdoe").await,
            Err(Error::Timeout(_))
        ));
        let status = client.pool_status();
        assert_eq!(status.idle, 0);
        assert_eq!(status.outstanding, 0);
    }

    #[tokio::test]
    async fn healthy_connection_is_parked() {
        let (client, connects) = client_with_directory();
        client.exists("a.one").await.unwrap();
        client.exists("b.two").await.unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(client.pool_status().idle, 1);
    }

    #[tokio::test]
    async fn test_connection_reports_bind_outcome() {
        let (client, _) = client_with_directory();
        assert!(client.test_connection().await);

        let mut connector = MockLdapConnector::new();
        connector.expect_connect().returning(|| {
            let mut session = MockLdapSession::new();
            session
                .expect_simple_bind()
                .returning(|_, _| Err(Error::AuthenticationFailed("rc 49".to_string())));
            session.expect_deauthenticate().returning(|| Ok(()));
            session.expect_is_alive().return_const(true);
            Ok(Box::new(session))
        });
        let failing = DirectoryClient::with_connector(sample_config(), Arc::new(connector));
        assert!(!failing.test_connection().await);
    }

    #[tokio::test]
    async fn shutdown_closes_pool_and_reset_reopens() {
        let (client, _) = client_with_directory();
        client.shutdown().await;
        assert_eq!(client.exists("jdoe").await, Err(Error::PoolClosed));
        assert_eq!(client.circuit_state(), CircuitState::Closed);

        client.force_reset().await;
        assert!(!client.exists("jdoe").await.unwrap());
    }

    #[test]
    fn password_report() {
        let client = DirectoryClient::with_connector(sample_config(), unreachable_connector());
        let report = client.validate_password("abc");
        assert!(!report.valid);
        assert!(!report.requirements.min_length);
        assert!(client.validate_password("Xy7#kLmq").valid);
    }
}
