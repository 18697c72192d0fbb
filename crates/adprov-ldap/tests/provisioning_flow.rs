//! End-to-end tests for the directory client against an in-memory directory.
//!
//! The fake directory implements the public session traits, so these tests exercise the
//! client exactly as a handler would: validation, cache, breaker, pool and operations.

use adprov_core::{BindCredentials, BreakerConfig, Error, PoolConfig};
use adprov_ldap::{
    encode_unicode_password, AccountCreationRequest, CircuitState, DirectoryClient,
    DirectoryConfig, DistinguishedName, LdapConnector, LdapEntry, LdapSession, NewEntry,
    SearchScope,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const SERVICE_PASSWORD: &str = "secret";

#[derive(Default)]
struct DirectoryState {
    accounts: HashMap<String, LdapEntry>,
    added: Vec<NewEntry>,
    connects: usize,
    searches: usize,
    stall_searches: bool,
    /// The next search reads the directory, then waits for this signal before answering.
    held_search: Option<Arc<Notify>>,
    refuse_connections: bool,
}

/// Shared in-memory directory; every session sees the same accounts.
#[derive(Clone, Default)]
struct FakeDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

impl FakeDirectory {
    fn with_accounts(logins: &[&str]) -> Self {
        let directory = Self::default();
        {
            let mut state = directory.state.lock().unwrap();
            for login in logins {
                state.accounts.insert(
                    login.to_lowercase(),
                    LdapEntry::new(format!("CN={login},OU=Users,DC=corp,DC=example,DC=com"))
                        .with_attribute("sAMAccountName", *login),
                );
            }
        }
        directory
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl LdapConnector for FakeDirectory {
    async fn connect(&self) -> adprov_ldap::Result<Box<dyn LdapSession>> {
        let mut state = self.state();
        if state.refuse_connections {
            return Err(Error::ConnectionUnavailable("connection refused".to_string()));
        }
        state.connects += 1;
        Ok(Box::new(FakeSession {
            directory: self.clone(),
            bound: false,
        }))
    }
}

struct FakeSession {
    directory: FakeDirectory,
    bound: bool,
}

#[async_trait]
impl LdapSession for FakeSession {
    async fn simple_bind(&mut self, _dn: &str, password: &str) -> adprov_ldap::Result<()> {
        if password != SERVICE_PASSWORD {
            return Err(Error::AuthenticationFailed("invalid credentials".to_string()));
        }
        self.bound = true;
        Ok(())
    }

    async fn search(
        &mut self,
        _base_dn: &str,
        scope: SearchScope,
        filter: &str,
        _attributes: &[&'static str],
    ) -> adprov_ldap::Result<Vec<LdapEntry>> {
        assert!(self.bound, "search on an unauthenticated session");
        assert_eq!(scope, SearchScope::Subtree);
        let login = filter
            .strip_prefix("(sAMAccountName=")
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or_default()
            .to_lowercase();
        let (found, stall, held) = {
            let mut state = self.directory.state();
            state.searches += 1;
            (
                state.accounts.get(&login).cloned(),
                state.stall_searches,
                state.held_search.take(),
            )
        };
        if stall {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if let Some(release) = held {
            release.notified().await;
        }
        Ok(found.into_iter().collect())
    }

    async fn add(&mut self, entry: &NewEntry) -> adprov_ldap::Result<()> {
        assert!(self.bound, "add on an unauthenticated session");
        let login = entry
            .text_values("sAMAccountName")
            .first()
            .map(|login| login.to_lowercase())
            .unwrap_or_default();
        let mut state = self.directory.state();
        if state.accounts.contains_key(&login) {
            return Err(Error::AlreadyExists(entry.dn.clone()));
        }

        let mut stored = LdapEntry::new(entry.dn.clone())
            .with_attribute("whenCreated", "20240115103000.0Z");
        for attribute in ["sAMAccountName", "displayName", "mail", "userPrincipalName"] {
            for value in entry.text_values(attribute) {
                stored = stored.with_attribute(attribute, value);
            }
        }
        state.accounts.insert(login, stored);
        state.added.push(entry.clone());
        Ok(())
    }

    async fn deauthenticate(&mut self) -> adprov_ldap::Result<()> {
        self.bound = false;
        Ok(())
    }

    async fn close(&mut self) -> adprov_ldap::Result<()> {
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        true
    }
}

fn config() -> DirectoryConfig {
    DirectoryConfig::new(
        "ldaps://dc01.corp.example.com",
        BindCredentials::for_principal("svc-provision", "corp.example.com", SERVICE_PASSWORD),
        "corp.example.com",
        DistinguishedName::parse("DC=corp,DC=example,DC=com").unwrap(),
        DistinguishedName::parse("OU=Users,DC=corp,DC=example,DC=com").unwrap(),
    )
    .unwrap()
}

fn config_with_threshold(threshold: u32) -> DirectoryConfig {
    config()
        .with_breaker(BreakerConfig::new().with_failure_threshold(threshold))
        .unwrap()
}

fn client(directory: &FakeDirectory) -> DirectoryClient {
    DirectoryClient::with_connector(config(), Arc::new(directory.clone()))
}

/// Load a request fixture from disk.
fn load_request_fixture(name: &str) -> AccountCreationRequest {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    let json = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture at {}: {}", path.display(), e));
    serde_json::from_str(&json).unwrap_or_else(|e| panic!("Failed to parse {name}: {e}"))
}

#[tokio::test]
async fn test_create_account_from_request_payload() {
    let directory = FakeDirectory::default();
    let client = client(&directory);
    let request = load_request_fixture("create_request.json");

    let record = client.create(&request).await.unwrap();

    assert_eq!(record.login, "jeanluc.obrien");
    assert_eq!(record.display_name, "Jean-Luc O'Brien");
    assert_eq!(record.email, "jeanluc.obrien@corp.example.com");
    assert_eq!(
        record.distinguished_name,
        "CN=Jean-Luc O'Brien,OU=Users,DC=corp,DC=example,DC=com"
    );

    let state = directory.state();
    let added = &state.added[0];
    assert_eq!(
        added.text_values("userPrincipalName"),
        ["jeanluc.obrien@corp.example.com"]
    );
    assert_eq!(added.text_values("userAccountControl"), ["512"]);
    assert_eq!(
        added.raw_values("unicodePwd"),
        Some([encode_unicode_password("Starfleet#1701")].as_slice())
    );
}

#[tokio::test]
async fn test_create_existing_login_is_rejected_without_add() {
    let directory = FakeDirectory::with_accounts(&["john.doe"]);
    let client = client(&directory);
    let request = AccountCreationRequest::new("John", "Doe", "john.doe", "Xy7#kLmq");

    let err = client.create(&request).await.unwrap_err();

    assert!(matches!(err, Error::AlreadyExists(_)));
    assert_eq!(err.status_code(), 409);
    assert!(directory.state().added.is_empty());
}

#[tokio::test]
async fn test_repeated_duplicate_creates_open_breaker() {
    let directory = FakeDirectory::with_accounts(&["john.doe"]);
    let client = DirectoryClient::with_connector(
        config_with_threshold(2),
        Arc::new(directory.clone()),
    );
    let request = AccountCreationRequest::new("John", "Doe", "john.doe", "Xy7#kLmq");

    for _ in 0..2 {
        assert!(matches!(
            client.create(&request).await,
            Err(Error::AlreadyExists(_))
        ));
    }
    assert_eq!(client.circuit_state(), CircuitState::Open);
    assert!(matches!(
        client.create(&request).await,
        Err(Error::CircuitOpen { .. })
    ));

    // rejected before the gate, so never counted
    let invalid = DirectoryClient::with_connector(
        config_with_threshold(1),
        Arc::new(directory.clone()),
    );
    assert!(matches!(invalid.exists(" ").await, Err(Error::InvalidInput(_))));
    assert_eq!(invalid.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_suggestion_skips_taken_logins() {
    let directory = FakeDirectory::with_accounts(&["john.doe", "john.doe1"]);
    let client = client(&directory);

    assert_eq!(client.suggest_name(" John ", "DOE").await.unwrap(), "john.doe2");
}

#[tokio::test]
async fn test_created_account_is_visible_through_cached_lookups() {
    let directory = FakeDirectory::default();
    let client = client(&directory);

    assert!(!client.exists("jane.smith").await.unwrap());
    assert_eq!(client.get_profile("jane.smith").await.unwrap(), None);
    assert_eq!(
        client.suggest_name("Jane", "Smith").await.unwrap(),
        "jane.smith"
    );

    let request = AccountCreationRequest::new("Jane", "Smith", "jane.smith", "Pa55#word");
    client.create(&request).await.unwrap();

    assert!(client.exists("jane.smith").await.unwrap());
    let profile = client.get_profile("jane.smith").await.unwrap().unwrap();
    assert_eq!(profile.display_name, "Jane Smith");
    assert_eq!(profile.email, "jane.smith@corp.example.com");
    assert_eq!(
        client.suggest_name("Jane", "Smith").await.unwrap(),
        "jane.smith1"
    );
}

#[tokio::test]
async fn test_sessions_are_reused_across_calls() {
    let directory = FakeDirectory::with_accounts(&["john.doe"]);
    let client = client(&directory);

    for login in ["john.doe", "a.user", "b.user", "c.user"] {
        client.exists(login).await.unwrap();
    }

    assert_eq!(directory.state().connects, 1);
    let status = client.pool_status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.outstanding, 0);
}

#[tokio::test]
async fn test_shutdown_fails_later_calls() {
    let directory = FakeDirectory::default();
    let client = client(&directory);
    client.exists("john.doe").await.unwrap();

    client.shutdown().await;

    assert_eq!(client.exists("someone").await, Err(Error::PoolClosed));
    assert!(client.pool_status().closed);
}

#[tokio::test]
async fn test_lookup_in_flight_during_create_is_not_cached() {
    let directory = FakeDirectory::default();
    let release = Arc::new(Notify::new());
    directory.state().held_search = Some(Arc::clone(&release));
    let client = Arc::new(client(&directory));

    let lookup = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.exists("jane.smith").await }
    });
    while directory.state().searches == 0 {
        tokio::task::yield_now().await;
    }

    let request = AccountCreationRequest::new("Jane", "Smith", "jane.smith", "Pa55#word");
    client.create(&request).await.unwrap();
    release.notify_one();

    // the lookup read the directory before the account existed
    assert!(!lookup.await.unwrap().unwrap());
    assert!(client.exists("jane.smith").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_search_times_out_and_trips_breaker() {
    let directory = FakeDirectory::default();
    directory.state().stall_searches = true;
    let config = config()
        .with_breaker(BreakerConfig::new().with_failure_threshold(1).with_open_duration(30))
        .unwrap();
    let client = DirectoryClient::with_connector(config, Arc::new(directory.clone()));

    assert!(matches!(
        client.exists("john.doe").await,
        Err(Error::Timeout(_))
    ));
    assert_eq!(client.circuit_state(), CircuitState::Open);
    assert_eq!(client.pool_status().idle, 0);

    directory.state().stall_searches = false;
    assert!(matches!(
        client.exists("john.doe").await,
        Err(Error::CircuitOpen { .. })
    ));

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(!client.exists("john.doe").await.unwrap());
    assert_eq!(client.circuit_state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_pool_exhaustion_counts_toward_breaker() {
    let directory = FakeDirectory::default();
    directory.state().stall_searches = true;
    let config = config_with_threshold(1)
        .with_pool(PoolConfig::new().with_min_idle(1).with_max_connections(1))
        .unwrap();
    let client = Arc::new(DirectoryClient::with_connector(
        config,
        Arc::new(directory.clone()),
    ));

    let busy = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.exists("john.doe").await }
    });
    while directory.state().searches == 0 {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        client.exists("jane.doe").await,
        Err(Error::PoolExhausted { .. })
    ));
    assert_eq!(client.circuit_state(), CircuitState::Open);

    assert!(matches!(busy.await.unwrap(), Err(Error::Timeout(_))));
}

#[tokio::test]
async fn test_force_reset_keeps_in_flight_borrow_counted() {
    let directory = FakeDirectory::default();
    let release = Arc::new(Notify::new());
    directory.state().held_search = Some(Arc::clone(&release));
    let config = config()
        .with_pool(PoolConfig::new().with_min_idle(1).with_max_connections(1))
        .unwrap();
    let client = Arc::new(DirectoryClient::with_connector(
        config,
        Arc::new(directory.clone()),
    ));

    let in_flight = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.exists("john.doe").await }
    });
    while directory.state().searches == 0 {
        tokio::task::yield_now().await;
    }

    client.force_reset().await;
    assert_eq!(client.pool_status().outstanding, 1);
    assert!(matches!(
        client.exists("jane.doe").await,
        Err(Error::PoolExhausted { .. })
    ));

    release.notify_one();
    assert!(!in_flight.await.unwrap().unwrap());
    let status = client.pool_status();
    assert_eq!(status.outstanding, 0);
    assert_eq!(status.idle, 0);

    assert!(!client.exists("jane.doe").await.unwrap());
    assert_eq!(directory.state().connects, 2);
}

#[tokio::test]
async fn test_force_reset_recovers_after_outage() {
    let directory = FakeDirectory::default();
    directory.state().refuse_connections = true;
    let config = config()
        .with_breaker(BreakerConfig::new().with_failure_threshold(1))
        .unwrap();
    let client = DirectoryClient::with_connector(config, Arc::new(directory.clone()));

    assert!(!client.test_connection().await);
    assert_eq!(client.circuit_state(), CircuitState::Open);

    directory.state().refuse_connections = false;
    client.force_reset().await;

    assert_eq!(client.circuit_state(), CircuitState::Closed);
    assert!(client.test_connection().await);
}
