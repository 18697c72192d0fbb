//! Directory operations run on one borrowed session.
//!
//! Each public operation authenticates as the service account, performs its searches or add,
//! then drops back to an anonymous identity so the session can be parked in the pool. The
//! de-authentication step always runs; its failure is logged and never replaces the
//! operation's own outcome.

use crate::{
    account::{AccountCreationRequest, AccountRecord, EXISTENCE_ATTRIBUTES, PROFILE_ATTRIBUTES},
    config::DirectoryConfig,
    filter::login_filter,
    session::{LdapEntry, LdapSession, SearchScope},
    Result,
};
use adprov_core::Error;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Number of login candidates tried before a suggestion gives up (`base`, `base1` .. `base998`).
pub const SUGGESTION_ATTEMPTS: u32 = 999;

/// Bind/search/add sequences against a single session.
#[derive(Debug, Clone)]
pub struct DirectoryOperations {
    config: Arc<DirectoryConfig>,
}

impl DirectoryOperations {
    /// Creates the operation set for a configuration.
    #[must_use]
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }

    /// Returns true when an entry matches `login`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind or the search fails or times out.
    pub async fn exists(&self, session: &mut dyn LdapSession, login: &str) -> Result<bool> {
        let outcome = self.exists_authenticated(session, login).await;
        self.deauthenticate(session).await;
        outcome
    }

    /// Looks up the profile of `login`; `None` when no entry matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind or the search fails or times out.
    pub async fn get_profile(
        &self,
        session: &mut dyn LdapSession,
        login: &str,
    ) -> Result<Option<AccountRecord>> {
        let outcome = self.profile_authenticated(session, login).await;
        self.deauthenticate(session).await;
        outcome
    }

    /// Creates the account described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] when the login is taken (checked before the add, and
    /// reported by the directory on a race), [`Error::CreationFailed`] when the add is rejected
    /// for another reason, or a bind/search/timeout error.
    pub async fn create(
        &self,
        session: &mut dyn LdapSession,
        request: &AccountCreationRequest,
    ) -> Result<AccountRecord> {
        let outcome = self.create_authenticated(session, request).await;
        self.deauthenticate(session).await;
        outcome
    }

    /// Derives the first free login from a first/last name pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SuggestionExhausted`] after [`SUGGESTION_ATTEMPTS`] taken candidates, or
    /// a bind/search/timeout error.
    pub async fn suggest_name(
        &self,
        session: &mut dyn LdapSession,
        first_name: &str,
        last_name: &str,
    ) -> Result<String> {
        let outcome = self
            .suggest_authenticated(session, first_name, last_name)
            .await;
        self.deauthenticate(session).await;
        outcome
    }

    /// Binds and immediately de-authenticates.
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn test_connection(&self, session: &mut dyn LdapSession) -> Result<()> {
        let outcome = self.authenticate(session).await;
        self.deauthenticate(session).await;
        outcome
    }

    async fn exists_authenticated(
        &self,
        session: &mut dyn LdapSession,
        login: &str,
    ) -> Result<bool> {
        self.authenticate(session).await?;
        let found = !self
            .search_login(session, login, EXISTENCE_ATTRIBUTES)
            .await?
            .is_empty();
        debug!(login, found, "existence check");
        Ok(found)
    }

    async fn profile_authenticated(
        &self,
        session: &mut dyn LdapSession,
        login: &str,
    ) -> Result<Option<AccountRecord>> {
        self.authenticate(session).await?;
        let entries = self.search_login(session, login, PROFILE_ATTRIBUTES).await?;
        Ok(entries
            .first()
            .map(|entry| AccountRecord::from_entry(entry, login, self.config.domain())))
    }

    async fn create_authenticated(
        &self,
        session: &mut dyn LdapSession,
        request: &AccountCreationRequest,
    ) -> Result<AccountRecord> {
        self.authenticate(session).await?;

        let existing = self
            .search_login(session, &request.login, EXISTENCE_ATTRIBUTES)
            .await?;
        if !existing.is_empty() {
            info!(login = %request.login, "account already exists, skipping add");
            return Err(Error::AlreadyExists(request.login.clone()));
        }

        let entry = request.to_new_entry(self.config.users_ou(), self.config.domain());
        with_timeout(
            self.config.operation_timeout(),
            "directory add",
            session.add(&entry),
        )
        .await?;
        info!(login = %request.login, dn = %entry.dn, "account created");

        Ok(AccountRecord {
            login: request.login.clone(),
            display_name: request.display_name(),
            email: format!("{}@{}", request.login, self.config.domain()),
            distinguished_name: entry.dn,
            created_at: Utc::now(),
        })
    }

    async fn suggest_authenticated(
        &self,
        session: &mut dyn LdapSession,
        first_name: &str,
        last_name: &str,
    ) -> Result<String> {
        self.authenticate(session).await?;

        let base = suggestion_base(first_name, last_name);
        for attempt in 0..SUGGESTION_ATTEMPTS {
            let candidate = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}{attempt}")
            };
            if self
                .search_login(session, &candidate, EXISTENCE_ATTRIBUTES)
                .await?
                .is_empty()
            {
                debug!(candidate, attempt, "login suggestion found");
                return Ok(candidate);
            }
        }

        warn!(base, "no free login suggestion");
        Err(Error::SuggestionExhausted {
            base,
            attempts: SUGGESTION_ATTEMPTS,
        })
    }

    async fn authenticate(&self, session: &mut dyn LdapSession) -> Result<()> {
        let credentials = self.config.credentials();
        let outcome = with_timeout(
            self.config.bind_timeout(),
            "directory bind",
            session.simple_bind(credentials.bind_dn(), credentials.bind_password()),
        )
        .await;
        if let Err(err) = &outcome {
            warn!(bind_dn = credentials.bind_dn(), error = %err, "bind failed");
        }
        outcome
    }

    async fn deauthenticate(&self, session: &mut dyn LdapSession) {
        let outcome = with_timeout(
            self.config.bind_timeout(),
            "anonymous rebind",
            session.deauthenticate(),
        )
        .await;
        if let Err(err) = outcome {
            warn!(error = %err, "failed to drop directory identity");
        }
    }

    async fn search_login(
        &self,
        session: &mut dyn LdapSession,
        login: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        let filter = login_filter(self.config.login_filter_template(), login);
        with_timeout(
            self.config.operation_timeout(),
            "directory search",
            session.search(
                self.config.base_dn().as_str(),
                SearchScope::Subtree,
                &filter,
                attributes,
            ),
        )
        .await
    }
}

/// Base of a login suggestion: `first.last`, trimmed and lowercased.
#[must_use]
pub fn suggestion_base(first_name: &str, last_name: &str) -> String {
    format!(
        "{}.{}",
        first_name.trim().to_lowercase(),
        last_name.trim().to_lowercase()
    )
}

async fn with_timeout<F, T>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("{what} timed out after {limit:?}")))?
}
