//! Directory session abstraction and the `ldap3` backend.

use crate::{config::DirectoryConfig, Result};
use adprov_core::Error;
use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchOptions, SearchResult};
use native_tls::{Certificate, TlsConnector};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result code returned for invalid bind credentials.
pub const RC_INVALID_CREDENTIALS: u32 = 49;
/// Result code returned when an entry with the same name already exists.
pub const RC_ENTRY_ALREADY_EXISTS: u32 = 68;
const RC_SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Represents the search scope for directory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Directory entry returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdapEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute map (values in server order).
    pub attributes: HashMap<String, Vec<String>>,
}

impl LdapEntry {
    /// Creates an entry with no attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Adds a single-valued attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Returns the first value of the attribute if present.
    ///
    /// Attribute names are compared case-insensitively, as the directory does.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .and_then(|(_, values)| values.first().map(String::as_str))
    }
}

/// Entry submitted to an add operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// Distinguished name of the new entry.
    pub dn: String,
    /// Attribute name to raw values; binary attributes such as `unicodePwd` are not UTF-8.
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
}

impl NewEntry {
    /// Returns the values of an attribute as UTF-8 strings, skipping binary values.
    #[must_use]
    pub fn text_values(&self, attribute: &str) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .flat_map(|(_, values)| values.iter())
            .filter_map(|value| std::str::from_utf8(value).ok())
            .collect()
    }

    /// Returns the raw values of an attribute.
    #[must_use]
    pub fn raw_values(&self, attribute: &str) -> Option<&[Vec<u8>]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }
}

/// One live directory session.
///
/// Implementations map directory result codes onto [`Error`]: invalid credentials become
/// [`Error::AuthenticationFailed`], a duplicate add becomes [`Error::AlreadyExists`] and any other
/// add rejection becomes [`Error::CreationFailed`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LdapSession: Send {
    /// Binds with a DN (or principal) and password.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;

    /// Searches under `base_dn` and returns every matching entry.
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>>;

    /// Adds a new entry.
    async fn add(&mut self, entry: &NewEntry) -> Result<()>;

    /// Drops the authenticated identity while keeping the session open.
    async fn deauthenticate(&mut self) -> Result<()>;

    /// Closes the session for good.
    async fn close(&mut self) -> Result<()>;

    /// Returns false once the underlying transport is gone.
    fn is_alive(&mut self) -> bool;
}

/// Opens new directory sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LdapConnector: Send + Sync {
    /// Establishes a new, unauthenticated session.
    async fn connect(&self) -> Result<Box<dyn LdapSession>>;
}

/// Real connector backed by `ldap3`.
pub struct RealLdapConnector {
    config: Arc<DirectoryConfig>,
}

impl RealLdapConnector {
    /// Creates a new connector instance.
    #[must_use]
    pub fn new(config: Arc<DirectoryConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LdapConnector for RealLdapConnector {
    async fn connect(&self) -> Result<Box<dyn LdapSession>> {
        let settings = build_ldap_settings(&self.config)?;
        let url = self.config.url();
        debug!(url, "connecting to directory");

        let (conn, ldap) = tokio::time::timeout(
            self.config.connection_timeout(),
            LdapConnAsync::with_settings(settings, url),
        )
        .await
        .map_err(|_| Error::Timeout(format!("connecting to {url} timed out")))?
        .map_err(|err| Error::ConnectionUnavailable(format!("failed to connect to {url}: {err}")))?;
        ldap3::drive!(conn);

        Ok(Box::new(RealLdapSession {
            inner: ldap,
            size_limit: self.config.search_size_limit(),
            time_limit_secs: i32::try_from(self.config.operation_timeout().as_secs())
                .unwrap_or(i32::MAX),
        }))
    }
}

struct RealLdapSession {
    inner: ldap3::Ldap,
    size_limit: i32,
    time_limit_secs: i32,
}

#[async_trait]
impl LdapSession for RealLdapSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let result = self
            .inner
            .simple_bind(dn, password)
            .await
            .map_err(map_ldap_error)?;
        match result.rc {
            0 => Ok(()),
            RC_INVALID_CREDENTIALS => Err(Error::AuthenticationFailed(format!(
                "bind rejected for `{dn}`"
            ))),
            rc => Err(Error::Directory(format!(
                "bind failed with code {rc}: {}",
                result.text
            ))),
        }
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&'static str],
    ) -> Result<Vec<LdapEntry>> {
        let options = SearchOptions::new()
            .sizelimit(self.size_limit)
            .timelimit(self.time_limit_secs);
        let SearchResult(entries, result) = self
            .inner
            .with_search_options(options)
            .search(base_dn, scope.into(), filter, attributes.to_vec())
            .await
            .map_err(map_ldap_error)?;

        match result.rc {
            0 => {}
            RC_SIZE_LIMIT_EXCEEDED => {
                warn!(base_dn, filter, "search hit the size limit, results truncated");
            }
            rc => {
                return Err(Error::Directory(format!(
                    "search failed with code {rc}: {}",
                    result.text
                )))
            }
        }

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| LdapEntry {
                dn: entry.dn,
                attributes: entry.attrs,
            })
            .collect())
    }

    async fn add(&mut self, entry: &NewEntry) -> Result<()> {
        let attributes = entry
            .attributes
            .iter()
            .map(|(name, values)| {
                (
                    name.as_bytes().to_vec(),
                    values.iter().cloned().collect::<HashSet<_>>(),
                )
            })
            .collect::<Vec<_>>();

        let result = self
            .inner
            .add(&entry.dn, attributes)
            .await
            .map_err(map_ldap_error)?;
        match result.rc {
            0 => Ok(()),
            RC_ENTRY_ALREADY_EXISTS => Err(Error::AlreadyExists(entry.dn.clone())),
            rc => Err(Error::CreationFailed(format!(
                "add of `{}` rejected with code {rc}: {}",
                entry.dn, result.text
            ))),
        }
    }

    async fn deauthenticate(&mut self) -> Result<()> {
        let result = self
            .inner
            .simple_bind("", "")
            .await
            .map_err(map_ldap_error)?;
        if result.rc != 0 {
            return Err(Error::Directory(format!(
                "anonymous rebind failed with code {}: {}",
                result.rc, result.text
            )));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.unbind().await.map_err(map_ldap_error)
    }

    fn is_alive(&mut self) -> bool {
        !self.inner.is_closed()
    }
}

fn build_ldap_settings(config: &DirectoryConfig) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(config.connection_timeout());

    if !config.tls_verify() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    } else if let Some(cert_path) = config.tls_ca_cert() {
        let pem = fs::read(cert_path).map_err(|err| {
            Error::ConfigError(format!(
                "failed to read directory CA certificate {}: {err}",
                cert_path.display()
            ))
        })?;
        let certificate = Certificate::from_pem(&pem).map_err(|err| {
            Error::ConfigError(format!("invalid directory CA certificate: {err}"))
        })?;
        let connector = TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to load directory CA certificate: {err}"))
            })?;
        settings = settings.set_connector(connector);
    }

    Ok(settings)
}

/// Maps transport-level `ldap3` failures onto the error taxonomy.
fn map_ldap_error(err: ldap3::LdapError) -> Error {
    match err {
        ldap3::LdapError::LdapResult { result } if result.rc == RC_INVALID_CREDENTIALS => {
            Error::AuthenticationFailed(result.text)
        }
        ldap3::LdapError::LdapResult { result } => Error::Directory(format!(
            "directory returned code {}: {}",
            result.rc, result.text
        )),
        ldap3::LdapError::Timeout { .. } => Error::Timeout(err.to_string()),
        other => Error::ConnectionUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_lookup_ignores_attribute_case() {
        let entry = LdapEntry::new("CN=John Doe,OU=Users,DC=corp,DC=com")
            .with_attribute("sAMAccountName", "jdoe")
            .with_attribute("mail", "jdoe@corp.com");
        assert_eq!(entry.first("samaccountname"), Some("jdoe"));
        assert_eq!(entry.first("MAIL"), Some("jdoe@corp.com"));
        assert_eq!(entry.first("displayName"), None);
    }

    #[test]
    fn new_entry_value_access() {
        let entry = NewEntry {
            dn: "CN=John Doe,OU=Users,DC=corp,DC=com".to_string(),
            attributes: vec![
                (
                    "objectClass".to_string(),
                    vec![b"top".to_vec(), b"person".to_vec()],
                ),
                ("unicodePwd".to_string(), vec![vec![0xff, 0xfe, 0x00]]),
            ],
        };
        assert_eq!(entry.text_values("objectclass"), vec!["top", "person"]);
        assert!(entry.text_values("unicodePwd").is_empty());
        assert_eq!(entry.raw_values("unicodePwd").map(<[_]>::len), Some(1));
        assert!(entry.raw_values("mail").is_none());
    }

    #[test]
    fn scope_conversion() {
        assert!(matches!(Scope::from(SearchScope::Subtree), Scope::Subtree));
        assert!(matches!(Scope::from(SearchScope::Base), Scope::Base));
    }

    #[test]
    fn maps_transport_errors() {
        let io = ldap3::LdapError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(matches!(map_ldap_error(io), Error::ConnectionUnavailable(_)));
    }
}
