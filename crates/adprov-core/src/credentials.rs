//! Service-account credentials for binding to the directory.

use secrecy::{ExposeSecret, SecretString};

/// Service-account credentials used for every privileged bind.
///
/// The password is held in a [`SecretString`] so it never shows up in `Debug` output or logs.
#[derive(Debug)]
pub struct BindCredentials {
    bind_dn: String,
    password: SecretString,
}

impl BindCredentials {
    /// Create new bind credentials.
    ///
    /// # Arguments
    ///
    /// * `bind_dn` - The bind identity (a DN or a `user@domain` principal)
    /// * `password` - The service account password
    #[must_use]
    pub fn new(bind_dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            bind_dn: bind_dn.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Builds credentials from a short account name and the directory domain (`user@domain`).
    #[must_use]
    pub fn for_principal(username: &str, domain: &str, password: impl Into<String>) -> Self {
        Self::new(format!("{username}@{domain}"), password)
    }

    /// Get the bind identity.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// Get the bind password.
    #[must_use]
    pub fn bind_password(&self) -> &str {
        self.password.expose_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_accessors() {
        let creds = BindCredentials::new("cn=svc,dc=example,dc=com", "secret");
        assert_eq!(creds.bind_dn(), "cn=svc,dc=example,dc=com");
        assert_eq!(creds.bind_password(), "secret");
    }

    #[test]
    fn test_principal_form() {
        let creds = BindCredentials::for_principal("svc-provision", "corp.example.com", "pw");
        assert_eq!(creds.bind_dn(), "svc-provision@corp.example.com");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = BindCredentials::new("cn=svc,dc=example,dc=com", "hunter2");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("cn=svc"));
    }
}
