//! Account records and creation requests.

use crate::{dn::DistinguishedName, session::LdapEntry, session::NewEntry};
use adprov_core::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Longest login accepted by any login-taking operation.
pub const MAX_LOGIN_LENGTH: usize = 50;

/// Logins that may never be provisioned.
pub const RESERVED_LOGINS: &[&str] = &["admin", "administrator", "root", "system", "guest", "public"];

/// `userAccountControl` value for an enabled normal account.
pub const NORMAL_ACCOUNT: u32 = 512;

/// Object classes of a new user entry.
pub const USER_OBJECT_CLASSES: &[&str] = &["top", "person", "organizationalPerson", "user"];

/// Attributes requested when only existence matters.
pub const EXISTENCE_ATTRIBUTES: &[&str] = &["sAMAccountName"];

/// Attributes requested for a full profile.
pub const PROFILE_ATTRIBUTES: &[&str] = &[
    "sAMAccountName",
    "displayName",
    "mail",
    "userPrincipalName",
    "whenCreated",
];

/// Directory account as returned to handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Login (`sAMAccountName`).
    #[serde(rename = "loginName")]
    pub login: String,
    /// Display name.
    #[serde(rename = "displayName")]
    pub display_name: String,
    /// Email address.
    pub email: String,
    /// Full distinguished name of the entry.
    pub distinguished_name: String,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl AccountRecord {
    /// Maps a search entry onto a record.
    ///
    /// Missing attributes fall back to the login (display name), `login@domain` (email) and the
    /// current time (creation).
    #[must_use]
    pub fn from_entry(entry: &LdapEntry, login: &str, domain: &str) -> Self {
        let login = entry.first("sAMAccountName").unwrap_or(login).to_string();
        let display_name = entry
            .first("displayName")
            .map_or_else(|| login.clone(), str::to_string);
        let email = entry
            .first("mail")
            .or_else(|| entry.first("userPrincipalName"))
            .map_or_else(|| format!("{login}@{domain}"), str::to_string);
        let created_at = entry
            .first("whenCreated")
            .and_then(parse_directory_timestamp)
            .unwrap_or_else(Utc::now);

        Self {
            login,
            display_name,
            email,
            distinguished_name: entry.dn.clone(),
            created_at,
        }
    }
}

/// Parses a directory timestamp: generalized time (`20240115120000.0Z`) or RFC 3339.
#[must_use]
pub fn parse_directory_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Some(body) = trimmed.strip_suffix('Z') {
        let formats = ["%Y%m%d%H%M%S%.f", "%Y%m%d%H%M%S"];
        if let Some(naive) = formats
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(body, format).ok())
        {
            return Some(naive.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Request to provision a new account.
#[derive(Debug, Deserialize, Validate)]
pub struct AccountCreationRequest {
    /// Given name.
    #[validate(length(min = 2, max = 50), custom(function = "validate_person_name"))]
    #[serde(rename = "firstName")]
    pub first_name: String,
    /// Surname.
    #[validate(length(min = 2, max = 50), custom(function = "validate_person_name"))]
    #[serde(rename = "lastName")]
    pub last_name: String,
    /// Requested login.
    #[validate(length(min = 3, max = 50), custom(function = "validate_login_shape"))]
    #[serde(rename = "loginName")]
    pub login: String,
    /// Initial password; never logged or serialized.
    pub password: SecretString,
}

impl AccountCreationRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            login: login.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Display name used for `cn` and `displayName`.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }

    /// Rejects passwords that contain the first name, last name or login.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the offending part.
    pub fn check_password_personal_data(&self) -> Result<()> {
        let password = self.password.expose_secret().to_lowercase();
        let parts = [
            ("first name", &self.first_name),
            ("last name", &self.last_name),
            ("login", &self.login),
        ];
        for (label, value) in parts {
            let needle = value.trim().to_lowercase();
            if !needle.is_empty() && password.contains(&needle) {
                return Err(Error::InvalidInput(format!(
                    "password must not contain the {label}"
                )));
            }
        }
        Ok(())
    }

    /// Builds the entry submitted to the directory.
    #[must_use]
    pub fn to_new_entry(&self, users_ou: &DistinguishedName, domain: &str) -> NewEntry {
        let display_name = self.display_name();
        let dn = DistinguishedName::for_account(&display_name, users_ou);
        let principal = format!("{}@{domain}", self.login);
        let text = |value: &str| vec![value.as_bytes().to_vec()];

        NewEntry {
            dn: dn.as_str().to_string(),
            attributes: vec![
                (
                    "objectClass".to_string(),
                    USER_OBJECT_CLASSES
                        .iter()
                        .map(|class| class.as_bytes().to_vec())
                        .collect(),
                ),
                ("cn".to_string(), text(&display_name)),
                ("sn".to_string(), text(self.last_name.trim())),
                ("givenName".to_string(), text(self.first_name.trim())),
                ("displayName".to_string(), text(&display_name)),
                ("sAMAccountName".to_string(), text(&self.login)),
                ("userPrincipalName".to_string(), text(&principal)),
                ("mail".to_string(), text(&principal)),
                (
                    "unicodePwd".to_string(),
                    vec![encode_unicode_password(self.password.expose_secret())],
                ),
                (
                    "userAccountControl".to_string(),
                    text(&NORMAL_ACCOUNT.to_string()),
                ),
            ],
        }
    }
}

/// Encodes a password for `unicodePwd`: the quoted string as UTF-16LE.
#[must_use]
pub fn encode_unicode_password(password: &str) -> Vec<u8> {
    format!("\"{password}\"")
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect()
}

/// Checks a login before any cache or directory access.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the login is blank or longer than [`MAX_LOGIN_LENGTH`].
pub fn validate_login(login: &str) -> Result<()> {
    if login.trim().is_empty() {
        return Err(Error::InvalidInput("login cannot be empty".to_string()));
    }
    if login.chars().count() > MAX_LOGIN_LENGTH {
        return Err(Error::InvalidInput(format!(
            "login cannot exceed {MAX_LOGIN_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Returns true for logins that may never be provisioned.
#[must_use]
pub fn is_reserved_login(login: &str) -> bool {
    let normalized = login.trim().to_lowercase();
    RESERVED_LOGINS.contains(&normalized.as_str())
}

fn validate_person_name(value: &str) -> std::result::Result<(), ValidationError> {
    let allowed = |ch: char| {
        ch.is_ascii_alphabetic()
            || ('\u{c0}'..='\u{ff}').contains(&ch)
            || ch.is_whitespace()
            || ch == '-'
            || ch == '\''
    };
    if value.chars().all(allowed) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_name_characters"))
    }
}

fn validate_login_shape(value: &str) -> std::result::Result<(), ValidationError> {
    let allowed = |ch: char| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-');
    if !value.chars().all(allowed) {
        return Err(ValidationError::new("invalid_login_characters"));
    }
    if value.starts_with('.') || value.ends_with('.') || value.contains("..") {
        return Err(ValidationError::new("invalid_login_dots"));
    }
    Ok(())
}
