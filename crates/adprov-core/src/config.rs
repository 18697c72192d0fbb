//! Tuning configuration for the directory client.
//!
//! These structures hold the already-validated knobs a collaborator hands to the client: pool
//! bounds, cache lifetimes, circuit-breaker thresholds and the password policy. Environment
//! parsing is the collaborator's job; every struct here deserializes with defaults and validates
//! its ranges through `validator`.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Characters accepted as "special" by [`PasswordPolicy`].
pub const PASSWORD_SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Connection pool bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_pool_bounds"))]
pub struct PoolConfig {
    /// Number of idle connections kept for reuse
    #[validate(range(max = 100))]
    #[serde(default = "default_min_idle")]
    pub min_idle: usize,

    /// Maximum number of connections lent out at once
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

const fn default_min_idle() -> usize {
    2
}

const fn default_max_connections() -> usize {
    10
}

fn validate_pool_bounds(config: &PoolConfig) -> Result<(), ValidationError> {
    if config.min_idle > config.max_connections {
        return Err(ValidationError::new("min_idle_exceeds_max_connections"));
    }
    Ok(())
}

impl PoolConfig {
    /// Create a pool configuration with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            min_idle: default_min_idle(),
            max_connections: default_max_connections(),
        }
    }

    /// Set the number of idle connections retained.
    #[must_use]
    pub const fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the connection ceiling.
    #[must_use]
    pub const fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Result cache lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CacheConfig {
    /// TTL for positive existence checks (seconds)
    #[validate(range(min = 1, max = 86_400))]
    #[serde(default = "default_exists_ttl_secs")]
    pub exists_ttl_secs: u64,

    /// TTL for account profiles (seconds)
    #[validate(range(min = 1, max = 86_400))]
    #[serde(default = "default_profile_ttl_secs")]
    pub profile_ttl_secs: u64,

    /// TTL for negative lookups (seconds)
    #[validate(range(min = 1, max = 86_400))]
    #[serde(default = "default_negative_ttl_secs")]
    pub negative_ttl_secs: u64,

    /// TTL for login suggestions (seconds)
    #[validate(range(min = 1, max = 86_400))]
    #[serde(default = "default_suggestion_ttl_secs")]
    pub suggestion_ttl_secs: u64,

    /// Upper bound on cached entries
    #[validate(range(min = 1))]
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

const fn default_exists_ttl_secs() -> u64 {
    300
}

const fn default_profile_ttl_secs() -> u64 {
    600
}

const fn default_negative_ttl_secs() -> u64 {
    60
}

const fn default_suggestion_ttl_secs() -> u64 {
    3600
}

const fn default_max_entries() -> u64 {
    10_000
}

impl CacheConfig {
    /// Create a cache configuration with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            exists_ttl_secs: default_exists_ttl_secs(),
            profile_ttl_secs: default_profile_ttl_secs(),
            negative_ttl_secs: default_negative_ttl_secs(),
            suggestion_ttl_secs: default_suggestion_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }

    /// Override the existence TTL in seconds.
    #[must_use]
    pub const fn with_exists_ttl(mut self, seconds: u64) -> Self {
        self.exists_ttl_secs = seconds;
        self
    }

    /// Override the profile TTL in seconds.
    #[must_use]
    pub const fn with_profile_ttl(mut self, seconds: u64) -> Self {
        self.profile_ttl_secs = seconds;
        self
    }

    /// Override the negative-lookup TTL in seconds.
    #[must_use]
    pub const fn with_negative_ttl(mut self, seconds: u64) -> Self {
        self.negative_ttl_secs = seconds;
        self
    }

    /// Override the suggestion TTL in seconds.
    #[must_use]
    pub const fn with_suggestion_ttl(mut self, seconds: u64) -> Self {
        self.suggestion_ttl_secs = seconds;
        self
    }

    /// Existence TTL as a Duration.
    #[must_use]
    pub const fn exists_ttl(&self) -> Duration {
        Duration::from_secs(self.exists_ttl_secs)
    }

    /// Profile TTL as a Duration.
    #[must_use]
    pub const fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs)
    }

    /// Negative-lookup TTL as a Duration.
    #[must_use]
    pub const fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    /// Suggestion TTL as a Duration.
    #[must_use]
    pub const fn suggestion_ttl(&self) -> Duration {
        Duration::from_secs(self.suggestion_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    #[validate(range(min = 1, max = 1000))]
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the circuit stays open before a probe (seconds)
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_open_duration_secs() -> u64 {
    30
}

impl BreakerConfig {
    /// Create a breaker configuration with defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_secs: default_open_duration_secs(),
        }
    }

    /// Set the failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the open duration in seconds.
    #[must_use]
    pub const fn with_open_duration(mut self, seconds: u64) -> Self {
        self.open_duration_secs = seconds;
        self
    }

    /// Open duration as a Duration.
    #[must_use]
    pub const fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Password strength requirements applied to new accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct PasswordPolicy {
    /// Minimum password length
    #[validate(range(min = 1, max = 256))]
    #[serde(default = "default_min_length")]
    pub min_length: usize,

    /// Require at least one uppercase letter
    #[serde(default = "default_required")]
    pub require_uppercase: bool,

    /// Require at least one lowercase letter
    #[serde(default = "default_required")]
    pub require_lowercase: bool,

    /// Require at least one digit
    #[serde(default = "default_required")]
    pub require_digit: bool,

    /// Require at least one character from [`PASSWORD_SPECIAL_CHARS`]
    #[serde(default = "default_required")]
    pub require_special: bool,
}

const fn default_min_length() -> usize {
    8
}

const fn default_required() -> bool {
    true
}

/// Per-requirement outcome of a password check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PasswordRequirements {
    /// Length requirement met
    pub min_length: bool,
    /// Uppercase requirement met (or not required)
    pub uppercase: bool,
    /// Lowercase requirement met (or not required)
    pub lowercase: bool,
    /// Digit requirement met (or not required)
    pub numbers: bool,
    /// Special character requirement met (or not required)
    pub special_chars: bool,
}

/// Report produced by [`PasswordPolicy::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordReport {
    /// Whether every requirement is met
    pub valid: bool,
    /// Human-readable summary
    pub message: String,
    /// Individual requirement outcomes
    pub requirements: PasswordRequirements,
}

impl PasswordPolicy {
    /// Create a policy with defaults (8 characters, all classes required).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            min_length: default_min_length(),
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
        }
    }

    /// Set the minimum length.
    #[must_use]
    pub const fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = min_length;
        self
    }

    /// Toggle the uppercase requirement.
    #[must_use]
    pub const fn with_uppercase(mut self, required: bool) -> Self {
        self.require_uppercase = required;
        self
    }

    /// Toggle the lowercase requirement.
    #[must_use]
    pub const fn with_lowercase(mut self, required: bool) -> Self {
        self.require_lowercase = required;
        self
    }

    /// Toggle the digit requirement.
    #[must_use]
    pub const fn with_digit(mut self, required: bool) -> Self {
        self.require_digit = required;
        self
    }

    /// Toggle the special character requirement.
    #[must_use]
    pub const fn with_special(mut self, required: bool) -> Self {
        self.require_special = required;
        self
    }

    /// Checks a password against the policy.
    #[must_use]
    pub fn evaluate(&self, password: &str) -> PasswordReport {
        let requirements = PasswordRequirements {
            min_length: password.chars().count() >= self.min_length,
            uppercase: !self.require_uppercase || password.chars().any(char::is_uppercase),
            lowercase: !self.require_lowercase || password.chars().any(char::is_lowercase),
            numbers: !self.require_digit || password.chars().any(|c| c.is_ascii_digit()),
            special_chars: !self.require_special
                || password.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c)),
        };

        let mut issues = Vec::new();
        if !requirements.min_length {
            issues.push(format!("at least {} characters", self.min_length));
        }
        if !requirements.uppercase {
            issues.push("an uppercase letter".to_string());
        }
        if !requirements.lowercase {
            issues.push("a lowercase letter".to_string());
        }
        if !requirements.numbers {
            issues.push("a digit".to_string());
        }
        if !requirements.special_chars {
            issues.push("a special character".to_string());
        }

        let valid = issues.is_empty();
        let message = if valid {
            "Password is valid".to_string()
        } else {
            format!("Password must contain {}", issues.join(", "))
        };

        PasswordReport {
            valid,
            message,
            requirements,
        }
    }

    /// Returns an error when the password does not satisfy the policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] carrying the report message.
    pub fn enforce(&self, password: &str) -> Result<(), Error> {
        let report = self.evaluate(password);
        if report.valid {
            Ok(())
        } else {
            Err(Error::InvalidInput(report.message))
        }
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new()
    }
}
