//! Short-lived memo of directory lookups.

use crate::account::AccountRecord;
use adprov_core::CacheConfig;
use moka::{sync::Cache, Expiry};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Lookup family a cache entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Whether a login exists.
    Exists,
    /// Full account profile.
    Profile,
    /// Suggested login for a name pair.
    Suggestion,
}

/// Cache key: lookup family plus normalized subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: CacheKind,
    subject: String,
}

impl CacheKey {
    /// Key for an existence check.
    #[must_use]
    pub fn exists(login: &str) -> Self {
        Self {
            kind: CacheKind::Exists,
            subject: normalize(login),
        }
    }

    /// Key for a profile lookup.
    #[must_use]
    pub fn profile(login: &str) -> Self {
        Self {
            kind: CacheKind::Profile,
            subject: normalize(login),
        }
    }

    /// Key for a login suggestion.
    #[must_use]
    pub fn suggestion(first_name: &str, last_name: &str) -> Self {
        Self {
            kind: CacheKind::Suggestion,
            subject: format!("{}|{}", normalize(first_name), normalize(last_name)),
        }
    }

    /// Lookup family.
    #[must_use]
    pub const fn kind(&self) -> CacheKind {
        self.kind
    }

    /// Normalized subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Cached lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    /// Existence check outcome.
    Exists(bool),
    /// Profile lookup outcome; `None` is a cached miss.
    Profile(Option<AccountRecord>),
    /// Suggested login.
    Suggestion(String),
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through.
    pub misses: u64,
    /// Approximate number of live entries.
    pub entries: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    ttl: Duration,
    expires_at: Instant,
}

struct PerEntryTtl;

impl Expiry<CacheKey, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Result cache with per-entry lifetimes.
pub struct ResultCache {
    entries: Cache<CacheKey, CacheEntry>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    generation: AtomicU64,
}

impl ResultCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            entries,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the cached value unless it is absent or expired.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let live = self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now());
        if let Some(entry) = live {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(kind = ?key.kind, subject = %key.subject, "cache hit");
            Some(entry.value)
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(kind = ?key.kind, subject = %key.subject, "cache miss");
            None
        }
    }

    /// Stores a value for `ttl`.
    pub fn set(&self, key: CacheKey, value: CachedValue, ttl: Duration) {
        if ttl.is_zero() {
            self.entries.invalidate(&key);
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Stores a value with the configured lifetime for its kind.
    ///
    /// Negative results (`Exists(false)`, `Profile(None)`) use the shorter negative lifetime.
    pub fn store(&self, key: CacheKey, value: CachedValue) {
        let ttl = self.ttl_for(&value);
        self.set(key, value, ttl);
    }

    /// Invalidation counter; capture it before a directory round trip and pass it to
    /// [`ResultCache::store_if_current`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stores a read-through result unless an invalidation happened since `generation`.
    ///
    /// Returns false when the value was discarded as possibly stale.
    pub fn store_if_current(&self, key: CacheKey, value: CachedValue, generation: u64) -> bool {
        if self.generation() != generation {
            debug!(
                kind = ?key.kind,
                subject = %key.subject,
                "discarding result read before invalidation"
            );
            return false;
        }
        self.store(key.clone(), value);
        // an invalidation that bumped the counter before our insert may already have run
        if self.generation() != generation {
            self.entries.invalidate(&key);
            return false;
        }
        true
    }

    /// Removes one entry.
    pub fn invalidate(&self, key: &CacheKey) {
        self.bump();
        self.entries.invalidate(key);
    }

    /// Removes the existence and profile entries of a login.
    pub fn invalidate_subject(&self, login: &str) {
        self.bump();
        self.entries.invalidate(&CacheKey::exists(login));
        self.entries.invalidate(&CacheKey::profile(login));
        debug!(subject = %normalize(login), "cache entries invalidated");
    }

    /// Removes every suggestion entry that resolved to `login`.
    pub fn invalidate_suggestions_of(&self, login: &str) {
        self.bump();
        let target = normalize(login);
        let stale: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(key, entry)| {
                key.kind == CacheKind::Suggestion
                    && matches!(&entry.value, CachedValue::Suggestion(s) if normalize(s) == target)
            })
            .map(|(key, _)| CacheKey::clone(&key))
            .collect();
        for key in &stale {
            self.entries.invalidate(key);
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.bump();
        self.entries.invalidate_all();
        debug!("cache cleared");
    }

    /// Returns hit/miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.entry_count(),
        }
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn ttl_for(&self, value: &CachedValue) -> Duration {
        match value {
            CachedValue::Exists(true) => self.config.exists_ttl(),
            CachedValue::Profile(Some(_)) => self.config.profile_ttl(),
            CachedValue::Exists(false) | CachedValue::Profile(None) => self.config.negative_ttl(),
            CachedValue::Suggestion(_) => self.config.suggestion_ttl(),
        }
    }
}

fn normalize(subject: &str) -> String {
    subject.trim().to_lowercase()
}
