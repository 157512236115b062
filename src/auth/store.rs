// Credential storage with per-entry expiry

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::types::CredentialKind;

/// Access token lifetime in minutes
pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 15;

/// Refresh token lifetime in days
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 15;

/// Fixed TTL for each credential kind
pub fn ttl_for(kind: CredentialKind) -> Duration {
    match kind {
        CredentialKind::Access => Duration::minutes(ACCESS_TOKEN_TTL_MINUTES),
        CredentialKind::Refresh => Duration::days(REFRESH_TOKEN_TTL_DAYS),
    }
}

/// Absolute expiry for a write made at `now`, or `None` if it would overflow
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    now.checked_add_signed(ttl)
}

/// Source of the current time for expiry checks
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Durable storage for the access and refresh tokens.
///
/// Writes are best effort: implementations log and swallow persistence
/// failures. An entry whose expiry has passed reads as absent.
pub trait CredentialStore: Send + Sync {
    /// Store `value` under `kind`, expiring `ttl` from now
    fn put(&self, kind: CredentialKind, value: &str, ttl: Duration);

    /// Current value for `kind`, or `None` if missing or expired
    fn get(&self, kind: CredentialKind) -> Option<String>;

    /// Remove `kind`; a no-op if it is not stored
    fn clear(&self, kind: CredentialKind);

    fn clear_all(&self) {
        for kind in CredentialKind::ALL {
            self.clear(kind);
        }
    }

    /// Store a fresh token pair, each with its full TTL
    fn set_auth_tokens(&self, access_token: &str, refresh_token: &str) {
        self.put(
            CredentialKind::Access,
            access_token,
            ttl_for(CredentialKind::Access),
        );
        self.put(
            CredentialKind::Refresh,
            refresh_token,
            ttl_for(CredentialKind::Refresh),
        );
    }

    /// Replace the access token and reset its TTL
    fn update_access_token(&self, access_token: &str) {
        self.put(
            CredentialKind::Access,
            access_token,
            ttl_for(CredentialKind::Access),
        );
    }

    fn has_any_token(&self) -> bool {
        CredentialKind::ALL
            .iter()
            .any(|kind| self.get(*kind).is_some())
    }
}

#[derive(Debug, Clone)]
struct StoredCredential {
    value: String,
    expires_at: DateTime<Utc>,
}

impl StoredCredential {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-process credential store
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<CredentialKind, StoredCredential>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Expiry instant of a live entry
    pub fn expires_at(&self, kind: CredentialKind) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&kind)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.expires_at)
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn put(&self, kind: CredentialKind, value: &str, ttl: Duration) {
        let Some(expires_at) = expiry_after(self.clock.now(), ttl) else {
            tracing::warn!(cookie = kind.cookie_name(), "Credential TTL out of range, not stored");
            return;
        };
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            kind,
            StoredCredential {
                value: value.to_string(),
                expires_at,
            },
        );
        tracing::debug!(
            cookie = kind.cookie_name(),
            expires_at = %expires_at.to_rfc3339(),
            "Stored credential"
        );
    }

    fn get(&self, kind: CredentialKind) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get(&kind) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(&kind);
                tracing::debug!(cookie = kind.cookie_name(), "Credential expired, removed");
                None
            }
            None => None,
        }
    }

    fn clear(&self, kind: CredentialKind) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&kind);
    }
}
