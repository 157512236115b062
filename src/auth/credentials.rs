// Cookie jar persisted in a SQLite database

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::store::{expiry_after, Clock, CredentialStore, SystemClock};
use super::types::CredentialKind;

/// Every auth cookie is scoped to the whole site
pub const COOKIE_PATH: &str = "/";

/// Auth cookies are never sent cross-site
pub const COOKIE_SAME_SITE: &str = "Strict";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS auth_cookies (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    path TEXT NOT NULL,
    same_site TEXT NOT NULL,
    secure INTEGER NOT NULL
)";

/// A persisted cookie row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieEntry {
    pub name: String,
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub path: String,
    pub same_site: String,
    pub secure: bool,
}

/// Credential store backed by a SQLite cookie jar.
///
/// Survives process restarts the way browser cookies survive page reloads.
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
    secure: bool,
    clock: Arc<dyn Clock>,
}

impl SqliteCredentialStore {
    /// Open (or create) the cookie jar at `path`.
    /// `secure` marks cookies for confidential transports only.
    pub fn open(path: &Path, secure: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create cookie jar directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite cookie jar: {}", path.display()))?;
        Self::from_connection(conn, secure, Arc::new(SystemClock))
    }

    /// Cookie jar that lives only as long as this value
    pub fn open_in_memory(secure: bool, clock: Arc<dyn Clock>) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::from_connection(conn, secure, clock)
    }

    fn from_connection(conn: Connection, secure: bool, clock: Arc<dyn Clock>) -> Result<Self> {
        conn.execute(SCHEMA, ())
            .context("Failed to create auth_cookies table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            secure,
            clock,
        })
    }

    /// Full cookie row for a live credential
    pub fn entry(&self, kind: CredentialKind) -> Option<CookieEntry> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let row = conn
            .query_row(
                "SELECT name, value, expires_at, path, same_site, secure FROM auth_cookies WHERE name = ?",
                [kind.cookie_name()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional();

        let (name, value, expires_at, path, same_site, secure) = match row {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read cookie {}: {}", kind.cookie_name(), e);
                return None;
            }
        };

        let expires_at = match parse_datetime(&expires_at) {
            Ok(dt) if self.clock.now() < dt => dt,
            Ok(_) => {
                tracing::debug!(cookie = kind.cookie_name(), "Cookie expired, removed");
                delete_row(&conn, kind);
                return None;
            }
            Err(e) => {
                tracing::warn!("Dropping cookie {} with bad expiry: {}", kind.cookie_name(), e);
                delete_row(&conn, kind);
                return None;
            }
        };

        Some(CookieEntry {
            name,
            value,
            expires_at,
            path,
            same_site,
            secure,
        })
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn put(&self, kind: CredentialKind, value: &str, ttl: Duration) {
        let Some(expires_at) = expiry_after(self.clock.now(), ttl) else {
            tracing::warn!("Cookie {} TTL out of range, not stored", kind.cookie_name());
            return;
        };
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let result = conn.execute(
            "INSERT INTO auth_cookies (name, value, expires_at, path, same_site, secure)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at,
                path = excluded.path,
                same_site = excluded.same_site,
                secure = excluded.secure",
            params![
                kind.cookie_name(),
                value,
                expires_at.to_rfc3339(),
                COOKIE_PATH,
                COOKIE_SAME_SITE,
                self.secure,
            ],
        );

        match result {
            Ok(_) => tracing::debug!(
                cookie = kind.cookie_name(),
                expires_at = %expires_at.to_rfc3339(),
                "Stored cookie"
            ),
            Err(e) => tracing::warn!("Failed to persist cookie {}: {}", kind.cookie_name(), e),
        }
    }

    fn get(&self, kind: CredentialKind) -> Option<String> {
        self.entry(kind).map(|entry| entry.value)
    }

    fn clear(&self, kind: CredentialKind) {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        delete_row(&conn, kind);
    }
}

fn delete_row(conn: &Connection, kind: CredentialKind) {
    if let Err(e) = conn.execute(
        "DELETE FROM auth_cookies WHERE name = ?",
        [kind.cookie_name()],
    ) {
        tracing::warn!("Failed to delete cookie {}: {}", kind.cookie_name(), e);
    }
}

/// Parse an RFC 3339 timestamp, tolerating a bare `Z` suffix
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let normalized = if s.ends_with('Z') {
        s.replace('Z', "+00:00")
    } else {
        s.to_string()
    };

    DateTime::parse_from_rfc3339(&normalized)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse datetime: {}", s))
}
