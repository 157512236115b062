// Authentication module
// Manages the session lifecycle and credential storage

mod credentials;
mod manager;
mod refresh;
mod store;
mod types;

pub use credentials::{CookieEntry, SqliteCredentialStore, COOKIE_PATH, COOKIE_SAME_SITE};
pub use manager::{RenewalTimer, SessionController, RENEW_INTERVAL};
pub use refresh::TokenRefresher;
pub use store::{
    ttl_for, Clock, CredentialStore, ManualClock, MemoryCredentialStore, SystemClock,
    ACCESS_TOKEN_TTL_MINUTES, REFRESH_TOKEN_TTL_DAYS,
};
pub use types::{
    Actor, CredentialKind, LoginPayload, RenewOutcome, SessionPhase, SessionState,
};
