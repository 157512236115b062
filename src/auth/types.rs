// Session and credential types

use serde::{Deserialize, Serialize};

use crate::models::auth::{SignInData, UserRecord};

/// Which of the two bearer credentials a store slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// Short-lived token that authorizes API calls
    Access,

    /// Long-lived token used only to mint a new access token
    Refresh,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 2] = [CredentialKind::Access, CredentialKind::Refresh];

    /// Cookie key the credential is persisted under
    pub fn cookie_name(self) -> &'static str {
        match self {
            CredentialKind::Access => "accessToken",
            CredentialKind::Refresh => "refreshToken",
        }
    }
}

/// Public profile of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub email: String,
    pub email_is_verified: bool,
    pub phone_is_verified: bool,
    pub provider: String,
    pub status: String,
}

impl From<&UserRecord> for Actor {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            email_is_verified: user.email_is_verified,
            phone_is_verified: user.phone_is_verified,
            provider: user.provider.clone(),
            status: user.status.clone(),
        }
    }
}

/// Server-issued sign-in result handed to `SessionController::login`
pub type LoginPayload = SignInData;

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub actor: Option<Actor>,
    pub authenticated: bool,
    pub bootstrapping: bool,
}

impl SessionState {
    /// Derive the state from the actor and credential presence
    pub fn derive(
        actor: Option<Actor>,
        has_access: bool,
        has_refresh: bool,
        bootstrapping: bool,
    ) -> Self {
        let authenticated = actor.is_some() || has_access || has_refresh;
        Self {
            actor,
            authenticated,
            bootstrapping,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        if self.bootstrapping {
            SessionPhase::Bootstrapping
        } else if self.authenticated {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Unauthenticated
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Bootstrapping,
    Authenticated,
    Unauthenticated,
}

/// Result of a renewal attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    /// A new access token was stored
    Renewed,

    /// Renewal was impossible or rejected; credentials were cleared
    SignedOut,
}

impl RenewOutcome {
    pub fn is_renewed(self) -> bool {
        matches!(self, RenewOutcome::Renewed)
    }
}
