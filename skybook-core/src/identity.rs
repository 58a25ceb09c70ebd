use serde::{Deserialize, Serialize};
use skybook_shared::pii::Masked;
use std::sync::Arc;

use crate::storage::{read_json, write_json, KeyValueStore};
use crate::CoreResult;

pub const ROLE_STUDENT: &str = "student";
pub const ROLE_INSTRUCTOR: &str = "instructor";
pub const ROLE_ADMIN: &str = "admin";

// Tab-scoped keys. `auth_token` and `user_data` are older aliases still
// written by the login screens.
pub const TOKEN_KEY: &str = "token";
pub const TOKEN_ALIAS_KEY: &str = "auth_token";
pub const SESSION_ID_KEY: &str = "session_id";
pub const ROLE_KEY: &str = "role";
pub const USER_KEY: &str = "user";
pub const USER_ALIAS_KEY: &str = "user_data";
pub const DASHBOARD_ROUTE_KEY: &str = "dashboard_route";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<Masked<String>>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// What the login endpoint hands back, persisted for the lifetime of a tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: Masked<String>,
    pub session_id: String,
    pub role: String,
    pub user: UserProfile,
    pub dashboard_route: Option<String>,
}

/// Authentication state as seen by the navigation gate.
///
/// Absence of a token means unauthenticated. Roles are compared by plain
/// string equality.
pub trait IdentityProvider: Send + Sync {
    fn token(&self) -> Option<String>;

    fn role(&self) -> Option<String>;

    fn user(&self) -> Option<UserProfile>;

    fn clear_session(&self);

    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }
}

/// Identity persisted in the tab-scoped key-value store.
pub struct TabIdentity {
    store: Arc<dyn KeyValueStore>,
}

impl TabIdentity {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persist a fresh login for this tab, writing both the current keys and
    /// their legacy aliases.
    pub fn initialize_session(&self, session: &AuthSession) -> CoreResult<()> {
        let token = session.token.expose();
        self.store.set(TOKEN_KEY, token)?;
        self.store.set(TOKEN_ALIAS_KEY, token)?;
        self.store.set(SESSION_ID_KEY, &session.session_id)?;
        self.store.set(ROLE_KEY, &session.role)?;
        write_json(self.store.as_ref(), USER_KEY, &session.user)?;
        write_json(self.store.as_ref(), USER_ALIAS_KEY, &session.user)?;
        if let Some(route) = &session.dashboard_route {
            self.store.set(DASHBOARD_ROUTE_KEY, route)?;
        }
        tracing::info!(
            role = %session.role,
            username = %session.user.username,
            "Tab session initialized"
        );
        Ok(())
    }

    pub fn session_id(&self) -> Option<String> {
        self.read(SESSION_ID_KEY)
    }

    pub fn dashboard_route(&self) -> Option<String> {
        self.read(DASHBOARD_ROUTE_KEY)
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!("Failed to read {} from tab storage: {}", key, e);
                None
            }
        }
    }

    fn read_user(&self, key: &str) -> Option<UserProfile> {
        // Corrupt user JSON is treated like a missing user.
        read_json::<UserProfile>(self.store.as_ref(), key).ok().flatten()
    }
}

impl IdentityProvider for TabIdentity {
    fn token(&self) -> Option<String> {
        self.read(TOKEN_KEY).or_else(|| self.read(TOKEN_ALIAS_KEY))
    }

    fn role(&self) -> Option<String> {
        self.read(ROLE_KEY)
    }

    fn user(&self) -> Option<UserProfile> {
        self.read_user(USER_KEY).or_else(|| self.read_user(USER_ALIAS_KEY))
    }

    fn clear_session(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear tab session: {}", e);
        }
    }
}

/// Fixed identity, e.g. one decoded from a bearer token for a single request.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    pub token: Option<String>,
    pub role: Option<String>,
    pub user: Option<UserProfile>,
}

impl StaticIdentity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_role(token: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            role: Some(role.into()),
            user: None,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }

    fn role(&self) -> Option<String> {
        self.role.clone()
    }

    fn user(&self) -> Option<UserProfile> {
        self.user.clone()
    }

    fn clear_session(&self) {
        tracing::debug!("clear_session on a static identity is a no-op");
    }
}
