//! Typed session context over the persistent store.
//!
//! Every command receives a `SessionStore` through the CLI context; nothing
//! reads client state from anywhere else.

use crate::api::User;
use crate::store::{StoreError, Storage};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const SESSION_KEY: &str = "session";
pub const ADMIN_ATTEMPT_KEY: &str = "admin_attempt";
pub const USER_KEY: &str = "user";
pub const API_KEYS_KEY: &str = "api_keys";
pub const ACTIVE_KEY: &str = "active_key";

/// Client-held record asserting the current user is authenticated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub authenticated: bool,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "uid")]
    pub subject_id: String,
    #[serde(rename = "email")]
    pub subject_email: String,
}

impl Session {
    pub fn issue(subject_id: &str, subject_email: &str, now: DateTime<Utc>) -> Self {
        Self {
            authenticated: true,
            issued_at: now,
            subject_id: subject_id.to_string(),
            subject_email: subject_email.to_string(),
        }
    }

    /// Valid while strictly younger than `ttl`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.authenticated && now >= self.issued_at && now - self.issued_at < ttl
    }

    pub fn expires_at(&self, ttl: chrono::Duration) -> DateTime<Utc> {
        self.issued_at + ttl
    }
}

pub struct SessionStore {
    storage: Box<dyn Storage>,
}

impl SessionStore {
    pub fn new(storage: impl Storage + 'static) -> Self {
        Self {
            storage: Box::new(storage),
        }
    }

    pub fn read<T: DeserializeOwned>(&self, key: &'static str) -> Result<Option<T>, StoreError> {
        match self.storage.get(key) {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { key, source }),
            None => Ok(None),
        }
    }

    pub fn write<T: Serialize>(&mut self, key: &'static str, value: &T) -> Result<(), StoreError> {
        let raw =
            serde_json::to_string(value).map_err(|source| StoreError::Encode { key, source })?;
        self.storage.set(key, raw)
    }

    pub fn remove(&mut self, key: &'static str) -> Result<(), StoreError> {
        self.storage.remove(key)
    }

    pub fn session(&self) -> Result<Option<Session>, StoreError> {
        self.read(SESSION_KEY)
    }

    pub fn save_session(&mut self, session: &Session) -> Result<(), StoreError> {
        self.write(SESSION_KEY, session)
    }

    /// Remove the session record entirely.
    pub fn purge_session(&mut self) -> Result<(), StoreError> {
        self.remove(SESSION_KEY)
    }

    pub fn login_revealed(&self) -> bool {
        self.read::<bool>(ADMIN_ATTEMPT_KEY)
            .ok()
            .flatten()
            .unwrap_or(false)
    }

    pub fn set_login_revealed(&mut self, revealed: bool) -> Result<(), StoreError> {
        if revealed {
            self.write(ADMIN_ATTEMPT_KEY, &true)
        } else {
            self.remove(ADMIN_ATTEMPT_KEY)
        }
    }

    pub fn user(&self) -> Result<Option<User>, StoreError> {
        self.read(USER_KEY)
    }

    pub fn save_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.write(USER_KEY, user)
    }

    pub fn active_key(&self) -> Option<String> {
        self.read::<String>(ACTIVE_KEY).ok().flatten()
    }

    pub fn set_active_key(&mut self, value: Option<&str>) -> Result<(), StoreError> {
        match value {
            Some(value) => self.write(ACTIVE_KEY, &value),
            None => self.remove(ACTIVE_KEY),
        }
    }

    /// Drop every piece of client state: session, user, keys and flags.
    pub fn clear_all(&mut self) -> Result<(), StoreError> {
        self.storage.clear()
    }
}
