//! Admin credential check against the configured allow-list.
//!
//! This runs entirely on the client and only decides whether the local
//! console shows admin commands. The backend still authorizes every request
//! by its `X-API-Key`.

use crate::config::AdminConfig;
use crate::session::{Session, SessionStore};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Shown for any rejected credential; never says which part was wrong.
pub const ACCESS_DENIED: &str = "Access denied: invalid admin credentials";
/// Backend sign-in refusal; the backend's own detail is only logged.
pub const ACCOUNT_ACCESS_DENIED: &str = "Access denied";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Enter a UID or email")]
    Empty,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Granted(Session),
    Denied,
}

pub struct CredentialCheck<'a> {
    admin: &'a AdminConfig,
}

impl<'a> CredentialCheck<'a> {
    pub fn new(admin: &'a AdminConfig) -> Self {
        Self { admin }
    }

    /// Compare `input` to the allow-list and, on a match, persist a new session.
    pub fn submit(
        &self,
        input: &str,
        store: &mut SessionStore,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, CredentialError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CredentialError::Empty);
        }

        if !self.admin.allow.iter().any(|allowed| allowed == input) {
            tracing::info!("admin credential rejected");
            return Ok(CheckOutcome::Denied);
        }

        let session = Session::issue(&self.admin.subject_id, &self.admin.subject_email, now);
        store.save_session(&session)?;
        store.set_login_revealed(false)?;
        tracing::info!(subject = %session.subject_id, "admin session issued");
        Ok(CheckOutcome::Granted(session))
    }
}
