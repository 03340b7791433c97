//! Auth gate in front of protected commands (dashboard, keys, catalog admin).

use crate::session::{Session, SessionStore};
use crate::store::StoreError;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum GateView {
    /// No usable session. The login prompt stays hidden until the
    /// `administration` trigger has been used.
    Restricted { login_revealed: bool },
    Protected(Session),
}

impl GateView {
    pub fn session(&self) -> Option<&Session> {
        match self {
            GateView::Protected(session) => Some(session),
            GateView::Restricted { .. } => None,
        }
    }
}

pub struct AuthGate {
    ttl: chrono::Duration,
}

impl AuthGate {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self { ttl }
    }

    /// Decide what to show at `now`. Expired, unauthenticated, future-dated or
    /// malformed records are purged before returning the restricted view.
    pub fn evaluate(
        &self,
        store: &mut SessionStore,
        now: DateTime<Utc>,
    ) -> Result<GateView, StoreError> {
        let session = match store.session() {
            Ok(Some(session)) => session,
            Ok(None) => return Ok(self.restricted(store)),
            Err(StoreError::Corrupt { source, .. }) => {
                tracing::warn!(error = %source, "purging malformed session record");
                store.purge_session()?;
                return Ok(self.restricted(store));
            }
            Err(e) => return Err(e),
        };

        if session.is_valid_at(now, self.ttl) {
            return Ok(GateView::Protected(session));
        }

        let age_hours = (now - session.issued_at).num_minutes() as f64 / 60.0;
        tracing::info!(
            subject = %session.subject_id,
            age_hours,
            "session no longer valid, purging"
        );
        store.purge_session()?;
        Ok(self.restricted(store))
    }

    /// Hidden trigger that reveals the login prompt on the restricted view.
    pub fn reveal_login(&self, store: &mut SessionStore) -> Result<(), StoreError> {
        store.set_login_revealed(true)
    }

    fn restricted(&self, store: &SessionStore) -> GateView {
        GateView::Restricted {
            login_revealed: store.login_revealed(),
        }
    }
}
