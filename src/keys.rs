//! API key lifecycle: create, reveal/mask, copy, delete and server sync.
//!
//! Keys the backend could not confirm are kept usable but carry
//! `KeyOrigin::Local`, and every caller reports them as non-authoritative.

use crate::api::{ApiError, ApiKeyRecord, MovieApi};
use crate::prompt::Prompt;
use crate::session::{SessionStore, API_KEYS_KEY};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

const LOCAL_SUFFIX_LEN: usize = 26;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no API key with id '{0}'")]
    Unknown(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyOrigin {
    Server,
    /// Generated on this machine after the backend could not issue one
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub origin: KeyOrigin,
}

impl ApiKey {
    pub fn is_authoritative(&self) -> bool {
        self.origin == KeyOrigin::Server
    }

    pub fn masked(&self) -> String {
        "•".repeat(self.value.chars().count())
    }
}

/// Short SHA-256 prefix, safe to log in place of the key itself.
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..12].to_string()
}

/// Pseudo-random fallback key. Not suitable as a real credential.
pub fn generate_local_value(prefix: &str, rng: &mut impl Rng) -> String {
    let suffix: String = (0..LOCAL_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}{}", prefix, suffix)
}

/// What the backend said about a key change.
#[derive(Debug)]
pub enum BackendSync {
    Confirmed,
    /// No backend call was made (no user, or a key the backend never issued)
    LocalOnly,
    /// A server key whose backend id could not be found; nothing was sent
    Unresolved,
    Failed(ApiError),
}

impl BackendSync {
    pub fn label(&self) -> &'static str {
        match self {
            BackendSync::Confirmed => "confirmed",
            BackendSync::LocalOnly => "local_only",
            BackendSync::Unresolved => "unresolved",
            BackendSync::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub struct CreateOutcome {
    pub key: ApiKey,
    pub backend: BackendSync,
}

#[derive(Debug)]
pub enum DeleteOutcome {
    Cancelled,
    Removed { key: ApiKey, backend: BackendSync },
}

#[derive(Debug, Default)]
pub struct KeyRing {
    keys: Vec<ApiKey>,
    revealed: HashSet<String>,
}

impl KeyRing {
    pub fn load(store: &SessionStore) -> Self {
        let keys = match store.read::<Vec<ApiKey>>(API_KEYS_KEY) {
            Ok(keys) => keys.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable key list");
                Vec::new()
            }
        };
        Self {
            keys,
            revealed: HashSet::new(),
        }
    }

    pub fn keys(&self) -> &[ApiKey] {
        &self.keys
    }

    pub fn get(&self, id: &str) -> Option<&ApiKey> {
        self.keys.iter().find(|k| k.id == id)
    }

    fn require(&self, id: &str) -> Result<&ApiKey, KeyError> {
        self.get(id).ok_or_else(|| KeyError::Unknown(id.to_string()))
    }

    fn save(&self, store: &mut SessionStore) -> Result<(), StoreError> {
        store.write(API_KEYS_KEY, &self.keys)
    }

    fn next_id(&self, stem: &str) -> String {
        let mut n = self.keys.len() + 1;
        loop {
            let id = format!("{}_{}", stem, n);
            if self.get(&id).is_none() {
                return id;
            }
            n += 1;
        }
    }

    /// Point the active key at the first remaining key when the current one is gone.
    fn settle_active(&self, store: &mut SessionStore) -> Result<(), StoreError> {
        let current = store.active_key();
        let still_present = current
            .as_deref()
            .is_some_and(|value| self.keys.iter().any(|k| k.value == value));
        if !still_present {
            let next = self.keys.iter().find(|k| k.active).map(|k| k.value.as_str());
            store.set_active_key(next)?;
        }
        Ok(())
    }

    pub fn is_revealed(&self, id: &str) -> bool {
        self.revealed.contains(id)
    }

    /// Flip display masking for one key. Returns the new reveal state.
    pub fn toggle_reveal(&mut self, id: &str) -> Result<bool, KeyError> {
        self.require(id)?;
        if self.revealed.remove(id) {
            Ok(false)
        } else {
            self.revealed.insert(id.to_string());
            Ok(true)
        }
    }

    pub fn display_value(&self, key: &ApiKey) -> String {
        if self.is_revealed(&key.id) {
            key.value.clone()
        } else {
            key.masked()
        }
    }

    pub fn copy_value(&self, id: &str) -> Result<&str, KeyError> {
        Ok(self.require(id)?.value.as_str())
    }

    /// Ask the backend for a new key, falling back to a locally generated one.
    pub fn create(
        &mut self,
        api: &dyn MovieApi,
        user_id: Option<&str>,
        prefix: &str,
        store: &mut SessionStore,
        now: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> Result<CreateOutcome, KeyError> {
        let issued = match user_id {
            Some(user_id) => api.create_api_key(user_id).map(|created| created.api_key),
            None => Err(ApiError::Unauthorized {
                status: 0,
                message: "no backend user is signed in".to_string(),
            }),
        };

        let (value, origin, backend) = match issued {
            Ok(value) => (value, KeyOrigin::Server, BackendSync::Confirmed),
            Err(e) => {
                tracing::warn!(error = %e, "backend did not issue a key, generating a local one");
                let backend = if user_id.is_some() {
                    BackendSync::Failed(e)
                } else {
                    BackendSync::LocalOnly
                };
                (generate_local_value(prefix, rng), KeyOrigin::Local, backend)
            }
        };

        // The create endpoint only returns the value; the id comes from the listing.
        let id = match origin {
            KeyOrigin::Server => user_id
                .and_then(|user_id| match lookup_server_id(api, user_id, &value) {
                    Ok(found) => found,
                    Err(e) => {
                        tracing::warn!(error = %e, "could not look up the id of the new key");
                        None
                    }
                })
                .filter(|id| self.get(id).is_none())
                .unwrap_or_else(|| self.next_id("key")),
            KeyOrigin::Local => self.next_id("local"),
        };
        let key = ApiKey {
            name: format!("API Key {}", self.keys.len() + 1),
            id,
            value,
            created_at: now,
            active: true,
            origin,
        };

        self.keys.push(key.clone());
        self.save(store)?;
        self.settle_active(store)?;
        Ok(CreateOutcome { key, backend })
    }

    /// Confirm, ask the backend to delete, then drop the key locally no matter
    /// what the backend answered.
    pub fn delete(
        &mut self,
        id: &str,
        api: &dyn MovieApi,
        user_id: Option<&str>,
        prompt: &dyn Prompt,
        store: &mut SessionStore,
    ) -> Result<DeleteOutcome, KeyError> {
        let key = self.require(id)?.clone();

        let question = format!("Delete API key '{}' ({})?", key.name, key.id);
        if !prompt.confirm(&question) {
            return Ok(DeleteOutcome::Cancelled);
        }

        let backend = match (key.origin, user_id) {
            (KeyOrigin::Server, Some(user_id)) => match server_id(api, user_id, &key) {
                Ok(Some(server_id)) => match api.delete_api_key(user_id, &server_id) {
                    Ok(_) => BackendSync::Confirmed,
                    Err(e) => {
                        tracing::warn!(key = %key.id, error = %e, "backend delete failed, removing locally");
                        BackendSync::Failed(e)
                    }
                },
                Ok(None) => {
                    tracing::warn!(key = %key.id, "backend has no id for this key, removing locally");
                    BackendSync::Unresolved
                }
                Err(e) => {
                    tracing::warn!(key = %key.id, error = %e, "could not resolve backend id, removing locally");
                    BackendSync::Failed(e)
                }
            },
            _ => BackendSync::LocalOnly,
        };

        self.keys.retain(|k| k.id != key.id);
        self.revealed.remove(&key.id);
        self.save(store)?;
        self.settle_active(store)?;
        Ok(DeleteOutcome::Removed { key, backend })
    }

    /// Replace server-origin keys with the backend's active list; local keys stay.
    pub fn sync_server(
        &mut self,
        records: &[ApiKeyRecord],
        store: &mut SessionStore,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut keys: Vec<ApiKey> = records
            .iter()
            .filter(|r| r.is_active)
            .enumerate()
            .map(|(i, record)| ApiKey {
                id: record.id.clone(),
                name: format!("API Key {}", i + 1),
                value: record.api_key.clone(),
                created_at: parse_timestamp(record.created_at.as_deref()).unwrap_or(now),
                active: true,
                origin: KeyOrigin::Server,
            })
            .collect();
        keys.extend(
            self.keys
                .iter()
                .filter(|k| k.origin == KeyOrigin::Local)
                .cloned(),
        );

        self.keys = keys;
        let ids: HashSet<&str> = self.keys.iter().map(|k| k.id.as_str()).collect();
        self.revealed.retain(|id| ids.contains(id.as_str()));
        self.save(store)?;
        self.settle_active(store)
    }

    /// Adopt bare key values (as returned by login) as server keys.
    pub fn adopt_server_values(
        &mut self,
        values: &[String],
        store: &mut SessionStore,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        for value in values {
            if self.keys.iter().any(|k| &k.value == value) {
                continue;
            }
            let key = ApiKey {
                id: self.next_id("key"),
                name: format!("API Key {}", self.keys.len() + 1),
                value: value.clone(),
                created_at: now,
                active: true,
                origin: KeyOrigin::Server,
            };
            self.keys.push(key);
        }
        self.save(store)?;
        self.settle_active(store)
    }

    /// Forget in-memory keys after the store has been cleared.
    pub fn reset(&mut self) {
        self.keys.clear();
        self.revealed.clear();
    }
}

/// Find the backend id of an active key by its value.
fn lookup_server_id(
    api: &dyn MovieApi,
    user_id: &str,
    value: &str,
) -> Result<Option<String>, ApiError> {
    let dashboard = api.dashboard(user_id)?;
    Ok(dashboard
        .api_keys
        .into_iter()
        .find(|record| record.is_active && record.api_key == value)
        .map(|record| record.id))
}

/// Backend ids are numeric; anything else was assigned here and must be looked up.
fn server_id(api: &dyn MovieApi, user_id: &str, key: &ApiKey) -> Result<Option<String>, ApiError> {
    if key.id.parse::<u64>().is_ok() {
        return Ok(Some(key.id.clone()));
    }
    lookup_server_id(api, user_id, &key.value)
}

/// Backends send RFC 3339 or HTTP-date (RFC 2822 style) timestamps.
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(&raw.replace("GMT", "+0000")))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::prompt::scripted::ScriptedPrompt;
    use crate::store::MemoryStorage;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 30, 0).unwrap()
    }

    fn store() -> SessionStore {
        SessionStore::new(MemoryStorage::new())
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn record(id: &str, value: &str) -> ApiKeyRecord {
        ApiKeyRecord {
            id: id.to_string(),
            api_key: value.to_string(),
            created_at: Some("Mon, 02 Mar 2026 10:00:00 GMT".to_string()),
            is_active: true,
        }
    }

    #[test]
    fn test_local_value_shape() {
        let value = generate_local_value("mk_live_", &mut rng());
        assert!(value.starts_with("mk_live_"));
        let suffix = &value["mk_live_".len()..];
        assert_eq!(suffix.len(), LOCAL_SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn test_create_uses_backend_key() {
        let api = FakeApi::default();
        let mut store = store();
        let mut ring = KeyRing::default();

        let outcome = ring
            .create(&api, Some("7"), "mk_live_", &mut store, now(), &mut rng())
            .unwrap();
        assert!(matches!(outcome.backend, BackendSync::Confirmed));
        assert_eq!(outcome.key.value, "mk_server_100");
        assert_eq!(outcome.key.id, "100");
        assert!(outcome.key.is_authoritative());
        assert_eq!(store.active_key().as_deref(), Some("mk_server_100"));
    }

    #[test]
    fn test_create_falls_back_to_flagged_local_key() {
        let api = FakeApi::offline();
        let mut store = store();
        let mut ring = KeyRing::default();

        let outcome = ring
            .create(&api, Some("7"), "mk_live_", &mut store, now(), &mut rng())
            .unwrap();
        assert!(matches!(outcome.backend, BackendSync::Failed(ref e) if e.is_transport()));
        assert_eq!(outcome.key.origin, KeyOrigin::Local);
        assert!(!outcome.key.is_authoritative());
        assert!(outcome.key.id.starts_with("local_"));

        let reloaded = KeyRing::load(&store);
        assert_eq!(reloaded.keys(), &[outcome.key]);
    }

    #[test]
    fn test_create_without_user_is_local_only() {
        let api = FakeApi::default();
        let mut store = store();
        let mut ring = KeyRing::default();

        let outcome = ring
            .create(&api, None, "mk_live_", &mut store, now(), &mut rng())
            .unwrap();
        assert!(matches!(outcome.backend, BackendSync::LocalOnly));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_reveal_only_changes_display() {
        let api = FakeApi::default();
        let mut store = store();
        let mut ring = KeyRing::default();
        let key = ring
            .create(&api, Some("7"), "mk_live_", &mut store, now(), &mut rng())
            .unwrap()
            .key;

        assert_eq!(ring.display_value(&key), "•".repeat(key.value.len()));
        assert!(ring.toggle_reveal(&key.id).unwrap());
        assert_eq!(ring.display_value(&key), key.value);
        assert!(!ring.toggle_reveal(&key.id).unwrap());

        assert_eq!(ring.get(&key.id).unwrap().value, key.value);
        assert_eq!(KeyRing::load(&store).get(&key.id).unwrap().value, key.value);
        assert!(matches!(ring.toggle_reveal("nope"), Err(KeyError::Unknown(_))));
    }

    #[test]
    fn test_delete_removes_even_when_backend_fails() {
        let api = FakeApi::default();
        let mut store = store();
        let mut ring = KeyRing::default();
        ring.sync_server(&[record("11", "mk_a"), record("12", "mk_b")], &mut store, now())
            .unwrap();

        api.offline.store(true, std::sync::atomic::Ordering::SeqCst);
        let outcome = ring
            .delete("11", &api, Some("7"), &ScriptedPrompt::yes(), &mut store)
            .unwrap();
        let DeleteOutcome::Removed { key, backend } = outcome else {
            panic!("expected removal");
        };
        assert_eq!(key.id, "11");
        assert!(matches!(backend, BackendSync::Failed(_)));
        assert!(ring.get("11").is_none());
        assert!(KeyRing::load(&store).get("11").is_none());
        assert_eq!(api.calls(), vec!["delete_api_key 7 11".to_string()]);
    }

    #[test]
    fn test_delete_confirmed_by_backend() {
        let api = FakeApi::default();
        let mut store = store();
        let mut ring = KeyRing::default();
        ring.sync_server(&[record("11", "mk_a")], &mut store, now())
            .unwrap();
        assert_eq!(store.active_key().as_deref(), Some("mk_a"));

        let outcome = ring
            .delete("11", &api, Some("7"), &ScriptedPrompt::yes(), &mut store)
            .unwrap();
        assert!(matches!(
            outcome,
            DeleteOutcome::Removed {
                backend: BackendSync::Confirmed,
                ..
            }
        ));
        assert!(ring.keys().is_empty());
        assert!(store.active_key().is_none());
    }

    #[test]
    fn test_declined_delete_keeps_key() {
        let api = FakeApi::default();
        let mut store = store();
        let mut ring = KeyRing::default();
        ring.sync_server(&[record("11", "mk_a")], &mut store, now())
            .unwrap();

        let outcome = ring
            .delete("11", &api, Some("7"), &ScriptedPrompt::no(), &mut store)
            .unwrap();
        assert!(matches!(outcome, DeleteOutcome::Cancelled));
        assert!(ring.get("11").is_some());
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_created_key_delete_reaches_backend_and_stays_gone() {
        let api = FakeApi::default();
        let mut store = store();
        let mut ring = KeyRing::default();
        let key = ring
            .create(&api, Some("7"), "mk_live_", &mut store, now(), &mut rng())
            .unwrap()
            .key;

        let outcome = ring
            .delete(&key.id, &api, Some("7"), &ScriptedPrompt::yes(), &mut store)
            .unwrap();
        assert!(matches!(
            outcome,
            DeleteOutcome::Removed {
                backend: BackendSync::Confirmed,
                ..
            }
        ));
        assert!(api.calls().contains(&"delete_api_key 7 100".to_string()));

        let listing = api.dashboard("7").unwrap();
        ring.sync_server(&listing.api_keys, &mut store, now()).unwrap();
        assert!(ring.keys().iter().all(|k| k.value != key.value));
        assert!(store.active_key().is_none());
    }

    #[test]
    fn test_adopted_key_without_backend_id_is_unresolved() {
        let api = FakeApi::default();
        let mut store = store();
        let mut ring = KeyRing::default();
        ring.adopt_server_values(&["mk_signup".to_string()], &mut store, now())
            .unwrap();
        let id = ring.keys()[0].id.clone();

        let outcome = ring
            .delete(&id, &api, Some("7"), &ScriptedPrompt::yes(), &mut store)
            .unwrap();
        assert!(matches!(
            outcome,
            DeleteOutcome::Removed {
                backend: BackendSync::Unresolved,
                ..
            }
        ));
        assert_eq!(api.calls(), vec!["dashboard 7".to_string()]);
        assert!(ring.keys().is_empty());
    }

    #[test]
    fn test_adopted_key_delete_looks_up_backend_id() {
        let api = FakeApi::default();
        let mut store = store();
        let mut ring = KeyRing::default();
        let issued = api.create_api_key("7").unwrap().api_key;
        ring.adopt_server_values(&[issued], &mut store, now()).unwrap();
        let id = ring.keys()[0].id.clone();
        assert!(id.starts_with("key_"));

        ring.delete(&id, &api, Some("7"), &ScriptedPrompt::yes(), &mut store)
            .unwrap();
        assert_eq!(
            api.calls(),
            vec![
                "create_api_key 7".to_string(),
                "dashboard 7".to_string(),
                "delete_api_key 7 100".to_string(),
            ]
        );
        assert!(api.dashboard("7").unwrap().api_keys.is_empty());
    }

    #[test]
    fn test_local_key_delete_skips_backend() {
        let api = FakeApi::offline();
        let mut store = store();
        let mut ring = KeyRing::default();
        let key = ring
            .create(&api, Some("7"), "mk_live_", &mut store, now(), &mut rng())
            .unwrap()
            .key;

        let outcome = ring
            .delete(&key.id, &api, Some("7"), &ScriptedPrompt::yes(), &mut store)
            .unwrap();
        assert!(matches!(
            outcome,
            DeleteOutcome::Removed {
                backend: BackendSync::LocalOnly,
                ..
            }
        ));
        assert_eq!(api.calls(), vec!["create_api_key 7".to_string()]);
    }

    #[test]
    fn test_sync_keeps_local_keys_and_drops_inactive() {
        let api = FakeApi::offline();
        let mut store = store();
        let mut ring = KeyRing::default();
        let local = ring
            .create(&api, Some("7"), "mk_live_", &mut store, now(), &mut rng())
            .unwrap()
            .key;

        let mut inactive = record("13", "mk_old");
        inactive.is_active = false;
        ring.sync_server(&[record("12", "mk_b"), inactive], &mut store, now())
            .unwrap();

        let ids: Vec<&str> = ring.keys().iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec!["12", local.id.as_str()]);
        let created = ring.get("12").unwrap().created_at;
        assert_eq!(created, Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_adopt_server_values_skips_duplicates() {
        let mut store = store();
        let mut ring = KeyRing::default();
        let values = vec!["mk_one".to_string(), "mk_two".to_string()];
        ring.adopt_server_values(&values, &mut store, now()).unwrap();
        ring.adopt_server_values(&values, &mut store, now()).unwrap();
        assert_eq!(ring.keys().len(), 2);
        assert_eq!(store.active_key().as_deref(), Some("mk_one"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = fingerprint("mk_live_secret");
        assert_eq!(a.len(), 12);
        assert_eq!(a, fingerprint("mk_live_secret"));
        assert_ne!(a, fingerprint("mk_live_other"));
        assert!(!a.contains("secret"));
    }
}
