//! Per-client session state.
//!
//! A `Session` is a bag of named JSON attributes keyed by a `SessionId`.
//! Single reads and writes go through the convenience methods on `Session`;
//! any read-modify-write spanning more than one attribute must happen inside
//! `Session::lock()`, which hands out a `SessionGuard` holding the session's
//! mutex for the whole critical section.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::debug;

use crate::auth::error::SessionError;
use crate::types::SessionId;

/// Cached `CachedAuthentication` of the logged-in principal.
pub const AUTHENTICATED: &str = "gatekeeper.authenticated";
/// Raw user-info claims returned by the provider.
pub const USER_INFO: &str = "gatekeeper.user_info";
/// Full URL (with query) of the request that triggered the challenge.
pub const ORIGINAL_URI: &str = "gatekeeper.original_uri";
/// HTTP method of the request that triggered the challenge.
pub const ORIGINAL_METHOD: &str = "gatekeeper.original_method";
/// Decoded form parameters of a challenged form POST.
pub const ORIGINAL_FORM: &str = "gatekeeper.original_form";
/// Anti-forgery token of the pending login attempt.
pub const CSRF_TOKEN: &str = "gatekeeper.csrf_token";

/// Server-side state shared by every request carrying the same session id.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    /// Unix timestamp (seconds) of the last lookup.
    last_accessed: AtomicI64,
    attributes: Mutex<HashMap<String, Value>>,
}

impl Session {
    /// Create an empty session.
    pub fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_accessed: AtomicI64::new(now.timestamp()),
            attributes: Mutex::new(HashMap::new()),
        }
    }

    /// Identifier of this session.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last time the session was looked up by the store.
    pub fn last_accessed(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_accessed.load(Ordering::Relaxed), 0)
            .unwrap_or(self.created_at)
    }

    fn touch(&self) {
        self.last_accessed
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// Acquire exclusive access to the session attributes.
    ///
    /// Concurrent requests on the same session serialize here.
    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            attributes: self.attributes.lock().await,
        }
    }

    /// Read and decode a single attribute.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        self.lock().await.get(key)
    }

    /// Encode and store a single attribute.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SessionError> {
        self.lock().await.set(key, value)
    }

    /// Remove a single attribute.
    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.lock().await.remove(key)
    }

    /// Whether an attribute is present.
    pub async fn contains(&self, key: &str) -> bool {
        self.lock().await.contains(key)
    }
}

/// Exclusive view over a session's attributes.
pub struct SessionGuard<'a> {
    attributes: MutexGuard<'a, HashMap<String, Value>>,
}

impl SessionGuard<'_> {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SessionError> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| SessionError::Decode {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), SessionError> {
        let value = serde_json::to_value(value).map_err(|e| SessionError::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.attributes.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }
}

/// Storage of sessions keyed by client-supplied identifier.
pub trait SessionStore: Send + Sync {
    /// Look up an existing session. Returns `None` for unknown or expired ids.
    fn get(&self, id: &SessionId) -> Pin<Box<dyn Future<Output = Option<Arc<Session>>> + Send + '_>>;

    /// Create and register a new, empty session.
    fn create(&self) -> Pin<Box<dyn Future<Output = Arc<Session>> + Send + '_>>;

    /// Drop a session and all of its attributes.
    fn invalidate(&self, id: &SessionId) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// The session bound to the current request, created on demand.
///
/// The HTTP adapter seeds the slot from the session cookie; the
/// authenticator fills it when a challenge needs a session that does not
/// exist yet, and `is_new` tells the adapter to issue the cookie.
#[derive(Debug, Default)]
pub struct SessionSlot {
    session: Option<Arc<Session>>,
    created: bool,
}

impl SessionSlot {
    pub fn new(session: Option<Arc<Session>>) -> Self {
        Self {
            session,
            created: false,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The session, if one exists. Never creates.
    pub fn get(&self) -> Option<&Arc<Session>> {
        self.session.as_ref()
    }

    /// The session, creating one in `store` if the request had none.
    pub async fn get_or_create(&mut self, store: &dyn SessionStore) -> Arc<Session> {
        if let Some(session) = &self.session {
            return session.clone();
        }

        let session = store.create().await;
        self.session = Some(session.clone());
        self.created = true;
        session
    }

    /// Whether the session was created while handling this request.
    pub fn is_new(&self) -> bool {
        self.created
    }
}

/// Default idle lifetime of a session (30 minutes).
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 1800;

/// Process-local session store with idle expiry.
///
/// Expired sessions are dropped lazily on lookup; call `purge_expired`
/// periodically to reclaim sessions that are never looked up again.
#[derive(Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
    ttl: TimeDelta,
}

impl InMemorySessionStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            // Out-of-range TTLs saturate instead of panicking
            ttl: i64::try_from(ttl_seconds)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX),
        }
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session
            .last_accessed()
            .checked_add_signed(self.ttl)
            .is_some_and(|deadline| deadline < now)
    }

    /// Number of live sessions (expired ones included until purged).
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove expired sessions. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let initial_len = sessions.len();

        sessions.retain(|_, session| !self.is_expired(session, now));

        let purged = initial_len - sessions.len();
        if purged > 0 {
            debug!("Purged {} expired sessions", purged);
        }
        purged
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL_SECONDS)
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &SessionId) -> Pin<Box<dyn Future<Output = Option<Arc<Session>>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move {
            let session = self.sessions.read().await.get(&id).cloned()?;

            if self.is_expired(&session, Utc::now()) {
                debug!("Session {} expired", id.fingerprint());
                self.sessions.write().await.remove(&id);
                return None;
            }

            session.touch();
            Some(session)
        })
    }

    fn create(&self) -> Pin<Box<dyn Future<Output = Arc<Session>> + Send + '_>> {
        Box::pin(async move {
            let session = Arc::new(Session::new(SessionId::generate()));
            debug!("Created session {}", session.id().fingerprint());
            self.sessions
                .write()
                .await
                .insert(session.id().clone(), session.clone());
            session
        })
    }

    fn invalidate(&self, id: &SessionId) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move {
            self.sessions.write().await.remove(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_attribute_round_trip() {
        let session = Session::new(SessionId::new("s1"));

        assert_eq!(session.get::<String>(ORIGINAL_URI).await.unwrap(), None);
        session
            .set(ORIGINAL_URI, &"http://localhost/a?b=1".to_string())
            .await
            .unwrap();
        assert_eq!(
            session.get::<String>(ORIGINAL_URI).await.unwrap(),
            Some("http://localhost/a?b=1".to_string())
        );
        assert!(session.contains(ORIGINAL_URI).await);

        assert!(session.remove(ORIGINAL_URI).await.is_some());
        assert!(!session.contains(ORIGINAL_URI).await);
        assert!(session.remove(ORIGINAL_URI).await.is_none());
    }

    #[tokio::test]
    async fn test_session_decode_error() {
        let session = Session::new(SessionId::new("s1"));
        session.set(ORIGINAL_METHOD, &42u32).await.unwrap();

        let err = session.get::<Vec<String>>(ORIGINAL_METHOD).await.unwrap_err();
        assert!(matches!(err, SessionError::Decode { ref key, .. } if key == ORIGINAL_METHOD));
    }

    #[tokio::test]
    async fn test_guard_is_exclusive() {
        let session = Arc::new(Session::new(SessionId::new("s1")));

        let mut guard = session.lock().await;
        guard.set(CSRF_TOKEN, &"T1").unwrap();

        let other = session.clone();
        let waiter = tokio::spawn(async move { other.get::<String>(CSRF_TOKEN).await });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        guard.set(CSRF_TOKEN, &"T2").unwrap();
        drop(guard);

        assert_eq!(waiter.await.unwrap().unwrap(), Some("T2".to_string()));
    }

    #[tokio::test]
    async fn test_store_create_and_get() {
        let store = InMemorySessionStore::default();
        let session = store.create().await;

        let found = store.get(session.id()).await.expect("session should exist");
        assert!(Arc::ptr_eq(&session, &found));
        assert!(store.get(&SessionId::new("unknown")).await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_slot_creates_once() {
        let store = InMemorySessionStore::default();
        let mut slot = SessionSlot::empty();
        assert!(slot.get().is_none());

        let first = slot.get_or_create(&store).await;
        let second = slot.get_or_create(&store).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert!(slot.is_new());
        assert_eq!(store.len().await, 1);

        let existing = SessionSlot::new(Some(first));
        assert!(!existing.is_new());
    }

    #[tokio::test]
    async fn test_store_invalidate() {
        let store = InMemorySessionStore::default();
        let session = store.create().await;

        store.invalidate(session.id()).await;
        assert!(store.get(session.id()).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_expiry() {
        let store = InMemorySessionStore::new(0);
        let session = store.create().await;
        session
            .last_accessed
            .store(Utc::now().timestamp() - 10, Ordering::Relaxed);

        assert!(store.get(session.id()).await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_with_unbounded_ttl() {
        let store = InMemorySessionStore::new(u64::MAX);
        let session = store.create().await;
        session
            .last_accessed
            .store(Utc::now().timestamp() - 86_400, Ordering::Relaxed);

        assert!(store.get(session.id()).await.is_some());
        assert_eq!(store.purge_expired().await, 0);

        let store = InMemorySessionStore::new(i64::MAX as u64);
        let session = store.create().await;
        assert!(store.get(session.id()).await.is_some());
    }

    #[tokio::test]
    async fn test_store_purge_expired() {
        let store = InMemorySessionStore::new(60);
        let stale = store.create().await;
        let _fresh = store.create().await;
        stale
            .last_accessed
            .store(Utc::now().timestamp() - 120, Ordering::Relaxed);

        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }
}
