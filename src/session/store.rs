use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{Expiry, SessionConfig};
use crate::http::request::Request;
use crate::http::response::{Response, ResponseState};
use crate::session::backend::{MemoryBackend, SessionBackend, SessionRecord};
use crate::session::{Session, cookie, token};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Issues, resolves and expires sessions.
///
/// Share it between handlers behind an `Arc`. All operations are safe to
/// call from concurrently served requests.
pub struct SessionStore {
    id: u64,
    config: SessionConfig,
    backend: Arc<dyn SessionBackend>,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_backend(config, Arc::new(MemoryBackend::new()))
    }

    pub fn with_backend(config: SessionConfig, backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            config,
            backend,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of records held, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    /// Resolves the request's session, creating one if needed.
    ///
    /// A cookie naming a live session resumes it. Anything else (no cookie,
    /// a bad signature, an unknown or expired token) starts a new session
    /// under a freshly generated token; client-chosen tokens are never
    /// adopted. Calling `open` again for the same response returns the
    /// same session.
    pub fn open(&self, req: &Request, resp: &mut Response) -> Session {
        if let Some(existing) = resp
            .sessions()
            .iter()
            .find(|s| s.store_id() == self.id && s.cookie_name() == self.config.cookie_name)
        {
            return existing.clone();
        }

        if resp.state() != ResponseState::NotStarted {
            tracing::warn!(
                cookie = %self.config.cookie_name,
                "session opened after the response head was written; cookie will not be sent"
            );
        }

        let now = Instant::now();
        let session = match self.resolve_cookie(req, now) {
            Some((token, expires_at)) => {
                let session = Session::new(self.id, &self.config.cookie_name, token);
                if self.config.expiry == Expiry::Sliding {
                    session.set_cookie_directive(self.issue_cookie(&session, expires_at, now));
                }
                session
            }
            None => {
                let session = self.create(now);
                tracing::debug!(peer = ?req.remote_addr(), "session created");
                session
            }
        };

        resp.attach_session(session.clone());
        session
    }

    fn resolve_cookie(&self, req: &Request, now: Instant) -> Option<(String, Instant)> {
        let value = cookie::find(req.headers(), &self.config.cookie_name)?;
        let token = match &self.config.mac_secret {
            Some(secret) => token::verify(secret.as_bytes(), value)?,
            None => value,
        };
        if token.is_empty() {
            return None;
        }

        let extend_to = match self.config.expiry {
            Expiry::Sliding => Some(now + self.config.timeout()),
            Expiry::Absolute => None,
        };
        let expires_at = self.backend.resolve(token, now, extend_to)?;
        Some((token.to_string(), expires_at))
    }

    fn create(&self, now: Instant) -> Session {
        let expires_at = now + self.config.timeout();
        let token = token::generate();
        self.backend.insert(&token, SessionRecord::new(expires_at));

        let session = Session::new(self.id, &self.config.cookie_name, token);
        session.set_cookie_directive(self.issue_cookie(&session, expires_at, now));
        session
    }

    fn issue_cookie(&self, session: &Session, expires_at: Instant, now: Instant) -> String {
        let token = session.token();
        let value = match &self.config.mac_secret {
            Some(secret) => token::sign(secret.as_bytes(), &token),
            None => token,
        };
        let max_age = expires_at.saturating_duration_since(now).as_secs();
        cookie::issue(&self.config, &value, max_age)
    }

    pub fn get(&self, session: &Session, key: &str) -> Option<Value> {
        self.backend.get(&session.token(), key, Instant::now())
    }

    /// Stores `value` under `key`. Returns false if the session has expired
    /// or was invalidated.
    pub fn set(&self, session: &Session, key: impl Into<String>, value: impl Into<Value>) -> bool {
        self.backend
            .set(&session.token(), key.into(), value.into(), Instant::now())
    }

    pub fn remove(&self, session: &Session, key: &str) -> Option<Value> {
        self.backend.remove(&session.token(), key, Instant::now())
    }

    pub fn contains(&self, session: &Session, key: &str) -> bool {
        self.get(session, key).is_some()
    }

    pub fn keys(&self, session: &Session) -> Vec<String> {
        let mut keys: Vec<String> = self
            .snapshot(session)
            .map(|data| data.into_keys().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// A copy of the session's data at this instant.
    pub fn snapshot(&self, session: &Session) -> Option<HashMap<String, Value>> {
        self.backend.snapshot(&session.token(), Instant::now())
    }

    /// Forgets the session and tells the client to drop its cookie.
    pub fn invalidate(&self, session: &Session) {
        self.backend.take(&session.token(), Instant::now());
        session.mark_invalidated();
        session.set_cookie_directive(cookie::clear(&self.config));
        tracing::debug!(cookie = %self.config.cookie_name, "session invalidated");
    }

    /// Moves the session's data under a new token and re-issues the cookie.
    ///
    /// Call this when the session gains privileges (a login) so a token the
    /// client held before can no longer reach the elevated session.
    /// Returns false if the session had already expired.
    pub fn regenerate(&self, session: &Session) -> bool {
        let now = Instant::now();
        let Some(mut record) = self.backend.take(&session.token(), now) else {
            return false;
        };

        if self.config.expiry == Expiry::Sliding {
            record.expires_at = now + self.config.timeout();
        }
        let expires_at = record.expires_at;
        let fresh = token::generate();
        self.backend.insert(&fresh, record);

        session.replace_token(fresh);
        session.set_cookie_directive(self.issue_cookie(session, expires_at, now));
        tracing::debug!(cookie = %self.config.cookie_name, "session token regenerated");
        true
    }

    /// Drops expired records now.
    pub fn sweep(&self) -> usize {
        self.backend.sweep(Instant::now())
    }

    /// Sweeps expired records periodically until `shutdown` flips or its
    /// sender goes away.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        let period = store.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "expired sessions swept");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
