//! Server-side sessions keyed by a cookie-carried token.
//!
//! A [`SessionStore`] resolves the session cookie of a request into a
//! [`Session`] handle, creating a fresh session when the cookie is absent,
//! forged or expired. The `Set-Cookie` instruction is deferred until the
//! response head is written, so handlers running later in the chain can
//! still regenerate or invalidate the session.

pub mod backend;
mod cookie;
pub mod store;
mod token;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

pub use backend::{MemoryBackend, SessionBackend, SessionRecord};
pub use store::SessionStore;

/// Handle to one session, valid for the request that opened it.
///
/// Clones share state: a handle attached to the response sees the token
/// changes and cookie instructions made through any other clone.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    store_id: u64,
    cookie_name: String,
    token: Mutex<String>,
    cookie: Mutex<Option<String>>,
    invalidated: AtomicBool,
}

impl Session {
    pub(crate) fn new(store_id: u64, cookie_name: &str, token: String) -> Self {
        Self {
            inner: Arc::new(Inner {
                store_id,
                cookie_name: cookie_name.to_string(),
                token: Mutex::new(token),
                cookie: Mutex::new(None),
                invalidated: AtomicBool::new(false),
            }),
        }
    }

    /// The opaque token naming this session in the store.
    pub fn token(&self) -> String {
        self.inner.token.lock().clone()
    }

    pub fn cookie_name(&self) -> &str {
        &self.inner.cookie_name
    }

    /// True once the session was invalidated; it no longer holds data.
    pub fn is_invalidated(&self) -> bool {
        self.inner.invalidated.load(Ordering::Acquire)
    }

    /// Whether both handles refer to the same opened session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Takes the pending `Set-Cookie` value, if any. Called once the
    /// response head is serialized.
    pub(crate) fn take_cookie_directive(&self) -> Option<String> {
        self.inner.cookie.lock().take()
    }

    pub(crate) fn store_id(&self) -> u64 {
        self.inner.store_id
    }

    pub(crate) fn set_cookie_directive(&self, directive: String) {
        *self.inner.cookie.lock() = Some(directive);
    }

    pub(crate) fn replace_token(&self, token: String) {
        *self.inner.token.lock() = token;
    }

    pub(crate) fn mark_invalidated(&self) {
        self.inner.invalidated.store(true, Ordering::Release);
    }
}
