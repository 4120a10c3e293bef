use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wicket::config::{Expiry, SessionConfig};
use wicket::http::request::{Method, Request, RequestBuilder, Version};
use wicket::http::response::{Response, StatusCode};
use wicket::session::{MemoryBackend, SessionBackend, SessionStore};

fn request(cookie: Option<&str>) -> Request {
    let mut builder = RequestBuilder::new().method(Method::GET).target("/");
    if let Some(cookie) = cookie {
        builder = builder.header("Cookie", cookie);
    }
    builder.build().unwrap()
}

fn response() -> Response {
    Response::new(Version::Http11, Method::GET, true)
}

/// Sends the response and returns its Set-Cookie values.
fn set_cookies(resp: &mut Response) -> Vec<String> {
    resp.send(StatusCode::Ok, "").unwrap();
    resp.headers()
        .get_all("Set-Cookie")
        .map(str::to_string)
        .collect()
}

/// The cookie pair (`SID=...`) of a Set-Cookie value.
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().to_string()
}

#[test]
fn test_open_creates_session_and_schedules_cookie() {
    let store = SessionStore::new(SessionConfig::default());
    let req = request(None);
    let mut resp = response();

    let session = store.open(&req, &mut resp);
    assert_eq!(store.len(), 1);
    assert!(resp.headers().get("Set-Cookie").is_none());

    let cookies = set_cookies(&mut resp);
    assert_eq!(
        cookies,
        vec![format!("SID={}; Max-Age=900; Path=/; HttpOnly", session.token())]
    );
}

#[test]
fn test_open_twice_returns_same_session() {
    let store = SessionStore::new(SessionConfig::default());
    let req = request(None);
    let mut resp = response();

    let first = store.open(&req, &mut resp);
    let second = store.open(&req, &mut resp);

    assert!(first.ptr_eq(&second));
    assert_eq!(store.len(), 1);
    assert_eq!(set_cookies(&mut resp).len(), 1);
}

#[test]
fn test_cookie_resumes_session() {
    let store = SessionStore::new(SessionConfig::default());

    let mut resp = response();
    let session = store.open(&request(None), &mut resp);
    store.set(&session, "user", "tux");
    let cookie = cookie_pair(&set_cookies(&mut resp)[0]);

    let mut resp = response();
    let resumed = store.open(&request(Some(&format!("theme=dark; {cookie}"))), &mut resp);

    assert_eq!(resumed.token(), session.token());
    assert_eq!(store.get(&resumed, "user"), Some(json!("tux")));
    assert_eq!(store.len(), 1);
    // Sliding expiry re-issues the cookie.
    assert_eq!(set_cookies(&mut resp).len(), 1);
}

#[test]
fn test_absolute_expiry_does_not_reissue_cookie() {
    let store = SessionStore::new(SessionConfig {
        expiry: Expiry::Absolute,
        ..SessionConfig::default()
    });

    let mut resp = response();
    store.open(&request(None), &mut resp);
    let cookie = cookie_pair(&set_cookies(&mut resp)[0]);

    let mut resp = response();
    store.open(&request(Some(&cookie)), &mut resp);
    assert!(set_cookies(&mut resp).is_empty());
}

#[test]
fn test_unknown_token_is_never_adopted() {
    let store = SessionStore::new(SessionConfig::default());
    let mut resp = response();

    let session = store.open(&request(Some("SID=attacker-chosen")), &mut resp);

    assert_ne!(session.token(), "attacker-chosen");
    assert_eq!(store.len(), 1);
    let cookies = set_cookies(&mut resp);
    assert!(cookies[0].starts_with(&format!("SID={};", session.token())));
}

#[test]
fn test_values_round_trip() {
    let store = SessionStore::new(SessionConfig::default());
    let session = store.open(&request(None), &mut response());

    assert!(store.set(&session, "count", 3));
    assert!(store.set(&session, "cart", json!({"items": [1, 2]})));

    assert_eq!(store.get(&session, "count"), Some(json!(3)));
    assert!(store.contains(&session, "cart"));
    assert_eq!(store.keys(&session), vec!["cart".to_string(), "count".to_string()]);

    assert_eq!(store.remove(&session, "count"), Some(json!(3)));
    assert_eq!(store.get(&session, "count"), None);

    let snapshot = store.snapshot(&session).unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot["cart"]["items"][1], json!(2));
}

#[test]
fn test_invalidate_forgets_session_and_clears_cookie() {
    let store = SessionStore::new(SessionConfig::default());

    let mut resp = response();
    let session = store.open(&request(None), &mut resp);
    let cookie = cookie_pair(&set_cookies(&mut resp)[0]);

    let mut resp = response();
    let resumed = store.open(&request(Some(&cookie)), &mut resp);
    store.invalidate(&resumed);

    assert!(resumed.is_invalidated());
    assert!(store.is_empty());
    assert!(!store.set(&resumed, "k", 1));

    // The clearing instruction replaces the refresh scheduled by `open`.
    let cookies = set_cookies(&mut resp);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("SID=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"));

    let mut resp = response();
    let fresh = store.open(&request(Some(&cookie)), &mut resp);
    assert_ne!(fresh.token(), session.token());
}

#[test]
fn test_regenerate_moves_data_to_new_token() {
    let store = SessionStore::new(SessionConfig::default());

    let mut resp = response();
    let session = store.open(&request(None), &mut resp);
    let old_cookie = cookie_pair(&set_cookies(&mut resp)[0]);
    store.set(&session, "role", "guest");

    let mut resp = response();
    let session = store.open(&request(Some(&old_cookie)), &mut resp);
    let old_token = session.token();
    assert!(store.regenerate(&session));

    assert_ne!(session.token(), old_token);
    assert_eq!(store.get(&session, "role"), Some(json!("guest")));
    assert_eq!(store.len(), 1);

    let cookies = set_cookies(&mut resp);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with(&format!("SID={};", session.token())));

    // The pre-elevation token no longer reaches the session.
    let stale = store.open(&request(Some(&old_cookie)), &mut response());
    assert_ne!(stale.token(), session.token());
    assert_eq!(store.get(&stale, "role"), None);
}

#[test]
fn test_signed_cookies() {
    let store = SessionStore::new(SessionConfig {
        mac_secret: Some("s3cret".to_string()),
        ..SessionConfig::default()
    });

    let mut resp = response();
    let session = store.open(&request(None), &mut resp);
    let cookie = cookie_pair(&set_cookies(&mut resp)[0]);
    assert!(cookie.starts_with(&format!("SID={}.", session.token())));

    let resumed = store.open(&request(Some(&cookie)), &mut response());
    assert_eq!(resumed.token(), session.token());

    // A bare token without its signature is treated as absent.
    let bare = format!("SID={}", session.token());
    let forged = store.open(&request(Some(&bare)), &mut response());
    assert_ne!(forged.token(), session.token());
}

#[test]
fn test_cookie_attributes_follow_config() {
    let store = SessionStore::new(SessionConfig {
        cookie_name: "app".to_string(),
        path: "/api".to_string(),
        http_only: false,
        secure: true,
        timeout_secs: 60,
        ..SessionConfig::default()
    });

    let mut resp = response();
    let session = store.open(&request(None), &mut resp);
    assert_eq!(
        set_cookies(&mut resp),
        vec![format!("app={}; Max-Age=60; Path=/api; Secure", session.token())]
    );
}

#[tokio::test]
async fn test_expired_sessions_are_absent_and_swept() {
    let store = SessionStore::new(SessionConfig {
        timeout_secs: 1,
        ..SessionConfig::default()
    });

    let mut resp = response();
    let session = store.open(&request(None), &mut resp);
    let cookie = cookie_pair(&set_cookies(&mut resp)[0]);
    store.open(&request(None), &mut response());
    store.set(&session, "k", "v");
    assert_eq!(store.len(), 2);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(store.get(&session, "k"), None);
    assert_eq!(store.sweep(), 1);
    assert!(store.is_empty());

    let fresh = store.open(&request(Some(&cookie)), &mut response());
    assert_ne!(fresh.token(), session.token());
}

#[test]
fn test_concurrent_writers_on_one_session() {
    let store = Arc::new(SessionStore::new(SessionConfig::default()));
    let session = store.open(&request(None), &mut response());

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let session = session.clone();
            std::thread::spawn(move || {
                for j in 0..50 {
                    store.set(&session, format!("k{i}-{j}"), j);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(store.keys(&session).len(), 400);
}

#[tokio::test]
async fn test_sweeper_stops_on_shutdown() {
    let store = Arc::new(SessionStore::new(SessionConfig {
        sweep_interval_secs: 1,
        ..SessionConfig::default()
    }));
    let (stop, shutdown) = tokio::sync::watch::channel(false);

    let sweeper = store.spawn_sweeper(shutdown);
    stop.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), sweeper)
        .await
        .expect("sweeper did not stop")
        .unwrap();
}

#[test]
fn test_stores_can_share_a_backend() {
    let backend = Arc::new(MemoryBackend::new());
    let first = SessionStore::with_backend(SessionConfig::default(), backend.clone());
    let second = SessionStore::with_backend(SessionConfig::default(), backend.clone());

    let mut resp = response();
    let session = first.open(&request(None), &mut resp);
    first.set(&session, "k", "v");
    let cookie = cookie_pair(&set_cookies(&mut resp)[0]);

    let resumed = second.open(&request(Some(&cookie)), &mut response());
    assert_eq!(second.get(&resumed, "k"), Some(json!("v")));
    assert_eq!(backend.len(), 1);
}
