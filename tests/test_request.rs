use wicket::http::request::{Method, RequestBuilder, Version};

#[test]
fn test_request_header_retrieval() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .target("/")
        .header("Host", "example.com")
        .header("Content-Type", "application/json")
        .build()
        .unwrap();

    assert_eq!(req.header("Host"), Some("example.com"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_content_length_parsing() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .target("/api")
        .header("Content-Length", "42")
        .build()
        .unwrap();

    assert_eq!(req.content_length(), Some(42));
}

#[test]
fn test_request_content_length_missing() {
    let req = RequestBuilder::new().method(Method::GET).target("/").build().unwrap();

    assert_eq!(req.content_length(), None);
}

#[test]
fn test_request_content_length_invalid() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .target("/api")
        .header("Content-Length", "not-a-number")
        .build()
        .unwrap();

    assert_eq!(req.content_length(), None);
}

#[test]
fn test_request_keep_alive_http11_default() {
    // HTTP/1.1 defaults to keep-alive
    let req = RequestBuilder::new().method(Method::GET).target("/").build().unwrap();

    assert!(req.keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .target("/")
        .header("Connection", "close")
        .build()
        .unwrap();

    assert!(!req.keep_alive());
}

#[test]
fn test_request_keep_alive_http10() {
    let plain = RequestBuilder::new()
        .method(Method::GET)
        .target("/")
        .version(Version::Http10)
        .build()
        .unwrap();
    assert!(!plain.keep_alive());

    let asked = RequestBuilder::new()
        .method(Method::GET)
        .target("/")
        .version(Version::Http10)
        .header("Connection", "Keep-Alive")
        .build()
        .unwrap();
    assert!(asked.keep_alive());
}

#[test]
fn test_request_method_equality() {
    assert_eq!(Method::GET, Method::GET);
    assert_ne!(Method::GET, Method::POST);
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("POST"), Some(Method::POST));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
    assert_eq!(Method::PATCH.to_string(), "PATCH");
}

#[test]
fn test_request_with_body() {
    let req = RequestBuilder::new()
        .method(Method::POST)
        .target("/api")
        .body(&b"test body content"[..])
        .build()
        .unwrap();

    assert_eq!(&req.body()[..], b"test body content");
}

#[test]
fn test_request_builder_requires_method_and_target() {
    assert!(RequestBuilder::new().target("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
}

#[test]
fn test_request_url_and_query() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .target("/search?q=rust+lang&page=2#top")
        .build()
        .unwrap();

    let url = req.url();
    assert_eq!(url.path, "/search");
    assert_eq!(url.fragment, "top");
    assert_eq!(req.path(), "/search");

    let query = req.query();
    assert_eq!(query.get("q"), Some("rust lang"));
    assert_eq!(query.get("page"), Some("2"));
}

#[test]
fn test_request_rewrite_target() {
    let mut req = RequestBuilder::new().method(Method::GET).target("/old").build().unwrap();

    req.set_target("/new?x=1");
    assert_eq!(req.target(), "/new?x=1");
    assert_eq!(req.path(), "/new");
}

#[test]
fn test_request_is_upgrade() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .target("/chat")
        .header("Upgrade", "websocket")
        .header("Connection", "keep-alive, Upgrade")
        .build()
        .unwrap();
    assert!(req.is_upgrade());

    let plain = RequestBuilder::new().method(Method::GET).target("/").build().unwrap();
    assert!(!plain.is_upgrade());
}

#[test]
fn test_request_remote_addr() {
    let addr = "10.0.0.7:5000".parse().unwrap();
    let req = RequestBuilder::new()
        .method(Method::GET)
        .target("/")
        .remote_addr(addr)
        .build()
        .unwrap();

    assert_eq!(req.remote_addr(), Some(addr));
}
