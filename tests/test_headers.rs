use bytes::BytesMut;
use wicket::http::headers::Headers;

#[test]
fn test_lookup_ignores_case() {
    let mut headers = Headers::new();
    headers.append("Content-Type", "text/html");

    assert_eq!(headers.get("content-type"), Some("text/html"));
    assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
    assert!(headers.contains("Content-type"));
    assert_eq!(headers.get("Content-Length"), None);
}

#[test]
fn test_repeated_fields_kept_in_order() {
    let mut headers = Headers::new();
    headers.append("Set-Cookie", "a=1");
    headers.append("Vary", "Accept");
    headers.append("set-cookie", "b=2");

    assert_eq!(headers.len(), 3);
    assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
    assert_eq!(headers.get_all("SET-COOKIE").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
}

#[test]
fn test_insert_replaces_in_place() {
    let mut headers: Headers = [("A", "1"), ("X-Id", "old"), ("B", "2"), ("x-id", "older")]
        .into_iter()
        .collect();

    headers.insert("X-ID", "new");

    let fields: Vec<_> = headers.iter().collect();
    assert_eq!(fields, vec![("A", "1"), ("X-ID", "new"), ("B", "2")]);

    headers.insert("C", "3");
    assert_eq!(headers.iter().last(), Some(("C", "3")));
}

#[test]
fn test_remove_counts_fields() {
    let mut headers: Headers = [("Via", "a"), ("Host", "h"), ("via", "b")].into_iter().collect();

    assert_eq!(headers.remove("VIA"), 2);
    assert_eq!(headers.remove("VIA"), 0);
    assert_eq!(headers.len(), 1);
}

#[test]
fn test_has_token_across_fields() {
    let mut headers = Headers::new();
    headers.append("Connection", "keep-alive");
    headers.append("Connection", " Upgrade , foo");

    assert!(headers.has_token("connection", "upgrade"));
    assert!(headers.has_token("Connection", "Keep-Alive"));
    assert!(!headers.has_token("Connection", "close"));
    assert!(!headers.has_token("Connection", "up"));
}

#[test]
fn test_serialization_keeps_original_casing() {
    let mut headers = Headers::new();
    headers.append("x-lower", "1");
    headers.append("X-Upper", "2");

    let mut buf = BytesMut::new();
    headers.write_to(&mut buf);
    assert_eq!(&buf[..], b"x-lower: 1\r\nX-Upper: 2\r\n");
}

#[test]
fn test_merge_appends() {
    let mut headers: Headers = [("A", "1")].into_iter().collect();
    let trailers: Headers = [("A", "2"), ("B", "3")].into_iter().collect();

    headers.merge(trailers);
    assert_eq!(headers.get_all("a").collect::<Vec<_>>(), vec!["1", "2"]);
    assert_eq!(headers.get("b"), Some("3"));
}
