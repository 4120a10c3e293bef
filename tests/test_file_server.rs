use tempfile::TempDir;
use wicket::dispatch::{FileServer, Handler};
use wicket::http::request::{Method, RequestBuilder, Version};
use wicket::http::response::Response;

const EPOCH: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

struct Site {
    // Removed on drop.
    _dir: TempDir,
    files: FileServer,
}

fn site() -> Site {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), b"0123456789").unwrap();
    std::fs::write(dir.path().join("with space.txt"), b"spaced").unwrap();
    std::fs::create_dir(dir.path().join("docs")).unwrap();
    std::fs::write(dir.path().join("docs").join("page.html"), b"<p>hi</p>").unwrap();

    let files = FileServer::new(dir.path());
    Site { _dir: dir, files }
}

/// Runs one request through the handler and returns whether it was
/// claimed plus the serialized response.
async fn fetch_as(
    files: &FileServer,
    version: Version,
    method: Method,
    target: &str,
    headers: &[(&str, &str)],
) -> (bool, String) {
    let mut builder = RequestBuilder::new().method(method).target(target).version(version);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let mut req = builder.build().unwrap();
    let mut resp = Response::new(version, method, true);

    let handled = files.handle(&mut req, &mut resp).await.unwrap();
    (handled, String::from_utf8(resp.take_output().to_vec()).unwrap())
}

async fn fetch(files: &FileServer, method: Method, target: &str, headers: &[(&str, &str)]) -> (bool, String) {
    fetch_as(files, Version::Http11, method, target, headers).await
}

fn header<'a>(out: &'a str, name: &str) -> Option<&'a str> {
    let head = out.split("\r\n\r\n").next()?;
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(": ")?;
        key.eq_ignore_ascii_case(name).then_some(value)
    })
}

fn body(out: &str) -> &str {
    out.split_once("\r\n\r\n").map_or("", |(_, body)| body)
}

#[tokio::test]
async fn test_serves_whole_file() {
    let site = site();
    let (handled, out) = fetch(&site.files, Method::GET, "/hello.txt", &[]).await;

    assert!(handled);
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header(&out, "Content-Length"), Some("10"));
    assert_eq!(header(&out, "Content-Type"), Some("text/plain; charset=utf-8"));
    assert_eq!(header(&out, "Accept-Ranges"), Some("bytes"));
    assert!(header(&out, "ETag").unwrap().starts_with("W/\"10-"));
    assert!(header(&out, "Last-Modified").unwrap().ends_with(" GMT"));
    assert_eq!(body(&out), "0123456789");
}

#[tokio::test]
async fn test_serves_nested_and_percent_encoded_paths() {
    let site = site();

    let (handled, out) = fetch(&site.files, Method::GET, "/docs/page.html", &[]).await;
    assert!(handled);
    assert_eq!(header(&out, "Content-Type"), Some("text/html; charset=utf-8"));
    assert_eq!(body(&out), "<p>hi</p>");

    let (handled, out) = fetch(&site.files, Method::GET, "/with%20space.txt?v=2", &[]).await;
    assert!(handled);
    assert_eq!(body(&out), "spaced");
}

#[tokio::test]
async fn test_head_describes_without_body() {
    let site = site();
    let (handled, out) = fetch(&site.files, Method::HEAD, "/hello.txt", &[("Range", "bytes=0-1")]).await;

    assert!(handled);
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(header(&out, "Content-Length"), Some("10"));
    assert!(out.ends_with("\r\n\r\n"));
}

#[tokio::test]
async fn test_matching_etag_gets_304() {
    let site = site();
    let (_, first) = fetch(&site.files, Method::GET, "/hello.txt", &[]).await;
    let etag = header(&first, "ETag").unwrap().to_string();

    let (handled, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("If-None-Match", etag.as_str())]).await;
    assert!(handled);
    assert!(out.starts_with("HTTP/1.1 304 Not Modified\r\n"));
    assert_eq!(header(&out, "ETag"), Some(etag.as_str()));
    assert_eq!(body(&out), "");

    let listed = format!("\"other\", {etag}");
    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("If-None-Match", listed.as_str())]).await;
    assert!(out.starts_with("HTTP/1.1 304 "));

    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("If-None-Match", "*")]).await;
    assert!(out.starts_with("HTTP/1.1 304 "));

    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("If-None-Match", "\"stale\"")]).await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body(&out), "0123456789");
}

#[tokio::test]
async fn test_if_modified_since() {
    let site = site();
    let (_, first) = fetch(&site.files, Method::GET, "/hello.txt", &[]).await;
    let modified = header(&first, "Last-Modified").unwrap().to_string();

    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("If-Modified-Since", modified.as_str())]).await;
    assert!(out.starts_with("HTTP/1.1 304 "));

    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("If-Modified-Since", EPOCH)]).await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));

    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("If-Modified-Since", "not a date")]).await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));

    // A tag that does not match wins over a date that would.
    let (_, out) = fetch(
        &site.files,
        Method::GET,
        "/hello.txt",
        &[("If-None-Match", "\"stale\""), ("If-Modified-Since", modified.as_str())],
    )
    .await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[tokio::test]
async fn test_if_unmodified_since_earlier_fails() {
    let site = site();
    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("If-Unmodified-Since", EPOCH)]).await;
    assert!(out.starts_with("HTTP/1.1 412 Precondition Failed\r\n"));
}

#[tokio::test]
async fn test_single_byte_ranges() {
    let site = site();

    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("Range", "bytes=2-5")]).await;
    assert!(out.starts_with("HTTP/1.1 206 Partial Content\r\n"));
    assert_eq!(header(&out, "Content-Range"), Some("bytes 2-5/10"));
    assert_eq!(header(&out, "Content-Length"), Some("4"));
    assert_eq!(body(&out), "2345");

    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("Range", "bytes=-3")]).await;
    assert_eq!(header(&out, "Content-Range"), Some("bytes 7-9/10"));
    assert_eq!(body(&out), "789");

    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("Range", "bytes=6-")]).await;
    assert_eq!(header(&out, "Content-Range"), Some("bytes 6-9/10"));
    assert_eq!(body(&out), "6789");

    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("Range", "bytes=8-99")]).await;
    assert_eq!(header(&out, "Content-Range"), Some("bytes 8-9/10"));
    assert_eq!(body(&out), "89");
}

#[tokio::test]
async fn test_unsatisfiable_range_gets_416() {
    let site = site();
    let (handled, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("Range", "bytes=20-30")]).await;

    assert!(handled);
    assert!(out.starts_with("HTTP/1.1 416 Range Not Satisfiable\r\n"));
    assert_eq!(header(&out, "Content-Range"), Some("bytes */10"));
    assert_eq!(header(&out, "Content-Length"), Some("0"));
}

#[tokio::test]
async fn test_other_range_units_are_ignored() {
    let site = site();
    let (_, out) = fetch(&site.files, Method::GET, "/hello.txt", &[("Range", "lines=1-2")]).await;

    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body(&out), "0123456789");
}

#[tokio::test]
async fn test_if_range_gates_the_range() {
    let site = site();
    let (_, first) = fetch(&site.files, Method::GET, "/hello.txt", &[]).await;
    let modified = header(&first, "Last-Modified").unwrap().to_string();
    let etag = header(&first, "ETag").unwrap().to_string();

    let (_, out) = fetch(
        &site.files,
        Method::GET,
        "/hello.txt",
        &[("Range", "bytes=0-1"), ("If-Range", modified.as_str())],
    )
    .await;
    assert!(out.starts_with("HTTP/1.1 206 "));
    assert_eq!(body(&out), "01");

    let (_, out) = fetch(
        &site.files,
        Method::GET,
        "/hello.txt",
        &[("Range", "bytes=0-1"), ("If-Range", EPOCH)],
    )
    .await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body(&out), "0123456789");

    // Weak tags cannot validate a range.
    let (_, out) = fetch(
        &site.files,
        Method::GET,
        "/hello.txt",
        &[("Range", "bytes=0-1"), ("If-Range", etag.as_str())],
    )
    .await;
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[tokio::test]
async fn test_multiple_ranges_use_multipart_body() {
    let site = site();
    let (_, out) = fetch_as(
        &site.files,
        Version::Http10,
        Method::GET,
        "/hello.txt",
        &[("Range", "bytes=0-1, 8-9")],
    )
    .await;

    assert!(out.starts_with("HTTP/1.0 206 Partial Content\r\n"));
    assert_eq!(
        header(&out, "Content-Type"),
        Some("multipart/byteranges; boundary=wicket-byteranges")
    );
    let body = body(&out);
    assert!(body.starts_with("--wicket-byteranges\r\n"));
    assert!(body.contains("Content-Range: bytes 0-1/10\r\n\r\n01\r\n"));
    assert!(body.contains("Content-Range: bytes 8-9/10\r\n\r\n89\r\n"));
    assert!(body.ends_with("--wicket-byteranges--\r\n"));
    assert_eq!(header(&out, "Content-Length"), Some(body.len().to_string().as_str()));
}

#[tokio::test]
async fn test_declines_what_it_cannot_serve() {
    let site = site();

    for target in ["/missing.txt", "/docs", "/", "/../hello.txt", "/docs/%2e%2e/%2e%2e/etc/passwd"] {
        let (handled, out) = fetch(&site.files, Method::GET, target, &[]).await;
        assert!(!handled, "{target} was claimed");
        assert!(out.is_empty());
    }
}

#[tokio::test]
async fn test_other_methods_get_405() {
    let site = site();
    let (handled, out) = fetch(&site.files, Method::POST, "/hello.txt", &[]).await;

    assert!(handled);
    assert!(out.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert_eq!(header(&out, "Allow"), Some("GET, HEAD"));
}
