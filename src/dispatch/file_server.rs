//! Serves files below a root directory.
//!
//! Only regular files are answered; anything else (missing paths,
//! directories, paths escaping the root) is declined so later handlers can
//! try. Responses carry `Last-Modified` and a weak `ETag`, honour the usual
//! conditional headers and serve byte ranges.

use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use percent_encoding::percent_decode_str;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::dispatch::Handler;
use crate::http::headers::Headers;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
const BOUNDARY: &str = "wicket-byteranges";

/// Static file handler rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileServer {
    root: PathBuf,
    buffer_size: usize,
}

impl FileServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Bytes read from disk per flushed chunk. Zero is ignored.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.buffer_size = size;
        }
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a request path onto the file system.
    ///
    /// The path is percent-decoded first. `None` when it does not decode to
    /// UTF-8 or when a segment would leave the root.
    pub fn resolve(&self, path: &str) -> Option<PathBuf> {
        let decoded = percent_decode_str(path).decode_utf8().ok()?;
        let mut resolved = self.root.clone();

        for segment in decoded.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            let mut parts = Path::new(segment).components();
            match (parts.next(), parts.next()) {
                (Some(Component::Normal(_)), None) if !segment.contains(['\\', '\0']) => {
                    resolved.push(segment)
                }
                _ => return None,
            }
        }
        Some(resolved)
    }

    /// Answers `req` with the file at `path`. Returns false, writing
    /// nothing, when `path` is not a regular file.
    pub async fn serve_file(&self, path: &Path, req: &Request, resp: &mut Response) -> anyhow::Result<bool> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return Ok(false),
        };

        if !matches!(req.method(), Method::GET | Method::HEAD) {
            resp.set_header("Allow", "GET, HEAD")?;
            resp.send(StatusCode::MethodNotAllowed, "")?;
            return Ok(true);
        }

        let validators = Validators::of(&meta);
        let headers = req.headers();

        if let Some(status) = check_preconditions(headers, &validators) {
            if status == StatusCode::NotModified {
                resp.set_header("ETag", validators.etag.as_str())?;
                resp.set_header("Last-Modified", httpdate::fmt_http_date(validators.modified))?;
            }
            resp.send(status, "")?;
            tracing::debug!(path = %path.display(), status = status.as_u16(), "conditional request answered");
            return Ok(true);
        }

        resp.set_header("Accept-Ranges", "bytes")?;
        resp.set_header("Date", httpdate::fmt_http_date(SystemTime::now()))?;
        resp.set_header("Last-Modified", httpdate::fmt_http_date(validators.modified))?;
        resp.set_header("ETag", validators.etag.as_str())?;
        let content_type = content_type(path);
        resp.set_header("Content-Type", content_type)?;

        let size = validators.size;
        let ranges = if req.method() == Method::HEAD || !range_allowed(headers, &validators) {
            None
        } else {
            parse_ranges(headers, size)
        };

        if ranges.as_ref().is_some_and(Vec::is_empty) {
            resp.set_header("Content-Range", format!("bytes */{size}"))?;
            resp.send(StatusCode::RangeNotSatisfiable, "")?;
            return Ok(true);
        }

        let mut file = File::open(path).await?;
        match ranges.as_deref() {
            None | Some([]) => {
                resp.set_header("Content-Length", size.to_string())?;
                resp.write_head(StatusCode::Ok)?;
                if req.method() == Method::GET {
                    self.copy(&mut file, 0, size, resp).await?;
                }
            }
            Some(&[(first, last)]) => {
                resp.set_header("Content-Range", format!("bytes {first}-{last}/{size}"))?;
                resp.set_header("Content-Length", (last - first + 1).to_string())?;
                resp.write_head(StatusCode::PartialContent)?;
                self.copy(&mut file, first, last - first + 1, resp).await?;
            }
            Some(many) => {
                resp.set_header("Content-Type", format!("multipart/byteranges; boundary={BOUNDARY}"))?;
                resp.write_head(StatusCode::PartialContent)?;
                for &(first, last) in many {
                    let part = format!(
                        "--{BOUNDARY}\r\nContent-Type: {content_type}\r\nContent-Range: bytes {first}-{last}/{size}\r\n\r\n"
                    );
                    resp.write(part.as_bytes())?;
                    self.copy(&mut file, first, last - first + 1, resp).await?;
                    resp.write(b"\r\n")?;
                }
                resp.write(format!("--{BOUNDARY}--\r\n").as_bytes())?;
            }
        }

        resp.end(&[])?;
        tracing::debug!(path = %path.display(), status = resp.status().as_u16(), "file served");
        Ok(true)
    }

    async fn copy(&self, file: &mut File, start: u64, len: u64, resp: &mut Response) -> anyhow::Result<()> {
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; self.buffer_size.min(usize::try_from(len).unwrap_or(usize::MAX))];
        let mut remaining = len;

        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                anyhow::bail!("file shrank while being served");
            }
            resp.write(&buf[..n])?;
            resp.flush().await?;
            remaining -= n as u64;
        }
        Ok(())
    }
}

impl Handler for FileServer {
    fn handle<'a>(
        &'a self,
        req: &'a mut Request,
        resp: &'a mut Response,
    ) -> BoxFuture<'a, anyhow::Result<bool>> {
        Box::pin(async move {
            let Some(path) = self.resolve(&req.path()) else {
                tracing::debug!(target = %req.target(), "path outside the served root");
                return Ok(false);
            };
            self.serve_file(&path, req, resp).await
        })
    }
}

/// What a client may hold a cached copy against.
struct Validators {
    size: u64,
    // Whole seconds, the resolution of an HTTP date.
    modified: SystemTime,
    etag: String,
}

impl Validators {
    fn of(meta: &Metadata) -> Self {
        let secs = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        let size = meta.len();

        Self {
            size,
            modified: UNIX_EPOCH + Duration::from_secs(secs),
            etag: format!("W/\"{size}-{secs}\""),
        }
    }
}

fn http_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("W/").unwrap_or(tag).trim_matches('"')
}

/// Status that short-circuits the request, if a conditional header
/// decides it.
fn check_preconditions(headers: &Headers, file: &Validators) -> Option<StatusCode> {
    if headers
        .get_all("If-Unmodified-Since")
        .filter_map(http_date)
        .any(|date| file.modified > date)
    {
        return Some(StatusCode::PreconditionFailed);
    }

    // If-None-Match overrides If-Modified-Since.
    if headers.contains("If-None-Match") {
        let ours = opaque_tag(&file.etag);
        let matched = headers
            .get_all("If-None-Match")
            .flat_map(|v| v.split(','))
            .any(|tag| tag.trim() == "*" || opaque_tag(tag) == ours);
        return matched.then_some(StatusCode::NotModified);
    }

    if headers
        .get_all("If-Modified-Since")
        .filter_map(http_date)
        .any(|date| file.modified <= date)
    {
        return Some(StatusCode::NotModified);
    }
    None
}

/// Whether `If-Range` lets the `Range` header apply.
///
/// Only weak tags are issued and those never satisfy `If-Range`, so a tag
/// always means the whole file. A date must equal the modification time.
fn range_allowed(headers: &Headers, file: &Validators) -> bool {
    match headers.get("If-Range").map(str::trim) {
        None => true,
        Some(value) if value.starts_with("W/") || value.starts_with('"') => false,
        Some(value) => http_date(value) == Some(file.modified),
    }
}

/// Satisfiable `(first, last)` byte ranges requested, inclusive.
///
/// `None` when there is no `bytes` range to honour; an empty list when
/// every requested range misses the file.
fn parse_ranges(headers: &Headers, size: u64) -> Option<Vec<(u64, u64)>> {
    let mut seen = false;
    let mut ranges = Vec::new();

    for value in headers.get_all("Range") {
        let Some(set) = value.trim().strip_prefix("bytes=") else {
            continue;
        };
        seen = true;

        for spec in set.split(',').map(str::trim) {
            let Some((first, last)) = spec.split_once('-') else {
                continue;
            };
            if size == 0 {
                continue;
            }
            let range = if first.is_empty() {
                match last.parse::<u64>() {
                    Ok(0) | Err(_) => continue,
                    Ok(n) => (size.saturating_sub(n), size - 1),
                }
            } else {
                let Ok(first) = first.parse::<u64>() else {
                    continue;
                };
                let last = if last.is_empty() {
                    size - 1
                } else {
                    match last.parse::<u64>() {
                        Ok(last) => last.min(size - 1),
                        Err(_) => continue,
                    }
                };
                if first >= size || last < first {
                    continue;
                }
                (first, last)
            };
            ranges.push(range);
        }
    }

    seen.then_some(ranges)
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_follow_byte_range_rules() {
        let headers: Headers = [("Range", "bytes=0-4, -3, 8-, 20-30, 5-2, x-1, -0")].into_iter().collect();
        assert_eq!(parse_ranges(&headers, 10), Some(vec![(0, 4), (7, 9), (8, 9)]));

        let clamp: Headers = [("Range", "bytes=5-100")].into_iter().collect();
        assert_eq!(parse_ranges(&clamp, 10), Some(vec![(5, 9)]));

        let whole: Headers = [("Range", "bytes=-50")].into_iter().collect();
        assert_eq!(parse_ranges(&whole, 10), Some(vec![(0, 9)]));

        let other_unit: Headers = [("Range", "items=0-1")].into_iter().collect();
        assert_eq!(parse_ranges(&other_unit, 10), None);

        let empty_file: Headers = [("Range", "bytes=0-")].into_iter().collect();
        assert_eq!(parse_ranges(&empty_file, 0), Some(vec![]));
    }

    #[test]
    fn resolve_stays_below_root() {
        let files = FileServer::new("/srv/www");
        assert_eq!(files.resolve("/a/b.txt"), Some(PathBuf::from("/srv/www/a/b.txt")));
        assert_eq!(files.resolve("/a//./b%20c.txt"), Some(PathBuf::from("/srv/www/a/b c.txt")));
        assert_eq!(files.resolve("/a/../../etc/passwd"), None);
        assert_eq!(files.resolve("/%2e%2e/etc/passwd"), None);
        assert_eq!(files.resolve("/a%2f..%2f..%2fetc"), None);
        assert_eq!(files.resolve("/%ff"), None);
    }

    #[test]
    fn opaque_tag_ignores_weakness() {
        assert_eq!(opaque_tag(" W/\"3-4\" "), "3-4");
        assert_eq!(opaque_tag("\"3-4\""), "3-4");
    }
}
