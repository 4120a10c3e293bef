use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::headers::Headers;
use crate::http::request::Version;
use crate::http::response::StatusCode;

/// Interim response sent before reading a body the client is holding back.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Serializes a status line and header block, including the blank line.
pub fn serialize_head(version: Version, status: StatusCode, headers: &Headers, buf: &mut BytesMut) {
    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        version.as_str(),
        status.as_u16(),
        status.reason_phrase()
    );
    buf.put_slice(status_line.as_bytes());

    // Headers
    headers.write_to(buf);

    // Header/body separator
    buf.put_slice(b"\r\n");
}

/// A complete plain-text response with a fixed length, for replies the
/// connection produces itself (parse failures, timeouts, handshake errors).
pub fn plain_response(status: StatusCode, body: &str, close: bool, extra: &Headers) -> Bytes {
    let mut headers = Headers::new();
    headers.append("Content-Type", "text/plain");
    headers.append("Content-Length", body.len().to_string());
    headers.append("Connection", if close { "close" } else { "keep-alive" });
    headers.merge(extra.clone());

    let mut buf = BytesMut::new();
    serialize_head(Version::Http11, status, &headers, &mut buf);
    buf.put_slice(body.as_bytes());
    buf.freeze()
}

/// Writes a buffer out, remembering progress across partial writes.
pub struct ResponseWriter {
    buffer: Bytes,
    written: usize,
}

impl ResponseWriter {
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer, written: 0 }
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }

        stream.flush().await?;
        Ok(())
    }
}
