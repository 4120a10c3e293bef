//! Frame loop for an upgraded connection.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crate::websocket::frame::{
    close_payload, encode_frame, parse_close_code, CloseCode, FrameDecoder, MessageAssembler, Opcode,
};
use crate::http::request::Request;
use crate::server::shutdown_signal;
use crate::websocket::{Message, MessageSender, Outgoing, WebSocketEndpoint};

const OUTGOING_QUEUE: usize = 64;

/// Runs the message layer until either side closes.
///
/// `leftover` holds bytes read past the handshake; they are decoded before
/// anything new is read.
pub async fn serve<S>(
    stream: &mut S,
    leftover: BytesMut,
    req: &Request,
    endpoint: Arc<dyn WebSocketEndpoint>,
    max_payload: u64,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::channel(OUTGOING_QUEUE);
    let sender = MessageSender::new(tx);
    endpoint.on_open(req, sender.clone());

    let decoder = FrameDecoder::new(max_payload);
    let mut assembler = MessageAssembler::new(max_payload);
    let mut buf = leftover;
    let mut out = BytesMut::new();

    let result = 'conn: loop {
        // Frames already buffered go first.
        loop {
            let frame = match decoder.decode(&mut buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(socket = sender.id(), error = %e, "websocket protocol error");
                    encode_frame(Opcode::Close, &close_payload(e.close_code(), ""), &mut out);
                    break 'conn write_out(stream, &mut out).await;
                }
            };

            match frame.opcode {
                Opcode::Ping => encode_frame(Opcode::Pong, &frame.payload, &mut out),
                Opcode::Pong => {}
                Opcode::Close => {
                    let code = parse_close_code(&frame.payload);
                    let echo = if code == CloseCode::NO_STATUS {
                        Vec::new()
                    } else {
                        close_payload(code, "")
                    };
                    encode_frame(Opcode::Close, &echo, &mut out);
                    tracing::debug!(socket = sender.id(), code, "websocket closed by peer");
                    break 'conn write_out(stream, &mut out).await;
                }
                _ => match assembler.push(frame) {
                    Ok(Some(message)) => endpoint.on_new_message(&sender, message),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(socket = sender.id(), error = %e, "websocket message rejected");
                        encode_frame(Opcode::Close, &close_payload(e.close_code(), ""), &mut out);
                        break 'conn write_out(stream, &mut out).await;
                    }
                },
            }
        }

        if !out.is_empty() {
            if let Err(e) = write_out(stream, &mut out).await {
                break Err(e);
            }
        }

        tokio::select! {
            read = stream.read_buf(&mut buf) => match read {
                Ok(0) => break 'conn Ok(()),
                Ok(_) => {}
                Err(e) => break 'conn Err(e.into()),
            },
            Some(outgoing) = rx.recv() => match outgoing {
                Outgoing::Message(Message::Text(text)) => {
                    encode_frame(Opcode::Text, text.as_bytes(), &mut out);
                }
                Outgoing::Message(Message::Binary(data)) => {
                    encode_frame(Opcode::Binary, &data, &mut out);
                }
                Outgoing::Close(code, reason) => {
                    encode_frame(Opcode::Close, &close_payload(code, &reason), &mut out);
                    break 'conn write_out(stream, &mut out).await;
                }
            },
            _ = shutdown_signal(&mut shutdown) => {
                encode_frame(Opcode::Close, &close_payload(CloseCode::GOING_AWAY, ""), &mut out);
                break 'conn write_out(stream, &mut out).await;
            }
        }
    };

    endpoint.on_close(&sender);
    result
}

async fn write_out<S>(stream: &mut S, out: &mut BytesMut) -> anyhow::Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(out).await?;
    stream.flush().await?;
    out.clear();
    Ok(())
}
