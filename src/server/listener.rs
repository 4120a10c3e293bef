use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::info;

use crate::http::connection::{Connection, ServerContext};
use crate::server::shutdown_signal;

/// Accepts connections until shutdown, one task per connection.
pub async fn run(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr()?);

    let mut stop = shutdown.clone();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                tracing::debug!(peer = %peer, "accepted connection");

                let ctx = Arc::clone(&ctx);
                let shutdown = shutdown.clone();
                connections.spawn(async move {
                    let mut conn = Connection::new(socket, Some(peer), ctx, shutdown);
                    if let Err(e) = conn.run().await {
                        tracing::error!("Connection error from {}: {}", peer, e);
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_signal(&mut stop) => {
                info!("Listener stopping");
                break;
            }
        }
    }

    // Connections watch the same signal and wind down on their own.
    while connections.join_next().await.is_some() {}
    Ok(())
}
