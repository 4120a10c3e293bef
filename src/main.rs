use std::sync::Arc;

use wicket::config::Config;
use wicket::dispatch::{handler_fn, HandlerChain, NotFound, Router};
use wicket::http::request::Method;
use wicket::http::response::StatusCode;
use wicket::server::Server;
use wicket::session::SessionStore;
use wicket::websocket::{Message, MessageSender, UpgradeRouter, WebSocketEndpoint};

/// Sends every message straight back.
struct Echo;

impl WebSocketEndpoint for Echo {
    fn on_new_message(&self, sender: &MessageSender, message: Message) {
        sender.send_message(message);
    }
}

fn demo_chain(sessions: Arc<SessionStore>) -> anyhow::Result<HandlerChain> {
    let mut router = Router::new();

    router.map(
        Some(Method::GET),
        "/",
        handler_fn(|_req, resp| {
            Box::pin(async move {
                resp.set_header("Content-Type", "text/plain")?;
                resp.send(StatusCode::Ok, "Hello from Wicket\n")?;
                Ok(true)
            })
        }),
    )?;

    router.map(
        Some(Method::GET),
        "/hello/([^/]+)",
        handler_fn(|req, resp| {
            Box::pin(async move {
                let name = req.route_args().first().cloned().unwrap_or_default();
                resp.set_header("Content-Type", "text/plain")?;
                resp.send(StatusCode::Ok, format!("Hello, {name}\n"))?;
                Ok(true)
            })
        }),
    )?;

    router.map(
        Some(Method::GET),
        "/visits",
        handler_fn(move |req, resp| {
            let sessions = Arc::clone(&sessions);
            Box::pin(async move {
                let session = sessions.open(req, resp);
                let visits = sessions
                    .get(&session, "visits")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
                    + 1;
                sessions.set(&session, "visits", visits);

                resp.set_header("Content-Type", "text/plain")?;
                resp.send(StatusCode::Ok, format!("visits: {visits}\n"))?;
                Ok(true)
            })
        }),
    )?;

    let mut chain = HandlerChain::new();
    chain.push(router);
    chain.push(NotFound);
    Ok(chain)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load();
    let sessions = Arc::new(SessionStore::new(cfg.session.clone()));

    let mut upgrades = UpgradeRouter::new();
    upgrades.map("/echo", Arc::new(Echo))?;

    let server = Server::new(cfg, demo_chain(Arc::clone(&sessions))?)
        .with_upgrades(upgrades)
        .with_sessions(sessions);

    let (stop, shutdown) = tokio::sync::watch::channel(false);
    let mut serving = tokio::spawn(server.run(shutdown));

    tokio::select! {
        res = &mut serving => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            let _ = stop.send(true);
            serving.await??;
        }
    }

    Ok(())
}
