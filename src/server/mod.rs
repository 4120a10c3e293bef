//! Listener and server assembly.

pub mod listener;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::Config;
use crate::dispatch::HandlerChain;
use crate::http::connection::ServerContext;
use crate::session::SessionStore;
use crate::websocket::UpgradeRouter;

/// A configured server, ready to run.
pub struct Server {
    config: Config,
    chain: HandlerChain,
    upgrades: UpgradeRouter,
    sessions: Option<Arc<SessionStore>>,
}

impl Server {
    pub fn new(config: Config, chain: HandlerChain) -> Self {
        Self {
            config,
            chain,
            upgrades: UpgradeRouter::new(),
            sessions: None,
        }
    }

    pub fn with_upgrades(mut self, upgrades: UpgradeRouter) -> Self {
        self.upgrades = upgrades;
        self
    }

    /// Ties a session store's expiry sweeper to the server's lifetime.
    pub fn with_sessions(mut self, store: Arc<SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Binds the configured address and serves until `shutdown` is set.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.server.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self, listener: TcpListener, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let sweeper = self
            .sessions
            .as_ref()
            .map(|store| store.spawn_sweeper(shutdown.clone()));

        let ctx = ServerContext::new(&self.config.server, self.chain).with_upgrades(self.upgrades);
        let result = listener::run(listener, Arc::new(ctx), shutdown).await;

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        result
    }
}

/// Resolves once shutdown is requested. A dropped sender never signals.
pub(crate) async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
