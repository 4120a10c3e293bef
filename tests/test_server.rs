use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use wicket::config::Config;
use wicket::dispatch::{handler_fn, HandlerChain, NotFound};
use wicket::http::response::StatusCode;
use wicket::server::Server;
use wicket::session::SessionStore;

fn chain() -> HandlerChain {
    let mut chain = HandlerChain::new();
    chain.push(handler_fn(|req, resp| {
        Box::pin(async move {
            if req.path() != "/peer" {
                return Ok(false);
            }
            let peer = req.remote_addr().map(|a| a.ip().to_string()).unwrap_or_default();
            resp.send(StatusCode::Ok, peer)?;
            Ok(true)
        })
    }));
    chain.push(NotFound);
    chain
}

async fn get(addr: std::net::SocketAddr, target: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {target} HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut out = String::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut out))
        .await
        .expect("no response")
        .unwrap();
    out
}

#[tokio::test]
async fn test_serves_over_tcp_and_stops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = Config::default();
    let sessions = Arc::new(SessionStore::new(config.session.clone()));

    let server = Server::new(config, chain()).with_sessions(sessions);
    let (stop, shutdown) = watch::channel(false);
    let serving = tokio::spawn(server.serve(listener, shutdown));

    let found = get(addr, "/peer").await;
    assert!(found.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(found.ends_with("127.0.0.1"));

    let missing = get(addr, "/elsewhere").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_idle_keep_alive_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, shutdown) = watch::channel(false);
    let serving = tokio::spawn(Server::new(Config::default(), chain()).serve(listener, shutdown));

    let mut idle = TcpStream::connect(addr).await.unwrap();
    idle.write_all(b"GET /peer HTTP/1.1\r\nHost: test\r\n\r\n").await.unwrap();
    let mut buf = [0u8; 256];
    let n = idle.read(&mut buf).await.unwrap();
    assert!(n > 0);

    stop.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    let mut rest = Vec::new();
    idle.read_to_end(&mut rest).await.unwrap();
}
