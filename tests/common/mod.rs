//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;

use api_guard::config::AppConfig;
use api_guard::http::{handlers, HandlerGuard, HttpServer};
use api_guard::lifecycle::Shutdown;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

/// Serve the sample routes behind `guard`.
pub async fn start_sample(guard: &HandlerGuard) -> TestServer {
    start(handlers::routes(guard)).await
}

/// Serve arbitrary routes with the default middleware stack.
pub async fn start(routes: Router) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(AppConfig::default(), routes);
    let signalled = shutdown.signalled();
    let handle = tokio::spawn(async move { server.run(listener, signalled).await });

    TestServer { addr, shutdown, handle }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
