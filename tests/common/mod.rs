//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use dual_route::config::{ApiConfig, ServerConfig, Strategy};
use dual_route::{ApiBuilder, BoxError, HostServer, PathParams, VirtualRequest, VirtualResponse};

/// Replies `201 {id, url}`.
pub async fn echo(params: PathParams, req: VirtualRequest, reply: VirtualResponse) -> Result<(), BoxError> {
    reply.code(StatusCode::CREATED);
    reply
        .send(json!({ "id": params.get("id"), "url": req.url }))
        .await?;
    Ok(())
}

/// Host server plus an api builder using `strategy` by default.
pub fn setup(strategy: Strategy) -> (HostServer, ApiBuilder) {
    let mut server = HostServer::new(ServerConfig::default());
    let config = ApiConfig {
        strategy,
        ..ApiConfig::default()
    };
    let builder = ApiBuilder::install(&mut server, config);
    (server, builder)
}

/// A running server on an ephemeral port. Dropping it shuts the server down.
#[allow(dead_code)]
pub struct Running {
    pub addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

#[allow(dead_code)]
impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Seal `server` and serve it on 127.0.0.1 with an OS-assigned port.
/// Loopback handles are ready when this returns.
#[allow(dead_code)]
pub async fn serve(server: HostServer) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let router = server.into_router();

    tokio::spawn(async move {
        let _ = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await;
    });

    Running {
        addr,
        _shutdown: tx,
    }
}

#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
