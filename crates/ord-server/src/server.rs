use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use ord_kv::KvBackend;
use ord_store::{IdGenerator, OrderStore};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::AppState;
use crate::router::{build_router, build_router_with_cors};

/// Order API server.
///
/// Owns the backend for the life of the process: opened in [`new`], closed
/// exactly once when serving ends.
///
/// [`new`]: OrderServer::new
pub struct OrderServer {
    config: ServerConfig,
    backend: Arc<dyn KvBackend>,
    ids: Arc<dyn IdGenerator>,
}

impl OrderServer {
    /// Open and ping the configured backend.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let backend = config.backend.open()?;
        backend.ping()?;
        let ids = config.ids.generator();
        info!(backend = ?config.backend, "order backend ready");
        Ok(Self {
            config,
            backend,
            ids,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn backend(&self) -> Arc<dyn KvBackend> {
        Arc::clone(&self.backend)
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> Router {
        let state = AppState::new(
            OrderStore::new(self.backend()),
            Arc::clone(&self.ids),
            self.config.page_size,
        );
        if self.config.cors {
            build_router_with_cors(state)
        } else {
            build_router(state)
        }
    }

    /// Serve on the configured address until Ctrl-C or SIGTERM.
    pub async fn serve(self) -> ServerResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve_on(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` resolves, then close the backend.
    ///
    /// In-flight requests get `shutdown_timeout_secs` to finish; after that
    /// they are dropped and the backend is closed anyway.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let grace = Duration::from_secs(self.config.shutdown_timeout_secs);
        info!("order server listening on {}", listener.local_addr()?);

        let (stopping_tx, mut stopping_rx) = watch::channel(false);
        let signal = async move {
            shutdown.await;
            let _ = stopping_tx.send(true);
        };
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .into_future();
        tokio::pin!(serve);

        let served = tokio::select! {
            served = &mut serve => served,
            () = async {
                let stopping = stopping_rx.wait_for(|stopping| *stopping).await.is_ok();
                if stopping {
                    tokio::time::sleep(grace).await;
                } else {
                    std::future::pending::<()>().await;
                }
            } => {
                warn!(grace_secs = grace.as_secs(), "in-flight requests still running; forcing shutdown");
                Ok(())
            }
        };

        let closed = self.backend.close();
        info!("order server stopped");
        served?;
        closed.map_err(ServerError::from)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use ord_kv::{KvError, SyncMode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    #[test]
    fn server_construction() {
        let server = OrderServer::new(ServerConfig::default()).unwrap();
        assert_eq!(server.config().bind_addr.port(), 3000);
        server.backend().ping().unwrap();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ServerConfig {
            page_size: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(
            OrderServer::new(config),
            Err(ServerError::Config(_))
        ));
    }

    #[tokio::test]
    async fn serves_until_shutdown_then_closes_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            backend: BackendConfig::Log {
                path: dir.path().join("orders.log"),
                sync: SyncMode::EveryWrite,
            },
            ..ServerConfig::default()
        };
        let server = OrderServer::new(config).unwrap();
        let backend = server.backend();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_on(listener, async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "got: {response}");

        stop_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert!(matches!(backend.ping(), Err(KvError::Closed)));
    }

    #[tokio::test]
    async fn stalled_request_does_not_block_shutdown() {
        let config = ServerConfig {
            shutdown_timeout_secs: 1,
            ..ServerConfig::default()
        };
        let server = OrderServer::new(config).unwrap();
        let backend = server.backend();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_on(listener, async {
            let _ = stop_rx.await;
        }));

        // Headers promise a body that never arrives, so the request stays
        // in flight.
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"POST /orders HTTP/1.1\r\nHost: localhost\r\n\
                  Content-Type: application/json\r\nContent-Length: 100\r\n\r\n{",
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        stop_tx.send(()).unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(10), handle).await;
        finished
            .expect("server should stop after the grace period")
            .unwrap()
            .unwrap();
        assert!(matches!(backend.ping(), Err(KvError::Closed)));
        drop(stream);
    }
}
