//! HTTP server
//!
//! One task per accepted connection, as in any hyper 1.x `http1` server. The
//! accept loop stops when the shutdown future completes; open connections
//! are asked to finish their in-flight request and close.

use crate::error::{MediaError, Result};
use crate::handlers::{handle_request, AppState};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

pub struct MediaServer {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl MediaServer {
    /// Bind `addr`; port 0 picks a free port
    pub async fn bind(addr: SocketAddr, state: Arc<AppState>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MediaError::Http(format!("Failed to bind {}: {}", addr, e)))?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` completes, then drain open connections
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!("Server is running on http://{}", addr);

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };
                    debug!("Accepted connection from {}", peer);

                    let state = Arc::clone(&self.state);
                    let mut stop_rx = stop_rx.clone();
                    connections.spawn(async move {
                        let service = service_fn(move |req| handle_request(Arc::clone(&state), req));
                        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                        tokio::pin!(conn);

                        let result = tokio::select! {
                            result = conn.as_mut() => result,
                            _ = stop_rx.changed() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(err) = result {
                            debug!("Error serving connection from {}: {:?}", peer, err);
                        }
                    });
                }
                // Reap finished connection tasks so the set does not grow
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut shutdown => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        let _ = stop_tx.send(true);
        while connections.join_next().await.is_some() {}
        info!("All connections closed");
        Ok(())
    }
}

/// Completes on Ctrl-C or, on Unix, SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
