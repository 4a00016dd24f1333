//! Liveness and readiness endpoints.
//!
//! `/healthz` answers 200 as long as the process is alive; `/readyz` turns
//! 200 once the watchdog has entered its polling loop.

use anyhow::Result;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

#[derive(Clone, Default)]
pub struct HealthServer {
    ready: Arc<AtomicBool>,
}

impl HealthServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
        if ready {
            info!("Application marked as ready");
        }
    }

    /// Bind and serve until the process exits. Sends on `ready_signal` once
    /// the listener is accepting connections.
    pub async fn serve(
        self,
        port: u16,
        ready_signal: tokio::sync::oneshot::Sender<()>,
    ) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;

        info!(
            port = port,
            liveness_endpoint = format!("http://0.0.0.0:{}/healthz", port),
            readiness_endpoint = format!("http://0.0.0.0:{}/readyz", port),
            "Health check server started"
        );

        let _ = ready_signal.send(());

        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                if let Err(e) = http1::Builder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req| {
                            let server = server.clone();
                            async move { server.handle(req).await }
                        }),
                    )
                    .await
                {
                    debug!(peer = %peer_addr, error = %e, "Error serving connection");
                }
            });
        }
    }

    async fn handle(
        &self,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let (status, body) = match req.uri().path() {
            "/healthz" => (StatusCode::OK, "ok"),
            "/readyz" => {
                if self.is_ready() {
                    (StatusCode::OK, "ready")
                } else {
                    (StatusCode::SERVICE_UNAVAILABLE, "not ready")
                }
            }
            _ => (StatusCode::NOT_FOUND, "Not Found"),
        };

        Ok(Response::builder()
            .status(status)
            .body(Full::new(Bytes::from(body)))
            .expect("static response"))
    }
}
