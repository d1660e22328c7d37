use std::net::SocketAddr;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use outbound_core::{Listener, ListenerError};

/// Serves an axum router until shutdown is requested.
pub struct HttpListener {
    name: &'static str,
    addr: SocketAddr,
    router: Router,
}

impl HttpListener {
    pub fn new(name: &'static str, addr: SocketAddr, router: Router) -> Self {
        Self { name, addr, router }
    }
}

#[async_trait]
impl Listener for HttpListener {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn serve(self: Box<Self>, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let HttpListener { name, addr, router } = *self;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;
        tracing::info!(transport = "HTTP", listener = name, %addr, "listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(ListenerError::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbound_core::{Launcher, ShutdownError, Trigger};
    use std::time::Duration;

    #[tokio::test]
    async fn bind_failure_is_a_terminal_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let err = Box::new(HttpListener::new("http", addr, Router::new()))
            .serve(CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ListenerError::Bind { .. }));
    }

    #[tokio::test]
    async fn stops_cleanly_when_cancelled() {
        let token = CancellationToken::new();
        let listener = Box::new(HttpListener::new(
            "http",
            SocketAddr::from(([127, 0, 0, 1], 0)),
            Router::new(),
        ));
        let serving = tokio::spawn(listener.serve(token.clone()));

        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), serving).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn launcher_stops_both_listeners_after_bind_failure() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let busy = taken.local_addr().unwrap();

        let report = Launcher::new(Duration::from_secs(1))
            .with_listener(HttpListener::new("http", busy, Router::new()))
            .with_listener(HttpListener::new(
                "metrics",
                SocketAddr::from(([127, 0, 0, 1], 0)),
                Router::new(),
            ))
            .run_until(std::future::pending())
            .await;

        assert!(matches!(
            report.trigger,
            Trigger::ListenerClosed { listener: "http", error: Some(ListenerError::Bind { .. }) }
        ));
        assert!(report
            .outcomes
            .iter()
            .all(|(_, outcome)| !matches!(outcome, Err(ShutdownError::Timeout { .. }))));
    }
}
