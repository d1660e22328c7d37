use std::net::SocketAddr;
use std::time::Duration;

/// Failure of the capability while serving a single request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Terminal failure of a network listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener stopped serving: {0}")]
    Serve(#[source] std::io::Error),
}

/// A listener that did not stop cleanly once shutdown began.
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("{listener} did not stop within {deadline:?}")]
    Timeout {
        listener: &'static str,
        deadline: Duration,
    },

    #[error("{listener} failed while stopping: {source}")]
    Listener {
        listener: &'static str,
        #[source]
        source: ListenerError,
    },

    #[error("{listener} task panicked")]
    Panicked { listener: &'static str },
}
