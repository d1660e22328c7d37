use outbound_discovery::DiscoveryError;

/// Failures that abort the process before any listener starts.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to open log sink {address}: {source}")]
    LogSink {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install log subscriber: {0}")]
    Subscriber(String),

    #[error("failed to register with discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("failed to configure metrics: {0}")]
    Metrics(String),
}
