//! Registration with a Consul agent over its HTTP API.

use std::time::Duration;

use reqwest::{Client, Url};
use serde::Serialize;

use outbound_core::{RegistrationDescriptor, ServiceRegistration};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("cannot reach discovery agent at {address}: {reason}")]
    Connection { address: String, reason: String },

    #[error("discovery agent rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("discovery request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Thin client for the agent endpoints this process needs.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    client: Client,
    base: Url,
}

impl ConsulClient {
    /// Accepts either `host:port` or a full URL.
    pub fn new(address: &str) -> Result<Self, DiscoveryError> {
        let connection = |reason: String| DiscoveryError::Connection {
            address: address.to_string(),
            reason,
        };

        let raw = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let base = Url::parse(&raw).map_err(|e| connection(e.to_string()))?;
        if base.host_str().is_none() {
            return Err(connection("missing host".to_string()));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| connection(e.to_string()))?;

        Ok(Self { client, base })
    }

    pub fn address(&self) -> &Url {
        &self.base
    }

    async fn put<T: Serialize + ?Sized>(&self, path: &str, body: Option<&T>) -> Result<(), DiscoveryError> {
        let url = self.base.join(path).map_err(|e| DiscoveryError::Connection {
            address: self.base.to_string(),
            reason: e.to_string(),
        })?;

        let mut builder = self.client.put(url);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let res = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                DiscoveryError::Connection {
                    address: self.base.to_string(),
                    reason: e.to_string(),
                }
            } else {
                DiscoveryError::Request(e)
            }
        })?;

        let status = res.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DiscoveryError::Rejected {
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            })
        }
    }
}

/// Registers and deregisters one service descriptor.
#[derive(Debug, Clone)]
pub struct Registrar {
    client: ConsulClient,
    descriptor: RegistrationDescriptor,
}

impl Registrar {
    /// Fails with [`DiscoveryError::Connection`] when no client can be built
    /// for the configured agent address.
    pub fn new(registration: &ServiceRegistration) -> Result<Self, DiscoveryError> {
        let client = ConsulClient::new(&registration.consul_address)?;
        Ok(Self {
            client,
            descriptor: RegistrationDescriptor::new(registration),
        })
    }

    pub fn descriptor(&self) -> &RegistrationDescriptor {
        &self.descriptor
    }

    pub async fn register(&self) -> Result<(), DiscoveryError> {
        self.client
            .put("/v1/agent/service/register", Some(&self.descriptor))
            .await?;
        tracing::info!(
            service = self.descriptor.name(),
            checks = self.descriptor.checks().len(),
            agent = %self.client.address(),
            "registered"
        );
        Ok(())
    }

    pub async fn deregister(&self) -> Result<(), DiscoveryError> {
        let path = format!(
            "/v1/agent/service/deregister/{}",
            urlencoding::encode(self.descriptor.id())
        );
        self.client.put::<()>(&path, None).await?;
        tracing::info!(service = self.descriptor.name(), "deregistered");
        Ok(())
    }
}
