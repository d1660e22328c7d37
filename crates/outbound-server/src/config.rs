use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use outbound_core::ServiceRegistration;

const DEFAULT_VERSION: &str = "v1";

#[derive(Parser, Debug, Clone)]
#[command(name = "outbound")]
#[command(about = "Health-checked service with metrics and discovery registration", long_about = None)]
pub struct Args {
    /// Name of micro service
    #[arg(long = "service.name", env = "SERVICE_NAME", default_value = "user")]
    pub service_name: String,

    /// Service group of metrics
    #[arg(long = "service.group", env = "SERVICE_GROUP", default_value = "user")]
    pub service_group: String,

    #[arg(long = "service.base.path", env = "SERVICE_BASE_PATH", default_value = "user")]
    pub base_path: String,

    #[arg(long = "service.version", env = "SERVICE_VERSION", default_value = DEFAULT_VERSION)]
    pub version: String,

    #[arg(long = "service.datatype", env = "SERVICE_DATATYPE", default_value = "test")]
    pub data_type: String,

    /// Comma separated dependencies, each gets its own discovery check
    #[arg(long = "service.dependencies", env = "SERVICE_DEPENDENCIES", value_delimiter = ',')]
    pub dependencies: Vec<String>,

    /// Address advertised to discovery
    #[arg(long = "http.addr", env = "HTTP_ADDR", default_value = "localhost")]
    pub http_addr: String,

    #[arg(long = "http.port", env = "HTTP_PORT", default_value = "8080")]
    pub http_port: u16,

    #[arg(long = "metrics.port", env = "METRICS_PORT", default_value = "8082")]
    pub metrics_port: u16,

    #[arg(long = "consul.addr", env = "CONSUL_ADDR", default_value = "localhost:8500")]
    pub consul_addr: String,

    /// Deregister from discovery after shutdown
    #[arg(long = "consul.deregister", env = "CONSUL_DEREGISTER")]
    pub consul_deregister: bool,

    /// Request timeout in milliseconds
    #[arg(long = "server.timeout", env = "SERVER_TIMEOUT", default_value = "1500")]
    pub server_timeout: u64,

    /// Per listener shutdown deadline in milliseconds
    #[arg(long = "shutdown.timeout", env = "SHUTDOWN_TIMEOUT", default_value = "5000")]
    pub shutdown_timeout: u64,

    #[arg(long = "syslog.address", env = "SYSLOG_ADDRESS", default_value = "localhost:514")]
    pub syslog_address: String,

    #[arg(long = "log.level", env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// An empty version falls back to the default.
    pub fn version(&self) -> &str {
        if self.version.is_empty() {
            DEFAULT_VERSION
        } else {
            &self.version
        }
    }

    pub fn base_route(&self) -> String {
        format!("/{}/{}", self.base_path, self.version())
    }

    pub fn const_labels(&self) -> Vec<(&'static str, String)> {
        vec![
            ("serviceName", self.base_path.clone()),
            ("serviceGroup", self.service_group.clone()),
            ("version", self.version().to_string()),
            ("dataType", self.data_type.clone()),
        ]
    }

    pub fn registration(&self) -> ServiceRegistration {
        ServiceRegistration {
            service_name: self.service_name.clone(),
            consul_address: self.consul_addr.clone(),
            http_address: self.http_addr.clone(),
            http_port: self.http_port,
            dependencies: self.dependencies(),
        }
    }

    /// Declared dependencies without blanks or repeats, in declaration order.
    pub fn dependencies(&self) -> Vec<String> {
        let mut seen = Vec::with_capacity(self.dependencies.len());
        for dependency in &self.dependencies {
            let dependency = dependency.trim();
            if !dependency.is_empty() && !seen.iter().any(|d: &String| d == dependency) {
                seen.push(dependency.to_string());
            }
        }
        seen
    }

    pub fn http_listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.http_port))
    }

    pub fn metrics_listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.metrics_port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout)
    }
}
