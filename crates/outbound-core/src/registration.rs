use std::net::Ipv6Addr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::health::CheckStatus;

pub const HEALTHCHECK_PATH: &str = "/healthcheck";

const CHECK_INTERVAL: Duration = Duration::from_secs(1);
const CHECK_TIMEOUT: Duration = Duration::from_secs(1);
const DEREGISTER_CRITICAL_AFTER: Duration = Duration::from_secs(72 * 60 * 60);

/// What the process knows about itself when it registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    pub service_name: String,
    pub consul_address: String,
    pub http_address: String,
    pub http_port: u16,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgentServiceCheck {
    #[serde(rename = "HTTP")]
    pub http: String,
    #[serde(serialize_with = "go_duration")]
    pub interval: Duration,
    #[serde(serialize_with = "go_duration")]
    pub timeout: Duration,
    #[serde(serialize_with = "go_duration")]
    pub deregister_critical_service_after: Duration,
    pub status: CheckStatus,
    pub notes: String,
}

impl AgentServiceCheck {
    fn http(target: String, notes: String) -> Self {
        Self {
            http: target,
            interval: CHECK_INTERVAL,
            timeout: CHECK_TIMEOUT,
            deregister_critical_service_after: DEREGISTER_CRITICAL_AFTER,
            status: CheckStatus::Warning,
            notes,
        }
    }
}

/// Registration record sent to the discovery agent.
///
/// Holds one check for the service's own health endpoint followed by one
/// check per declared dependency, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegistrationDescriptor {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    address: String,
    port: u16,
    checks: Vec<AgentServiceCheck>,
}

impl RegistrationDescriptor {
    pub fn new(registration: &ServiceRegistration) -> Self {
        let host = match registration.http_address.parse::<Ipv6Addr>() {
            Ok(ip) => format!("[{}]", ip),
            Err(_) => registration.http_address.clone(),
        };
        let origin = format!("http://{}:{}", host, registration.http_port);
        let target = format!("{}{}", origin, HEALTHCHECK_PATH);

        let mut checks = Vec::with_capacity(registration.dependencies.len() + 1);
        checks.push(AgentServiceCheck::http(
            target.clone(),
            "service health check".to_string(),
        ));
        for dependency in &registration.dependencies {
            checks.push(AgentServiceCheck::http(
                format!("{}{}", origin, dependency_path(dependency)),
                format!("Service Check to monitor the health of : {}", dependency),
            ));
        }

        Self {
            id: registration.service_name.clone(),
            name: registration.service_name.clone(),
            address: registration.http_address.clone(),
            port: registration.http_port,
            checks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn checks(&self) -> &[AgentServiceCheck] {
        &self.checks
    }
}

/// Route the dependency check for `dependency` is sent to.
pub fn dependency_path(dependency: &str) -> String {
    format!("{}/{}", HEALTHCHECK_PATH, urlencoding::encode(dependency))
}

fn go_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_go_duration(*duration))
}

/// Formats a duration the way Go's `time.ParseDuration` reads it back,
/// using the largest whole unit.
pub fn format_go_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    match duration.as_secs() {
        0 => "0s".to_string(),
        secs if secs % 3600 == 0 => format!("{}h", secs / 3600),
        secs if secs % 60 == 0 => format!("{}m", secs / 60),
        secs => format!("{}s", secs),
    }
}
