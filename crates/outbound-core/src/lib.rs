pub mod service;
pub mod logging;
pub mod instrument;
pub mod registration;
pub mod health;
pub mod errors;
pub mod launcher;

pub use service::{compose, BaseService, Chain, Service};
pub use logging::LoggingMiddleware;
pub use instrument::{Counter, Histogram, InstrumentingService, Instrumenter, RequestStart, TransportInstrument};
pub use registration::{dependency_path, AgentServiceCheck, RegistrationDescriptor, ServiceRegistration, HEALTHCHECK_PATH};
pub use health::CheckStatus;
pub use errors::{ListenerError, ServiceError, ShutdownError};
pub use launcher::{termination_signal, LaunchState, Launcher, Listener, ShutdownReport, Trigger};
