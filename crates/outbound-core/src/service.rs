use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ServiceError;
use crate::instrument::{InstrumentingService, Instrumenter};
use crate::logging::LoggingMiddleware;

/// The capability this process exposes: report whether it is available.
///
/// Every decorator implements this same trait, so layers can be stacked in
/// any order without knowing what they wrap.
#[async_trait]
pub trait Service: Send + Sync {
    async fn check(&self) -> Result<bool, ServiceError>;
}

/// The undecorated capability. Always alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseService;

#[async_trait]
impl Service for BaseService {
    async fn check(&self) -> Result<bool, ServiceError> {
        Ok(true)
    }
}

/// Builds a capability chain inside-out: the first layer added sits closest
/// to the base implementation.
pub struct Chain {
    service: Arc<dyn Service>,
}

impl Chain {
    pub fn new(base: impl Service + 'static) -> Self {
        Self {
            service: Arc::new(base),
        }
    }

    pub fn with<M>(self, middleware: M) -> Self
    where
        M: FnOnce(Arc<dyn Service>) -> Arc<dyn Service>,
    {
        Self {
            service: middleware(self.service),
        }
    }

    pub fn build(self) -> Arc<dyn Service> {
        self.service
    }
}

/// Base service, wrapped by failure logging, wrapped by instrumentation.
pub fn compose(span: tracing::Span, instrumenter: Instrumenter) -> Arc<dyn Service> {
    Chain::new(BaseService)
        .with(LoggingMiddleware::layer(span))
        .with(InstrumentingService::layer(instrumenter))
        .build()
}
