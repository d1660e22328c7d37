use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::Span;

use crate::errors::ServiceError;
use crate::service::Service;

/// Logs failed calls of the wrapped service. Successful calls are silent.
///
/// Events are emitted with `span` as their parent, so the span carries the
/// service identity fields regardless of which task runs the call.
pub struct LoggingMiddleware {
    next: Arc<dyn Service>,
    span: Span,
}

impl LoggingMiddleware {
    pub fn new(span: Span, next: Arc<dyn Service>) -> Self {
        Self { next, span }
    }

    pub fn layer(span: Span) -> impl FnOnce(Arc<dyn Service>) -> Arc<dyn Service> {
        move |next: Arc<dyn Service>| -> Arc<dyn Service> { Arc::new(Self::new(span, next)) }
    }
}

#[async_trait]
impl Service for LoggingMiddleware {
    async fn check(&self) -> Result<bool, ServiceError> {
        let begin = Instant::now();
        let result = self.next.check().await;
        if let Err(err) = &result {
            tracing::error!(
                parent: &self.span,
                method = "check",
                took = ?begin.elapsed(),
                err = %err,
                "call failed"
            );
        }
        result
    }
}
