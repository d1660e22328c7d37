use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    extract::{MatchedPath, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    BoxError, Router,
};
use serde::Serialize;
use tower::{timeout::error::Elapsed, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::catch_panic::CatchPanicLayer;

use outbound_core::{dependency_path, RequestStart, Service, ServiceError, TransportInstrument, HEALTHCHECK_PATH};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Path label for requests no route matched.
const UNMATCHED_PATH: &str = "unmatched";

#[derive(Clone)]
struct AppState {
    service: Arc<dyn Service>,
}

/// Health check routes over the capability chain: the service's own route
/// plus one route per declared dependency.
///
/// Layers, outermost first: start time stamp, transport finalizer, panic
/// recovery, timeout mapping, request timeout.
pub fn router(
    service: Arc<dyn Service>,
    transport: Arc<TransportInstrument>,
    dependencies: &[String],
    timeout: Duration,
) -> Router {
    let paths: BTreeSet<String> = dependencies.iter().map(|d| dependency_path(d)).collect();
    let mut routes = Router::new().route(HEALTHCHECK_PATH, get(health_check));
    for path in &paths {
        routes = routes.route(path, get(health_check));
    }

    routes
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(stamp_start))
                .layer(middleware::from_fn_with_state(transport, finalize))
                .layer(CatchPanicLayer::custom(recover))
                .layer(HandleErrorLayer::new(timed_out))
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(AppState { service })
}

async fn health_check(State(state): State<AppState>) -> Result<Response, ApiError> {
    let alive = state.service.check().await?;
    Ok(json_response(StatusCode::OK, &alive))
}

async fn stamp_start(mut req: Request, next: Next) -> Response {
    req.extensions_mut().insert(RequestStart::now());
    next.run(req).await
}

async fn finalize(State(transport): State<Arc<TransportInstrument>>, req: Request, next: Next) -> Response {
    let start = req.extensions().get::<RequestStart>().copied();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());

    let response = next.run(req).await;
    transport.finalize(start, &path, response.status().as_u16());
    response
}

/// Requests past the deadline get 503 with an empty body.
async fn timed_out(err: BoxError) -> StatusCode {
    if err.is::<Elapsed>() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        tracing::error!(error = %err, "unhandled middleware error");
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn recover(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = message, "recovered from panic");
    error_response("internal server error")
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error_response(&self.0.to_string())
    }
}

fn error_response(message: &str) -> Response {
    json_response(StatusCode::INTERNAL_SERVER_ERROR, &ErrorBody { error: message })
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(mut body) => {
            body.push(b'\n');
            (
                status,
                [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
                body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use outbound_core::{BaseService, Histogram};
    use std::sync::Mutex;
    use std::time::Instant;
    use tower::ServiceExt;

    #[derive(Default)]
    struct Latencies(Mutex<Vec<(String, String, f64)>>);

    impl Histogram for Latencies {
        fn observe(&self, labels: &[(&str, &str)], value: f64) {
            self.0
                .lock()
                .unwrap()
                .push((labels[0].1.to_string(), labels[1].1.to_string(), value));
        }
    }

    impl Latencies {
        fn recorded(&self) -> Vec<(String, String)> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|(path, code, _)| (path.clone(), code.clone()))
                .collect()
        }
    }

    struct Unavailable;

    #[async_trait]
    impl Service for Unavailable {
        async fn check(&self) -> Result<bool, ServiceError> {
            Err(ServiceError::Unavailable("db down".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Service for Panicking {
        async fn check(&self) -> Result<bool, ServiceError> {
            panic!("poisoned state")
        }
    }

    struct Slow;

    #[async_trait]
    impl Service for Slow {
        async fn check(&self) -> Result<bool, ServiceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }
    }

    fn app(service: impl Service + 'static, timeout: Duration) -> (Router, Arc<Latencies>) {
        let latencies = Arc::new(Latencies::default());
        let transport = TransportInstrument::new(vec!["path".into(), "code".into()], latencies.clone());
        let dependencies = vec!["postgres".to_string()];
        (
            router(Arc::new(service), Arc::new(transport), &dependencies, timeout),
            latencies,
        )
    }

    async fn send(app: Router, uri: &str) -> (StatusCode, Option<HeaderValue>, String) {
        let response = app
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn healthcheck_returns_json_true() {
        let (app, latencies) = app(BaseService, Duration::from_secs(1));

        let (status, content_type, body) = send(app, "/healthcheck").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.unwrap(), JSON_CONTENT_TYPE);
        assert_eq!(serde_json::from_str::<bool>(&body).unwrap(), true);
        assert_eq!(latencies.recorded(), vec![("/healthcheck".to_string(), "200".to_string())]);
    }

    #[tokio::test]
    async fn declared_dependencies_are_routed() {
        let (app, latencies) = app(BaseService, Duration::from_secs(1));

        let (status, _, body) = send(app, "/healthcheck/postgres").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "true\n");
        assert_eq!(
            latencies.recorded(),
            vec![("/healthcheck/postgres".to_string(), "200".to_string())]
        );
    }

    #[tokio::test]
    async fn undeclared_dependencies_are_not_found() {
        let (app, latencies) = app(BaseService, Duration::from_secs(1));

        let (status, _, _) = send(app, "/healthcheck/junk42").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(latencies.recorded().iter().all(|(path, _)| path != "/healthcheck/junk42"));
    }

    #[tokio::test]
    async fn service_errors_become_json_500() {
        let (app, latencies) = app(Unavailable, Duration::from_secs(1));

        let (status, content_type, body) = send(app, "/healthcheck").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(content_type.unwrap(), JSON_CONTENT_TYPE);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["error"], "service unavailable: db down");
        assert_eq!(latencies.recorded(), vec![("/healthcheck".to_string(), "500".to_string())]);
    }

    #[tokio::test]
    async fn panics_are_recovered_as_json_500() {
        let (app, latencies) = app(Panicking, Duration::from_secs(1));

        let (status, _, body) = send(app, "/healthcheck").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["error"], "internal server error");
        assert_eq!(latencies.recorded().len(), 1);
    }

    #[tokio::test]
    async fn slow_requests_time_out_with_empty_body() {
        let (app, latencies) = app(Slow, Duration::from_millis(50));

        let begin = Instant::now();
        let (status, _, body) = send(app, "/healthcheck").await;

        assert!(begin.elapsed() < Duration::from_secs(1));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.is_empty());
        assert_eq!(latencies.recorded(), vec![("/healthcheck".to_string(), "503".to_string())]);
    }

    #[tokio::test]
    async fn path_label_drops_query_string() {
        let (app, latencies) = app(BaseService, Duration::from_secs(1));

        for uri in ["/healthcheck?verbose=1", "/healthcheck?x=2", "/healthcheck/postgres?x=3"] {
            send(app.clone(), uri).await;
        }

        assert_eq!(
            latencies.recorded(),
            vec![
                ("/healthcheck".to_string(), "200".to_string()),
                ("/healthcheck".to_string(), "200".to_string()),
                ("/healthcheck/postgres".to_string(), "200".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn versioned_base_route_is_not_routed() {
        let (app, _) = app(BaseService, Duration::from_secs(1));

        let (status, _, _) = send(app, "/user/v1/healthcheck").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
