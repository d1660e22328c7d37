use std::sync::Arc;

use clap::Parser;
use tracing::Instrument;

use outbound_core::Launcher;
use outbound_discovery::Registrar;

mod config;
mod errors;
mod exposition;
mod http;
mod listener;
mod telemetry;

use crate::config::Args;
use crate::errors::StartupError;
use crate::exposition::Metrics;
use crate::listener::HttpListener;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "failed to initialize the application");
        eprintln!("failed to initialize the application :: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    telemetry::init(&args)?;
    let span = telemetry::service_span(&args);
    serve(args).instrument(span).await
}

/// Registers, builds the listeners and runs them until shutdown.
///
/// Any startup failure returns before a listener is bound.
async fn serve(args: Args) -> Result<(), StartupError> {
    let registrar = Registrar::new(&args.registration())?;
    registrar.register().await?;

    let metrics = Metrics::new(args.const_labels())?;
    let service = outbound_core::compose(
        tracing::Span::current(),
        metrics.instrumenter(vec!["method".to_string()]),
    );
    let transport = Arc::new(metrics.transport(vec!["path".to_string(), "code".to_string()]));
    tracing::info!(base_route = %args.base_route(), "service mounted");

    let report = Launcher::new(args.shutdown_timeout())
        .with_listener(HttpListener::new(
            "http",
            args.http_listen_addr(),
            http::router(service, transport, &args.dependencies(), args.request_timeout()),
        ))
        .with_listener(HttpListener::new(
            "metrics",
            args.metrics_listen_addr(),
            metrics.router(),
        ))
        .run()
        .await;
    tracing::info!(%report, "exit");

    if args.consul_deregister {
        if let Err(e) = registrar.deregister().await {
            tracing::error!(error = %e, "deregistration failed");
        }
    }
    Ok(())
}
