//! x402 paygate HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that gates a configured
//! resource behind an x402 stablecoin payment, delegating verification and
//! settlement to a remote facilitator.
//!
//! Endpoints:
//! - `GET <resource path>` – The protected resource; answers 402 with payment
//!   requirements until a valid payment is presented
//! - `GET /healthz` – Liveness probe
//!
//! This server includes:
//! - OpenTelemetry tracing via `TraceLayer`
//! - CORS support exposing the payment response headers to browsers
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `OTEL_*` variables enable tracing to systems like Honeycomb

use axum::http::{HeaderName, Method};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use x402_paygate::config::Config;
use x402_paygate::facilitator_client::select_binding;
use x402_paygate::handlers::{self, PaygateState};
use x402_paygate::policy::PaymentGate;
use x402_paygate::requirements::RequirementsTemplate;
use x402_paygate::resource::SignedUrlProvider;
use x402_paygate::sig_down::SigDown;
use x402_paygate::telemetry::Telemetry;

/// Initializes the paygate server.
///
/// - Loads `.env` variables.
/// - Initializes OpenTelemetry tracing.
/// - Selects the facilitator binding from configuration (fails fast if none applies).
/// - Starts an Axum HTTP server with the protected resource route.
///
/// Binds to the address specified by the `HOST` and `PORT` env vars.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let _telemetry = Telemetry::new();

    let config = Config::load()?;

    let facilitator = select_binding(&config.facilitator())?;

    let resource_info = config.resource_info();
    let resource_path = match resource_info.url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    let provider = SignedUrlProvider::new(
        config.access_url(),
        config.grant_ttl_seconds(),
        resource_info.metadata.clone(),
    );
    let template = RequirementsTemplate::try_new(
        config.network(),
        config.price(),
        config.pay_to(),
        resource_info,
    )?;
    let gate = PaymentGate::new(facilitator, template, config.settlement_policy());
    let state = Arc::new(PaygateState { gate, provider });

    let http_endpoints = handlers::routes(&resource_path, state)
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any)
                .expose_headers([
                    HeaderName::from_static("x-payment-status"),
                    HeaderName::from_static("x-payment-response"),
                ]),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
