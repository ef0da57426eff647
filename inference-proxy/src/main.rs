use std::fmt::Display;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get, post};
use axum::Router;
use clap::Parser;
use tokio::signal;
use tower_http::trace::TraceLayer;

use pm_attest::TrustAnchors;
use pm_inference_proxy::adapters::{openai, unencrypted, unstructured};
use pm_inference_proxy::attestation::{self, HttpOcspResponder};
use pm_inference_proxy::cli::{Args, LogFormat};
use pm_inference_proxy::config::{AdapterKind, Config};
use pm_inference_proxy::error::Error;
use pm_inference_proxy::state::AppState;
use pm_inference_proxy::tls;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = Config::load(&args.config_file).expect_pretty("failed to load config");
    let bind_address = config.server.bind_address.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8443)));

    if let Some(attestation_config) = config.attestation.clone() {
        if attestation_config.enabled {
            verify_backend_attestation(&attestation_config).await.expect_pretty("backend attestation failed");
        }
    }

    let state = AppState::new(config.clone()).await.expect_pretty("failed to initialize inference proxy state");
    let watch_handle = state.spawn_secret_watch();

    let router = build_router(config.adapter.kind).with_state(state.clone());

    let listener = match TcpListener::bind(bind_address) {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            tracing::error!("failed to bind to {bind_address}: {e}. Is another inference proxy already running?");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("failed to bind to {bind_address}: {e}");
            std::process::exit(1);
        }
    };
    let actual_bind_address = listener.local_addr().expect_pretty("failed to read local address from listener");
    let tls_config = tls::load(&config.server).await.expect_pretty("failed to load TLS keypair");
    tracing::info!("pm-inference-proxy listening on {actual_bind_address}");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    axum_server::from_tcp_rustls(listener, tls_config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect_pretty("inference proxy server exited unexpectedly");

    state.shutdown();
    let _ = watch_handle.await;
}

fn build_router(kind: AdapterKind) -> Router<AppState> {
    let router = Router::new();
    let router = match kind {
        AdapterKind::Openai => router
            .route("/v1/chat/completions", post(openai::chat_completions))
            .route("/v1/completions", post(openai::completions))
            .route("/v1/embeddings", post(openai::embeddings))
            .route("/v1/audio/transcriptions", post(openai::transcriptions))
            .route("/v1/models", get(openai::models)),
        AdapterKind::Unstructured => router
            .route("/healthcheck", get(unstructured::healthcheck))
            .route("/unstructured/{*path}", any(unstructured::unstructured)),
        AdapterKind::Unencrypted => router.fallback(unencrypted::passthrough),
    };
    router.fallback(not_found).layer(DefaultBodyLimit::max(100 * 1024 * 1024)).layer(TraceLayer::new_for_http())
}

fn leak_root_der(path: &std::path::Path) -> Result<&'static [u8], Error> {
    let bytes = std::fs::read(path).map_err(|e| Error::Config {
        message: format!("failed to read trust anchor {}: {e}", path.display()),
    })?;
    Ok(Box::leak(bytes.into_boxed_slice()))
}

async fn verify_backend_attestation(config: &pm_inference_proxy::config::AttestationConfig) -> Result<(), Error> {
    let anchors = TrustAnchors {
        gpu_attestation: leak_root_der(&config.gpu_attestation_root_path)?,
        vbios_rim: leak_root_der(&config.vbios_rim_root_path)?,
        driver_rim: leak_root_der(&config.driver_rim_root_path)?,
    };
    let client = reqwest::Client::new();
    let ocsp = HttpOcspResponder::new(client, format!("{}/ocsp", config.report_url));
    attestation::verify_backend(config, &anchors, &ocsp).await
}

async fn not_found() -> Error {
    Error::NotFound
}

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter);
    match format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect_pretty("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect_pretty("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    #[cfg(unix)]
    let hangup = async {
        signal::unix::signal(signal::unix::SignalKind::hangup())
            .expect_pretty("failed to install SIGHUP handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
        () = hangup => tracing::info!("received SIGHUP, shutting down"),
    }
}

/// The only place panics are allowed: process startup, before any request has
/// been served. Everything after this must handle errors gracefully.
trait ExpectPretty<T> {
    fn expect_pretty(self, msg: &str) -> T;
}

impl<T, E: Display> ExpectPretty<T> for Result<T, E> {
    fn expect_pretty(self, msg: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!("{msg}: {err}");
                std::process::exit(1);
            }
        }
    }
}
