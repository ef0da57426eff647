use std::fmt::Display;
use std::io::ErrorKind;
use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get, post};
use axum::Router;
use clap::Parser;
use tokio::signal;
use tower_http::trace::TraceLayer;

use pm_gateway::cli::{Args, LogFormat};
use pm_gateway::config::Config;
use pm_gateway::error::Error;
use pm_gateway::handlers::{chat, embeddings, models, transcriptions, unstructured};
use pm_gateway::state::AppState;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = Config::load(&args.config_file).expect_pretty("failed to load config");
    let bind_address = config.gateway.bind_address.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8085)));

    let state = AppState::new(config).expect_pretty("failed to initialize gateway state");
    let refresh_handle = state.spawn_secret_refresh();

    let router = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/completions", post(chat::completions))
        .route("/v1/embeddings", post(embeddings::embeddings))
        .route("/v1/audio/transcriptions", post(transcriptions::transcriptions))
        .route("/v1/models", get(models::models))
        .route("/unstructured/{*path}", any(unstructured::unstructured))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            tracing::error!("failed to bind to {bind_address}: {e}. Is another gateway already running?");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("failed to bind to {bind_address}: {e}");
            std::process::exit(1);
        }
    };
    let actual_bind_address = listener
        .local_addr()
        .expect_pretty("failed to read local address from listener");
    tracing::info!("pm-gateway listening on {actual_bind_address}");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect_pretty("gateway server exited unexpectedly");

    refresh_handle.abort();
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
