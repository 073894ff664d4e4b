use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use maptiles_server::cli::Cli;
use maptiles_server::config::Config;
use maptiles_server::render::Renderer;
use maptiles_server::routes;
use maptiles_server::sources::SourceManager;
use maptiles_server::state::AppState;
use maptiles_server::styles::StyleManager;
use maptiles_server::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse_args();

    let config = Config::load(cli.config.clone())?;

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let otel_layer = telemetry::init_telemetry(&config.telemetry);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();

    config.options.paths.verify_exist()?;

    let host = cli.host.clone().unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);

    tracing::info!("Loading data sources and styles");
    let sources = SourceManager::from_configs(&config.data, &config.options.paths.mbtiles_dir()).await?;
    let styles = StyleManager::from_configs(&config.styles, &config.options.paths, &sources).await?;
    let renderer = Renderer::new(config.options.clone())?;

    tracing::info!(
        styles = styles.len(),
        data = sources.len(),
        "Loaded configuration"
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        styles,
        sources,
        renderer,
    });

    let cors = if config.server.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(AllowOrigin::any())
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let shutdown_state = state.clone();
    let app = routes::router(state, cli.ui_enabled())
        .layer(axum::middleware::from_fn(maptiles_server::logging::request_logger))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors);

    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    tracing::info!(%addr, "Starting maptiles-server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Disposing renderer pools");
    shutdown_state.renderer.dispose().await;

    telemetry::shutdown_telemetry();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
