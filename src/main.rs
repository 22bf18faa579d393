use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use mastery_engine::catalog::Catalog;
use mastery_engine::config::Config;
use mastery_engine::db::DatabaseProxy;
use mastery_engine::logging::init_tracing;
use mastery_engine::mastery::MasteryConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let db = match DatabaseProxy::from_env().await {
        Ok(proxy) => proxy,
        Err(err) => {
            tracing::error!(error = %err, "belief store not initialized");
            return ExitCode::FAILURE;
        }
    };

    let catalog = match Catalog::load(&config.catalog_path) {
        Ok(catalog) => Arc::new(catalog),
        Err(err) => {
            tracing::error!(
                error = %err,
                path = %config.catalog_path.display(),
                "course catalog not loaded"
            );
            return ExitCode::FAILURE;
        }
    };

    let engine_config = MasteryConfig::from_env();
    tracing::info!(config = ?engine_config, "mastery engine configured");

    let app = mastery_engine::create_app(Arc::clone(&db), catalog, engine_config);

    let addr = config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "bind listener failed");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "mastery-engine listening");

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        tracing::error!(error = %e, "server error");
    }

    tracing::info!("HTTP server stopped, closing belief store");
    db.close().await;
    tracing::info!("Graceful shutdown complete");

    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
