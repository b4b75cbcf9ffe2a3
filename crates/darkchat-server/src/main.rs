use std::sync::Arc;

use tracing::info;

use darkchat_server::app;
use darkchat_server::config::ServerConfig;
use darkchat_service::ServiceOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "darkchat=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let db = Arc::new(darkchat_db::Database::open(&config.db_path)?);
    let state = app::build_state(
        db,
        config.jwt_secret.clone(),
        ServiceOptions {
            redact_errors: config.redact_errors,
        },
    );

    let addr = config.bind_addr()?;
    info!("Darkchat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app::router(state)).await?;

    Ok(())
}
