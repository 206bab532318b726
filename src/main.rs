use std::net::SocketAddr;

use anyhow::Context;
use gym::{app::AppState, config::Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "gym=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(anyhow::Error::msg)?;
    let app_state = AppState::new(&config)
        .await
        .map_err(anyhow::Error::msg)
        .context("cannot build application state")?;

    app_state
        .run_migration()
        .await
        .context("cannot migrate database")?;

    let app = gym::api::router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {} ({})", addr, config.environment);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("server error")?;

    Ok(())
}
