mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;
mod state;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::AppConfig::from_env().expect("invalid configuration");
    let port = config.port;

    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("database init failed");
    models::oauth2::init_builtin_applications(&pool, &config.oauth2_default_applications)
        .await
        .expect("builtin oauth2 applications init failed");

    let state = state::AppState::new(pool, config);
    let _cleanup = services::cleanup::spawn_cleanup_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "gitforge listening");
    axum::serve(listener, app).await.expect("server failed");
}
