use axum::Router;
use fastfeet::{app::AppState, config::Config};
use sqlx::postgres::PgPoolOptions;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(err) = dotenvy::dotenv() {
        eprintln!("no .env loaded: {err}");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "fastfeet=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    fastfeet::migrate::run_migration(&pool).await?;

    let app_state = AppState::new(pool, &config);
    if let Some(seed) = &config.admin {
        app_state.seed_admin(seed).await?;
    }

    let dashboard = ServeDir::new(&config.public_dir)
        .fallback(ServeFile::new(config.public_dir.join("index.html")));

    let app = Router::new()
        .merge(fastfeet::api::router(app_state))
        .nest_service("/uploads", ServeDir::new(&config.upload_dir))
        .fallback_service(dashboard)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    tracing::debug!("listening on {}", config.addr);

    axum::Server::bind(&config.addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
