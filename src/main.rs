use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use newsdesk::config::Config;
use newsdesk::coordinator::{start_background_refresh, Coordinator};
use newsdesk::db::Database;
use newsdesk::news::NewsClient;
use newsdesk::routes::{self, AppState};
use newsdesk::twitter::TwitterClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsdesk=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("NEWSDESK_CONFIG").unwrap_or_else(|_| "newsdesk.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded configuration from {}", config_path);

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:newsdesk.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Upstream clients
    let token = std::env::var("TWITTER_BEARER_TOKEN").ok();
    let twitter = TwitterClient::new(&config.social, token)?;
    if !twitter.is_configured() {
        warn!("TWITTER_BEARER_TOKEN is not set, the social column will stay empty");
    }
    let news = NewsClient::new(&config.news)?;

    let tweets = Arc::new(Coordinator::new(
        "social",
        twitter,
        db.clone(),
        config.social.cooldown_seconds,
    ));
    let news = Arc::new(Coordinator::new(
        "news",
        news,
        db.clone(),
        config.news.cooldown_seconds,
    ));

    // Start background refresh tasks
    if config.background_refresh_seconds > 0 {
        let interval = Duration::from_secs(config.background_refresh_seconds);
        tokio::spawn(start_background_refresh(tweets.clone(), interval));
        tokio::spawn(start_background_refresh(news.clone(), interval));
    }

    let state = Arc::new(AppState { tweets, news });

    // Build router
    let app = routes::router(state)
        .nest_service("/static", ServeDir::new("static"))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Server starting on http://{}", config.bind);

    axum::serve(listener, app).await?;

    Ok(())
}
