use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wisecrypto::config::Config;
use wisecrypto::services::{AccountStore, MemoryStore, SqliteAccountStore};
use wisecrypto::sources::{FinnhubClient, FinnhubStream};
use wisecrypto::{app, websocket, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wisecrypto=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!("Starting WiseCrypto server on {}:{}", config.host, config.port);

    // Open the account store
    let store: Arc<dyn AccountStore> = match &config.database_path {
        Some(path) => {
            info!("Using SQLite account store at {}", path);
            Arc::new(SqliteAccountStore::new(path)?)
        }
        None => {
            warn!("DATABASE_PATH not set, account data is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(config.clone(), store);
    state.ledger.spawn_store_listener();
    if config.ledger.idle_eviction_secs > 0 {
        state
            .ledger
            .spawn_idle_eviction(Duration::from_secs(config.ledger.idle_eviction_secs));
    }

    // Seed the market view, then start streaming
    let feed_config = &config.feed;
    match &feed_config.finnhub_api_key {
        Some(api_key) => {
            let client = FinnhubClient::new(api_key.clone(), feed_config.rest_url.clone());
            state.feed.initialize(&client, &feed_config.symbols).await;

            info!("Starting Finnhub WebSocket for {} instruments", feed_config.symbols.len());
            let stream = FinnhubStream::new(
                api_key.clone(),
                feed_config.ws_url.clone(),
                state.feed.clone(),
                feed_config.reconnect_secs,
            );
            tokio::spawn(async move {
                stream.run().await;
            });
        }
        None => {
            warn!("FINNHUB_API_KEY not set, serving zeroed quotes");
            for symbol in &feed_config.symbols {
                state
                    .feed
                    .register(symbol, wisecrypto::sources::finnhub::display_name(symbol));
            }
        }
    }

    websocket::spawn_broadcasters(
        state.room_manager.clone(),
        state.feed.clone(),
        state.ledger.clone(),
    );

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("WiseCrypto server listening on {}", addr);

    let feed = state.feed.clone();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    feed.shutdown();
    Ok(())
}
