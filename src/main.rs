use std::{env, error::Error, sync::Arc};

use axum::http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use tokio::{fs, net};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
};

use attendance_ledger::{
    db,
    http::{self, AppState},
    Config, Ledger,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = fs::read_to_string("config.toml").await?;
    let mut config = toml::from_str::<Config>(&config)?;
    if let Ok(key) = env::var("VERIFIER_API_KEY") {
        let key = key.trim();
        if !key.is_empty() {
            config.auth.api_key = Some(key.to_owned());
        }
    }
    if config.auth.api_key.is_none() {
        tracing::warn!("no API key configured, verifier API is open");
    }

    let store: Arc<dyn db::Store> = if config.db.is_memory() {
        tracing::warn!("using in-memory store, check-ins are lost on exit");
        Arc::new(db::memory::Store::new())
    } else {
        Arc::new(db::connect(config.db).await?)
    };

    let allowed_origins = config
        .http
        .cors
        .allowed_origins
        .iter()
        .map(|origin| origin.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-api-key"),
        ])
        .allow_origin(allowed_origins);

    let app = http::router(Arc::new(AppState {
        ledger: Ledger::new(store),
        api_key: config.auth.api_key,
    }))
    .layer(cors);

    let listener = net::TcpListener::bind(config.http.server.addr).await?;
    tracing::info!("listening on {}", config.http.server.addr);
    axum::serve(listener, app).await?;

    Ok(())
}
