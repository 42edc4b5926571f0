use std::sync::Arc;

use anyhow::Result;
use log::info;

mod blob;
mod cache;
mod capability;
mod cli;
mod config;
mod conn;
mod dispatcher;
mod downloader;
mod error;
mod guard;
mod listing;
mod metrics;
mod mime;
mod mirror;
mod models;
mod outcome;
mod persister;
mod range;
mod resolver;
mod responder;
mod server;
mod store;
mod streamer;

use cli::{Gateway, GatewayCommand};
use config::Settings;
use dispatcher::DispatchContext;
use store::{PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args: Gateway = argh::from_env();
    let settings = Arc::new(config::parse_settings(&args.config)?);

    info!("connecting to database...");
    let pool = sqlx::PgPool::connect(&settings.db_pgconn).await?;

    match args.command {
        GatewayCommand::Migrate(_) => {
            info!("running pending migrations...");
            sqlx::migrate!().run(&pool).await?;
            info!("migrations complete");
            Ok(())
        }
        GatewayCommand::Serve(_) => {
            info!("running any pending migrations...");
            sqlx::migrate!().run(&pool).await?;
            serve(pool, settings).await
        }
    }
}

async fn serve(pool: sqlx::PgPool, settings: Arc<Settings>) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let client = reqwest::Client::builder().build()?;
    let metrics = Arc::new(metrics::Metrics::new());
    let blob = Arc::new(blob::BlobStore::new(Some(build_s3_client().await)));

    let cache = if settings.cache_enabled {
        info!("response cache enabled, connecting to {}", settings.redis_url);
        Some(cache::ResponseCache::new(&settings.redis_url, settings.cache_ttl_secs)?)
    } else {
        None
    };

    let ctx = DispatchContext {
        store,
        client,
        metrics,
        blob,
        settings: settings.clone(),
        cache: cache.clone(),
    };

    server::serve(ctx, cache, settings).await
}

/// Built unconditionally: credential/region resolution is lazy, so this is cheap even
/// for a gateway whose domains never select the `s3` storage backend.
async fn build_s3_client() -> aws_sdk_s3::Client {
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    aws_sdk_s3::Client::new(&config)
}
