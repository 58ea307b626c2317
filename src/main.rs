//! Registro schema tool.
//!
//! Boots the full stack the way an embedding service would (config, store,
//! registry, schema), then prints the generated SDL to stdout. Useful for
//! inspecting the API surface and for keeping generated clients in sync.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use registro::config::Config;
use registro::db::Database;
use registro::graphql::SchemaLoader;
use registro::meta::{CatalogSource, MetaRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "registro=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let db = Database::connect(&config.database_url).await?;
    let registry = Arc::new(MetaRegistry::load(&CatalogSource)?);
    info!(entities = registry.len(), "Registry loaded");

    let sync = db.sync_schema(&registry).await?;
    if !sync.tables_created.is_empty() {
        info!(tables = sync.tables_created.len(), "Created missing tables");
    }

    let schema = SchemaLoader::get_or_build(registry, db.pool(), &config)?;
    println!("{}", schema.sdl());

    Ok(())
}
