//! Republish the static reference tables the reporting surface reads
//! alongside the per-measure artifacts: abatement projects, divestment
//! flags, production volume and the VPPA list.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use edb_client::db::{reference_queries, spot_queries, usage_queries};
use forecast_service::{
    config::AppConfig,
    observability, sources,
    spot::prepare_spot,
    store::{put_json, ArtifactKey, ArtifactStore, PgArtifactStore},
};
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    let warehouse = PgPoolOptions::new()
        .max_connections(cfg.warehouse.max_connections)
        .connect(&cfg.warehouse.uri)
        .await?;
    let store_pool = PgPoolOptions::new()
        .max_connections(cfg.store.max_connections)
        .connect(&cfg.store.uri)
        .await?;
    let store: Arc<dyn ArtifactStore> = Arc::new(PgArtifactStore::new(
        store_pool,
        cfg.store.table.clone(),
        cfg.store.max_retries,
        Duration::from_millis(cfg.store.retry_backoff_ms),
    ));

    let as_of = OffsetDateTime::now_utc().date();

    let spot_rows = spot_queries::spot_projects(&warehouse).await?;
    let spot_lookup = sources::load_spot_lookup(&cfg.reference_files.spot_lookup_csv)?;
    let spot = prepare_spot(&spot_rows, &spot_lookup, as_of);

    let flags = reference_queries::divested_buildings(&warehouse).await?;
    let vppa = spot_queries::vppa_contracts(&warehouse).await?;
    let leaks = usage_queries::leaks(&warehouse).await?;
    let fleet = usage_queries::fleet(&warehouse).await?;
    let volume = sources::load_volume(
        &cfg.reference_files.volume_past_csv,
        &cfg.reference_files.volume_future_csv,
    )?;
    let volume_rows: Vec<(String, time::Date, f64)> = volume
        .into_iter()
        .map(|p| (p.building_id, p.month, p.volume))
        .collect();

    let store = store.as_ref();
    put_json(store, &ArtifactKey::reference("spot"), &spot).await?;
    put_json(store, &ArtifactKey::reference("flag"), &flags).await?;
    put_json(store, &ArtifactKey::reference("vppa"), &vppa).await?;
    put_json(store, &ArtifactKey::reference("leaks"), &leaks).await?;
    put_json(store, &ArtifactKey::reference("fleet"), &fleet).await?;
    put_json(store, &ArtifactKey::reference("volume"), &volume_rows).await?;

    tracing::info!(
        spot = spot.len(),
        flags = flags.len(),
        vppa = vppa.len(),
        "reference tables published"
    );

    Ok(())
}
