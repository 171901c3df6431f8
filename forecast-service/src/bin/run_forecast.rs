use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use forecast_service::{
    config::AppConfig,
    forecast::{validation::CvConfig, EngineConfig},
    metrics_server, observability,
    pipeline::{MeasurePipeline, ReferenceData},
    store::PgArtifactStore,
};
use sqlx::postgres::PgPoolOptions;
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr);
    }

    let warehouse = PgPoolOptions::new()
        .max_connections(cfg.warehouse.max_connections)
        .connect(&cfg.warehouse.uri)
        .await?;
    let store_pool = PgPoolOptions::new()
        .max_connections(cfg.store.max_connections)
        .connect(&cfg.store.uri)
        .await?;

    let store = Arc::new(PgArtifactStore::new(
        store_pool,
        cfg.store.table.clone(),
        cfg.store.max_retries,
        Duration::from_millis(cfg.store.retry_backoff_ms),
    ));

    // Completed abatement projects are already visible in actuals; only
    // impacts after today adjust the forecast.
    let as_of = OffsetDateTime::now_utc().date();
    let reference = ReferenceData::load(&warehouse, &cfg, as_of).await?;

    let pipeline = MeasurePipeline {
        store,
        reference,
        constants: cfg.conversion.clone(),
        engine: EngineConfig {
            horizon_months: cfg.pipeline.horizon_months,
            ..EngineConfig::default()
        },
        cv: CvConfig::default(),
        regressor_buildings: cfg.pipeline.volume_regressor_buildings.clone(),
    };

    let results = pipeline.run_all(&warehouse, &cfg.pipeline.measures).await;

    let mut failed = 0usize;
    for result in &results {
        match result {
            Ok(report) => tracing::info!(
                measure = %report.measure,
                buildings = report.buildings,
                buildings_unavailable = report.buildings_unavailable,
                rows_published = report.rows_published,
                "measure complete"
            ),
            Err(_) => failed += 1,
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} measure runs failed", results.len());
    }

    Ok(())
}
