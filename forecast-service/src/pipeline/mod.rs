//! Per-measure pipeline orchestration.
//!
//! Each measure runs the same sequence: extract, normalize, fit and
//! forecast per building, stitch, enrich, convert, aggregate, overlay
//! abatement projects, label, clamp, publish. Measures are independent of
//! one another; a fatal extraction failure aborts only its own measure,
//! and a failed conversion branch still publishes a well-formed empty
//! table so the reporting surface never sees a malformed artifact.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use sqlx::PgPool;
use time::Date;

use edb_client::db::{factor_queries, reference_queries, spot_queries, usage_queries};

use crate::config::AppConfig;
use crate::convert::{
    add_spot, aggregate_on_portfolio_level, attach_site_attributes, clamp_negative,
    convert_measure, select_columns, EmissionRecord,
};
use crate::factors::{self, FactorTable};
use crate::forecast::validation::CvConfig;
use crate::forecast::{
    cross_validate_all, cv_accuracy, fit_and_forecast, residual_accuracy, residuals, EngineConfig,
};
use crate::measure;
use crate::nonseasonal::{estimate_flat_forecast, to_emission_records};
use crate::normalize::{
    building_owner_lookup, monthly_series, normalize_natural_gas, normalize_rollups,
    normalize_steam, NormalizedOutput,
};
use crate::sources::{self, FixedFactorTable};
use crate::spot::{
    building_folder_map, divested_set, monthly_impacts, owner_reference, prepare_spot,
    AbatementProject,
};
use crate::stitch::stitch;
use crate::store::{put_json, Artifact, ArtifactKey, ArtifactStore};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("extract error: {0}")]
    Extract(String),
    #[error("reference data error: {0}")]
    Reference(String),
    #[error("normalize error: {0}")]
    Normalize(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("convert error: {0}")]
    Convert(String),
    #[error("store error: {0}")]
    Store(String),
}

/// Immutable reference snapshot shared by every measure in a run.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub building_to_folder: HashMap<String, String>,
    pub folder_to_owner: HashMap<String, String>,
    pub divested: HashSet<String>,
    pub fixed_factors: FixedFactorTable,
    pub electricity: FactorTable,
    pub steam: FactorTable,
    pub spot: Vec<AbatementProject>,
    pub volume: HashMap<(String, Date), f64>,
}

impl ReferenceData {
    /// Assemble the snapshot from the warehouse and the local reference
    /// files. Failures here are fatal for the run: nothing downstream can
    /// work without the hierarchy and factor tables.
    pub async fn load(
        pool: &PgPool,
        cfg: &AppConfig,
        as_of: Date,
    ) -> Result<Self, PipelineError> {
        let extract = |e: anyhow::Error| PipelineError::Extract(e.to_string());

        let folder_rows = reference_queries::building_folder_paths(pool)
            .await
            .map_err(extract)?;
        let divested_rows = reference_queries::divested_buildings(pool)
            .await
            .map_err(extract)?;
        let owner_groups = spot_queries::owner_folder_groups(pool).await.map_err(extract)?;
        let owner_names = spot_queries::owner_names(pool).await.map_err(extract)?;
        let spot_rows = spot_queries::spot_projects(pool).await.map_err(extract)?;
        let ecf_rows = factor_queries::electricity_factors(pool).await.map_err(extract)?;
        let scf_rows = factor_queries::steam_factors(pool).await.map_err(extract)?;

        let horizon = cfg.pipeline.horizon_months;
        let policy = &cfg.pipeline.factor_policy;
        let electricity_entries = factors::extend_factors(
            factors::dedupe_monthly(factors::from_warehouse_rows(&ecf_rows), policy),
            horizon,
        );
        let steam_entries = factors::extend_factors(
            factors::dedupe_monthly(factors::from_warehouse_rows(&scf_rows), policy),
            horizon,
        );

        let fixed_factors =
            sources::load_fixed_factors(&cfg.reference_files.conversion_factors_csv)?;
        let spot_lookup = sources::load_spot_lookup(&cfg.reference_files.spot_lookup_csv)?;
        let volume_points = sources::load_volume(
            &cfg.reference_files.volume_past_csv,
            &cfg.reference_files.volume_future_csv,
        )?;

        Ok(Self {
            building_to_folder: building_folder_map(&folder_rows),
            folder_to_owner: owner_reference(
                &owner_groups,
                &owner_names,
                &cfg.pipeline.folder_path_aliases,
            ),
            divested: divested_set(&divested_rows),
            fixed_factors,
            electricity: FactorTable::new(&electricity_entries),
            steam: FactorTable::new(&steam_entries),
            spot: prepare_spot(&spot_rows, &spot_lookup, as_of),
            volume: sources::volume_by_building_month(&volume_points),
        })
    }
}

/// Outcome summary for one measure's run.
#[derive(Debug, Clone)]
pub struct MeasureReport {
    pub measure: String,
    pub buildings: usize,
    pub buildings_unavailable: usize,
    pub rows_published: usize,
}

pub struct MeasurePipeline {
    pub store: Arc<dyn ArtifactStore>,
    pub reference: ReferenceData,
    pub constants: crate::config::ConversionConstants,
    pub engine: EngineConfig,
    pub cv: CvConfig,
    pub regressor_buildings: Vec<String>,
}

impl MeasurePipeline {
    /// Extract and normalize one measure's raw usage.
    async fn extract_and_normalize(
        &self,
        pool: &PgPool,
        measure_name: &str,
    ) -> Result<NormalizedOutput, PipelineError> {
        let extract = |e: anyhow::Error| PipelineError::Extract(e.to_string());

        let normalized = match measure_name {
            measure::NATURAL_GAS => {
                let records = usage_queries::natural_gas(pool).await.map_err(extract)?;
                normalize_natural_gas(
                    measure_name,
                    &records,
                    &self.reference.folder_to_owner,
                    &self.reference.divested,
                    &self.constants,
                )
            }
            measure::STEAM => {
                let records = usage_queries::steam(pool).await.map_err(extract)?;
                normalize_steam(
                    measure_name,
                    &records,
                    &self.reference.folder_to_owner,
                    &self.reference.divested,
                    &self.constants,
                )
            }
            _ => {
                let records = usage_queries::usage_rollups(pool, measure_name)
                    .await
                    .map_err(extract)?;
                normalize_rollups(
                    measure_name,
                    &records,
                    &self.reference.building_to_folder,
                    &self.reference.folder_to_owner,
                    &self.reference.divested,
                )
            }
        };
        Ok(normalized)
    }

    /// Full pipeline for one statistically-modeled measure.
    pub async fn run_measure(
        &self,
        pool: &PgPool,
        measure_name: &str,
    ) -> Result<MeasureReport, PipelineError> {
        let normalized = self.extract_and_normalize(pool, measure_name).await?;
        self.process_and_publish(measure_name, normalized).await
    }

    /// Everything after normalization, separated so the modeling and
    /// conversion path can run against in-memory fixtures.
    pub async fn process_and_publish(
        &self,
        measure_name: &str,
        normalized: NormalizedOutput,
    ) -> Result<MeasureReport, PipelineError> {
        let series = monthly_series(&normalized.points);
        let buildings = series.len();

        tracing::info!(measure = measure_name, buildings, "fitting per-building models");
        let outcomes = fit_and_forecast(
            series.clone(),
            &self.reference.volume,
            &self.regressor_buildings,
            &self.engine,
        )
        .await;
        let buildings_unavailable = outcomes.values().filter(|o| !o.is_available()).count();

        let cv = cross_validate_all(&series, &outcomes, &self.cv);
        let resid = residuals(&outcomes, &series);
        let cv_scores = cv_accuracy(&cv);
        let resid_scores = residual_accuracy(&resid);

        let stitched = stitch(&series, &outcomes);
        let enriched = attach_site_attributes(&stitched, &normalized.points);
        let converted = convert_measure(
            &enriched,
            measure_name,
            &self.reference.fixed_factors,
            &self.reference.electricity,
            &self.reference.steam,
            &self.constants,
        );

        let records = match converted {
            Some(converted) => {
                let aggregated = aggregate_on_portfolio_level(converted);
                let impacts = monthly_impacts(&self.reference.spot, measure_name);
                let mut records = add_spot(aggregated, &impacts);
                clamp_negative(&mut records);
                Some(records)
            }
            None => {
                tracing::error!(measure = measure_name, "conversion branch failed");
                None
            }
        };
        let table: Vec<EmissionRecord> = select_columns(records);

        let store_err = |e: crate::store::StoreError| PipelineError::Store(e.to_string());
        let key = |artifact| ArtifactKey::per_measure(artifact, measure_name);

        let models: BTreeMap<_, _> = outcomes
            .iter()
            .map(|(b, o)| (b.clone(), o.model.clone()))
            .collect();
        let forecasts: BTreeMap<_, _> = outcomes
            .iter()
            .map(|(b, o)| (b.clone(), o.forecast.clone()))
            .collect();
        let coefficients: BTreeMap<_, _> = outcomes
            .iter()
            .map(|(b, o)| (b.clone(), o.regressor.clone()))
            .collect();

        let store = self.store.as_ref();
        put_json(store, &key(Artifact::Models), &models)
            .await
            .map_err(store_err)?;
        put_json(store, &key(Artifact::Forecasts), &forecasts)
            .await
            .map_err(store_err)?;
        put_json(store, &key(Artifact::RegressorCoefficients), &coefficients)
            .await
            .map_err(store_err)?;
        put_json(store, &key(Artifact::CrossValidation), &cv)
            .await
            .map_err(store_err)?;
        put_json(store, &key(Artifact::Residuals), &resid)
            .await
            .map_err(store_err)?;
        put_json(store, &key(Artifact::CvScores), &cv_scores)
            .await
            .map_err(store_err)?;
        put_json(store, &key(Artifact::ResidualScores), &resid_scores)
            .await
            .map_err(store_err)?;
        put_json(store, &key(Artifact::EmissionTable), &table)
            .await
            .map_err(store_err)?;
        put_json(
            store,
            &key(Artifact::OwnerLookup),
            &building_owner_lookup(&normalized.points),
        )
        .await
        .map_err(store_err)?;

        tracing::info!(
            measure = measure_name,
            buildings,
            buildings_unavailable,
            rows_published = table.len(),
            "measure published"
        );

        Ok(MeasureReport {
            measure: measure_name.to_string(),
            buildings,
            buildings_unavailable,
            rows_published: table.len(),
        })
    }

    /// Refrigerant leaks: flat three-year-average projection per building,
    /// aggregated per owner.
    pub async fn run_leaks(&self, pool: &PgPool) -> Result<MeasureReport, PipelineError> {
        let records = usage_queries::leaks(pool)
            .await
            .map_err(|e| PipelineError::Extract(e.to_string()))?;
        let normalized = normalize_rollups(
            measure::LEAKS,
            &records,
            &self.reference.building_to_folder,
            &self.reference.folder_to_owner,
            &self.reference.divested,
        );
        let series = monthly_series(&normalized.points);
        let buildings = series.len();

        let flat = estimate_flat_forecast(&series, self.engine.horizon_months);
        let owner_by_building: HashMap<String, String> =
            building_owner_lookup(&normalized.points).into_iter().collect();
        let table =
            to_emission_records(&flat, |b| owner_by_building.get(b).cloned());

        self.publish_nonseasonal(measure::LEAKS, &normalized, &table)
            .await?;
        Ok(MeasureReport {
            measure: measure::LEAKS.to_string(),
            buildings,
            buildings_unavailable: 0,
            rows_published: table.len(),
        })
    }

    /// Fleet fuel: same flat projection, reported under the synthetic
    /// owner "Fleet" since vehicles have no building hierarchy.
    pub async fn run_fleet(&self, pool: &PgPool) -> Result<MeasureReport, PipelineError> {
        let records = usage_queries::fleet(pool)
            .await
            .map_err(|e| PipelineError::Extract(e.to_string()))?;

        let mut summed: BTreeMap<(String, Date), f64> = BTreeMap::new();
        for r in &records {
            let month = crate::calendar::month_start(r.month);
            *summed
                .entry((r.building_id.to_uppercase(), month))
                .or_insert(0.0) += r.value;
        }
        let mut series: BTreeMap<String, Vec<(Date, f64)>> = BTreeMap::new();
        for ((building, month), value) in summed {
            series.entry(building).or_default().push((month, value));
        }
        let buildings = series.len();

        let flat = estimate_flat_forecast(&series, self.engine.horizon_months);
        let table = to_emission_records(&flat, |_| Some("Fleet".to_string()));

        let store_err = |e: crate::store::StoreError| PipelineError::Store(e.to_string());
        put_json(
            self.store.as_ref(),
            &ArtifactKey::per_measure(Artifact::EmissionTable, measure::FLEET),
            &table,
        )
        .await
        .map_err(store_err)?;

        Ok(MeasureReport {
            measure: measure::FLEET.to_string(),
            buildings,
            buildings_unavailable: 0,
            rows_published: table.len(),
        })
    }

    async fn publish_nonseasonal(
        &self,
        measure_name: &str,
        normalized: &NormalizedOutput,
        table: &[EmissionRecord],
    ) -> Result<(), PipelineError> {
        let store_err = |e: crate::store::StoreError| PipelineError::Store(e.to_string());
        put_json(
            self.store.as_ref(),
            &ArtifactKey::per_measure(Artifact::EmissionTable, measure_name),
            &table,
        )
        .await
        .map_err(store_err)?;
        put_json(
            self.store.as_ref(),
            &ArtifactKey::per_measure(Artifact::OwnerLookup, measure_name),
            &building_owner_lookup(&normalized.points),
        )
        .await
        .map_err(store_err)?;
        Ok(())
    }

    /// Run every configured measure plus the two non-seasonal categories.
    /// A measure's failure is reported and does not stop the others.
    pub async fn run_all(
        &self,
        pool: &PgPool,
        measures: &[String],
    ) -> Vec<Result<MeasureReport, PipelineError>> {
        let mut results = Vec::with_capacity(measures.len() + 2);
        for m in measures {
            let result = self.run_measure(pool, m).await;
            if let Err(e) = &result {
                tracing::error!(measure = %m, error = %e, "measure run failed");
            }
            results.push(result);
        }

        let leaks = self.run_leaks(pool).await;
        if let Err(e) = &leaks {
            tracing::error!(measure = measure::LEAKS, error = %e, "measure run failed");
        }
        results.push(leaks);

        let fleet = self.run_fleet(pool).await;
        if let Err(e) = &fleet {
            tracing::error!(measure = measure::FLEET, error = %e, "measure run failed");
        }
        results.push(fleet);

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::add_months;
    use crate::normalize::NormalizedSeriesPoint;
    use crate::stitch::SeriesKind;
    use crate::store::MemoryStore;
    use time::macros::date;

    fn pipeline_with_memory_store() -> (MeasurePipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut reference = ReferenceData::default();
        reference.fixed_factors =
            FixedFactorTable::from_rows(vec![("Diesel Mobile - Usage", None, 0.07)]);
        (
            MeasurePipeline {
                store: store.clone(),
                reference,
                constants: crate::config::ConversionConstants::default(),
                engine: EngineConfig::default(),
                cv: CvConfig::default(),
                regressor_buildings: Vec::new(),
            },
            store,
        )
    }

    fn normalized_fixture(months: usize) -> NormalizedOutput {
        let mut out = NormalizedOutput::default();
        for i in 0..months {
            out.points.push(NormalizedSeriesPoint {
                building_id: "US-ROL-01".into(),
                folder_path: "Org > NA > USA > 1".into(),
                portfolio_owner: "Site-Round Lake".into(),
                month: add_months(date!(2019 - 01 - 01), i as i32),
                measure: "Diesel Mobile - Usage".into(),
                code: "Energy.9a".into(),
                country: Some("United States".into()),
                value: 1.0e9,
                unit: "J".into(),
            });
        }
        out
    }

    #[tokio::test]
    async fn measure_pipeline_publishes_full_artifact_set() {
        let (pipeline, store) = pipeline_with_memory_store();
        let report = pipeline
            .process_and_publish("Diesel Mobile - Usage", normalized_fixture(48))
            .await
            .unwrap();

        assert_eq!(report.buildings, 1);
        assert_eq!(report.buildings_unavailable, 0);
        // 48 actuals + 36 forecast months at owner level.
        assert_eq!(report.rows_published, 84);

        let table_blob = store
            .get(&ArtifactKey::per_measure(
                Artifact::EmissionTable,
                "Diesel Mobile - Usage",
            ))
            .await
            .unwrap()
            .expect("emission table published");
        let table: Vec<EmissionRecord> = serde_json::from_slice(&table_blob).unwrap();
        assert_eq!(table.len(), 84);

        let actual_rows = table.iter().filter(|r| r.kind == SeriesKind::Actuals).count();
        assert_eq!(actual_rows, 48);

        // Constant 1e9 J at 0.07 kg/kWh-equivalent coefficient.
        let first = &table[0];
        assert_eq!(first.portfolio_owner, "Site-Round Lake");
        assert!((first.emission_tons.unwrap() - 0.00007).abs() < 1e-9);
        assert!((first.energy_gj.unwrap() - 1.0).abs() < 1e-12);

        // Non-negativity holds across the whole table.
        for r in &table {
            for v in [r.energy_gj, r.energy_with_spot, r.emission_tons, r.emission_with_spot] {
                if let Some(v) = v {
                    assert!(v >= 0.0);
                }
            }
        }

        for artifact in [
            Artifact::Models,
            Artifact::Forecasts,
            Artifact::Residuals,
            Artifact::RegressorCoefficients,
            Artifact::CrossValidation,
            Artifact::CvScores,
            Artifact::ResidualScores,
            Artifact::OwnerLookup,
        ] {
            assert!(
                store
                    .get(&ArtifactKey::per_measure(artifact, "Diesel Mobile - Usage"))
                    .await
                    .unwrap()
                    .is_some(),
                "artifact {artifact:?} missing"
            );
        }
    }

    #[tokio::test]
    async fn failed_conversion_still_publishes_empty_table() {
        let (mut pipeline, store) = pipeline_with_memory_store();
        // No coefficient for this measure: the conversion branch fails.
        pipeline.reference.fixed_factors = FixedFactorTable::from_rows(vec![]);

        let report = pipeline
            .process_and_publish("Diesel Mobile - Usage", normalized_fixture(48))
            .await
            .unwrap();
        assert_eq!(report.rows_published, 0);

        let table_blob = store
            .get(&ArtifactKey::per_measure(
                Artifact::EmissionTable,
                "Diesel Mobile - Usage",
            ))
            .await
            .unwrap()
            .expect("empty table still published");
        let table: Vec<EmissionRecord> = serde_json::from_slice(&table_blob).unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn too_short_history_degrades_to_actuals_only() {
        let (pipeline, store) = pipeline_with_memory_store();
        let report = pipeline
            .process_and_publish("Diesel Mobile - Usage", normalized_fixture(6))
            .await
            .unwrap();

        assert_eq!(report.buildings_unavailable, 1);
        // Only the 6 actual months make it into the table.
        assert_eq!(report.rows_published, 6);

        let table_blob = store
            .get(&ArtifactKey::per_measure(
                Artifact::EmissionTable,
                "Diesel Mobile - Usage",
            ))
            .await
            .unwrap()
            .unwrap();
        let table: Vec<EmissionRecord> = serde_json::from_slice(&table_blob).unwrap();
        assert!(table.iter().all(|r| r.kind == SeriesKind::Actuals));
    }
}
