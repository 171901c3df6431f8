//! Per-building forecasting.
//!
//! One independent model per building; no parameters are shared across
//! buildings. Fitting is CPU-bound and embarrassingly parallel, so the
//! engine fans out across a blocking-thread pool, and a failed fit
//! degrades to an explicit unavailable outcome for that building rather
//! than cancelling the rest of the run.

pub mod metrics;
pub mod model;
pub mod validation;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::calendar::add_months;
use crate::forecast::metrics::{mape, rmse};
use crate::forecast::model::{
    Forecaster, HoltWinters, ModelError, RegressorCoefficient, SeasonalModelSummary, SeasonalType,
    WithVolumeRegressor,
};
use crate::forecast::validation::{cross_validate, CvConfig, CvWindow};

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub horizon_months: u32,
    pub seasonal_period: usize,
    pub confidence_level: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon_months: 36,
            seasonal_period: 12,
            confidence_level: 0.95,
        }
    }
}

/// One month of a building's forecast, spanning the training months
/// (in-sample fit) and the future horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub month: Date,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

/// Everything the engine knows about one building after fitting. All
/// three fields are `None` when fitting failed; the building then simply
/// contributes nothing downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOutcome {
    pub model: Option<SeasonalModelSummary>,
    pub forecast: Option<Vec<ForecastPoint>>,
    pub regressor: Option<RegressorCoefficient>,
}

impl ModelOutcome {
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.forecast.is_some()
    }
}

/// Forecast vs. actual on one month. `actual` is `None` for horizon
/// months with no observation yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualPoint {
    pub month: Date,
    pub yhat: f64,
    pub actual: Option<f64>,
    pub residual: Option<f64>,
}

/// Per-building accuracy summary, either from cross-validation folds or
/// from in-sample residuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracyScore {
    pub building_id: String,
    pub mape: Option<f64>,
    pub rmse: Option<f64>,
}

/// Fit one building. Buildings on the volume allow-list try the exogenous
/// regressor first and fall back to the plain seasonal model on any
/// failure; everything else goes straight to the plain model.
pub fn fit_building(
    building_id: &str,
    series: &[(Date, f64)],
    volume: Option<&HashMap<(String, Date), f64>>,
    cfg: &EngineConfig,
) -> Result<ModelOutcome, ModelError> {
    if let Some(volume) = volume {
        match fit_with_volume(building_id, series, volume, cfg) {
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                tracing::warn!(
                    building_id,
                    error = %e,
                    "volume regressor failed, falling back to plain seasonal model"
                );
            }
        }
    }
    fit_plain(series, cfg)
}

fn forecast_table(
    months: &[Date],
    fitted: &[f64],
    residual_variance: f64,
    future: crate::forecast::model::ForecastValues,
    cfg: &EngineConfig,
) -> Vec<ForecastPoint> {
    let z = crate::forecast::model::normal_quantile((1.0 + cfg.confidence_level) / 2.0);
    let se = residual_variance.sqrt();

    let mut points: Vec<ForecastPoint> = months
        .iter()
        .zip(fitted.iter())
        .map(|(m, f)| ForecastPoint {
            month: *m,
            yhat: *f,
            yhat_lower: f - z * se,
            yhat_upper: f + z * se,
        })
        .collect();

    let last = *months.last().expect("fitted series is non-empty");
    for (i, ((p, lo), up)) in future
        .point
        .iter()
        .zip(future.lower.iter())
        .zip(future.upper.iter())
        .enumerate()
    {
        points.push(ForecastPoint {
            month: add_months(last, i as i32 + 1),
            yhat: *p,
            yhat_lower: *lo,
            yhat_upper: *up,
        });
    }
    points
}

fn fit_plain(series: &[(Date, f64)], cfg: &EngineConfig) -> Result<ModelOutcome, ModelError> {
    let months: Vec<Date> = series.iter().map(|(m, _)| *m).collect();
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();

    let mut model = HoltWinters::auto(cfg.seasonal_period, SeasonalType::Multiplicative);
    model.fit(&values)?;
    let future = model.forecast(cfg.horizon_months as usize, cfg.confidence_level)?;

    let fitted = model.fitted_values().ok_or(ModelError::FitRequired)?;
    let variance = model.residual_variance().unwrap_or(0.0);
    let table = forecast_table(&months, fitted, variance, future, cfg);

    Ok(ModelOutcome {
        model: model.summary(),
        forecast: Some(table),
        regressor: None,
    })
}

fn fit_with_volume(
    building_id: &str,
    series: &[(Date, f64)],
    volume: &HashMap<(String, Date), f64>,
    cfg: &EngineConfig,
) -> Result<ModelOutcome, ModelError> {
    // Train on the months where both usage and volume exist.
    let mut months = Vec::new();
    let mut values = Vec::new();
    let mut vols = Vec::new();
    for (m, v) in series {
        if let Some(&vol) = volume.get(&(building_id.to_string(), *m)) {
            months.push(*m);
            values.push(*v);
            vols.push(vol);
        }
    }
    if months.len() < 2 * cfg.seasonal_period {
        return Err(ModelError::InsufficientData {
            needed: 2 * cfg.seasonal_period,
            got: months.len(),
        });
    }

    // The future covariate must cover the whole horizon.
    let last = *months.last().expect("non-empty training window");
    let mut future_vols = Vec::with_capacity(cfg.horizon_months as usize);
    for h in 1..=cfg.horizon_months as i32 {
        let month = add_months(last, h);
        let vol = volume
            .get(&(building_id.to_string(), month))
            .copied()
            .ok_or_else(|| ModelError::MissingCovariate(format!("volume for {month}")))?;
        future_vols.push(vol);
    }

    let mut model = WithVolumeRegressor::new(cfg.seasonal_period);
    model.fit(&values, &vols)?;
    let future = model.forecast(&future_vols, cfg.confidence_level)?;

    let fitted = model.fitted_values().ok_or(ModelError::FitRequired)?;
    let variance = model.residual_variance().unwrap_or(0.0);
    let table = forecast_table(&months, fitted, variance, future, cfg);

    Ok(ModelOutcome {
        model: model.summary(),
        forecast: Some(table),
        regressor: model.regression().cloned(),
    })
}

/// Fit every building, fanned out across the blocking pool. A building
/// whose fit fails (or whose worker panics) is recorded as unavailable
/// and the remaining buildings are unaffected.
pub async fn fit_and_forecast(
    series_by_building: BTreeMap<String, Vec<(Date, f64)>>,
    volume: &HashMap<(String, Date), f64>,
    regressor_buildings: &[String],
    cfg: &EngineConfig,
) -> BTreeMap<String, ModelOutcome> {
    let mut handles = Vec::with_capacity(series_by_building.len());
    for (building_id, series) in series_by_building {
        let use_volume = regressor_buildings.iter().any(|b| *b == building_id);
        let volume = use_volume.then(|| volume.clone());
        let cfg = *cfg;
        handles.push((
            building_id.clone(),
            tokio::task::spawn_blocking(move || {
                fit_building(&building_id, &series, volume.as_ref(), &cfg)
            }),
        ));
    }

    let joined = futures::future::join_all(
        handles
            .into_iter()
            .map(|(building_id, handle)| async move { (building_id, handle.await) }),
    )
    .await;

    let mut outcomes = BTreeMap::new();
    for (building_id, result) in joined {
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(building_id = %building_id, error = %e, "model fit failed");
                ::metrics::counter!("forecast_fit_failures_total").increment(1);
                ModelOutcome::unavailable()
            }
            Err(e) => {
                tracing::error!(building_id = %building_id, error = %e, "model worker panicked");
                ::metrics::counter!("forecast_fit_failures_total").increment(1);
                ModelOutcome::unavailable()
            }
        };
        outcomes.insert(building_id, outcome);
    }
    outcomes
}

/// Cross-validate every fitted building. Unfitted buildings keep an
/// explicit `None` entry.
pub fn cross_validate_all(
    series_by_building: &BTreeMap<String, Vec<(Date, f64)>>,
    outcomes: &BTreeMap<String, ModelOutcome>,
    cfg: &CvConfig,
) -> BTreeMap<String, Option<Vec<CvWindow>>> {
    outcomes
        .iter()
        .map(|(building, outcome)| {
            let windows = if outcome.is_available() {
                series_by_building
                    .get(building)
                    .and_then(|series| cross_validate(series, cfg))
            } else {
                None
            };
            (building.clone(), windows)
        })
        .collect()
}

/// Forecast-vs-actual residuals per building.
pub fn residuals(
    outcomes: &BTreeMap<String, ModelOutcome>,
    series_by_building: &BTreeMap<String, Vec<(Date, f64)>>,
) -> BTreeMap<String, Option<Vec<ResidualPoint>>> {
    outcomes
        .iter()
        .map(|(building, outcome)| {
            let points = outcome.forecast.as_ref().map(|forecast| {
                let actuals: HashMap<Date, f64> = series_by_building
                    .get(building)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();
                forecast
                    .iter()
                    .map(|p| {
                        let actual = actuals.get(&p.month).copied();
                        ResidualPoint {
                            month: p.month,
                            yhat: p.yhat,
                            actual,
                            residual: actual.map(|a| p.yhat - a),
                        }
                    })
                    .collect()
            });
            (building.clone(), points)
        })
        .collect()
}

/// Mean accuracy across cross-validation folds, per building.
pub fn cv_accuracy(
    cv: &BTreeMap<String, Option<Vec<CvWindow>>>,
) -> Vec<AccuracyScore> {
    cv.iter()
        .map(|(building, windows)| match windows {
            Some(windows) if !windows.is_empty() => {
                let mapes: Vec<f64> = windows.iter().filter_map(|w| w.mape).collect();
                let rmses: Vec<f64> = windows.iter().filter_map(|w| w.rmse).collect();
                AccuracyScore {
                    building_id: building.clone(),
                    mape: (mapes.len() == windows.len())
                        .then(|| mapes.iter().sum::<f64>() / mapes.len() as f64),
                    rmse: (!rmses.is_empty())
                        .then(|| rmses.iter().sum::<f64>() / rmses.len() as f64),
                }
            }
            _ => AccuracyScore {
                building_id: building.clone(),
                mape: None,
                rmse: None,
            },
        })
        .collect()
}

/// Accuracy from in-sample residuals, per building. Scored only on months
/// with an observed actual.
pub fn residual_accuracy(
    residuals: &BTreeMap<String, Option<Vec<ResidualPoint>>>,
) -> Vec<AccuracyScore> {
    residuals
        .iter()
        .map(|(building, points)| {
            let (actual, predicted): (Vec<f64>, Vec<f64>) = points
                .iter()
                .flatten()
                .filter_map(|p| p.actual.map(|a| (a, p.yhat)))
                .unzip();
            AccuracyScore {
                building_id: building.clone(),
                mape: mape(&actual, &predicted),
                rmse: rmse(&actual, &predicted),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::month_range;
    use time::macros::date;

    fn series(n: usize) -> Vec<(Date, f64)> {
        month_range(
            date!(2019 - 01 - 01),
            add_months(date!(2019 - 01 - 01), n as i32 - 1),
        )
        .into_iter()
        .enumerate()
        .map(|(i, m)| {
            let season = 1.0 + 0.15 * (2.0 * std::f64::consts::PI * i as f64 / 12.0).cos();
            (m, (200.0 + 0.5 * i as f64) * season)
        })
        .collect()
    }

    #[test]
    fn plain_fit_covers_history_and_horizon() {
        let cfg = EngineConfig::default();
        let s = series(48);
        let outcome = fit_building("AT-VIE-01", &s, None, &cfg).unwrap();

        let forecast = outcome.forecast.unwrap();
        assert_eq!(forecast.len(), 48 + 36);
        assert_eq!(forecast[0].month, date!(2019 - 01 - 01));
        assert_eq!(forecast.last().unwrap().month, date!(2025 - 12 - 01));
        assert!(outcome.model.is_some());
        assert!(outcome.regressor.is_none());
    }

    #[test]
    fn short_history_fails_soft() {
        let cfg = EngineConfig::default();
        let s = series(12);
        assert!(fit_building("AT-VIE-01", &s, None, &cfg).is_err());
    }

    #[test]
    fn volume_building_falls_back_without_future_volume() {
        let cfg = EngineConfig::default();
        let s = series(48);
        // Historical volume only: the horizon covariate is missing, so the
        // regressor path must fail and the plain model take over.
        let volume: HashMap<(String, Date), f64> = s
            .iter()
            .map(|(m, _)| (("IT-PIS-01".to_string(), *m), 100.0))
            .collect();
        let outcome = fit_building("IT-PIS-01", &s, Some(&volume), &cfg).unwrap();
        assert!(outcome.forecast.is_some());
        assert!(outcome.regressor.is_none());
    }

    #[test]
    fn volume_building_uses_regressor_when_covered() {
        let cfg = EngineConfig::default();
        let s = series(48);
        let mut volume: HashMap<(String, Date), f64> = HashMap::new();
        for (i, (m, _)) in s.iter().enumerate() {
            volume.insert(("IT-PIS-01".to_string(), *m), 100.0 + (i % 5) as f64 * 7.0);
        }
        for h in 1..=36 {
            volume.insert(
                ("IT-PIS-01".to_string(), add_months(date!(2022 - 12 - 01), h)),
                120.0,
            );
        }
        let outcome = fit_building("IT-PIS-01", &s, Some(&volume), &cfg).unwrap();
        assert!(outcome.regressor.is_some());
        assert_eq!(outcome.forecast.unwrap().len(), 48 + 36);
    }

    #[tokio::test]
    async fn failed_buildings_do_not_cancel_others() {
        let cfg = EngineConfig::default();
        let mut by_building = BTreeMap::new();
        by_building.insert("GOOD-01".to_string(), series(48));
        by_building.insert("SHORT-01".to_string(), series(6));

        let outcomes =
            fit_and_forecast(by_building, &HashMap::new(), &[], &cfg).await;
        assert!(outcomes["GOOD-01"].is_available());
        assert!(!outcomes["SHORT-01"].is_available());
    }

    #[test]
    fn residual_scores_only_use_observed_months() {
        let cfg = EngineConfig::default();
        let s = series(48);
        let outcome = fit_building("B-01", &s, None, &cfg).unwrap();

        let mut outcomes = BTreeMap::new();
        outcomes.insert("B-01".to_string(), outcome);
        let mut by_building = BTreeMap::new();
        by_building.insert("B-01".to_string(), s);

        let resid = residuals(&outcomes, &by_building);
        let points = resid["B-01"].as_ref().unwrap();
        assert_eq!(points.len(), 48 + 36);
        assert_eq!(points.iter().filter(|p| p.actual.is_some()).count(), 48);

        let scores = residual_accuracy(&resid);
        assert_eq!(scores.len(), 1);
        assert!(scores[0].rmse.is_some());
    }

    #[test]
    fn cv_accuracy_keeps_unavailable_buildings() {
        let mut cv = BTreeMap::new();
        cv.insert(
            "A".to_string(),
            Some(vec![
                CvWindow {
                    cutoff: date!(2021 - 01 - 01),
                    mape: Some(0.1),
                    rmse: Some(5.0),
                    n_points: 12,
                },
                CvWindow {
                    cutoff: date!(2024 - 01 - 01),
                    mape: Some(0.3),
                    rmse: Some(7.0),
                    n_points: 12,
                },
            ]),
        );
        cv.insert("B".to_string(), None);

        let scores = cv_accuracy(&cv);
        let a = scores.iter().find(|s| s.building_id == "A").unwrap();
        assert!((a.mape.unwrap() - 0.2).abs() < 1e-12);
        assert!((a.rmse.unwrap() - 6.0).abs() < 1e-12);
        let b = scores.iter().find(|s| s.building_id == "B").unwrap();
        assert!(b.mape.is_none() && b.rmse.is_none());
    }
}
