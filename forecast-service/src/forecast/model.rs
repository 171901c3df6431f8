//! The per-building seasonal model.
//!
//! The engine treats the model as a replaceable seam: anything that can
//! fit a monthly series and forecast a horizon with uncertainty bounds
//! fits behind [`Forecaster`]. The default implementation is Holt-Winters
//! triple exponential smoothing with multiplicative seasonality and a
//! small grid search over the smoothing parameters.
//!
//! Buildings with a known production-volume relationship use
//! [`WithVolumeRegressor`]: an ordinary-least-squares volume term plus
//! additive-seasonal smoothing of the regression residuals, the usual
//! regression-with-seasonal-errors decomposition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("insufficient data: need at least {needed}, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("model must be fitted before forecasting")]
    FitRequired,

    #[error("missing covariate: {0}")]
    MissingCovariate(String),

    #[error("computation error: {0}")]
    Computation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SeasonalType {
    Additive,
    #[default]
    Multiplicative,
}

/// Point forecasts with uncertainty bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastValues {
    pub point: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

pub trait Forecaster {
    fn fit(&mut self, values: &[f64]) -> Result<(), ModelError>;

    /// Forecast `horizon` steps ahead with bounds at `level` confidence.
    fn forecast(&self, horizon: usize, level: f64) -> Result<ForecastValues, ModelError>;

    /// In-sample one-step-ahead fit, same length as the training series.
    fn fitted_values(&self) -> Option<&[f64]>;

    /// Half-width multiplier base for in-sample bounds.
    fn residual_variance(&self) -> Option<f64>;
}

/// Serializable summary of a fitted model, published as an artifact in
/// place of the in-memory state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonalModelSummary {
    pub seasonal_type: SeasonalType,
    pub period: usize,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub level: f64,
    pub trend: f64,
    pub seasonals: Vec<f64>,
    pub residual_variance: f64,
    pub n_obs: usize,
}

#[derive(Debug, Clone)]
struct FittedState {
    alpha: f64,
    beta: f64,
    gamma: f64,
    level: f64,
    trend: f64,
    seasonals: Vec<f64>,
    fitted: Vec<f64>,
    residual_variance: f64,
    n: usize,
}

/// Holt-Winters triple exponential smoothing.
#[derive(Debug, Clone)]
pub struct HoltWinters {
    seasonal_type: SeasonalType,
    period: usize,
    params: Option<(f64, f64, f64)>,
    state: Option<FittedState>,
}

const ALPHA_GRID: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];
const BETA_GRID: [f64; 3] = [0.05, 0.1, 0.2];
const GAMMA_GRID: [f64; 3] = [0.05, 0.1, 0.3];

impl HoltWinters {
    /// Model with parameters chosen by SSE over a coarse grid.
    pub fn auto(period: usize, seasonal_type: SeasonalType) -> Self {
        Self {
            seasonal_type,
            period,
            params: None,
            state: None,
        }
    }

    /// Model with fixed smoothing parameters.
    pub fn with_params(
        period: usize,
        seasonal_type: SeasonalType,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> Self {
        Self {
            seasonal_type,
            period,
            params: Some((
                alpha.clamp(1e-4, 1.0 - 1e-4),
                beta.clamp(1e-4, 1.0 - 1e-4),
                gamma.clamp(1e-4, 1.0 - 1e-4),
            )),
            state: None,
        }
    }

    pub fn summary(&self) -> Option<SeasonalModelSummary> {
        self.state.as_ref().map(|s| SeasonalModelSummary {
            seasonal_type: self.seasonal_type,
            period: self.period,
            alpha: s.alpha,
            beta: s.beta,
            gamma: s.gamma,
            level: s.level,
            trend: s.trend,
            seasonals: s.seasonals.clone(),
            residual_variance: s.residual_variance,
            n_obs: s.n,
        })
    }

    fn initialize(values: &[f64], period: usize, seasonal_type: SeasonalType) -> (f64, f64, Vec<f64>) {
        let first_season = &values[..period];
        let level = first_season.iter().sum::<f64>() / period as f64;

        let trend = if values.len() >= 2 * period {
            let sum: f64 = (0..period)
                .map(|i| (values[period + i] - values[i]) / period as f64)
                .sum();
            sum / period as f64
        } else {
            0.0
        };

        let mut seasonals: Vec<f64> = match seasonal_type {
            SeasonalType::Additive => first_season.iter().map(|y| y - level).collect(),
            SeasonalType::Multiplicative => first_season
                .iter()
                .map(|y| if level.abs() > 1e-10 { y / level } else { 1.0 })
                .collect(),
        };

        // Normalize: additive indices sum to zero, multiplicative average to one.
        match seasonal_type {
            SeasonalType::Additive => {
                let adjustment = seasonals.iter().sum::<f64>() / period as f64;
                for s in seasonals.iter_mut() {
                    *s -= adjustment;
                }
            }
            SeasonalType::Multiplicative => {
                let mean = seasonals.iter().sum::<f64>() / period as f64;
                if mean.abs() > 1e-10 {
                    for s in seasonals.iter_mut() {
                        *s /= mean;
                    }
                }
            }
        }

        (level, trend, seasonals)
    }

    /// One smoothing pass; returns the final state and the SSE over the
    /// post-initialization stretch.
    fn run_pass(
        values: &[f64],
        period: usize,
        seasonal_type: SeasonalType,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> (FittedState, f64) {
        let (mut level, mut trend, mut seasonals) =
            Self::initialize(values, period, seasonal_type);

        let mut fitted = Vec::with_capacity(values.len());
        let mut sse = 0.0;
        let mut n_err = 0usize;

        // The first season seeds the state and has no one-step forecast.
        fitted.extend_from_slice(&values[..period]);

        for (t, &y) in values.iter().enumerate().skip(period) {
            let idx = t % period;
            let s = seasonals[idx];

            let one_step = match seasonal_type {
                SeasonalType::Additive => level + trend + s,
                SeasonalType::Multiplicative => (level + trend) * s,
            };
            fitted.push(one_step);
            let err = y - one_step;
            sse += err * err;
            n_err += 1;

            let level_prev = level;
            match seasonal_type {
                SeasonalType::Additive => {
                    level = alpha * (y - s) + (1.0 - alpha) * (level_prev + trend);
                    trend = beta * (level - level_prev) + (1.0 - beta) * trend;
                    seasonals[idx] = gamma * (y - level) + (1.0 - gamma) * s;
                }
                SeasonalType::Multiplicative => {
                    let deseasonalized = if s.abs() > 1e-10 { y / s } else { y };
                    level = alpha * deseasonalized + (1.0 - alpha) * (level_prev + trend);
                    trend = beta * (level - level_prev) + (1.0 - beta) * trend;
                    if level.abs() > 1e-10 {
                        seasonals[idx] = gamma * (y / level) + (1.0 - gamma) * s;
                    }
                }
            }
        }

        let residual_variance = if n_err > 0 { sse / n_err as f64 } else { 0.0 };
        (
            FittedState {
                alpha,
                beta,
                gamma,
                level,
                trend,
                seasonals,
                fitted,
                residual_variance,
                n: values.len(),
            },
            sse,
        )
    }
}

impl Forecaster for HoltWinters {
    fn fit(&mut self, values: &[f64]) -> Result<(), ModelError> {
        if values.len() < 2 * self.period {
            return Err(ModelError::InsufficientData {
                needed: 2 * self.period,
                got: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::Computation("non-finite value in series".into()));
        }

        let state = match self.params {
            Some((alpha, beta, gamma)) => {
                Self::run_pass(values, self.period, self.seasonal_type, alpha, beta, gamma).0
            }
            None => {
                let mut best: Option<(FittedState, f64)> = None;
                for &alpha in &ALPHA_GRID {
                    for &beta in &BETA_GRID {
                        for &gamma in &GAMMA_GRID {
                            let (state, sse) = Self::run_pass(
                                values,
                                self.period,
                                self.seasonal_type,
                                alpha,
                                beta,
                                gamma,
                            );
                            if best.as_ref().map_or(true, |(_, b)| sse < *b) {
                                best = Some((state, sse));
                            }
                        }
                    }
                }
                best.ok_or_else(|| ModelError::Computation("empty parameter grid".into()))?
                    .0
            }
        };

        self.state = Some(state);
        Ok(())
    }

    fn forecast(&self, horizon: usize, level: f64) -> Result<ForecastValues, ModelError> {
        let state = self.state.as_ref().ok_or(ModelError::FitRequired)?;
        let z = normal_quantile((1.0 + level) / 2.0);

        let mut point = Vec::with_capacity(horizon);
        let mut lower = Vec::with_capacity(horizon);
        let mut upper = Vec::with_capacity(horizon);

        for h in 1..=horizon {
            let idx = (state.n + h - 1) % self.period;
            let s = state.seasonals[idx];
            let p = match self.seasonal_type {
                SeasonalType::Additive => state.level + h as f64 * state.trend + s,
                SeasonalType::Multiplicative => (state.level + h as f64 * state.trend) * s,
            };
            // Uncertainty widens with each full season ahead.
            let k = ((h - 1) / self.period) + 1;
            let se = (state.residual_variance * k as f64).sqrt();
            point.push(p);
            lower.push(p - z * se);
            upper.push(p + z * se);
        }

        Ok(ForecastValues { point, lower, upper })
    }

    fn fitted_values(&self) -> Option<&[f64]> {
        self.state.as_ref().map(|s| s.fitted.as_slice())
    }

    fn residual_variance(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.residual_variance)
    }
}

/// Fitted coefficient of the exogenous volume term, published alongside
/// the forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressorCoefficient {
    pub name: String,
    pub coefficient: f64,
    pub intercept: f64,
}

/// Univariate ordinary least squares: `y = intercept + coefficient * x`.
pub fn ols_fit(y: &[f64], x: &[f64]) -> Result<RegressorCoefficient, ModelError> {
    if y.len() != x.len() {
        return Err(ModelError::Computation(format!(
            "regressor length {} does not match series length {}",
            x.len(),
            y.len()
        )));
    }
    if y.len() < 3 {
        return Err(ModelError::InsufficientData {
            needed: 3,
            got: y.len(),
        });
    }
    let n = y.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let var_x: f64 = x.iter().map(|v| (v - mean_x).powi(2)).sum();
    if var_x < 1e-12 {
        return Err(ModelError::Computation(
            "regressor has no variance".into(),
        ));
    }
    let cov: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(xv, yv)| (xv - mean_x) * (yv - mean_y))
        .sum();
    let coefficient = cov / var_x;
    Ok(RegressorCoefficient {
        name: "volume".to_string(),
        coefficient,
        intercept: mean_y - coefficient * mean_x,
    })
}

/// Seasonal model with an additive exogenous volume term: OLS on volume,
/// additive-seasonal smoothing of the regression residuals.
#[derive(Debug, Clone)]
pub struct WithVolumeRegressor {
    regression: Option<RegressorCoefficient>,
    residual_model: HoltWinters,
    fitted: Option<Vec<f64>>,
}

impl WithVolumeRegressor {
    pub fn new(period: usize) -> Self {
        Self {
            regression: None,
            residual_model: HoltWinters::auto(period, SeasonalType::Additive),
            fitted: None,
        }
    }

    /// Fit against the series and its aligned volume covariate.
    pub fn fit(&mut self, values: &[f64], volume: &[f64]) -> Result<(), ModelError> {
        let regression = ols_fit(values, volume)?;
        let residuals: Vec<f64> = values
            .iter()
            .zip(volume.iter())
            .map(|(y, x)| y - (regression.intercept + regression.coefficient * x))
            .collect();
        self.residual_model.fit(&residuals)?;

        let fitted = self
            .residual_model
            .fitted_values()
            .ok_or(ModelError::FitRequired)?
            .iter()
            .zip(volume.iter())
            .map(|(r, x)| regression.intercept + regression.coefficient * x + r)
            .collect();
        self.fitted = Some(fitted);
        self.regression = Some(regression);
        Ok(())
    }

    /// Forecast using the supplied future-volume covariate, one value per
    /// horizon step.
    pub fn forecast(
        &self,
        future_volume: &[f64],
        level: f64,
    ) -> Result<ForecastValues, ModelError> {
        let regression = self.regression.as_ref().ok_or(ModelError::FitRequired)?;
        let residual = self
            .residual_model
            .forecast(future_volume.len(), level)?;

        let mean: Vec<f64> = future_volume
            .iter()
            .map(|x| regression.intercept + regression.coefficient * x)
            .collect();
        Ok(ForecastValues {
            point: residual
                .point
                .iter()
                .zip(mean.iter())
                .map(|(r, m)| r + m)
                .collect(),
            lower: residual
                .lower
                .iter()
                .zip(mean.iter())
                .map(|(r, m)| r + m)
                .collect(),
            upper: residual
                .upper
                .iter()
                .zip(mean.iter())
                .map(|(r, m)| r + m)
                .collect(),
        })
    }

    pub fn fitted_values(&self) -> Option<&[f64]> {
        self.fitted.as_deref()
    }

    pub fn residual_variance(&self) -> Option<f64> {
        self.residual_model.residual_variance()
    }

    pub fn regression(&self) -> Option<&RegressorCoefficient> {
        self.regression.as_ref()
    }

    pub fn summary(&self) -> Option<SeasonalModelSummary> {
        self.residual_model.summary()
    }
}

/// Standard normal quantile, Acklam's rational approximation. Good to
/// ~1e-9 over the open unit interval, which is far tighter than the
/// interval bounds need.
pub fn normal_quantile(p: f64) -> f64 {
    debug_assert!(p > 0.0 && p < 1.0);

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    let p_low = 0.02425;

    if p < p_low {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - p_low {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
