//! Rolling-origin cross-validation.
//!
//! Cutoffs are spaced three years apart between two years after the
//! series start and one year before its end; each fold refits from
//! scratch on the history up to the cutoff and scores the following
//! twelve months. This answers how the model generalizes, which is a
//! different question from the in-sample residual fit reported alongside
//! it.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::calendar::{add_months, months_between};
use crate::forecast::metrics::{mape, rmse};
use crate::forecast::model::{Forecaster, HoltWinters, SeasonalType};

/// Fold spacing and horizon, in months.
#[derive(Debug, Clone, Copy)]
pub struct CvConfig {
    pub first_cutoff_offset: i32,
    pub last_cutoff_margin: i32,
    pub cutoff_spacing: i32,
    pub horizon: i32,
    pub seasonal_period: usize,
    pub confidence_level: f64,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            first_cutoff_offset: 24,
            last_cutoff_margin: 12,
            cutoff_spacing: 36,
            horizon: 12,
            seasonal_period: 12,
            confidence_level: 0.95,
        }
    }
}

/// Accuracy of one cross-validation fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvWindow {
    pub cutoff: Date,
    pub mape: Option<f64>,
    pub rmse: Option<f64>,
    pub n_points: usize,
}

/// Cross-validate one building's series. Returns `None` when the series
/// is too short for a single fold or any fold fails to fit; the caller
/// records the building as unavailable and continues.
pub fn cross_validate(series: &[(Date, f64)], cfg: &CvConfig) -> Option<Vec<CvWindow>> {
    let first = series.first()?.0;
    let last = series.last()?.0;

    let mut cutoffs = Vec::new();
    let mut cutoff = add_months(first, cfg.first_cutoff_offset);
    let last_allowed = add_months(last, -cfg.last_cutoff_margin);
    while cutoff <= last_allowed {
        cutoffs.push(cutoff);
        cutoff = add_months(cutoff, cfg.cutoff_spacing);
    }
    if cutoffs.is_empty() {
        return None;
    }

    let mut windows = Vec::with_capacity(cutoffs.len());
    for cutoff in cutoffs {
        let train: Vec<f64> = series
            .iter()
            .filter(|(m, _)| *m <= cutoff)
            .map(|(_, v)| *v)
            .collect();

        let mut model = HoltWinters::auto(cfg.seasonal_period, SeasonalType::Multiplicative);
        model.fit(&train).ok()?;
        let fc = model
            .forecast(cfg.horizon as usize, cfg.confidence_level)
            .ok()?;

        // Align test actuals with forecast steps by month offset.
        let mut actual = Vec::new();
        let mut predicted = Vec::new();
        for (m, v) in series {
            let step = months_between(cutoff, *m);
            if step >= 1 && step <= cfg.horizon {
                actual.push(*v);
                predicted.push(fc.point[step as usize - 1]);
            }
        }
        if actual.is_empty() {
            continue;
        }

        windows.push(CvWindow {
            cutoff,
            mape: mape(&actual, &predicted),
            rmse: rmse(&actual, &predicted),
            n_points: actual.len(),
        });
    }

    if windows.is_empty() {
        None
    } else {
        Some(windows)
    }
}
