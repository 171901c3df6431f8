//! Flat forecasts for the sparse indicator categories.
//!
//! Refrigerant leaks and fleet fuel are reported too infrequently for a
//! seasonal model to be reliable. Each building instead projects its
//! trailing three-year average flat across the horizon. Values here are
//! kilograms of GHG, not joules; the conversion to tons happens when the
//! final table is assembled.

use std::collections::BTreeMap;

use time::Date;

use crate::calendar::{add_months, PeriodLabels};
use crate::convert::EmissionRecord;
use crate::stitch::{SeriesKind, StitchedSeriesPoint};

/// Trailing window and projection length, both three years of months.
const WINDOW_MONTHS: i32 = 36;

/// Project each building's trailing 36-month average flat across the
/// horizon. The average is a plain rolling mean over the window ending at
/// the building's last observation: a building reporting for only part of
/// the window still divides by 36.
pub fn estimate_flat_forecast(
    series_by_building: &BTreeMap<String, Vec<(Date, f64)>>,
    horizon_months: u32,
) -> Vec<StitchedSeriesPoint> {
    let mut out = Vec::new();

    for (building, series) in series_by_building {
        let Some(&(last_month, _)) = series.last() else {
            continue;
        };

        for (month, value) in series {
            out.push(StitchedSeriesPoint {
                building_id: building.clone(),
                month: *month,
                value: *value,
                kind: SeriesKind::Actuals,
                lower: None,
                upper: None,
            });
        }

        let window_start = add_months(last_month, -WINDOW_MONTHS);
        let average = series
            .iter()
            .filter(|(m, _)| *m > window_start)
            .map(|(_, v)| *v)
            .sum::<f64>()
            / WINDOW_MONTHS as f64;

        for h in 1..=horizon_months as i32 {
            out.push(StitchedSeriesPoint {
                building_id: building.clone(),
                month: add_months(last_month, h),
                value: average,
                kind: SeriesKind::Predicted,
                lower: None,
                upper: None,
            });
        }
    }

    out.sort_by(|a, b| (&a.building_id, a.month).cmp(&(&b.building_id, b.month)));
    out
}

/// Aggregate the per-building kg-GHG series to owner level and shape it
/// like the converted indicator tables: emissions in tons, energy columns
/// empty, the with-SPOT series equal to the base series (no abatement
/// overlay applies to these categories).
pub fn to_emission_records(
    points: &[StitchedSeriesPoint],
    owner_of_building: impl Fn(&str) -> Option<String>,
) -> Vec<EmissionRecord> {
    let mut summed: BTreeMap<(String, Date), (f64, SeriesKind)> = BTreeMap::new();
    let mut dropped_no_owner = 0usize;

    for p in points {
        let Some(owner) = owner_of_building(&p.building_id) else {
            dropped_no_owner += 1;
            continue;
        };
        let entry = summed
            .entry((owner, p.month))
            .or_insert((0.0, p.kind));
        entry.0 += p.value;
        // A month mixing actuals and predictions across buildings reports
        // as predicted.
        if p.kind == SeriesKind::Predicted {
            entry.1 = SeriesKind::Predicted;
        }
    }

    if dropped_no_owner > 0 {
        tracing::info!(dropped_no_owner, "non-seasonal rows without an owner dropped");
    }

    summed
        .into_iter()
        .map(|((portfolio_owner, month), (kg, kind))| {
            let tons = kg / 1000.0;
            let labels = PeriodLabels::for_month(month);
            EmissionRecord {
                impact_month: month,
                portfolio_owner,
                energy_gj: None,
                energy_lower: None,
                energy_upper: None,
                emission_tons: Some(tons),
                energy_with_spot: None,
                emission_with_spot: Some(tons),
                kind,
                spot_emission_sum: None,
                spot_emission_cumulative: None,
                spot_energy_sum: None,
                spot_energy_cumulative: None,
                labels,
            }
        })
        .collect()
}
