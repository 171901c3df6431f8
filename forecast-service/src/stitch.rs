//! Stitching history and forecast into one continuous series.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use time::Date;

use crate::forecast::ModelOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesKind {
    Actuals,
    Predicted,
}

/// One month of the continuous per-building series. Actual months carry
/// no bounds; predicted months carry the model's interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchedSeriesPoint {
    pub building_id: String,
    pub month: Date,
    pub value: f64,
    pub kind: SeriesKind,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// Merge actuals with model forecasts. Wherever both exist for a
/// (building, month), the actual wins; forecast rows fill only the months
/// with no observation. The output carries exactly one row per
/// (building, month), sorted by month within building.
pub fn stitch(
    actuals: &BTreeMap<String, Vec<(Date, f64)>>,
    outcomes: &BTreeMap<String, ModelOutcome>,
) -> Vec<StitchedSeriesPoint> {
    let mut out = Vec::new();

    for (building, series) in actuals {
        let mut observed_months: HashSet<Date> = HashSet::new();
        for (month, value) in series {
            observed_months.insert(*month);
            out.push(StitchedSeriesPoint {
                building_id: building.clone(),
                month: *month,
                value: *value,
                kind: SeriesKind::Actuals,
                lower: None,
                upper: None,
            });
        }

        if let Some(forecast) = outcomes.get(building).and_then(|o| o.forecast.as_ref()) {
            for p in forecast {
                if observed_months.contains(&p.month) {
                    continue;
                }
                out.push(StitchedSeriesPoint {
                    building_id: building.clone(),
                    month: p.month,
                    value: p.yhat,
                    kind: SeriesKind::Predicted,
                    lower: Some(p.yhat_lower),
                    upper: Some(p.yhat_upper),
                });
            }
        }
    }

    out.sort_by(|a, b| (&a.building_id, a.month).cmp(&(&b.building_id, b.month)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::ForecastPoint;
    use time::macros::date;

    fn outcome(points: Vec<(Date, f64)>) -> ModelOutcome {
        ModelOutcome {
            model: None,
            forecast: Some(
                points
                    .into_iter()
                    .map(|(month, yhat)| ForecastPoint {
                        month,
                        yhat,
                        yhat_lower: yhat - 1.0,
                        yhat_upper: yhat + 1.0,
                    })
                    .collect(),
            ),
            regressor: None,
        }
    }

    #[test]
    fn actuals_win_on_overlap() {
        let mut actuals = BTreeMap::new();
        actuals.insert(
            "B-01".to_string(),
            vec![
                (date!(2023 - 01 - 01), 10.0),
                (date!(2023 - 02 - 01), 11.0),
            ],
        );
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            "B-01".to_string(),
            outcome(vec![
                (date!(2023 - 01 - 01), 99.0),
                (date!(2023 - 02 - 01), 98.0),
                (date!(2023 - 03 - 01), 12.0),
            ]),
        );

        let stitched = stitch(&actuals, &outcomes);
        assert_eq!(stitched.len(), 3);

        let jan = &stitched[0];
        assert_eq!(jan.kind, SeriesKind::Actuals);
        assert_eq!(jan.value, 10.0);
        assert!(jan.lower.is_none() && jan.upper.is_none());

        let mar = &stitched[2];
        assert_eq!(mar.kind, SeriesKind::Predicted);
        assert_eq!(mar.value, 12.0);
        assert_eq!(mar.lower, Some(11.0));
    }

    #[test]
    fn every_pair_appears_exactly_once() {
        let mut actuals = BTreeMap::new();
        actuals.insert("B-01".to_string(), vec![(date!(2023 - 01 - 01), 1.0)]);
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            "B-01".to_string(),
            outcome(vec![
                (date!(2023 - 01 - 01), 2.0),
                (date!(2023 - 02 - 01), 3.0),
            ]),
        );

        let stitched = stitch(&actuals, &outcomes);
        let mut seen = HashSet::new();
        for p in &stitched {
            assert!(seen.insert((p.building_id.clone(), p.month)));
        }
        assert_eq!(stitched.len(), 2);
    }

    #[test]
    fn unavailable_forecast_leaves_actuals_alone() {
        let mut actuals = BTreeMap::new();
        actuals.insert("B-01".to_string(), vec![(date!(2023 - 01 - 01), 1.0)]);
        let mut outcomes = BTreeMap::new();
        outcomes.insert("B-01".to_string(), ModelOutcome::unavailable());

        let stitched = stitch(&actuals, &outcomes);
        assert_eq!(stitched.len(), 1);
        assert_eq!(stitched[0].kind, SeriesKind::Actuals);
    }
}
