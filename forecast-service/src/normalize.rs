//! Raw extracts to canonical per-building monthly series.
//!
//! Three measure families take different paths here: natural gas (its
//! volumetric rows convert to joules with a region-dependent factor before
//! anything else touches them), steam (mass rows convert to joules and
//! zero rows are dropped), and everything else (passed through). All
//! three then share the hierarchy joins, the fiscal-to-calendar shift and
//! the divestment filter.
//!
//! Rows that fail the owner join are dropped, not errored: large parts of
//! the estate have no portfolio owner and that loss is accepted. The
//! counts are logged and exported so the loss stays observable.

use std::collections::{BTreeMap, HashMap, HashSet};

use time::Date;

use edb_client::domain::{ConsumptionRecord, UsageRecord};

use crate::calendar::{fiscal_to_calendar, month_start};
use crate::config::ConversionConstants;
use crate::measure::codes;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSeriesPoint {
    pub building_id: String,
    pub folder_path: String,
    pub portfolio_owner: String,
    pub month: Date,
    pub measure: String,
    pub code: String,
    pub country: Option<String>,
    /// Physical value, joules for energy measures.
    pub value: f64,
    pub unit: String,
}

/// Normalized points plus the documented data-loss counters.
#[derive(Debug, Default)]
pub struct NormalizedOutput {
    pub points: Vec<NormalizedSeriesPoint>,
    pub dropped_no_folder: usize,
    pub dropped_no_owner: usize,
    pub dropped_divested: usize,
    pub dropped_zero: usize,
    pub dropped_duplicate: usize,
    pub dropped_invalid_period: usize,
}

impl NormalizedOutput {
    fn log(&self, measure: &str) {
        tracing::info!(
            measure,
            rows = self.points.len(),
            dropped_no_folder = self.dropped_no_folder,
            dropped_no_owner = self.dropped_no_owner,
            dropped_divested = self.dropped_divested,
            dropped_zero = self.dropped_zero,
            dropped_duplicate = self.dropped_duplicate,
            dropped_invalid_period = self.dropped_invalid_period,
            "usage normalized"
        );
        metrics::counter!("normalize_rows_dropped_no_owner_total")
            .increment(self.dropped_no_owner as u64);
        metrics::counter!("normalize_rows_dropped_divested_total")
            .increment(self.dropped_divested as u64);
    }

    fn push_joined(
        &mut self,
        point: NormalizedSeriesPoint,
        divested: &HashSet<String>,
        seen: &mut HashSet<(String, Date, String)>,
    ) {
        if divested.contains(&point.building_id) {
            self.dropped_divested += 1;
            return;
        }
        let key = (point.building_id.clone(), point.month, point.code.clone());
        if !seen.insert(key) {
            self.dropped_duplicate += 1;
            return;
        }
        self.points.push(point);
    }

    fn sort(&mut self) {
        self.points
            .sort_by(|a, b| (a.month, &a.building_id).cmp(&(b.month, &b.building_id)));
    }
}

/// Normalize rollup rows (every measure except natural gas, steam and
/// fleet). The rollup table carries neither folder path nor calendar date;
/// both are derived here.
pub fn normalize_rollups(
    measure: &str,
    records: &[UsageRecord],
    building_to_folder: &HashMap<String, String>,
    folder_to_owner: &HashMap<String, String>,
    divested: &HashSet<String>,
) -> NormalizedOutput {
    let mut out = NormalizedOutput::default();
    let mut seen = HashSet::new();

    for r in records {
        let building_id = r.building_id.to_uppercase();
        let Some(folder_path) = building_to_folder.get(&building_id) else {
            out.dropped_no_folder += 1;
            continue;
        };
        let Some(owner) = folder_to_owner.get(folder_path) else {
            out.dropped_no_owner += 1;
            continue;
        };
        let Some(month) = fiscal_to_calendar(r.fiscal_year, r.fiscal_month as u8) else {
            out.dropped_invalid_period += 1;
            continue;
        };
        out.push_joined(
            NormalizedSeriesPoint {
                building_id,
                folder_path: folder_path.clone(),
                portfolio_owner: owner.clone(),
                month,
                measure: r.measure.clone(),
                code: r.system_specific_measure.clone(),
                country: r.country.clone(),
                value: r.value,
                unit: r.unit.clone(),
            },
            divested,
            &mut seen,
        );
    }

    out.sort();
    out.log(measure);
    out
}

/// Normalize natural-gas consumption rows. Volumetric rows become joules
/// using the region-dependent factor so that sites reporting in cubic
/// meters and sites reporting in joules land on one series.
pub fn normalize_natural_gas(
    measure: &str,
    records: &[ConsumptionRecord],
    folder_to_owner: &HashMap<String, String>,
    divested: &HashSet<String>,
    constants: &ConversionConstants,
) -> NormalizedOutput {
    let mut out = NormalizedOutput::default();
    let mut seen = HashSet::new();

    for r in records {
        let Some(owner) = folder_to_owner.get(&r.folder_path) else {
            out.dropped_no_owner += 1;
            continue;
        };
        let value = if r.system_specific_measure == codes::GAS_VOLUMETRIC {
            r.value * constants.gas_joules_per_m3(r.country.as_deref())
        } else {
            r.value
        };
        out.push_joined(
            NormalizedSeriesPoint {
                building_id: r.building_id.to_uppercase(),
                folder_path: r.folder_path.clone(),
                portfolio_owner: owner.clone(),
                month: month_start(r.month),
                measure: measure.to_string(),
                code: r.system_specific_measure.clone(),
                country: r.country.clone(),
                value,
                unit: r.unit.clone(),
            },
            divested,
            &mut seen,
        );
    }

    out.sort();
    out.log(measure);
    out
}

/// Normalize purchased-steam consumption rows. Mass-basis rows become
/// joules; exact-zero rows are dropped because some sites report missing
/// data as zero.
pub fn normalize_steam(
    measure: &str,
    records: &[ConsumptionRecord],
    folder_to_owner: &HashMap<String, String>,
    divested: &HashSet<String>,
    constants: &ConversionConstants,
) -> NormalizedOutput {
    let mut out = NormalizedOutput::default();
    let mut seen = HashSet::new();

    for r in records {
        if r.value == 0.0 {
            out.dropped_zero += 1;
            continue;
        }
        let Some(owner) = folder_to_owner.get(&r.folder_path) else {
            out.dropped_no_owner += 1;
            continue;
        };
        let value = if r.system_specific_measure == codes::STEAM_MASS {
            r.value * constants.steam_joules_per_kg
        } else {
            r.value
        };
        out.push_joined(
            NormalizedSeriesPoint {
                building_id: r.building_id.to_uppercase(),
                folder_path: r.folder_path.clone(),
                portfolio_owner: owner.clone(),
                month: month_start(r.month),
                measure: measure.to_string(),
                code: r.system_specific_measure.clone(),
                country: r.country.clone(),
                value,
                unit: r.unit.clone(),
            },
            divested,
            &mut seen,
        );
    }

    out.sort();
    out.log(measure);
    out
}

/// Collapse normalized points into one monthly series per building,
/// summing values sharing a (building, month) across reporting codes.
pub fn monthly_series(points: &[NormalizedSeriesPoint]) -> BTreeMap<String, Vec<(Date, f64)>> {
    let mut summed: BTreeMap<(String, Date), f64> = BTreeMap::new();
    for p in points {
        *summed.entry((p.building_id.clone(), p.month)).or_insert(0.0) += p.value;
    }
    let mut series: BTreeMap<String, Vec<(Date, f64)>> = BTreeMap::new();
    for ((building, month), value) in summed {
        series.entry(building).or_default().push((month, value));
    }
    series
}

/// Distinct (building, owner) pairs, published per measure so the
/// reporting surface can resolve either direction.
pub fn building_owner_lookup(points: &[NormalizedSeriesPoint]) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = points
        .iter()
        .map(|p| (p.building_id.clone(), p.portfolio_owner.clone()))
        .collect();
    pairs.sort();
    pairs.dedup();
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn maps() -> (HashMap<String, String>, HashMap<String, String>) {
        let building_to_folder =
            HashMap::from([("AT-VIE-01".to_string(), "Org > EU > AUT > 1".to_string())]);
        let folder_to_owner =
            HashMap::from([("Org > EU > AUT > 1".to_string(), "Site-Vienna".to_string())]);
        (building_to_folder, folder_to_owner)
    }

    fn rollup(building: &str, fy: i32, fm: i16, value: f64) -> UsageRecord {
        UsageRecord {
            measure: "Purchased Electricity - Usage".into(),
            system_specific_measure: "Energy.1a".into(),
            building_id: building.into(),
            country: Some("Austria".into()),
            fiscal_month: fm,
            fiscal_quarter: (fm - 1) / 3 + 1,
            fiscal_year: fy,
            value,
            unit: "J".into(),
        }
    }

    #[test]
    fn rollups_join_and_shift_to_calendar() {
        let (b2f, f2o) = maps();
        let records = vec![rollup("at-vie-01", 2023, 1, 5.0e9)];
        let out = normalize_rollups(
            "Purchased Electricity - Usage",
            &records,
            &b2f,
            &f2o,
            &HashSet::new(),
        );
        assert_eq!(out.points.len(), 1);
        let p = &out.points[0];
        // Case-insensitive building join.
        assert_eq!(p.building_id, "AT-VIE-01");
        assert_eq!(p.portfolio_owner, "Site-Vienna");
        // Fiscal month 1 = calendar April.
        assert_eq!(p.month, date!(2023 - 04 - 01));
    }

    #[test]
    fn rows_without_owner_are_dropped_not_fatal() {
        let (b2f, _) = maps();
        let records = vec![rollup("AT-VIE-01", 2023, 2, 1.0)];
        let out = normalize_rollups(
            "Purchased Electricity - Usage",
            &records,
            &b2f,
            &HashMap::new(),
            &HashSet::new(),
        );
        assert!(out.points.is_empty());
        assert_eq!(out.dropped_no_owner, 1);
    }

    #[test]
    fn divested_building_is_absent_even_with_valid_mappings() {
        let (b2f, f2o) = maps();
        let divested = HashSet::from(["AT-VIE-01".to_string()]);
        let records = vec![rollup("AT-VIE-01", 2023, 4, 2.0)];
        let out = normalize_rollups(
            "Purchased Electricity - Usage",
            &records,
            &b2f,
            &f2o,
            &divested,
        );
        assert!(out.points.is_empty());
        assert_eq!(out.dropped_divested, 1);
    }

    fn gas_row(code: &str, country: &str, value: f64) -> ConsumptionRecord {
        ConsumptionRecord {
            folder_path: "Org > EU > AUT > 1".into(),
            building_id: "AT-VIE-01".into(),
            country: Some(country.into()),
            month: date!(2023 - 06 - 01),
            measure: "Natural Gas - Useage (Reported)".into(),
            system_specific_measure: code.into(),
            value,
            unit: "m3".into(),
        }
    }

    #[test]
    fn gas_volumetric_rows_convert_by_region() {
        let (_, f2o) = maps();
        let constants = ConversionConstants::default();
        let records = vec![
            gas_row(codes::GAS_VOLUMETRIC, "Austria", 10.0),
            gas_row(codes::GAS_ENERGY, "Austria", 42.0),
        ];
        let out = normalize_natural_gas(
            "Natural Gas - Useage (Reported)",
            &records,
            &f2o,
            &HashSet::new(),
            &constants,
        );
        assert_eq!(out.points.len(), 2);
        let vol = out
            .points
            .iter()
            .find(|p| p.code == codes::GAS_VOLUMETRIC)
            .unwrap();
        assert_eq!(vol.value, 10.0 * 34_390_174.57);
        // Energy-basis rows pass through untouched.
        let nrg = out
            .points
            .iter()
            .find(|p| p.code == codes::GAS_ENERGY)
            .unwrap();
        assert_eq!(nrg.value, 42.0);
    }

    #[test]
    fn gas_round_trip_recovers_volume() {
        let constants = ConversionConstants::default();
        for country in [Some("Canada"), Some("Austria"), None] {
            let factor = constants.gas_joules_per_m3(country);
            let original = 123.456;
            let joules = original * factor;
            let back = joules / factor;
            assert!((back - original).abs() < 1e-9);
        }
    }

    #[test]
    fn steam_drops_zero_rows_and_converts_mass() {
        let (_, f2o) = maps();
        let constants = ConversionConstants::default();
        let mut mass = gas_row(codes::STEAM_MASS, "Austria", 2.0);
        mass.measure = "Purchased Steam - Usage".into();
        let mut zero = gas_row(codes::STEAM_ENERGY, "Austria", 0.0);
        zero.measure = "Purchased Steam - Usage".into();
        let out = normalize_steam(
            "Purchased Steam - Usage",
            &[mass, zero],
            &f2o,
            &HashSet::new(),
            &constants,
        );
        assert_eq!(out.points.len(), 1);
        assert_eq!(out.dropped_zero, 1);
        assert_eq!(out.points[0].value, 2.0 * 2_326_006.377);
    }

    #[test]
    fn monthly_series_sums_codes_per_month() {
        let (b2f, f2o) = maps();
        let records = vec![rollup("AT-VIE-01", 2023, 1, 1.0e9)];
        let out = normalize_rollups("m", &records, &b2f, &f2o, &HashSet::new());
        let mut point = out.points[0].clone();
        point.code = "other-code".into();
        point.value = 2.0e9;
        let mut points = out.points;
        points.push(point);

        let series = monthly_series(&points);
        let vienna = &series["AT-VIE-01"];
        assert_eq!(vienna.len(), 1);
        assert_eq!(vienna[0].1, 3.0e9);
    }
}
