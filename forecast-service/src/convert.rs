//! Physical usage to CO2-equivalent emissions.
//!
//! Conversion branches strictly on the measure: natural gas (fixed
//! coefficients per reporting basis, with the volumetric basis converted
//! back through the region factor), purchased steam and electricity
//! (time-varying factors joined from the extended factor tables), and
//! everything else (one flat coefficient per measure). Conversion happens
//! at building level, before owner aggregation, because one owner can mix
//! sites with different reporting units.
//!
//! A missing factor nulls the affected rows; a missing measure-level
//! coefficient fails the whole branch, which the orchestrator turns into
//! a well-formed empty table rather than a crash.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::calendar::{add_months, PeriodLabels};
use crate::config::ConversionConstants;
use crate::factors::{FactorKind, FactorTable};
use crate::measure::{codes, MeasureKind};
use crate::normalize::NormalizedSeriesPoint;
use crate::sources::FixedFactorTable;
use crate::spot::MonthlyImpact;
use crate::stitch::{SeriesKind, StitchedSeriesPoint};

/// How far past each building's last attribute month the site attributes
/// are repeated, so forecast months still resolve a country, owner and
/// folder path.
const ATTRIBUTE_EXTENSION_MONTHS: i32 = 40;

/// A stitched point joined back to its site attributes. Attribute fields
/// are `None` where the join found nothing; such rows pass through
/// conversion with null emissions.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedPoint {
    pub building_id: String,
    pub month: Date,
    pub value: f64,
    pub kind: SeriesKind,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub code: Option<String>,
    pub country: Option<String>,
    pub portfolio_owner: Option<String>,
    pub folder_path: Option<String>,
}

/// One converted row, still at building grain.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedPoint {
    pub portfolio_owner: Option<String>,
    pub month: Date,
    pub kind: SeriesKind,
    pub energy_gj: Option<f64>,
    pub energy_lower: Option<f64>,
    pub energy_upper: Option<f64>,
    pub emission_tons: Option<f64>,
}

/// Owner-level series, one row per (owner, month).
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub portfolio_owner: String,
    pub month: Date,
    pub kind: SeriesKind,
    pub energy_gj: Option<f64>,
    pub energy_lower: Option<f64>,
    pub energy_upper: Option<f64>,
    pub emission_tons: Option<f64>,
}

/// Final reporting grain, one row per (owner, month) per measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionRecord {
    pub impact_month: Date,
    pub portfolio_owner: String,
    pub energy_gj: Option<f64>,
    pub energy_lower: Option<f64>,
    pub energy_upper: Option<f64>,
    pub emission_tons: Option<f64>,
    pub energy_with_spot: Option<f64>,
    pub emission_with_spot: Option<f64>,
    pub kind: SeriesKind,
    pub spot_emission_sum: Option<f64>,
    pub spot_emission_cumulative: Option<f64>,
    pub spot_energy_sum: Option<f64>,
    pub spot_energy_cumulative: Option<f64>,
    #[serde(flatten)]
    pub labels: PeriodLabels,
}

#[derive(Debug, Clone)]
struct SiteAttributes {
    code: String,
    country: Option<String>,
    portfolio_owner: String,
    folder_path: String,
}

/// Join each stitched row back to its reporting code, country, owner and
/// folder path. The attribute table only covers observed months, so each
/// building's last known attributes are repeated forward far enough to
/// cover the forecast horizon. A month can carry several attribute rows
/// (a site reporting under two bases); the join then fans out, and the
/// exact-duplicate cleanup in aggregation reels it back in.
pub fn attach_site_attributes(
    stitched: &[StitchedSeriesPoint],
    normalized: &[NormalizedSeriesPoint],
) -> Vec<EnrichedPoint> {
    let mut attrs: HashMap<(String, Date), Vec<SiteAttributes>> = HashMap::new();
    let mut last_month: HashMap<String, Date> = HashMap::new();

    for p in normalized {
        attrs
            .entry((p.building_id.clone(), p.month))
            .or_default()
            .push(SiteAttributes {
                code: p.code.clone(),
                country: p.country.clone(),
                portfolio_owner: p.portfolio_owner.clone(),
                folder_path: p.folder_path.clone(),
            });
        last_month
            .entry(p.building_id.clone())
            .and_modify(|m| {
                if p.month > *m {
                    *m = p.month;
                }
            })
            .or_insert(p.month);
    }

    // Repeat each building's final attribute rows across the horizon.
    for (building, last) in &last_month {
        let Some(tail) = attrs.get(&(building.clone(), *last)).cloned() else {
            continue;
        };
        for h in 1..=ATTRIBUTE_EXTENSION_MONTHS {
            attrs
                .entry((building.clone(), add_months(*last, h)))
                .or_insert_with(|| tail.clone());
        }
    }

    let mut enriched = Vec::new();
    for p in stitched {
        match attrs.get(&(p.building_id.clone(), p.month)) {
            Some(rows) => {
                for a in rows {
                    enriched.push(EnrichedPoint {
                        building_id: p.building_id.clone(),
                        month: p.month,
                        value: p.value,
                        kind: p.kind,
                        lower: p.lower,
                        upper: p.upper,
                        code: Some(a.code.clone()),
                        country: a.country.clone(),
                        portfolio_owner: Some(a.portfolio_owner.clone()),
                        folder_path: Some(a.folder_path.clone()),
                    });
                }
            }
            None => enriched.push(EnrichedPoint {
                building_id: p.building_id.clone(),
                month: p.month,
                value: p.value,
                kind: p.kind,
                lower: p.lower,
                upper: p.upper,
                code: None,
                country: None,
                portfolio_owner: None,
                folder_path: None,
            }),
        }
    }
    enriched
}

const JOULES_PER_GJ: f64 = 1.0e9;
const KG_PER_TON: f64 = 1000.0;
const LITERS_PER_M3: f64 = 1000.0;

/// Convert enriched rows to emissions for one measure. Returns `None`
/// when the measure-level coefficient itself cannot be resolved, which
/// fails the whole branch; per-row factor misses only null that row's
/// emissions.
pub fn convert_measure(
    rows: &[EnrichedPoint],
    measure: &str,
    fixed: &FixedFactorTable,
    electricity: &FactorTable,
    steam: &FactorTable,
    constants: &ConversionConstants,
) -> Option<Vec<ConvertedPoint>> {
    let kind = MeasureKind::of(measure);

    // Branch-level coefficients resolve once, up front.
    let gas_coefficients = match kind {
        MeasureKind::NaturalGas => {
            let vol = fixed.coefficient_for_code(measure, codes::GAS_VOLUMETRIC);
            let nrg = fixed.coefficient_for_code(measure, codes::GAS_ENERGY);
            match (vol, nrg) {
                (Some(v), Some(n)) => Some((v, n)),
                _ => {
                    tracing::error!(measure, "natural gas coefficients missing from factor file");
                    return None;
                }
            }
        }
        _ => None,
    };
    let flat_coefficient = match kind {
        MeasureKind::Other => match fixed.coefficient(measure) {
            Some(c) => Some(c),
            None => {
                tracing::error!(measure, "no fixed conversion coefficient for measure");
                return None;
            }
        },
        _ => None,
    };

    let mut unmatched = 0usize;
    let converted = rows
        .iter()
        .map(|r| {
            let emission_kg = match kind {
                MeasureKind::NaturalGas => {
                    let (coeff_vol, coeff_nrg) =
                        gas_coefficients.expect("checked above for the gas branch");
                    match r.code.as_deref() {
                        Some(codes::GAS_ENERGY) => Some(r.value / JOULES_PER_GJ * coeff_nrg),
                        Some(codes::GAS_VOLUMETRIC) => {
                            let per_m3 = constants.gas_joules_per_m3(r.country.as_deref());
                            Some(r.value / per_m3 * LITERS_PER_M3 * coeff_vol)
                        }
                        _ => None,
                    }
                }
                MeasureKind::Steam => {
                    let factor_kind = match r.code.as_deref() {
                        Some(codes::STEAM_MASS) => Some(FactorKind::SteamMass),
                        Some(codes::STEAM_ENERGY) => Some(FactorKind::SteamEnergy),
                        _ => None,
                    };
                    factor_kind.and_then(|fk| {
                        let factor = r
                            .folder_path
                            .as_deref()
                            .and_then(|fp| steam.lookup(fp, fk, r.month))?;
                        let base = match fk {
                            FactorKind::SteamEnergy => {
                                r.value / JOULES_PER_GJ * constants.kwh_per_gj
                            }
                            _ => r.value / constants.steam_joules_per_kg,
                        };
                        Some(base * factor)
                    })
                }
                MeasureKind::Electricity => r
                    .folder_path
                    .as_deref()
                    .and_then(|fp| electricity.lookup(fp, FactorKind::Electricity, r.month))
                    .map(|factor| r.value / JOULES_PER_GJ * constants.kwh_per_gj * factor),
                MeasureKind::Other => {
                    let coeff = flat_coefficient.expect("checked above for the flat branch");
                    Some(r.value / JOULES_PER_GJ * coeff)
                }
            };

            if emission_kg.is_none() {
                unmatched += 1;
            }

            ConvertedPoint {
                portfolio_owner: r.portfolio_owner.clone(),
                month: r.month,
                kind: r.kind,
                energy_gj: Some(r.value / JOULES_PER_GJ),
                energy_lower: r.lower.map(|v| v / JOULES_PER_GJ),
                energy_upper: r.upper.map(|v| v / JOULES_PER_GJ),
                emission_tons: emission_kg.map(|kg| kg / KG_PER_TON),
            }
        })
        .collect();

    if unmatched > 0 {
        tracing::warn!(measure, unmatched, "rows without a conversion factor match");
        metrics::counter!("convert_rows_unmatched_total").increment(unmatched as u64);
    }
    Some(converted)
}

fn add_opt(acc: &mut Option<f64>, v: Option<f64>) {
    if let Some(v) = v {
        *acc = Some(acc.unwrap_or(0.0) + v);
    }
}

/// Aggregate converted rows to owner level: exact duplicates created by
/// the attribute fan-out are removed first, then values, bounds and
/// emissions sum per (owner, month). Rows with no resolvable owner are
/// dropped here, mirroring the loss accepted at normalization.
pub fn aggregate_on_portfolio_level(rows: Vec<ConvertedPoint>) -> Vec<AggregatedRow> {
    // Dedup before summing: the attribute join duplicates a row once per
    // reporting code, and summing those copies would double count.
    let mut distinct: Vec<&ConvertedPoint> = Vec::new();
    for r in &rows {
        if !distinct.iter().any(|d| *d == r) {
            distinct.push(r);
        }
    }

    let mut grouped: BTreeMap<(String, Date), AggregatedRow> = BTreeMap::new();
    for r in distinct {
        let Some(owner) = r.portfolio_owner.clone() else {
            continue;
        };
        let entry = grouped
            .entry((owner.clone(), r.month))
            .or_insert(AggregatedRow {
                portfolio_owner: owner,
                month: r.month,
                kind: r.kind,
                energy_gj: None,
                energy_lower: None,
                energy_upper: None,
                emission_tons: None,
            });
        add_opt(&mut entry.energy_gj, r.energy_gj);
        add_opt(&mut entry.energy_lower, r.energy_lower);
        add_opt(&mut entry.energy_upper, r.energy_upper);
        add_opt(&mut entry.emission_tons, r.emission_tons);
        // A month mixing actuals and forecasts across sites reports as
        // predicted.
        if r.kind == SeriesKind::Predicted {
            entry.kind = SeriesKind::Predicted;
        }
    }

    grouped.into_values().collect()
}

/// Overlay abatement-project impacts: the monthly impact joins per
/// (owner, month) with missing months as zero, accumulates per owner over
/// time, and the cumulative deltas adjust the emission and energy series
/// independently.
pub fn add_spot(
    aggregated: Vec<AggregatedRow>,
    impacts: &HashMap<(String, Date), MonthlyImpact>,
) -> Vec<EmissionRecord> {
    let mut rows = aggregated;
    rows.sort_by(|a, b| (&a.portfolio_owner, a.month).cmp(&(&b.portfolio_owner, b.month)));

    let mut out = Vec::with_capacity(rows.len());
    let mut current_owner: Option<String> = None;
    let mut cum_emission = 0.0;
    let mut cum_energy = 0.0;

    for r in rows {
        if current_owner.as_deref() != Some(r.portfolio_owner.as_str()) {
            current_owner = Some(r.portfolio_owner.clone());
            cum_emission = 0.0;
            cum_energy = 0.0;
        }

        let impact = impacts
            .get(&(r.portfolio_owner.clone(), r.month))
            .copied()
            .unwrap_or_default();
        cum_emission += impact.emission_tons;
        cum_energy += impact.energy;

        out.push(EmissionRecord {
            impact_month: r.month,
            portfolio_owner: r.portfolio_owner,
            energy_gj: r.energy_gj,
            energy_lower: r.energy_lower,
            energy_upper: r.energy_upper,
            emission_tons: r.emission_tons,
            energy_with_spot: r.energy_gj.map(|v| v + cum_energy),
            emission_with_spot: r.emission_tons.map(|v| v + cum_emission),
            kind: r.kind,
            spot_emission_sum: Some(impact.emission_tons),
            spot_emission_cumulative: Some(cum_emission),
            spot_energy_sum: Some(impact.energy),
            spot_energy_cumulative: Some(cum_energy),
            labels: PeriodLabels::for_month(r.month),
        });
    }
    out
}

/// Negative usage or emissions are model artifacts, not signal; clamp
/// them to zero as the final step.
pub fn clamp_negative(records: &mut [EmissionRecord]) {
    fn clamp(v: &mut Option<f64>) {
        if let Some(x) = v {
            if *x < 0.0 {
                *x = 0.0;
            }
        }
    }
    for r in records {
        clamp(&mut r.energy_gj);
        clamp(&mut r.energy_with_spot);
        clamp(&mut r.emission_tons);
        clamp(&mut r.emission_with_spot);
    }
}

/// The published table must always be well formed: a failed branch
/// publishes an empty table with the right schema instead of propagating
/// the failure.
pub fn select_columns(records: Option<Vec<EmissionRecord>>) -> Vec<EmissionRecord> {
    records.unwrap_or_default()
}
