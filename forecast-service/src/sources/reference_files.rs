//! Local tabular reference inputs.
//!
//! Three file families feed the pipeline alongside the warehouse: the
//! fixed physical conversion factors, the abatement-project source-name
//! lookup, and the production-volume sheets (wide per-site/per-period
//! layout, melted here into a long monthly series).

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use time::format_description::well_known::Iso8601;
use time::Date;

use crate::calendar::month_start;
use crate::pipeline::PipelineError;

/// Fixed conversion factors keyed by indicator name, optionally refined by
/// the system-specific unit code (natural gas carries one coefficient per
/// reporting basis).
///
/// Expected header columns (by name):
/// - indicator
/// - unit_code (optional per row)
/// - cf_final (kg GHG per native unit)
#[derive(Debug, Clone, Default)]
pub struct FixedFactorTable {
    rows: Vec<FixedFactor>,
}

#[derive(Debug, Clone)]
struct FixedFactor {
    indicator: String,
    unit_code: Option<String>,
    coefficient: f64,
}

impl FixedFactorTable {
    /// Single coefficient for a measure, ignoring the unit code.
    pub fn coefficient(&self, indicator: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.indicator == indicator)
            .map(|r| r.coefficient)
    }

    /// Coefficient for a measure and a specific reporting-basis code.
    pub fn coefficient_for_code(&self, indicator: &str, code: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|r| r.indicator == indicator && r.unit_code.as_deref() == Some(code))
            .map(|r| r.coefficient)
    }

    #[cfg(test)]
    pub fn from_rows(rows: Vec<(&str, Option<&str>, f64)>) -> Self {
        Self {
            rows: rows
                .into_iter()
                .map(|(indicator, code, coefficient)| FixedFactor {
                    indicator: indicator.to_string(),
                    unit_code: code.map(String::from),
                    coefficient,
                })
                .collect(),
        }
    }
}

fn column<'a>(
    record: &'a StringRecord,
    headers: &StringRecord,
    name: &str,
) -> Result<&'a str, PipelineError> {
    headers
        .iter()
        .position(|h| h == name)
        .and_then(|idx| record.get(idx))
        .ok_or_else(|| PipelineError::Reference(format!("missing column '{name}' in CSV record")))
}

pub fn load_fixed_factors(path: impl AsRef<Path>) -> Result<FixedFactorTable, PipelineError> {
    let file = File::open(path.as_ref())
        .map_err(|e| PipelineError::Reference(format!("failed to open factors file: {e}")))?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr
        .headers()
        .map_err(|e| PipelineError::Reference(format!("failed to read CSV headers: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result
            .map_err(|e| PipelineError::Reference(format!("failed to read CSV record: {e}")))?;
        let coefficient_str = column(&record, &headers, "cf_final")?;
        let coefficient: f64 = coefficient_str.trim().parse().map_err(|e| {
            PipelineError::Reference(format!("invalid cf_final '{coefficient_str}': {e}"))
        })?;
        let unit_code = column(&record, &headers, "unit_code")
            .ok()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        rows.push(FixedFactor {
            indicator: column(&record, &headers, "indicator")?.trim().to_string(),
            unit_code,
            coefficient,
        });
    }

    Ok(FixedFactorTable { rows })
}

/// Abatement-project source name to measure name.
///
/// Expected header columns (by name): em_source_name, measure_name.
pub fn load_spot_lookup(
    path: impl AsRef<Path>,
) -> Result<HashMap<String, String>, PipelineError> {
    let file = File::open(path.as_ref())
        .map_err(|e| PipelineError::Reference(format!("failed to open lookup file: {e}")))?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr
        .headers()
        .map_err(|e| PipelineError::Reference(format!("failed to read CSV headers: {e}")))?
        .clone();

    let mut lookup = HashMap::new();
    for result in rdr.records() {
        let record = result
            .map_err(|e| PipelineError::Reference(format!("failed to read CSV record: {e}")))?;
        let source = column(&record, &headers, "em_source_name")?.trim().to_string();
        let measure = column(&record, &headers, "measure_name")?.trim().to_string();
        lookup.insert(source, measure);
    }

    Ok(lookup)
}

/// Monthly production volume for one site.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumePoint {
    pub building_id: String,
    pub month: Date,
    pub volume: f64,
}

/// Melt one wide volume sheet into long (site, month, volume) rows.
///
/// The sheet has `site` and `product` columns followed by one ISO-dated
/// column per period; volumes of different products sharing a (site,
/// month) are summed.
fn melt_volume_csv(path: &Path) -> Result<Vec<VolumePoint>, PipelineError> {
    let file = File::open(path)
        .map_err(|e| PipelineError::Reference(format!("failed to open volume file: {e}")))?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr
        .headers()
        .map_err(|e| PipelineError::Reference(format!("failed to read CSV headers: {e}")))?
        .clone();

    // Column index -> month for every header that parses as a date.
    let mut month_columns: Vec<(usize, Date)> = Vec::new();
    for (idx, header) in headers.iter().enumerate() {
        if header == "site" || header == "product" {
            continue;
        }
        let parsed = Date::parse(header.trim(), &Iso8601::DEFAULT).map_err(|e| {
            PipelineError::Reference(format!("unrecognized volume period column '{header}': {e}"))
        })?;
        month_columns.push((idx, month_start(parsed)));
    }

    let mut summed: HashMap<(String, Date), f64> = HashMap::new();
    for result in rdr.records() {
        let record = result
            .map_err(|e| PipelineError::Reference(format!("failed to read CSV record: {e}")))?;
        let site = column(&record, &headers, "site")?.trim().to_string();
        for &(idx, month) in &month_columns {
            let raw = record.get(idx).unwrap_or("").trim();
            if raw.is_empty() {
                continue;
            }
            let volume: f64 = raw.parse().map_err(|e| {
                PipelineError::Reference(format!("invalid volume '{raw}': {e}"))
            })?;
            *summed.entry((site.clone(), month)).or_insert(0.0) += volume;
        }
    }

    let mut points: Vec<VolumePoint> = summed
        .into_iter()
        .map(|((building_id, month), volume)| VolumePoint {
            building_id,
            month,
            volume,
        })
        .collect();
    points.sort_by(|a, b| (a.month, &a.building_id).cmp(&(b.month, &b.building_id)));
    Ok(points)
}

/// Combined historical and planned volume. Past data wins wherever the two
/// sheets overlap: planned rows are kept only for months after the last
/// past month.
pub fn load_volume(
    past_path: impl AsRef<Path>,
    future_path: impl AsRef<Path>,
) -> Result<Vec<VolumePoint>, PipelineError> {
    let past = melt_volume_csv(past_path.as_ref())?;
    let future = melt_volume_csv(future_path.as_ref())?;

    let max_past = past.iter().map(|p| p.month).max();
    let mut combined = past;
    match max_past {
        Some(cutoff) => combined.extend(future.into_iter().filter(|p| p.month > cutoff)),
        None => combined.extend(future),
    }
    combined.sort_by(|a, b| (a.month, &a.building_id).cmp(&(b.month, &b.building_id)));
    Ok(combined)
}

/// Volume lookup keyed by (building, month), the shape the forecast engine
/// joins against.
pub fn volume_by_building_month(points: &[VolumePoint]) -> HashMap<(String, Date), f64> {
    points
        .iter()
        .map(|p| ((p.building_id.clone(), p.month), p.volume))
        .collect()
}
