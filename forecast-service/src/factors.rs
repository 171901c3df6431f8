//! Conversion-factor tables, extended over the forecast horizon.
//!
//! Electricity and steam factors are reported per folder path and month
//! and stop at the present; forecasts run three years further. Every
//! series is therefore forward-filled to a shared ceiling so that any
//! forecasted month resolves to a factor.

use std::collections::BTreeMap;
use std::collections::HashMap;

use time::Date;

use edb_client::domain::FactorRow;

use crate::calendar::{add_months, month_range, month_start};
use crate::config::FactorPolicy;
use crate::measure::codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FactorKind {
    Electricity,
    SteamMass,
    SteamEnergy,
    Fixed,
}

impl FactorKind {
    /// Factor kind for a warehouse factor lookup code.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "Energy.EF.2.1.6" => Some(Self::Electricity),
            "Energy.EF.11.MASS" => Some(Self::SteamMass),
            "Energy.EF.11.NRG" => Some(Self::SteamEnergy),
            _ => None,
        }
    }

    /// The usage-side system-specific measure code this factor applies to,
    /// where one exists. This is the join key between steam usage rows and
    /// the steam factor table.
    pub fn usage_code(&self) -> Option<&'static str> {
        match self {
            Self::SteamMass => Some(codes::STEAM_MASS),
            Self::SteamEnergy => Some(codes::STEAM_ENERGY),
            Self::Electricity | Self::Fixed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionFactorEntry {
    pub folder_path: String,
    pub month: Date,
    pub kind: FactorKind,
    pub value: f64,
}

/// Map warehouse factor rows into typed entries. Null and exact-zero
/// readings are unusable and dropped here; unknown lookup codes are
/// skipped.
pub fn from_warehouse_rows(rows: &[FactorRow]) -> Vec<ConversionFactorEntry> {
    rows.iter()
        .filter_map(|r| {
            let kind = FactorKind::from_code(&r.code)?;
            let value = r.value?;
            if value == 0.0 {
                return None;
            }
            Some(ConversionFactorEntry {
                folder_path: r.folder_path.clone(),
                month: month_start(r.month),
                kind,
                value,
            })
        })
        .collect()
}

/// Resolve duplicate same-month reports per (folder path, kind).
///
/// Folder paths listed in the policy keep the highest reported value for
/// the month (a documented exception for one misreporting facility);
/// everywhere else the last-read report wins.
pub fn dedupe_monthly(
    entries: Vec<ConversionFactorEntry>,
    policy: &FactorPolicy,
) -> Vec<ConversionFactorEntry> {
    let mut resolved: BTreeMap<(String, FactorKind, Date), f64> = BTreeMap::new();
    for e in entries {
        let key = (e.folder_path.clone(), e.kind, e.month);
        let keep_highest = policy
            .keep_highest_folder_paths
            .iter()
            .any(|p| *p == e.folder_path);
        match resolved.get_mut(&key) {
            Some(existing) if keep_highest => {
                if e.value > *existing {
                    *existing = e.value;
                }
            }
            Some(existing) => *existing = e.value,
            None => {
                resolved.insert(key, e.value);
            }
        }
    }
    resolved
        .into_iter()
        .map(|((folder_path, kind, month), value)| ConversionFactorEntry {
            folder_path,
            month,
            kind,
            value,
        })
        .collect()
}

/// Extend every (folder path, kind) series to `global_max + horizon`
/// months, filling gaps and the future with the most recent known value.
///
/// Built closed-form: the full target month index is constructed up front
/// and forward-filled, rather than appending one month at a time.
pub fn extend_factors(
    entries: Vec<ConversionFactorEntry>,
    horizon_months: u32,
) -> Vec<ConversionFactorEntry> {
    let Some(global_max) = entries.iter().map(|e| e.month).max() else {
        return Vec::new();
    };
    let ceiling = add_months(global_max, horizon_months as i32);

    let mut by_series: BTreeMap<(String, FactorKind), BTreeMap<Date, f64>> = BTreeMap::new();
    for e in entries {
        by_series
            .entry((e.folder_path, e.kind))
            .or_default()
            .insert(e.month, e.value);
    }

    let mut extended = Vec::new();
    for ((folder_path, kind), observed) in by_series {
        // A series with zero observations cannot exist in the map, but the
        // first-month lookup below guards the invariant anyway.
        let Some((&first, _)) = observed.iter().next() else {
            continue;
        };
        let mut last_value = None;
        for month in month_range(first, ceiling) {
            if let Some(&v) = observed.get(&month) {
                last_value = Some(v);
            }
            if let Some(value) = last_value {
                extended.push(ConversionFactorEntry {
                    folder_path: folder_path.clone(),
                    month,
                    kind,
                    value,
                });
            }
        }
    }
    extended
}

/// Lookup table over extended factor entries.
#[derive(Debug, Clone, Default)]
pub struct FactorTable {
    map: HashMap<(String, FactorKind, Date), f64>,
}

impl FactorTable {
    pub fn new(entries: &[ConversionFactorEntry]) -> Self {
        let map = entries
            .iter()
            .map(|e| ((e.folder_path.clone(), e.kind, e.month), e.value))
            .collect();
        Self { map }
    }

    pub fn lookup(&self, folder_path: &str, kind: FactorKind, month: Date) -> Option<f64> {
        self.map
            .get(&(folder_path.to_string(), kind, month))
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn entry(folder: &str, month: Date, kind: FactorKind, value: f64) -> ConversionFactorEntry {
        ConversionFactorEntry {
            folder_path: folder.to_string(),
            month,
            kind,
            value,
        }
    }

    #[test]
    fn coverage_reaches_global_ceiling_without_gaps() {
        let entries = vec![
            entry("A", date!(2022 - 01 - 01), FactorKind::Electricity, 0.5),
            entry("A", date!(2022 - 04 - 01), FactorKind::Electricity, 0.6),
            // B stops a year earlier but must still extend to A's ceiling.
            entry("B", date!(2021 - 06 - 01), FactorKind::Electricity, 0.9),
        ];
        let extended = extend_factors(entries, 36);

        let a: Vec<_> = extended.iter().filter(|e| e.folder_path == "A").collect();
        let b: Vec<_> = extended.iter().filter(|e| e.folder_path == "B").collect();

        let ceiling = date!(2025 - 04 - 01);
        assert_eq!(a.last().unwrap().month, ceiling);
        assert_eq!(b.last().unwrap().month, ceiling);

        // No gaps, no duplicates: entry count equals the month span.
        assert_eq!(a.len(), 40); // 2022-01 ..= 2025-04
        assert_eq!(b.len(), 47); // 2021-06 ..= 2025-04

        // Interior gap forward-filled with the previous value.
        let feb = a.iter().find(|e| e.month == date!(2022 - 02 - 01)).unwrap();
        assert_eq!(feb.value, 0.5);
        let may = a.iter().find(|e| e.month == date!(2022 - 05 - 01)).unwrap();
        assert_eq!(may.value, 0.6);
    }

    #[test]
    fn single_observation_extends_trivially() {
        let entries = vec![entry("A", date!(2023 - 02 - 01), FactorKind::SteamMass, 1.2)];
        let extended = extend_factors(entries, 36);
        assert_eq!(extended.len(), 37);
        assert!(extended.iter().all(|e| e.value == 1.2));
    }

    #[test]
    fn empty_input_is_not_fatal() {
        assert!(extend_factors(Vec::new(), 36).is_empty());
    }

    #[test]
    fn dedupe_keeps_highest_only_for_listed_paths() {
        let policy = FactorPolicy {
            keep_highest_folder_paths: vec!["Org > APAC > JPN > JPN.20 > 42105".to_string()],
        };
        let month = date!(2023 - 05 - 01);
        let entries = vec![
            entry("Org > APAC > JPN > JPN.20 > 42105", month, FactorKind::Electricity, 0.4),
            entry("Org > APAC > JPN > JPN.20 > 42105", month, FactorKind::Electricity, 0.9),
            entry("Org > APAC > JPN > JPN.20 > 42105", month, FactorKind::Electricity, 0.6),
            entry("Elsewhere", month, FactorKind::Electricity, 0.4),
            entry("Elsewhere", month, FactorKind::Electricity, 0.2),
        ];
        let deduped = dedupe_monthly(entries, &policy);

        let listed = deduped
            .iter()
            .find(|e| e.folder_path.ends_with("42105"))
            .unwrap();
        assert_eq!(listed.value, 0.9);

        let other = deduped.iter().find(|e| e.folder_path == "Elsewhere").unwrap();
        assert_eq!(other.value, 0.2);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn warehouse_rows_drop_null_and_zero_values() {
        let rows = vec![
            FactorRow {
                folder_path: "A".into(),
                month: date!(2023 - 01 - 15),
                code: "Energy.EF.11.MASS".into(),
                unit: None,
                value: Some(0.8),
            },
            FactorRow {
                folder_path: "A".into(),
                month: date!(2023 - 02 - 01),
                code: "Energy.EF.11.MASS".into(),
                unit: None,
                value: Some(0.0),
            },
            FactorRow {
                folder_path: "A".into(),
                month: date!(2023 - 03 - 01),
                code: "Energy.EF.11.MASS".into(),
                unit: None,
                value: None,
            },
        ];
        let entries = from_warehouse_rows(&rows);
        assert_eq!(entries.len(), 1);
        // Mid-month reporting dates snap to the month grid.
        assert_eq!(entries[0].month, date!(2023 - 01 - 01));
        assert_eq!(entries[0].kind, FactorKind::SteamMass);
    }

    #[test]
    fn lookup_table_round_trips() {
        let entries = vec![entry("A", date!(2023 - 01 - 01), FactorKind::Electricity, 0.42)];
        let table = FactorTable::new(&entries);
        assert_eq!(
            table.lookup("A", FactorKind::Electricity, date!(2023 - 01 - 01)),
            Some(0.42)
        );
        assert_eq!(
            table.lookup("A", FactorKind::SteamMass, date!(2023 - 01 - 01)),
            None
        );
    }
}
