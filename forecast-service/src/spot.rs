//! Abatement-project (SPOT) preparation and the owner reference.
//!
//! SPOT projects adjust the statistical forecast deterministically: a
//! project completing in month M spreads its annual impact evenly over
//! the following year, accumulated as a running delta. Only future-dated
//! projects participate; completed ones are already visible in actuals.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use time::Date;

use edb_client::domain::{
    BuildingFolderPath, DivestedBuilding, OwnerFolderGroup, OwnerName, SpotProject,
};

use crate::calendar::ceil_to_month_start;
use crate::config::FolderPathAlias;

/// A usable abatement project: measure resolved, impact month on the
/// monthly grid, future-dated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbatementProject {
    pub spot_id: String,
    pub impact_month: Date,
    pub portfolio_owner: String,
    /// Annual impact, tons CO2 per year.
    pub emission_impact_tons: f64,
    /// Annual impact, energy units.
    pub energy_impact: f64,
    pub measure: String,
}

/// Folder path to portfolio owner, assembled from the two owner reference
/// tables. Aliases patch folder paths that the source systems disagree
/// on before the map is built.
pub fn owner_reference(
    groups: &[OwnerFolderGroup],
    names: &[OwnerName],
    aliases: &[FolderPathAlias],
) -> HashMap<String, String> {
    let name_by_id: HashMap<i64, &str> = names
        .iter()
        .map(|n| (n.owner_id, n.portfolio_owner.as_str()))
        .collect();

    let mut map = HashMap::new();
    for g in groups {
        let Some(owner) = name_by_id.get(&g.owner_id) else {
            continue;
        };
        let folder_path = aliases
            .iter()
            .find(|a| a.from == g.folder_path)
            .map(|a| a.to.clone())
            .unwrap_or_else(|| g.folder_path.clone());
        map.insert(folder_path, owner.to_string());
    }
    map
}

/// Uppercased building id to folder path.
pub fn building_folder_map(rows: &[BuildingFolderPath]) -> HashMap<String, String> {
    rows.iter()
        .map(|r| (r.building_id.to_uppercase(), r.folder_path.clone()))
        .collect()
}

/// Uppercased divested building ids.
pub fn divested_set(rows: &[DivestedBuilding]) -> HashSet<String> {
    rows.iter().map(|r| r.building_id.to_uppercase()).collect()
}

/// Resolve, grid-align and filter the raw project list.
///
/// The source-name lookup is an inner join: projects whose source name
/// has no measure mapping are dropped. The impact month is the ceiling
/// month of the realization date, and only impacts after `as_of` are
/// kept.
pub fn prepare_spot(
    projects: &[SpotProject],
    lookup: &HashMap<String, String>,
    as_of: Date,
) -> Vec<AbatementProject> {
    let mut prepared: Vec<AbatementProject> = projects
        .iter()
        .filter_map(|p| {
            let measure = lookup.get(&p.source_name)?;
            let impact_month = ceil_to_month_start(p.realization_date);
            if impact_month <= as_of {
                return None;
            }
            Some(AbatementProject {
                spot_id: p.spot_id.clone(),
                impact_month,
                portfolio_owner: p.portfolio_owner.clone(),
                emission_impact_tons: p.emission_impact_tons,
                energy_impact: p.energy_impact,
                measure: measure.clone(),
            })
        })
        .collect();

    prepared.sort_by(|a, b| (a.impact_month, &a.spot_id).cmp(&(b.impact_month, &b.spot_id)));
    prepared.dedup();

    let dropped = projects.len() - prepared.len();
    if dropped > 0 {
        tracing::info!(
            kept = prepared.len(),
            dropped,
            "abatement projects filtered (unmapped source or past-dated)"
        );
    }
    prepared
}

/// Monthly impact for one (owner, month).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonthlyImpact {
    pub emission_tons: f64,
    pub energy: f64,
}

/// Sum project impacts per (owner, impact month) for one measure,
/// dividing the annual figures by twelve.
pub fn monthly_impacts(
    projects: &[AbatementProject],
    measure: &str,
) -> HashMap<(String, Date), MonthlyImpact> {
    let mut impacts: HashMap<(String, Date), MonthlyImpact> = HashMap::new();
    for p in projects.iter().filter(|p| p.measure == measure) {
        let entry = impacts
            .entry((p.portfolio_owner.clone(), p.impact_month))
            .or_default();
        entry.emission_tons += p.emission_impact_tons / 12.0;
        entry.energy += p.energy_impact / 12.0;
    }
    impacts
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn project(id: &str, source: &str, owner: &str, date: Date, tons: f64) -> SpotProject {
        SpotProject {
            spot_id: id.to_string(),
            source_name: source.to_string(),
            portfolio_owner: owner.to_string(),
            realization_date: date,
            emission_impact_tons: tons,
            energy_impact: tons * 10.0,
        }
    }

    fn lookup() -> HashMap<String, String> {
        HashMap::from([(
            "Electricity".to_string(),
            "Purchased Electricity - Usage".to_string(),
        )])
    }

    #[test]
    fn unmapped_and_past_projects_are_dropped() {
        let projects = vec![
            project("S1", "Electricity", "Site-X", date!(2025 - 03 - 15), 120.0),
            project("S2", "Unknown Source", "Site-X", date!(2025 - 03 - 15), 120.0),
            project("S3", "Electricity", "Site-X", date!(2022 - 01 - 01), 120.0),
        ];
        let prepared = prepare_spot(&projects, &lookup(), date!(2024 - 06 - 01));
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].spot_id, "S1");
        // Mid-month realization rounds up to the next month start.
        assert_eq!(prepared[0].impact_month, date!(2025 - 04 - 01));
    }

    #[test]
    fn impacts_sum_per_owner_month_and_divide_by_twelve() {
        let projects = vec![
            project("S1", "Electricity", "Site-X", date!(2025 - 03 - 15), 120.0),
            project("S2", "Electricity", "Site-X", date!(2025 - 03 - 20), 240.0),
            project("S3", "Electricity", "Site-Y", date!(2025 - 03 - 15), 12.0),
        ];
        let prepared = prepare_spot(&projects, &lookup(), date!(2024 - 06 - 01));
        let impacts = monthly_impacts(&prepared, "Purchased Electricity - Usage");

        let x = impacts[&("Site-X".to_string(), date!(2025 - 04 - 01))];
        assert_eq!(x.emission_tons, 30.0);
        assert_eq!(x.energy, 300.0);
        let y = impacts[&("Site-Y".to_string(), date!(2025 - 04 - 01))];
        assert_eq!(y.emission_tons, 1.0);

        assert!(monthly_impacts(&prepared, "Purchased Steam - Usage").is_empty());
    }

    #[test]
    fn owner_reference_applies_aliases() {
        let groups = vec![
            OwnerFolderGroup {
                owner_id: 1,
                folder_path: "Org > APAC > IND > Temp.Vash".to_string(),
            },
            OwnerFolderGroup {
                owner_id: 2,
                folder_path: "Org > EU > AUT > 1".to_string(),
            },
            OwnerFolderGroup {
                owner_id: 99,
                folder_path: "Org > Unmapped".to_string(),
            },
        ];
        let names = vec![
            OwnerName {
                owner_id: 1,
                portfolio_owner: "Site-Vashi".to_string(),
            },
            OwnerName {
                owner_id: 2,
                portfolio_owner: "Site-Vienna".to_string(),
            },
        ];
        let aliases = vec![FolderPathAlias {
            from: "Org > APAC > IND > Temp.Vash".to_string(),
            to: "Org > APAC > IND > 43101".to_string(),
        }];

        let map = owner_reference(&groups, &names, &aliases);
        assert_eq!(map.get("Org > APAC > IND > 43101").map(String::as_str), Some("Site-Vashi"));
        assert!(!map.contains_key("Org > APAC > IND > Temp.Vash"));
        assert_eq!(map.get("Org > EU > AUT > 1").map(String::as_str), Some("Site-Vienna"));
        // Groups with no owner name drop out instead of erroring.
        assert!(!map.contains_key("Org > Unmapped"));
    }
}
