use serde::{Deserialize, Serialize};

/// Building id to hierarchical folder-path mapping (facility footprint).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BuildingFolderPath {
    pub building_id: String,
    pub folder_path: String,
}

/// A building flagged as divested. Usage reported by these buildings is
/// excluded from the forecast entirely.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DivestedBuilding {
    pub building_id: String,
    pub building_name: Option<String>,
    pub status: Option<String>,
}

/// Measure name with its source-system id, used to map abatement-project
/// source names onto measure names.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MeasureCode {
    pub measure: String,
    pub source_id: String,
}

/// Portfolio-owner id to folder-path group, one half of the owner
/// reference join.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OwnerFolderGroup {
    pub owner_id: i64,
    pub folder_path: String,
}

/// Portfolio-owner id to display name, the other half of the owner
/// reference join.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OwnerName {
    pub owner_id: i64,
    pub portfolio_owner: String,
}
