use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{BuildingFolderPath, DivestedBuilding, MeasureCode};

/// Building id to folder-path reference, distinct pairs across the whole
/// consumption table.
pub async fn building_folder_paths(pool: &PgPool) -> Result<Vec<BuildingFolderPath>> {
    let rows = sqlx::query_as::<_, BuildingFolderPath>(
        r#"
        SELECT DISTINCT
            building_id,
            fldrpth AS folder_path
        FROM txn_cnspn_mtrcs_glbl
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Buildings flagged as divested in the facility footprint.
pub async fn divested_buildings(pool: &PgPool) -> Result<Vec<DivestedBuilding>> {
    let rows = sqlx::query_as::<_, DivestedBuilding>(
        r#"
        SELECT
            building_id,
            building_nm        AS building_name,
            building_stat_desc AS status
        FROM ref_mrt_ehs_tango_footprint
        WHERE ehs_data_show_flg = 'No'
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Measure name with its source-system id.
pub async fn measure_codes(pool: &PgPool) -> Result<Vec<MeasureCode>> {
    let rows = sqlx::query_as::<_, MeasureCode>(
        r#"
        SELECT DISTINCT
            msr              AS measure,
            systm_spcfic_msr AS source_id
        FROM txn_mrt_ehs_tango_msr_rollups_glbl
        WHERE systm_spcfic_msr IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
