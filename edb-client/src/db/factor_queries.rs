use anyhow::Result;
use sqlx::PgPool;

use crate::domain::FactorRow;

/// Grid electricity conversion factors, one per folder path and month.
pub async fn electricity_factors(pool: &PgPool) -> Result<Vec<FactorRow>> {
    let rows = sqlx::query_as::<_, FactorRow>(
        r#"
        SELECT DISTINCT
            fldrpth         AS folder_path,
            rprtg_prd_key_2 AS month,
            cd_key_2        AS code,
            unit,
            nmbr_val        AS value
        FROM txn_cnspn_mtrcs_glbl
        WHERE cd_key_2 = 'Energy.EF.2.1.6'
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Purchased-steam conversion factors, mass and energy basis.
pub async fn steam_factors(pool: &PgPool) -> Result<Vec<FactorRow>> {
    let rows = sqlx::query_as::<_, FactorRow>(
        r#"
        SELECT
            fldrpth         AS folder_path,
            rprtg_prd_key_2 AS month,
            cd_key_2        AS code,
            unit,
            nmbr_val        AS value
        FROM txn_cnspn_mtrcs_glbl
        WHERE cd_key_2 IN ('Energy.EF.11.NRG', 'Energy.EF.11.MASS')
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
