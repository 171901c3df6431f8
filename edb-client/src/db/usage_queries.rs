use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{ConsumptionRecord, UsageRecord};

/// Fetch the monthly rollup series for one measure. This serves every
/// indicator except natural gas, steam and fleet, which live in the
/// consumption-metrics table and have their own extracts below.
///
/// Only geography-level rows denominated in joules are usable for the
/// forecast; function- and business-unit-level rollups overlap with them
/// and would double count.
pub async fn usage_rollups(pool: &PgPool, measure: &str) -> Result<Vec<UsageRecord>> {
    let rows = sqlx::query_as::<_, UsageRecord>(
        r#"
        SELECT DISTINCT
            msr                AS measure,
            systm_spcfic_msr   AS system_specific_measure,
            building_id,
            ctry_desc          AS country,
            fscl_mnth_no       AS fiscal_month,
            fscl_qrtr          AS fiscal_quarter,
            fscl_yr            AS fiscal_year,
            r_msr_val          AS value,
            r_msr_unt          AS unit
        FROM txn_mrt_ehs_tango_msr_rollups_glbl
        WHERE r_msr_unt = 'J'
          AND msr = $1
          AND rprtng_lvl = 'GEO'
          AND ehs_func_desc IS NULL
          AND ehs_bu_desc IS NULL
          AND fscl_mnth_no IS NOT NULL
          AND fscl_qrtr IS NOT NULL
          AND fscl_yr IS NOT NULL
          AND building_id IS NOT NULL
        "#,
    )
    .bind(measure)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Refrigerant leakage readings, reported in kg GHG rather than joules.
pub async fn leaks(pool: &PgPool) -> Result<Vec<UsageRecord>> {
    let rows = sqlx::query_as::<_, UsageRecord>(
        r#"
        SELECT DISTINCT
            msr                AS measure,
            systm_spcfic_msr   AS system_specific_measure,
            building_id,
            NULL::text         AS country,
            fscl_mnth_no       AS fiscal_month,
            fscl_qrtr          AS fiscal_quarter,
            fscl_yr            AS fiscal_year,
            r_msr_val          AS value,
            r_msr_unt          AS unit
        FROM txn_mrt_ehs_tango_msr_rollups_glbl
        WHERE r_msr_unt = 'kg GHG'
          AND msr = 'Emission - Air Refrigerants'
          AND rprtng_lvl = 'GEO'
          AND ehs_func_desc IS NULL
          AND ehs_bu_desc IS NULL
          AND fscl_mnth_no IS NOT NULL
          AND fscl_qrtr IS NOT NULL
          AND fscl_yr IS NOT NULL
          AND building_id IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Natural-gas consumption. Gas is reported either in joules or in cubic
/// meters; the country column is needed downstream because the
/// volumetric-to-energy factor is region dependent.
pub async fn natural_gas(pool: &PgPool) -> Result<Vec<ConsumptionRecord>> {
    let rows = sqlx::query_as::<_, ConsumptionRecord>(
        r#"
        SELECT
            fldrpth            AS folder_path,
            building_id,
            cntry              AS country,
            rprtg_prd_key_2    AS month,
            rfrnc_key          AS measure,
            cd_key_2           AS system_specific_measure,
            unvrsl_val         AS value,
            unvrsl_unt         AS unit
        FROM txn_cnspn_mtrcs_glbl
        WHERE cd_key_2 LIKE '%Energy.2a%'
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Purchased-steam consumption, mass- and energy-basis rows.
pub async fn steam(pool: &PgPool) -> Result<Vec<ConsumptionRecord>> {
    let rows = sqlx::query_as::<_, ConsumptionRecord>(
        r#"
        SELECT
            fldrpth            AS folder_path,
            building_id,
            cntry              AS country,
            rprtg_prd_key_2    AS month,
            rfrnc_key          AS measure,
            cd_key_2           AS system_specific_measure,
            unvrsl_val         AS value,
            unvrsl_unt         AS unit
        FROM txn_cnspn_mtrcs_glbl
        WHERE cd_key_2 LIKE '%Energy.11a.mass%'
           OR cd_key_2 LIKE '%Energy.11a.nrg%'
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Fleet fuel GHG readings, already denominated in kg GHG per month.
pub async fn fleet(pool: &PgPool) -> Result<Vec<ConsumptionRecord>> {
    let rows = sqlx::query_as::<_, ConsumptionRecord>(
        r#"
        SELECT
            fldrpth            AS folder_path,
            building_id,
            NULL::text         AS country,
            rprtg_prd_key_2    AS month,
            rfrnc_key          AS measure,
            cd_key_2           AS system_specific_measure,
            unvrsl_val         AS value,
            unvrsl_unt         AS unit
        FROM txn_cnspn_mtrcs_glbl
        WHERE cd_key_2 LIKE '%FLEET.Scp1.Cot.GHG.M%'
          AND cnspn_typ = 'TET_GHG2'
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
