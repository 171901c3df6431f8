use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{OwnerFolderGroup, OwnerName, SpotProject, VppaContract};

/// Emission-reduction projects with a quantified annual impact. Only
/// projects carrying both an emission and an energy impact figure are
/// usable for the forecast overlay.
pub async fn spot_projects(pool: &PgPool) -> Result<Vec<SpotProject>> {
    let rows = sqlx::query_as::<_, SpotProject>(
        r#"
        SELECT
            spot_id,
            em_source_name               AS source_name,
            environmental_portfolio      AS portfolio_owner,
            emissions_impact_realization_date AS realization_date,
            em_impact_tons_co2_year      AS emission_impact_tons,
            COALESCE(em_unit, 0)         AS energy_impact
        FROM caps_consolidated_project_listing_carbon
        WHERE emissions_impact_realization_date IS NOT NULL
          AND environmental_portfolio IS NOT NULL
          AND em_impact_tons_co2_year IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Portfolio-owner id to folder-path group.
pub async fn owner_folder_groups(pool: &PgPool) -> Result<Vec<OwnerFolderGroup>> {
    let rows = sqlx::query_as::<_, OwnerFolderGroup>(
        r#"
        SELECT
            em_portfolio_owner_id    AS owner_id,
            em_portfolio_owner_group AS folder_path
        FROM spot_em_portfolio_owner
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Portfolio-owner id to display name.
pub async fn owner_names(pool: &PgPool) -> Result<Vec<OwnerName>> {
    let rows = sqlx::query_as::<_, OwnerName>(
        r#"
        SELECT
            portfolio_owner_id AS owner_id,
            portfolio_owner
        FROM spot_spot_portfolio_owner
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Virtual power purchase agreements, published for the reporting surface.
pub async fn vppa_contracts(pool: &PgPool) -> Result<Vec<VppaContract>> {
    let rows = sqlx::query_as::<_, VppaContract>(
        r#"
        SELECT
            environmental_portfolio      AS portfolio_owner,
            calculated_emissions_impact,
            emissions_impact_realization_date AS realization_date
        FROM caps_consolidated_project_listing_carbon
        WHERE project_type = 'VPPA'
          AND calculated_emissions_impact IS NOT NULL
          AND emissions_impact_realization_date IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
