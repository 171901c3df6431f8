use serde::{Deserialize, Serialize};
use time::Date;

/// A planned emission-reduction project with a quantified annual impact.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SpotProject {
    pub spot_id: String,
    pub source_name: String,
    pub portfolio_owner: String,
    pub realization_date: Date,
    /// Annual impact in tons CO2 per year.
    pub emission_impact_tons: f64,
    /// Annual impact in energy units (kWh).
    pub energy_impact: f64,
}

/// A virtual power purchase agreement. Extracted and published for the
/// reporting surface; not applied to the forecast.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VppaContract {
    pub portfolio_owner: String,
    pub calculated_emissions_impact: f64,
    pub realization_date: Date,
}
