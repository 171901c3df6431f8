use serde::{Deserialize, Serialize};
use time::Date;

/// One row of the measure-rollup fact table. Periods are fiscal; the
/// calendar date is derived downstream.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageRecord {
    pub measure: String,
    pub system_specific_measure: String,
    pub building_id: String,
    pub country: Option<String>,
    pub fiscal_month: i16,
    pub fiscal_quarter: i16,
    pub fiscal_year: i32,
    pub value: f64,
    pub unit: String,
}

/// One row of the consumption-metrics fact table (natural gas, steam,
/// fleet). Unlike the rollup table this one carries a calendar month and
/// the folder path directly.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConsumptionRecord {
    pub folder_path: String,
    pub building_id: String,
    pub country: Option<String>,
    pub month: Date,
    pub measure: String,
    pub system_specific_measure: String,
    pub value: f64,
    pub unit: String,
}
