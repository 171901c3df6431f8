use serde::{Deserialize, Serialize};
use time::Date;

/// One reported conversion-factor reading (electricity or steam), keyed by
/// folder path and month. `value` is nullable in the warehouse; null and
/// zero readings are filtered out before the factor table is extended.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FactorRow {
    pub folder_path: String,
    pub month: Date,
    pub code: String,
    pub unit: Option<String>,
    pub value: Option<f64>,
}
