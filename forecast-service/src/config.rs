use serde::Deserialize;
use std::fs;

use crate::measure;

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    pub uri: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub uri: String,
    pub max_connections: u32,
    #[serde(default = "default_store_table")]
    pub table: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_store_table() -> String {
    "forecast_artifacts".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

/// Local reference files: fixed conversion factors, the abatement-project
/// source-name lookup, and the wide production-volume sheets.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceFilesConfig {
    pub conversion_factors_csv: String,
    pub spot_lookup_csv: String,
    pub volume_past_csv: String,
    pub volume_future_csv: String,
}

/// Physical unit-conversion constants. These are configuration rather
/// than code so they can be revised against reference conversions without
/// a rebuild.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionConstants {
    /// Joules per cubic meter of natural gas, North American reporting.
    #[serde(default = "default_na_gas")]
    pub na_gas_joules_per_m3: f64,
    /// Joules per cubic meter of natural gas, rest of world.
    #[serde(default = "default_row_gas")]
    pub row_gas_joules_per_m3: f64,
    /// Joules per kilogram of purchased steam.
    #[serde(default = "default_steam")]
    pub steam_joules_per_kg: f64,
    /// Kilowatt hours per gigajoule.
    #[serde(default = "default_kwh_per_gj")]
    pub kwh_per_gj: f64,
    /// Countries whose volumetric gas figures use the NA factor.
    #[serde(default = "default_na_countries")]
    pub na_countries: Vec<String>,
}

fn default_na_gas() -> f64 {
    38_116_087.31
}

fn default_row_gas() -> f64 {
    34_390_174.57
}

fn default_steam() -> f64 {
    2_326_006.377
}

fn default_kwh_per_gj() -> f64 {
    277.778
}

fn default_na_countries() -> Vec<String> {
    ["Canada", "United States", "Biolife US"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ConversionConstants {
    fn default() -> Self {
        Self {
            na_gas_joules_per_m3: default_na_gas(),
            row_gas_joules_per_m3: default_row_gas(),
            steam_joules_per_kg: default_steam(),
            kwh_per_gj: default_kwh_per_gj(),
            na_countries: default_na_countries(),
        }
    }
}

impl ConversionConstants {
    pub fn is_na_country(&self, country: Option<&str>) -> bool {
        country.is_some_and(|c| self.na_countries.iter().any(|n| n == c))
    }

    pub fn gas_joules_per_m3(&self, country: Option<&str>) -> f64 {
        if self.is_na_country(country) {
            self.na_gas_joules_per_m3
        } else {
            self.row_gas_joules_per_m3
        }
    }
}

/// Data-cleaning policies that are site-specific exceptions rather than
/// general rules.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FactorPolicy {
    /// Folder paths whose duplicate same-month factor reports resolve to
    /// the highest reported value instead of the latest.
    #[serde(default)]
    pub keep_highest_folder_paths: Vec<String>,
}

/// Folder-path aliases applied while assembling the owner reference, for
/// source systems that disagree on a site's path.
#[derive(Debug, Clone, Deserialize)]
pub struct FolderPathAlias {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Forecast horizon in months.
    #[serde(default = "default_horizon")]
    pub horizon_months: u32,
    /// Measures taking the statistical forecast path.
    #[serde(default = "default_measures")]
    pub measures: Vec<String>,
    /// Buildings with a known production-volume relationship; these get an
    /// exogenous volume regressor.
    #[serde(default)]
    pub volume_regressor_buildings: Vec<String>,
    #[serde(default)]
    pub factor_policy: FactorPolicy,
    #[serde(default)]
    pub folder_path_aliases: Vec<FolderPathAlias>,
}

fn default_horizon() -> u32 {
    36
}

fn default_measures() -> Vec<String> {
    [
        measure::ELECTRICITY,
        measure::NATURAL_GAS,
        measure::STEAM,
        "Diesel Mobile - Usage",
        "Diesel Stationary - Usage",
        "Fuel Oil - Usage",
        "Purchased Chilled Water - Usage",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub warehouse: WarehouseConfig,
    pub store: StoreConfig,
    pub reference_files: ReferenceFilesConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub conversion: ConversionConstants,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path =
            env::var("FORECAST_CONFIG").unwrap_or_else(|_| "forecast-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_default_to_documented_values() {
        let c = ConversionConstants::default();
        assert_eq!(c.na_gas_joules_per_m3, 38_116_087.31);
        assert_eq!(c.row_gas_joules_per_m3, 34_390_174.57);
        assert_eq!(c.steam_joules_per_kg, 2_326_006.377);
        assert!(c.is_na_country(Some("Canada")));
        assert!(!c.is_na_country(Some("Austria")));
        assert!(!c.is_na_country(None));
    }

    #[test]
    fn config_parses_with_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [warehouse]
            uri = "postgres://localhost/edb"
            max_connections = 4

            [store]
            uri = "postgres://localhost/artifacts"
            max_connections = 2

            [reference_files]
            conversion_factors_csv = "data/Energy_Conversion_Factors.csv"
            spot_lookup_csv = "data/SPOT_LOOKUP_Table.csv"
            volume_past_csv = "data/Volume_Past.csv"
            volume_future_csv = "data/Volume_Future.csv"

            [pipeline]
            volume_regressor_buildings = ["IT-PIS-01"]

            [pipeline.factor_policy]
            keep_highest_folder_paths = ["Org > APAC > JPN > JPN.20 > 42105"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.pipeline.horizon_months, 36);
        assert!(cfg.pipeline.measures.len() >= 3);
        assert_eq!(cfg.store.table, "forecast_artifacts");
        assert_eq!(
            cfg.pipeline.factor_policy.keep_highest_folder_paths,
            vec!["Org > APAC > JPN > JPN.20 > 42105".to_string()]
        );
        assert!(cfg.metrics.is_none());
    }
}
