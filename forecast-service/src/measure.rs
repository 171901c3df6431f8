//! Measure names and the conversion families they map onto.
//!
//! Measure names come straight from the source system, misspellings
//! included; they are matched verbatim.

use serde::{Deserialize, Serialize};

/// Natural-gas usage as reported, either volumetric or energetic.
pub const NATURAL_GAS: &str = "Natural Gas - Useage (Reported)";
/// Purchased steam, mass- or energy-basis.
pub const STEAM: &str = "Purchased Steam - Usage";
/// Purchased grid electricity.
pub const ELECTRICITY: &str = "Purchased Electricity - Usage";
/// Refrigerant leakage, reported in kg GHG.
pub const LEAKS: &str = "Emission - Air Refrigerants";
/// Fleet fuel, reported in kg GHG.
pub const FLEET: &str = "Mobile Combustion - Fleet";

/// System-specific measure codes distinguishing reporting bases.
pub mod codes {
    pub const GAS_VOLUMETRIC: &str = "Energy.2a.vol";
    pub const GAS_ENERGY: &str = "Energy.2a.nrg";
    pub const STEAM_MASS: &str = "Energy.11a.mass";
    pub const STEAM_ENERGY: &str = "Energy.11a.nrg";
}

/// Conversion family of a measure. Natural gas, steam and electricity
/// carry bespoke unit logic; everything else converts through a single
/// fixed coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasureKind {
    NaturalGas,
    Steam,
    Electricity,
    Other,
}

impl MeasureKind {
    pub fn of(measure: &str) -> Self {
        match measure {
            NATURAL_GAS => Self::NaturalGas,
            STEAM => Self::Steam,
            ELECTRICITY => Self::Electricity,
            _ => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_measures_classify() {
        assert_eq!(MeasureKind::of(NATURAL_GAS), MeasureKind::NaturalGas);
        assert_eq!(MeasureKind::of(STEAM), MeasureKind::Steam);
        assert_eq!(MeasureKind::of(ELECTRICITY), MeasureKind::Electricity);
        assert_eq!(MeasureKind::of("Diesel Mobile - Usage"), MeasureKind::Other);
    }
}
