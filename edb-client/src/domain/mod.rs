mod factors;
mod reference;
mod spot;
mod usage;

pub use factors::FactorRow;
pub use reference::{BuildingFolderPath, DivestedBuilding, MeasureCode, OwnerFolderGroup, OwnerName};
pub use spot::{SpotProject, VppaContract};
pub use usage::{ConsumptionRecord, UsageRecord};
