pub mod reference_files;

pub use reference_files::{
    load_fixed_factors, load_spot_lookup, load_volume, volume_by_building_month,
    FixedFactorTable, VolumePoint,
};
