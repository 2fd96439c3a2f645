pub mod fleet_api;
pub mod nominatim;
