pub mod fallback;
pub mod geo;
pub mod geocoding;
pub mod push;
pub mod status;
pub mod tracker;
