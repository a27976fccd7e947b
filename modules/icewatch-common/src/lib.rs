pub mod config;
pub mod error;
pub mod geo;
pub mod types;

pub use config::{apply_env_file, AdapterConfig, Config, SourceSettings};
pub use error::IceWatchError;
pub use geo::{haversine_km, GeoPoint, DOWNTOWN_LAT, DOWNTOWN_LON};
pub use types::*;
