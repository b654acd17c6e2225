//! Freshness-managed caches and refresh orchestration over a pluggable
//! weather source.

pub mod calendar;
pub mod coalesce;
pub mod forecast;
pub mod hazard;
pub mod region;
pub mod service;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use calendar::{SystemClock, WallClock};
pub use hazard::HazardIndex;
pub use region::{CityEntry, CityListing, RegionIndex};
pub use service::WeatherService;
