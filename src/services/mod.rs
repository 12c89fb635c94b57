//! Business logic services

pub mod chunker;
pub mod geocode_runner;
pub mod geocoding;
pub mod job_history;
pub mod matcher;
pub mod nominatim;
pub mod pause;
pub mod spr;
