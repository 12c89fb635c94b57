//! Database queries

pub mod geocode_job;
pub mod household;
pub mod reference;
pub mod voter;
