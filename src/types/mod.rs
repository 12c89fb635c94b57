//! Type definitions

pub mod geocode_job;
pub mod household;
pub mod import;
pub mod messages;
pub mod reference;
pub mod voter;

pub use geocode_job::*;
pub use household::*;
pub use import::*;
pub use messages::*;
pub use reference::*;
pub use voter::*;
