pub mod config;
pub mod error;
pub mod models;

pub use config::{EngineConfig, StrategyKind};
pub use error::{EngineError, EngineResult};
pub use models::{Hold, HoldStatus, Reservation, ResourceUnit, UnitState};
