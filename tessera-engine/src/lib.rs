pub mod engine;
pub mod holds;
pub mod ledger;
pub mod registry;
pub mod strategy;
pub mod sweeper;

pub use engine::{ReservationEngine, UnitSelector};
pub use registry::UnitRegistry;
pub use sweeper::SweeperHandle;
