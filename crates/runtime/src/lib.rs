pub mod cadence;
pub mod event_bus;
pub mod metrics;

pub use cadence::*;
pub use event_bus::*;
pub use metrics::*;
