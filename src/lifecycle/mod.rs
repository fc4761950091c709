//! Run lifecycle: status state machine, start/stop control and the driver
//! loop that runs one cycle per poll interval.

pub mod controller;
mod cycle;
mod status;

pub use controller::{
    BinanceMarketFactory, LifecycleController, MarketFactory, StartError, StaticMarketFactory,
};
pub use cycle::CycleContext;
pub use status::{Status, StatusHandle, TransitionError};
