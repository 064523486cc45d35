//! In-process simulation of the fleet's collaborators
//!
//! Used by the `simulate` command and by the fleet integration tests.
//!
//! - `SimAircraft`: flight commands and a single mission timeline
//! - `SimBroker`: task feed with a first-come-first-served claim arbiter
//! - `FlatEarth`: coordinate math
//! - `FailureInjector`: scripted busy/reject/not-ready failures

mod aircraft;
mod broker;
mod failure;
mod geo;

pub use aircraft::{SimAircraft, SimProfile};
pub use broker::{DeliveryFaults, SimBroker};
pub use failure::{FailureConfig, FailureInjector, SimOperation};
pub use geo::FlatEarth;
