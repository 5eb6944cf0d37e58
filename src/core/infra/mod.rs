mod idle_timer;
mod single_flight;

pub use idle_timer::IdleTimer;
pub use single_flight::{FlightAborted, SingleFlight};
