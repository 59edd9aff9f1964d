//! Shared types of the load simulator.
//!
//! These types travel between the trigger side and the dispatch side of a load run. A
//! [`SimulatedRequest`](request::SimulatedRequest) is serialized as JSON into every queue
//! message, so the field names here are part of the wire format.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod metric;
pub mod request;

pub use metric::{MetricKind, Unit};
pub use request::{Auth, AuthLocation, LoadPlanRequest, SimulatedRequest};
