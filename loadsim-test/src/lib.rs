//! Test utilities for loadsim.
//!
//! This crate provides utilities to facilitate end-to-end testing of the loadsim server. See the
//! modules for all available utilities.

pub mod server;
pub mod tracing;
