//! The loadsim server component.
//!
//! This builds on top of [`loadsim_service`] and exposes the load pipeline as a process: an `HTTP`
//! API to start runs, a worker loop consuming the queue, and a CLI to drive both.

pub mod cli;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod healthcheck;
pub mod observability;
pub mod oneshot;
pub mod state;
pub mod summary;
pub mod web;
pub mod worker;
