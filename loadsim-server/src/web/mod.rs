//! Module implementing the loadsim HTTP API.
//!
//! The application is implemented in the [`App`] struct, which sets up routing and middleware. To
//! run the full process, use the [`server()`] function, which opens a TCP listener, serves the
//! application and runs the dispatch worker next to it.
//!
//! # Testing
//!
//! For end-to-end tests of the server, see the `loadsim-test` crate, which provides utilities to
//! start a test server.

mod app;
mod middleware;
mod server;

pub use app::App;
pub use server::{server, worker};
