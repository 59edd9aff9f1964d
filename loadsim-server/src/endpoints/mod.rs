//! Contains all HTTP endpoint handlers.
//!
//! Use [`routes`] to create a router with all endpoints.

use axum::Router;

use crate::state::ServiceState;

pub mod health;
mod runs;

pub use runs::RunResponse;

pub fn routes() -> Router<ServiceState> {
    let routes_v1 = Router::new().merge(runs::router());

    Router::new()
        .merge(health::router())
        .nest("/v1/", routes_v1)
}
