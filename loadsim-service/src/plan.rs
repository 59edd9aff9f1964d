//! Builds the ordered list of requests for a load run.
//!
//! The plan spreads the requested number of calls evenly over the configured endpoint templates
//! in round-robin order. Every call targets a random subject identifier drawn uniformly from
//! `[0, user_count)`, so identifiers can repeat within a run.
//!
//! When the request count is not a multiple of the number of templates, the remainder is
//! dropped: a run over four templates with a request count of `10` issues `8` calls.

use std::collections::BTreeMap;

use loadsim_types::{Auth, LoadPlanRequest, SimulatedRequest};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// Placeholder in [`EndpointTemplate::path`] that is replaced by the subject identifier.
pub const ID_PLACEHOLDER: &str = "{userId}";

/// One kind of call to exercise during a run.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EndpointTemplate {
    /// Path appended to the base URL, containing the [`ID_PLACEHOLDER`].
    pub path: String,
    /// Logical endpoint label used for aggregation.
    pub metric_name: String,
    /// HTTP method of the call.
    #[serde(default = "default_method")]
    pub method: String,
    /// Headers sent with every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Query parameters appended to every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<BTreeMap<String, String>>,
    /// Body sent with every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Credential attached to every call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

fn default_method() -> String {
    "GET".to_owned()
}

impl EndpointTemplate {
    /// Creates a `GET` template without headers, query, body or credentials.
    pub fn new(path: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            metric_name: metric_name.into(),
            method: default_method(),
            headers: None,
            query: None,
            body: None,
            auth: None,
        }
    }

    fn instantiate(&self, base_url: &str, subject_id: u64) -> SimulatedRequest {
        let path = self.path.replacen(ID_PLACEHOLDER, &subject_id.to_string(), 1);

        SimulatedRequest {
            method: self.method.clone(),
            base_url: format!("{base_url}{path}"),
            metric_name: self.metric_name.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            query: self.query.clone(),
            auth: self.auth.clone(),
        }
    }
}

/// Returns the endpoints of the demo backend: followers and user lookups, each with and without
/// a cache in front.
pub fn default_endpoints() -> Vec<EndpointTemplate> {
    vec![
        EndpointTemplate::new("/users/{userId}/followers", "followers"),
        EndpointTemplate::new("/users/{userId}/cached-followers", "cached-followers"),
        EndpointTemplate::new("/users/{userId}", "user"),
        EndpointTemplate::new("/cached-users/{userId}", "cached-user"),
    ]
}

/// Builds the ordered list of requests for a run.
///
/// `base_url` is prepended verbatim to every template path. Subject identifiers come from `rng`,
/// so a seeded generator produces a reproducible plan.
///
/// # Errors
///
/// - [`PlanError::EmptyUserUniverse`] if `request.user_count` is zero.
/// - [`PlanError::NoEndpoints`] if `endpoints` is empty.
pub fn build_plan<R>(
    request: LoadPlanRequest,
    base_url: &str,
    endpoints: &[EndpointTemplate],
    rng: &mut R,
) -> Result<Vec<SimulatedRequest>, PlanError>
where
    R: Rng + ?Sized,
{
    if request.user_count == 0 {
        return Err(PlanError::EmptyUserUniverse);
    }
    if endpoints.is_empty() {
        return Err(PlanError::NoEndpoints);
    }

    let per_endpoint = request.request_count / endpoints.len() as u64;
    let mut requests = Vec::new();

    for _ in 0..per_endpoint {
        for endpoint in endpoints {
            let subject_id = rng.random_range(0..request.user_count);
            requests.push(endpoint.instantiate(base_url, subject_id));
        }
    }

    Ok(requests)
}
