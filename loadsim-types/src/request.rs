//! Planned requests and the inputs that produce them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The input that starts a load run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPlanRequest {
    /// Total number of calls the run should issue.
    ///
    /// The plan may contain fewer calls if this is not a multiple of the endpoint count.
    pub request_count: u64,
    /// Size of the universe of simulated subject identifiers.
    pub user_count: u64,
}

/// Where the credential of an [`Auth`] descriptor is placed on the outbound call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLocation {
    /// Sent as a header named [`Auth::key`].
    Header,
    /// Appended to the query string as `{key}={value}`.
    Query,
}

/// Credential attached to a [`SimulatedRequest`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    /// The raw token.
    pub auth_token: String,
    /// Optional scheme prepended to the token, separated by a space (e.g. `Bearer`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Placement of the credential.
    pub location: AuthLocation,
    /// Header name or query parameter name.
    pub key: String,
}

impl Auth {
    /// Returns the credential as sent on the wire, including the prefix if there is one.
    ///
    /// ```
    /// use loadsim_types::{Auth, AuthLocation};
    ///
    /// let auth = Auth {
    ///     auth_token: "abc".into(),
    ///     prefix: Some("Bearer".into()),
    ///     location: AuthLocation::Header,
    ///     key: "Authorization".into(),
    /// };
    /// assert_eq!(auth.value(), "Bearer abc");
    /// ```
    pub fn value(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix} {}", self.auth_token),
            None => self.auth_token.clone(),
        }
    }
}

/// One planned call of a load run.
///
/// This is the unit of work carried through the queue. Optional fields are omitted from the JSON
/// representation when they are not set.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedRequest {
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// Fully resolved URL of the call, with the subject identifier already substituted.
    pub base_url: String,
    /// Logical endpoint label under which outcomes are aggregated.
    pub metric_name: String,
    /// Additional request headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Request body. Strings are sent verbatim, everything else as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Query parameters appended to [`base_url`](Self::base_url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<BTreeMap<String, String>>,
    /// Credential to attach to the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl SimulatedRequest {
    /// Creates a bare `GET` request for the given URL and metric name.
    pub fn get(base_url: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            method: "GET".to_owned(),
            base_url: base_url.into(),
            metric_name: metric_name.into(),
            headers: None,
            body: None,
            query: None,
            auth: None,
        }
    }
}
