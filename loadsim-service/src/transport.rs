//! Outbound calls against the system under test.
//!
//! A [`SimulatedRequest`] is first resolved into an [`OutboundCall`], which folds credentials and
//! query parameters into the final URL and headers. The call is then executed by a [`Transport`].
//! Transports report every HTTP response as a [`CompletedCall`], no matter its status, and only
//! fail with a [`TransportError`] if no response was obtained at all.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use loadsim_types::{AuthLocation, SimulatedRequest};
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::error::TransportError;

/// User agent string used for outbound calls.
pub const USER_AGENT: &str = concat!("loadsim/", env!("CARGO_PKG_VERSION"));

/// A type-erased, shareable [`Transport`] instance.
pub type SharedTransport = Arc<dyn Transport>;

/// A fully resolved outbound call.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundCall {
    /// HTTP method as given in the request.
    pub method: String,
    /// Final URL including credentials and query parameters.
    pub url: String,
    /// Final headers including header credentials.
    pub headers: BTreeMap<String, String>,
    /// Optional request body.
    pub body: Option<serde_json::Value>,
}

impl OutboundCall {
    /// Resolves a planned request into the call to execute.
    ///
    /// Credentials placed in the query come first, followed by the request's query parameters.
    /// Each addition is separated with `?` if the URL has no query component yet and `&`
    /// otherwise. Values are inserted verbatim.
    pub fn resolve(request: &SimulatedRequest) -> Self {
        let mut url = request.base_url.clone();
        let mut headers = request.headers.clone().unwrap_or_default();

        if let Some(auth) = &request.auth {
            let value = auth.value();
            match auth.location {
                AuthLocation::Query => append_query(&mut url, &format!("{}={value}", auth.key)),
                AuthLocation::Header => {
                    headers.insert(auth.key.clone(), value);
                }
            }
        }

        if let Some(query) = request.query.as_ref().filter(|q| !q.is_empty()) {
            let query = query
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&");
            append_query(&mut url, &query);
        }

        Self {
            method: request.method.clone(),
            url,
            headers,
            body: request.body.clone(),
        }
    }
}

fn append_query(url: &mut String, query: &str) {
    url.push(if url.contains('?') { '&' } else { '?' });
    url.push_str(query);
}

/// A call that produced an HTTP response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletedCall {
    /// The response status code.
    pub status: u16,
}

/// Executes outbound calls.
///
/// Constructed once per process and shared by all dispatch invocations.
#[async_trait::async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Executes the call and reads the full response.
    ///
    /// Responses with error statuses are returned as [`CompletedCall`]s, not as errors.
    async fn execute(&self, call: OutboundCall) -> Result<CompletedCall, TransportError>;
}

/// A [`Transport`] using [`reqwest`].
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport whose calls time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|err| TransportError::InvalidRequest(err.to_string()))?;

        Ok(Self { client })
    }

    /// Creates a transport using an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn build_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| TransportError::InvalidRequest(format!("header `{name}`: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| TransportError::InvalidRequest(format!("header `{name}`: {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, call: OutboundCall) -> Result<CompletedCall, TransportError> {
        let method = Method::from_bytes(call.method.to_ascii_uppercase().as_bytes())
            .map_err(|err| TransportError::InvalidRequest(format!("method: {err}")))?;
        let headers = build_headers(&call.headers)?;

        let mut request = self.client.request(method, &call.url).headers(headers);
        request = match call.body {
            Some(serde_json::Value::String(text)) => request.body(text),
            Some(body) if call.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) => {
                request.body(body.to_string())
            }
            Some(body) => request
                .header(CONTENT_TYPE, "application/json")
                .body(body.to_string()),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        // Latency covers the complete response, so drain the body before returning.
        response.bytes().await?;

        Ok(CompletedCall { status })
    }
}

#[cfg(test)]
mod tests {
    use loadsim_types::Auth;
    use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn query_auth() -> Auth {
        Auth {
            auth_token: "abc".into(),
            prefix: None,
            location: AuthLocation::Query,
            key: "token".into(),
        }
    }

    #[test]
    fn plain_request_is_unchanged() {
        let request = SimulatedRequest::get("http://localhost/users/1", "user");
        let call = OutboundCall::resolve(&request);

        assert_eq!(call.method, "GET");
        assert_eq!(call.url, "http://localhost/users/1");
        assert!(call.headers.is_empty());
        assert!(call.body.is_none());
    }

    #[test]
    fn query_auth_without_query() {
        let mut request = SimulatedRequest::get("http://localhost/users/1", "user");
        request.auth = Some(query_auth());

        let call = OutboundCall::resolve(&request);
        assert!(call.url.ends_with("?token=abc"));
        assert_eq!(call.url, "http://localhost/users/1?token=abc");
    }

    #[test]
    fn query_auth_with_query() {
        let mut request = SimulatedRequest::get("http://localhost/users/1", "user");
        request.auth = Some(query_auth());
        request.query = Some([("foo".to_owned(), "bar".to_owned())].into());

        let call = OutboundCall::resolve(&request);
        assert!(call.url.contains("foo=bar"));
        assert!(call.url.contains("token=abc"));
        assert_eq!(call.url.matches('?').count(), 1);
        assert_eq!(call.url.matches('&').count(), 1);
    }

    #[test]
    fn query_auth_with_existing_query_component() {
        let mut request = SimulatedRequest::get("http://localhost/users/1?page=2", "user");
        request.auth = Some(query_auth());

        let call = OutboundCall::resolve(&request);
        assert_eq!(call.url, "http://localhost/users/1?page=2&token=abc");
    }

    #[test]
    fn query_params_joined() {
        let mut request = SimulatedRequest::get("http://localhost/users/1", "user");
        request.query = Some(
            [
                ("a".to_owned(), "1".to_owned()),
                ("b".to_owned(), "2".to_owned()),
            ]
            .into(),
        );

        let call = OutboundCall::resolve(&request);
        assert_eq!(call.url, "http://localhost/users/1?a=1&b=2");
    }

    #[test]
    fn header_auth_with_prefix() {
        let mut request = SimulatedRequest::get("http://localhost/users/1", "user");
        request.headers = Some([("x-trace".to_owned(), "1".to_owned())].into());
        request.auth = Some(Auth {
            auth_token: "abc".into(),
            prefix: Some("Bearer".into()),
            location: AuthLocation::Header,
            key: "Authorization".into(),
        });

        let call = OutboundCall::resolve(&request);
        assert_eq!(call.url, "http://localhost/users/1");
        assert_eq!(call.headers["Authorization"], "Bearer abc");
        assert_eq!(call.headers["x-trace"], "1");
    }

    #[tokio::test]
    async fn error_statuses_complete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/1"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let request = SimulatedRequest::get(format!("{}/users/1", server.uri()), "user");

        let completed = transport
            .execute(OutboundCall::resolve(&request))
            .await
            .unwrap();
        assert_eq!(completed.status, 503);
    }

    #[tokio::test]
    async fn sends_credentials_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users/1"))
            .and(query_param("token", "abc"))
            .and(query_param("foo", "bar"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"name": "demo"})))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = SimulatedRequest::get(format!("{}/users/1", server.uri()), "user");
        request.method = "post".into();
        request.auth = Some(query_auth());
        request.query = Some([("foo".to_owned(), "bar".to_owned())].into());
        request.body = Some(serde_json::json!({"name": "demo"}));

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let completed = transport
            .execute(OutboundCall::resolve(&request))
            .await
            .unwrap();
        assert_eq!(completed.status, 201);
    }

    #[tokio::test]
    async fn string_bodies_are_sent_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(body_string("plain text"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = SimulatedRequest::get(server.uri(), "raw");
        request.method = "PUT".into();
        request.body = Some(serde_json::Value::String("plain text".into()));

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let completed = transport
            .execute(OutboundCall::resolve(&request))
            .await
            .unwrap();
        assert_eq!(completed.status, 204);
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_millis(100)).unwrap();
        let request = SimulatedRequest::get(server.uri(), "slow");

        let err = transport
            .execute(OutboundCall::resolve(&request))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout), "{err:?}");
    }

    #[tokio::test]
    async fn invalid_method_is_rejected() {
        let mut request = SimulatedRequest::get("http://localhost/", "user");
        request.method = "NOT A METHOD".into();

        let transport = ReqwestTransport::new(Duration::from_secs(1)).unwrap();
        let err = transport
            .execute(OutboundCall::resolve(&request))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)), "{err:?}");
    }
}
