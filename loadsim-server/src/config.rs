//! Configuration for the loadsim server.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `LS__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `LS__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `LS__BASE_URL=https://api.example.com` sets the system under test
//! - `LS__QUEUE__TYPE=http` selects the HTTP queue
//! - `LS__QUEUE__URL=http://queue:9324` sets the queue service URL
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! base_url: https://api.example.com
//!
//! queue:
//!   type: http
//!   url: http://queue:9324
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Yaml};
use loadsim_service::plan::{EndpointTemplate, default_endpoints};
use loadsim_service::queue::HttpQueue;
use loadsim_service::trigger::DEFAULT_MAX_REQUESTS;
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "LS__";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl std::ops::Deref for ConfigSecret {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Queue configuration.
///
/// The `type` field in YAML or `__TYPE` in environment variables determines which variant is used.
///
/// Used in: [`Config::queue`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Queue {
    /// In-process queue (type `"memory"`).
    ///
    /// Messages live in the server process and are lost on restart. Triggering and dispatching
    /// must happen in the same process, which makes this suitable for local runs and tests.
    Memory,

    /// External queue service spoken to over JSON-over-HTTP (type `"http"`).
    ///
    /// # Example
    ///
    /// ```yaml
    /// queue:
    ///   type: http
    ///   url: http://queue:9324
    /// ```
    Http {
        /// Base URL of the queue service.
        ///
        /// # Environment Variables
        ///
        /// - `LS__QUEUE__TYPE=http`
        /// - `LS__QUEUE__URL=http://queue:9324`
        url: String,

        /// Timeout of every request to the queue service.
        ///
        /// A stalled submission counts as a failed batch. Receives wait for
        /// [`Worker::poll_wait`] on top of this.
        ///
        /// # Default
        ///
        /// `10s`
        ///
        /// # Environment Variable
        ///
        /// `LS__QUEUE__TIMEOUT`
        #[serde(default = "default_queue_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

fn default_queue_timeout() -> Duration {
    HttpQueue::DEFAULT_TIMEOUT
}

/// Destination of the per-endpoint measurements.
///
/// Used in: [`Config::sink`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Sink {
    /// CloudWatch embedded metric format documents on stdout (type `"emf"`).
    Emf {
        /// Metric namespace.
        ///
        /// # Environment Variable
        ///
        /// `LS__SINK__NAMESPACE`
        namespace: String,

        /// Value of the `service` dimension.
        ///
        /// # Environment Variable
        ///
        /// `LS__SINK__SERVICE`
        service: String,
    },

    /// Datadog through the process-wide metrics client (type `"datadog"`).
    ///
    /// Requires [`Metrics::datadog_key`] to be set, otherwise measurements are dropped.
    Datadog,
}

/// Dispatch worker configuration.
///
/// Used in: [`Config::worker`]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Worker {
    /// Whether `loadsim run` polls the queue next to serving the HTTP API.
    ///
    /// # Default
    ///
    /// `true`
    ///
    /// # Environment Variable
    ///
    /// `LS__WORKER__ENABLED`
    pub enabled: bool,

    /// Maximum number of messages handled in one invocation.
    ///
    /// Values above `10` are capped.
    ///
    /// # Default
    ///
    /// `10`
    ///
    /// # Environment Variable
    ///
    /// `LS__WORKER__MAX_MESSAGES`
    pub max_messages: usize,

    /// How long a single receive waits for messages to arrive.
    ///
    /// # Default
    ///
    /// `5s`
    ///
    /// # Environment Variable
    ///
    /// `LS__WORKER__POLL_WAIT`
    #[serde(with = "humantime_serde")]
    pub poll_wait: Duration,

    /// Timeout of every outbound call to the system under test.
    ///
    /// A call exceeding this timeout is counted as a failure.
    ///
    /// # Default
    ///
    /// `30s`
    ///
    /// # Environment Variable
    ///
    /// `LS__WORKER__REQUEST_TIMEOUT`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for Worker {
    fn default() -> Self {
        Self {
            enabled: true,
            max_messages: loadsim_service::batch::MAX_BATCH_SIZE,
            poll_wait: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the server runtime.
    ///
    /// All outbound calls of an invocation run as tasks on this pool.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `LS__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,

    /// Interval for reporting internal runtime metrics.
    ///
    /// Defaults to `10s`.
    #[serde(with = "humantime_serde")]
    pub metrics_interval: Duration,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            metrics_interval: Duration::from_secs(10),
        }
    }
}

/// [Sentry](https://sentry.io/) error tracking configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Environment Variable
    ///
    /// `LS__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name for this deployment.
    ///
    /// # Environment Variable
    ///
    /// `LS__SENTRY__ENVIRONMENT`
    pub environment: Option<Cow<'static, str>>,

    /// Server name or identifier.
    ///
    /// # Environment Variable
    ///
    /// `LS__SENTRY__SERVER_NAME`
    pub server_name: Option<Cow<'static, str>>,

    /// Error event sampling rate.
    ///
    /// # Default
    ///
    /// `1.0` (send all errors)
    ///
    /// # Environment Variable
    ///
    /// `LS__SENTRY__SAMPLE_RATE`
    pub sample_rate: f32,

    /// Performance trace sampling rate.
    ///
    /// # Default
    ///
    /// `0.01` (send 1% of traces)
    ///
    /// # Environment Variable
    ///
    /// `LS__SENTRY__TRACES_SAMPLE_RATE`
    pub traces_sample_rate: f32,

    /// Enable Sentry SDK debug mode.
    ///
    /// # Environment Variable
    ///
    /// `LS__SENTRY__DEBUG`
    pub debug: bool,

    /// Additional tags to attach to all Sentry events.
    ///
    /// # Environment Variables
    ///
    /// Each tag is set individually:
    /// - `LS__SENTRY__TAGS__FOO=foo`
    /// - `LS__SENTRY__TAGS__BAR=bar`
    pub tags: BTreeMap<String, String>,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            server_name: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.01,
            debug: false,
            tags: BTreeMap::new(),
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted. The format can be explicitly specified or
/// auto-detected based on whether output is to a TTY.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  loadsim_service::trigger > triggered load run
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2024-05-14T09:12:44Z [loadsim_service::trigger] INFO: triggered load run
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, so that stdout stays free for metric documents.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `LS__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `LS__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Metrics configuration.
///
/// Configures submission of internal metrics to Datadog.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Metrics {
    /// Datadog [API key] for metrics.
    ///
    /// # Default
    ///
    /// `None` (Datadog metrics disabled)
    ///
    /// # Environment Variable
    ///
    /// `LS__METRICS__DATADOG_KEY`
    ///
    /// [API key]: https://docs.datadoghq.com/account_management/api-app-keys/#api-keys
    pub datadog_key: Option<SecretBox<ConfigSecret>>,

    /// Global tags applied to all metrics.
    ///
    /// # Environment Variables
    ///
    /// Each tag is set individually:
    /// - `LS__METRICS__TAGS__FOO=foo`
    /// - `LS__METRICS__TAGS__BAR=bar`
    pub tags: BTreeMap<String, String>,
}

/// Main configuration struct for the loadsim server.
///
/// See individual field documentation for details on each configuration option, including
/// defaults and environment variables.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server bind address.
    ///
    /// # Default
    ///
    /// `0.0.0.0:8890`
    ///
    /// # Environment Variable
    ///
    /// `LS__HTTP_ADDR`
    pub http_addr: SocketAddr,

    /// Base URL of the system under test.
    ///
    /// Prepended verbatim to every endpoint path, so it should not end with a slash.
    ///
    /// # Default
    ///
    /// `http://localhost:3000`
    ///
    /// # Environment Variable
    ///
    /// `LS__BASE_URL`
    pub base_url: String,

    /// The kinds of calls a run exercises, in round-robin order.
    ///
    /// # Default
    ///
    /// The four demo endpoints `followers`, `cached-followers`, `user` and `cached-user`.
    ///
    /// # Example
    ///
    /// ```yaml
    /// endpoints:
    ///   - path: /orders/{userId}
    ///     metric_name: orders
    ///     auth:
    ///       authToken: abc
    ///       location: query
    ///       key: token
    /// ```
    pub endpoints: Vec<EndpointTemplate>,

    /// Largest request count a single run may ask for.
    ///
    /// Runs above this limit are rejected before anything is planned.
    ///
    /// # Default
    ///
    /// `1000000`
    ///
    /// # Environment Variable
    ///
    /// `LS__MAX_REQUESTS`
    pub max_requests: u64,

    /// Queue between triggering and dispatching. See [`Queue`].
    pub queue: Queue,

    /// Dispatch worker settings. See [`Worker`].
    pub worker: Worker,

    /// Destination of per-endpoint measurements. See [`Sink`].
    pub sink: Sink,

    /// Configuration of the internal task runtime. See [`Runtime`].
    pub runtime: Runtime,

    /// Logging configuration. See [`Logging`].
    pub logging: Logging,

    /// Sentry error tracking configuration. See [`Sentry`].
    pub sentry: Sentry,

    /// Internal metrics configuration. See [`Metrics`].
    pub metrics: Metrics,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8890)),
            base_url: "http://localhost:3000".to_owned(),
            endpoints: default_endpoints(),
            max_requests: DEFAULT_MAX_REQUESTS,
            queue: Queue::Memory,
            worker: Worker::default(),
            sink: Sink::Emf {
                namespace: "loadsim".to_owned(),
                service: "dispatch".to_owned(),
            },
            runtime: Runtime::default(),
            logging: Logging::default(),
            sentry: Sentry::default(),
            metrics: Metrics::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the provided arguments.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if `path` is given)
    /// 3. Environment variables (prefixed with `LS__`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}
