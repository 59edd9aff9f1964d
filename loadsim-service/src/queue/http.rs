//! Client for a queue service with a JSON-over-HTTP API.
//!
//! The service exposes three endpoints below its base URL:
//!
//! - `POST messages/batch` with `{"entries": [{"id", "body"}]}`, answering
//!   `{"failed": [{"id", "message"}]}`
//! - `POST messages/receive` with `{"maxMessages", "waitSeconds"}`, answering
//!   `{"messages": [{"messageId", "receiptHandle", "body"}]}`
//! - `POST messages/ack` with `{"receiptHandles": [...]}`, answering any success status
//!
//! Every request is bounded by the client's request timeout. Receives wait for the long-poll
//! duration on top of it.

use std::time::Duration;

use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Queue, QueueEntry, QueueMessage, ReceiptHandle, SendBatchResponse};
use crate::error::{QueueError, QueueResult, RejectedEntry};

/// User agent string used for requests to the queue service.
const USER_AGENT: &str = concat!("loadsim/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct SendBatchBody<'a> {
    entries: Vec<EntryBody<'a>>,
}

#[derive(Debug, Serialize)]
struct EntryBody<'a> {
    id: &'a str,
    body: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct SendBatchResult {
    #[serde(default)]
    failed: Vec<FailedEntry>,
}

#[derive(Debug, Deserialize)]
struct FailedEntry {
    id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveBody {
    max_messages: usize,
    wait_seconds: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ReceiveResult {
    #[serde(default)]
    messages: Vec<MessageBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageBody {
    message_id: String,
    receipt_handle: String,
    body: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AckBody<'a> {
    receipt_handles: Vec<&'a str>,
}

/// A [`Queue`] backed by a remote queue service.
#[derive(Debug)]
pub struct HttpQueue {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpQueue {
    /// Default timeout of a single request to the queue service.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new queue client for the service at `base_url`.
    ///
    /// A request that does not complete within `timeout` fails with [`QueueError::Reqwest`].
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> QueueResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|cause| QueueError::Reqwest {
                context: "failed to build queue client".into(),
                cause,
            })?;

        Ok(Self::with_client(client, base_url, timeout))
    }

    /// Creates a new queue client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            client,
            base_url,
            timeout,
        }
    }

    /// Sends a request and checks its status, leaving the body unread.
    async fn send<B>(&self, action: &str, body: &B, timeout: Duration) -> QueueResult<Response>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}/messages/{action}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|cause| QueueError::Reqwest {
                context: format!("failed to send {action} request"),
                cause,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    /// Sends a request and parses its JSON response.
    async fn post<B, T>(&self, action: &str, body: &B, timeout: Duration) -> QueueResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(action, body, timeout).await?;
        response.json().await.map_err(|cause| QueueError::Reqwest {
            context: format!("failed to parse {action} response"),
            cause,
        })
    }
}

#[async_trait::async_trait]
impl Queue for HttpQueue {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send_batch(&self, entries: Vec<QueueEntry>) -> QueueResult<SendBatchResponse> {
        let body = SendBatchBody {
            entries: entries
                .iter()
                .map(|entry| EntryBody {
                    id: &entry.id,
                    body: &entry.body,
                })
                .collect(),
        };

        let result: SendBatchResult = self.post("batch", &body, self.timeout).await?;
        let rejected = result
            .failed
            .into_iter()
            .map(|entry| RejectedEntry {
                id: entry.id,
                message: entry.message,
            })
            .collect();

        Ok(SendBatchResponse { rejected })
    }

    async fn receive(&self, max: usize, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
        let body = ReceiveBody {
            max_messages: max,
            wait_seconds: wait.as_secs(),
        };

        let result: ReceiveResult = self
            .post("receive", &body, wait + self.timeout)
            .await?;

        Ok(result
            .messages
            .into_iter()
            .map(|message| QueueMessage {
                message_id: message.message_id,
                receipt: ReceiptHandle(message.receipt_handle),
                body: message.body,
            })
            .collect())
    }

    async fn acknowledge(&self, receipts: Vec<ReceiptHandle>) -> QueueResult<()> {
        if receipts.is_empty() {
            return Ok(());
        }

        let body = AckBody {
            receipt_handles: receipts.iter().map(|r| r.0.as_str()).collect(),
        };
        self.send("ack", &body, self.timeout).await?;
        Ok(())
    }
}
