//! Deferred network writes and their execution.
//!
//! A [`QueuedMutation`] is the persisted half of a deferred write: the
//! target, method, headers, and JSON body, plus its id, enqueue time,
//! and failed-attempt count. Completion notification is in-process only
//! and lives in the queue's registry, never in the persisted record.
//!
//! # Persisted layout
//!
//! ```text
//! [{ "id": "...", "url": "...", "options": { "method": "POST", "headers": {...}, "body": ... },
//!    "timestamp": "<rfc3339>", "attempts": 0 }, ...]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chatvault_types::{MutationId, Result, Timestamp, VaultError};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request descriptor
// ---------------------------------------------------------------------------

/// HTTP method of a mutation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Method {
    type Err = VaultError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(VaultError::SerializationError {
                reason: format!("unsupported method: {other}"),
            }),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Method, headers, and body of a request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub method: Method,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// A network write as submitted by a caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub url: String,
    pub options: RequestOptions,
}

impl MutationRequest {
    /// Builds a request with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: RequestOptions {
                method,
                ..RequestOptions::default()
            },
        }
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.options.body = Some(body);
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// QueuedMutation
// ---------------------------------------------------------------------------

/// A deferred network write owned by the offline queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: MutationId,
    pub url: String,
    pub options: RequestOptions,
    /// When the mutation was first enqueued.
    pub timestamp: Timestamp,
    /// Failed executions so far.
    #[serde(default)]
    pub attempts: u32,
}

impl QueuedMutation {
    /// Wraps `request` with a fresh id stamped `now`.
    pub fn new(request: MutationRequest, now: Timestamp) -> Self {
        Self {
            id: MutationId::generate(&now),
            url: request.url,
            options: request.options,
            timestamp: now,
            attempts: 0,
        }
    }
}

/// Final result delivered to an in-process completion handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The remote service accepted the write.
    Completed {
        status: u16,
    },
    /// The mutation failed `attempts` times and was dead-lettered.
    Abandoned {
        attempts: u32,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Performs the network call a [`QueuedMutation`] describes.
///
/// Resolves to the accepted status code, or to an error for transport
/// failures and unacceptable statuses alike.
pub trait MutationExecutor: Send + Sync + 'static {
    fn execute(&self, mutation: &QueuedMutation) -> impl Future<Output = Result<u16>> + Send;
}

/// Statuses the remote service uses to accept a write.
pub fn is_acceptable_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// [`MutationExecutor`] issuing real HTTP requests.
#[derive(Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    /// Creates an executor whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::NetworkError {
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl MutationExecutor for HttpExecutor {
    async fn execute(&self, mutation: &QueuedMutation) -> Result<u16> {
        let mut request = self
            .client
            .request(mutation.options.method.into(), &mutation.url);
        for (name, value) in &mutation.options.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &mutation.options.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| VaultError::NetworkError {
            reason: format!("{} {} failed: {e}", mutation.options.method, mutation.url),
        })?;

        let status = response.status().as_u16();
        if is_acceptable_status(status) {
            Ok(status)
        } else {
            Err(VaultError::NetworkError {
                reason: format!(
                    "{} {} returned status {status}",
                    mutation.options.method, mutation.url
                ),
            })
        }
    }
}
