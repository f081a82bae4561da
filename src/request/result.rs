//! Delivery Types
//!
//! What the transport hands the coordinator, and what the coordinator hands
//! back to callers.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use serde::Serialize;

use crate::error::CacheError;

// == Result Code ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResultCode {
    Success,
    ServerError,
    NetworkError,
    Timeout,
    NotAuthorized,
}

// == Result Info ==
/// Metadata accompanying every delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultInfo {
    pub code: ResultCode,
    pub http_status: Option<u16>,
    /// Server time of the delivered data (Unix ms)
    pub data_timestamp: Option<u64>,
    /// The data is stale and a refresh was issued; another delivery follows
    pub data_is_refreshing: bool,
    /// This delivery completes a refresh of earlier stale data
    pub is_refresh: bool,
    /// Raw error payload, when the server sent one
    pub error_body: Option<String>,
}

impl ResultInfo {
    pub fn success(data_timestamp: u64) -> Self {
        Self {
            code: ResultCode::Success,
            http_status: None,
            data_timestamp: Some(data_timestamp),
            data_is_refreshing: false,
            is_refresh: false,
            error_body: None,
        }
    }

    pub fn failure(code: ResultCode, http_status: Option<u16>) -> Self {
        Self {
            code,
            http_status,
            data_timestamp: None,
            data_is_refreshing: false,
            is_refresh: false,
            error_body: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }
}

// == Query Callback ==
/// Receives the outcome of a submitted request.
///
/// The coordinator holds callbacks weakly: dropping the last `Arc` silently
/// cancels every pending delivery.
pub trait QueryCallback<T, E>: Send + Sync {
    fn on_query_finished(
        &self,
        query_id: u64,
        info: &ResultInfo,
        data: Option<Arc<T>>,
        error: Option<E>,
    );
}

// == Network Response ==
#[derive(Debug, Clone, Default)]
pub struct NetworkResponse {
    pub status: u16,
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl NetworkResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server time from the `Date` header, or `received_at` without a usable one.
    pub fn server_timestamp(&self, received_at: u64) -> u64 {
        self.headers
            .get("date")
            .and_then(|date| DateTime::parse_from_rfc2822(date).ok())
            .and_then(|date| u64::try_from(date.timestamp_millis()).ok())
            .unwrap_or(received_at)
    }
}

// == Network Failure ==
/// Failure classification reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NetworkUnreachable,
    ServerError,
    Timeout,
    NotAuthorized,
    Unclassified,
}

#[derive(Debug, Clone)]
pub struct NetworkFailure {
    pub kind: FailureKind,
    pub http_status: Option<u16>,
    pub body: Option<Vec<u8>>,
}

impl NetworkFailure {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            http_status: None,
            body: None,
        }
    }

    /// A non-success HTTP answer.
    pub fn http(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: FailureKind::Unclassified,
            http_status: Some(status),
            body: Some(body.into()),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Unclassified failures are judged by their HTTP status.
    pub fn classify(&self) -> ResultCode {
        match self.kind {
            FailureKind::NetworkUnreachable => ResultCode::NetworkError,
            FailureKind::ServerError => ResultCode::ServerError,
            FailureKind::Timeout => ResultCode::Timeout,
            FailureKind::NotAuthorized => ResultCode::NotAuthorized,
            FailureKind::Unclassified => match self.http_status {
                Some(401 | 403) => ResultCode::NotAuthorized,
                _ => ResultCode::ServerError,
            },
        }
    }

    /// Whether the error parser should see the body.
    pub fn has_error_payload(&self) -> bool {
        self.classify() == ResultCode::ServerError
            && self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    pub fn to_error(&self) -> CacheError {
        match self.classify() {
            ResultCode::NetworkError => CacheError::TransientNetwork("network unreachable".into()),
            ResultCode::Timeout => CacheError::TransientNetwork("timed out".into()),
            ResultCode::NotAuthorized => CacheError::AuthFailure,
            _ => match self.http_status {
                Some(status @ 400..=499) => CacheError::ServerRejected { status },
                status => CacheError::ServerError { status },
            },
        }
    }
}
