use reqwest::{header::HeaderMap, StatusCode};
use serde_json::Value as JsonValue;

use crate::{RequestSpec, TransportError};

/// Response details captured when a request fails with a non-2xx status.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseContext {
    pub status: StatusCode,
    pub status_text: String,
    /// Body decoded as text.
    pub body: String,
    pub headers: HeaderMap,
}

/// Raised when a GraphQL response decodes but carries a non-empty `errors` field.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("graphql request failed")]
pub struct GraphQlError {
    /// The full decoded response body.
    pub body: JsonValue,
}

impl GraphQlError {
    pub fn errors(&self) -> Option<&JsonValue> {
        self.body.get("errors")
    }
}

/// Coarse classification of a [`ClientError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    TransportException,
    HttpError,
    Cancelled,
    ReadBody,
    Decode,
    GraphQl,
    Config,
}

impl ErrorKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::TransportException => "transport-exception",
            Self::HttpError => "http-error",
            Self::Cancelled => "cancelled",
            Self::ReadBody => "read-body",
            Self::Decode => "decode",
            Self::GraphQl => "graphql",
            Self::Config => "config",
        }
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport raised on the last attempt (DNS, connect, timeout, ...).
    #[error("failed to fetch: {}: {source}", .request.url)]
    Transport {
        request: Box<RequestSpec>,
        #[source]
        source: TransportError,
    },
    /// The last attempt completed with a non-2xx status.
    #[error("{}: {}", .response.status.as_u16(), .response.status_text)]
    Http {
        request: Box<RequestSpec>,
        response: Box<ResponseContext>,
    },
    /// The caller's cancellation token fired before the request completed.
    #[error("request cancelled: {}", .request.url)]
    Cancelled { request: Box<RequestSpec> },
    /// A response body could not be read.
    #[error("failed to read response body: {}: {source}", .request.url)]
    ReadBody {
        request: Box<RequestSpec>,
        #[source]
        source: TransportError,
    },
    /// A successful body was not valid JSON for the requested type.
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
    #[error(transparent)]
    GraphQl(#[from] GraphQlError),
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::TransportException,
            Self::Http { .. } => ErrorKind::HttpError,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::ReadBody { .. } => ErrorKind::ReadBody,
            Self::Decode(_) => ErrorKind::Decode,
            Self::GraphQl(_) => ErrorKind::GraphQl,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// The request that failed, for errors raised by the transport layer.
    pub fn request(&self) -> Option<&RequestSpec> {
        match self {
            Self::Transport { request, .. }
            | Self::Http { request, .. }
            | Self::Cancelled { request }
            | Self::ReadBody { request, .. } => Some(&**request),
            Self::Decode(_) | Self::GraphQl(_) | Self::Config(_) => None,
        }
    }

    /// Response details, present only for [`ErrorKind::HttpError`].
    pub fn response(&self) -> Option<&ResponseContext> {
        match self {
            Self::Http { response, .. } => Some(&**response),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|response| response.status)
    }
}
