//! `api-client-base` is a reusable async HTTP request core.
//!
//! It wraps a single-attempt [`Transport`] with a retry schedule, classifies
//! failures into [`ClientError`] and offers thin helpers on top of one
//! low-level fetch:
//! - [`ApiClient::fetch`]
//! - [`ApiClient::fetch_json`]
//! - [`ApiClient::fetch_text`]
//! - [`ApiClient::graphql`]

mod client;
mod error;
mod log;
mod options;
mod request;
mod retry;
mod transport;

pub use client::{ApiClient, PreFetch};
pub use error::{ClientError, ErrorKind, GraphQlError, ResponseContext};
pub use log::{LogEvent, LogSink};
pub use options::ClientOptions;
pub use request::{FetchOptions, RequestOptions, RequestSpec};
pub use retry::{AttemptFailure, RetrySchedule, RetryingTransport};
pub use transport::{
    ReqwestTransport, Transport, TransportError, TransportErrorKind, TransportResponse,
};

pub use reqwest::{header, Method, StatusCode};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, ClientError>;
