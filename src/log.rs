use std::{fmt, sync::Arc, time::Duration};

use reqwest::StatusCode;

/// Progress of a single logical request through the retry loop.
///
/// Per attempt, events arrive as started, then succeeded or failed, then
/// retrying or exhausted after a failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEvent {
    AttemptStarted {
        url: String,
    },
    AttemptSucceeded {
        url: String,
        status: StatusCode,
        elapsed: Duration,
    },
    AttemptFailed {
        url: String,
        /// `None` when the transport raised instead of responding.
        status: Option<StatusCode>,
        reason: String,
    },
    AttemptRetrying {
        url: String,
        remaining: usize,
        wait: Duration,
    },
    AttemptsExhausted {
        url: String,
        attempts: usize,
    },
}

impl LogEvent {
    /// Stable kebab-case tag of the event.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::AttemptStarted { .. } => "attempt-started",
            Self::AttemptSucceeded { .. } => "attempt-succeeded",
            Self::AttemptFailed { .. } => "attempt-failed",
            Self::AttemptRetrying { .. } => "attempt-retrying",
            Self::AttemptsExhausted { .. } => "attempts-exhausted",
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::AttemptStarted { url }
            | Self::AttemptSucceeded { url, .. }
            | Self::AttemptFailed { url, .. }
            | Self::AttemptRetrying { url, .. }
            | Self::AttemptsExhausted { url, .. } => url,
        }
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptStarted { url } => write!(f, "Fetching: {url}"),
            Self::AttemptSucceeded {
                url,
                status,
                elapsed,
            } => write!(
                f,
                "Fetched: {url}, Response: {}, Duration: {}ms",
                status.as_u16(),
                elapsed.as_millis()
            ),
            Self::AttemptFailed {
                url,
                status: Some(status),
                reason,
            } => write!(f, "Failed: {url}, Response: {}, {reason}", status.as_u16()),
            Self::AttemptFailed {
                url,
                status: None,
                reason,
            } => write!(f, "Failed: {url}, {reason}"),
            Self::AttemptRetrying {
                url,
                remaining,
                wait,
            } => write!(
                f,
                "Retry: {url}, {remaining} attempts remaining, waiting {}ms",
                wait.as_millis()
            ),
            Self::AttemptsExhausted { url, attempts } => {
                write!(f, "Giving up: {url} after {attempts} attempts")
            }
        }
    }
}

/// Receiver of [`LogEvent`]s. Purely observational.
#[derive(Clone)]
pub struct LogSink(Arc<dyn Fn(&LogEvent) + Send + Sync>);

impl LogSink {
    pub fn new(f: impl Fn(&LogEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub(crate) fn emit(&self, event: LogEvent) {
        #[cfg(feature = "tracing")]
        match &event {
            LogEvent::AttemptFailed { .. } | LogEvent::AttemptsExhausted { .. } => {
                tracing::warn!(tag = event.tag(), url = event.url(), "{}", event)
            }
            _ => tracing::debug!(tag = event.tag(), url = event.url(), "{}", event),
        }

        (self.0)(&event);
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogSink")
    }
}
