use std::{collections::VecDeque, time::Duration};

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{LogEvent, LogSink, RequestSpec, Transport, TransportError, TransportResponse};

/// Ordered waits between attempts. Its length is the maximum number of
/// retries after the first attempt; an empty schedule means a single attempt.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RetrySchedule(Vec<Duration>);

impl RetrySchedule {
    pub fn new(waits: impl IntoIterator<Item = Duration>) -> Self {
        Self(waits.into_iter().collect())
    }

    pub fn from_millis(waits: impl IntoIterator<Item = u64>) -> Self {
        Self::new(waits.into_iter().map(Duration::from_millis))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all waits, the minimum time spent by an exhausted request.
    pub fn total(&self) -> Duration {
        self.0.iter().sum()
    }

    pub fn waits(&self) -> &[Duration] {
        &self.0
    }
}

impl From<Vec<u64>> for RetrySchedule {
    fn from(waits: Vec<u64>) -> Self {
        Self::from_millis(waits)
    }
}

impl<const N: usize> From<[u64; N]> for RetrySchedule {
    fn from(waits: [u64; N]) -> Self {
        Self::from_millis(waits)
    }
}

impl From<Vec<Duration>> for RetrySchedule {
    fn from(waits: Vec<Duration>) -> Self {
        Self(waits)
    }
}

/// Terminal outcome of a retry loop that did not produce a 2xx response.
#[derive(Debug)]
pub enum AttemptFailure {
    /// The last attempt raised at the transport level.
    Transport(TransportError),
    /// The last attempt completed with a non-2xx status.
    Status(TransportResponse),
    /// A response body could not be read. Never retried.
    ReadBody(TransportError),
    /// The caller's cancellation token fired.
    Cancelled,
}

/// Decorates a [`Transport`] with a bounded, sequential retry loop.
#[derive(Clone, Debug)]
pub struct RetryingTransport<T> {
    transport: T,
    log: LogSink,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            log: LogSink::noop(),
        }
    }

    pub fn with_log(mut self, log: LogSink) -> Self {
        self.log = log;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `request` until it succeeds or `schedule` is used up.
    ///
    /// Every non-2xx response and every transport error is retried. Waits are
    /// taken from a private copy of `schedule` and always run to completion;
    /// `cancel` is checked before each attempt and raced against the attempt
    /// itself.
    pub async fn execute(
        &self,
        request: &RequestSpec,
        schedule: &RetrySchedule,
        cancel: Option<&CancellationToken>,
    ) -> Result<TransportResponse, AttemptFailure> {
        let url = request.url.as_str();
        let mut remaining: VecDeque<Duration> = schedule.0.iter().copied().collect();
        let mut attempts = 0usize;

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(self.cancelled(url, attempts, false));
            }

            attempts += 1;
            self.log.emit(LogEvent::AttemptStarted {
                url: url.to_owned(),
            });
            let started = Instant::now();

            let outcome = match cancel {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(self.cancelled(url, attempts, true)),
                        outcome = self.transport.send(request) => outcome,
                    }
                }
                None => self.transport.send(request).await,
            };

            let failure = match outcome {
                Ok(response) if response.ok() => {
                    self.log.emit(LogEvent::AttemptSucceeded {
                        url: url.to_owned(),
                        status: response.status,
                        elapsed: started.elapsed(),
                    });
                    return Ok(response);
                }
                Ok(response) => {
                    self.log.emit(LogEvent::AttemptFailed {
                        url: url.to_owned(),
                        status: Some(response.status),
                        reason: response.status_text.clone(),
                    });
                    AttemptFailure::Status(response)
                }
                Err(err) => {
                    self.log.emit(LogEvent::AttemptFailed {
                        url: url.to_owned(),
                        status: None,
                        reason: err.to_string(),
                    });
                    if err.is_body() {
                        return Err(AttemptFailure::ReadBody(err));
                    }
                    AttemptFailure::Transport(err)
                }
            };

            let remaining_count = remaining.len();
            match remaining.pop_front() {
                Some(wait) => {
                    self.log.emit(LogEvent::AttemptRetrying {
                        url: url.to_owned(),
                        remaining: remaining_count,
                        wait,
                    });
                    sleep(wait).await;
                }
                None => {
                    self.log.emit(LogEvent::AttemptsExhausted {
                        url: url.to_owned(),
                        attempts,
                    });
                    return Err(failure);
                }
            }
        }
    }

    fn cancelled(&self, url: &str, attempts: usize, in_flight: bool) -> AttemptFailure {
        if in_flight {
            self.log.emit(LogEvent::AttemptFailed {
                url: url.to_owned(),
                status: None,
                reason: "cancelled".to_owned(),
            });
        }
        self.log.emit(LogEvent::AttemptsExhausted {
            url: url.to_owned(),
            attempts,
        });
        AttemptFailure::Cancelled
    }
}
