//! Status polling for asynchronous backend operations.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{trace, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Errors raised while polling a backend status.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PollError {
    /// Raised when no terminal status was seen within the attempt budget or
    /// deadline.
    #[error("timed out after {attempts} status checks (last status: {last_status:?})")]
    Timeout {
        /// Number of completed status fetches.
        attempts: u32,
        /// Last status observed, if any.
        last_status: Option<String>,
    },
    /// Raised when the backend reports a terminal failure status.
    #[error("backend reported failure status {status}")]
    Failed {
        /// Failure status reported by the backend.
        status: String,
    },
    /// Raised when the backend reports a status outside every known set.
    #[error("backend reported unexpected status {status}")]
    Unexpected {
        /// Unrecognised status.
        status: String,
    },
    /// Raised when polling is cancelled.
    #[error("polling cancelled")]
    Cancelled,
    /// Raised when fetching the status fails.
    #[error("failed to fetch status: {message}")]
    Fetch {
        /// Error reported by the fetch function.
        message: String,
    },
}

/// Status classification used by [`StatusPoller::poll`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusSets {
    success: Vec<String>,
    failure: Vec<String>,
    ignore: Vec<String>,
    ignore_unexpected: bool,
}

impl StatusSets {
    /// Starts a classification that ends polling on any of `success`.
    #[must_use]
    pub fn success<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            success: statuses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Adds terminal failure statuses.
    #[must_use]
    pub fn failure<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure.extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Adds transitional statuses that keep polling.
    #[must_use]
    pub fn ignore<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Keeps polling on statuses that are in no set instead of failing.
    #[must_use]
    pub const fn ignore_unexpected(mut self, value: bool) -> Self {
        self.ignore_unexpected = value;
        self
    }

    fn contains(set: &[String], status: &str) -> bool {
        set.iter().any(|known| known == status)
    }
}

/// Cooperative cancellation shared between a flow and its pollers.
#[derive(Clone, Debug)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Cancellation {
    /// Creates a token that is not yet cancelled.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancels every clone of this token.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Returns `true` once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Repeatedly fetches a status until it reaches a terminal value.
#[derive(Clone, Debug)]
pub struct StatusPoller {
    interval: Duration,
    max_attempts: Option<u32>,
    timeout: Option<Duration>,
    cancellation: Option<Cancellation>,
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl StatusPoller {
    /// Creates a poller sleeping `interval` between fetches with no budget.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            timeout: None,
            cancellation: None,
        }
    }

    /// Limits the number of status fetches.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Limits the total time spent polling.
    #[must_use]
    pub const fn timeout(mut self, value: Duration) -> Self {
        self.timeout = Some(value);
        self
    }

    /// Stops polling with [`PollError::Cancelled`] when `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: Cancellation) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Uses `token` for cancellation unless the poller already has a token.
    #[must_use]
    pub fn or_cancellation(mut self, token: Option<&Cancellation>) -> Self {
        if self.cancellation.is_none() {
            self.cancellation = token.cloned();
        }
        self
    }

    /// Returns the configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Polls `fetch` until it returns a success or failure status.
    ///
    /// Returns the success status observed. Statuses in the ignore set keep
    /// polling; anything else fails unless `ignore_unexpected` is set.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Failed`] on a failure status,
    /// [`PollError::Unexpected`] on an unknown status,
    /// [`PollError::Timeout`] when the attempt budget or deadline runs out,
    /// [`PollError::Cancelled`] on cancellation and [`PollError::Fetch`] when
    /// `fetch` fails.
    pub async fn poll<F, Fut, E>(&self, mut fetch: F, statuses: &StatusSets) -> Result<String, PollError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: Display,
    {
        let deadline = self.timeout.map(|limit| Instant::now() + limit);
        let mut attempts: u32 = 0;
        let mut last_status = None;

        loop {
            if self.is_cancelled() {
                return Err(PollError::Cancelled);
            }

            let fetched = match deadline {
                Some(at) => timeout_at(at, fetch()).await.map_err(|_| PollError::Timeout {
                    attempts,
                    last_status: last_status.clone(),
                })?,
                None => fetch().await,
            };
            attempts = attempts.saturating_add(1);
            let status = fetched.map_err(|err| PollError::Fetch {
                message: err.to_string(),
            })?;
            trace!(%status, attempts, "polled status");

            if StatusSets::contains(&statuses.success, &status) {
                return Ok(status);
            }
            if StatusSets::contains(&statuses.failure, &status) {
                return Err(PollError::Failed { status });
            }
            if !StatusSets::contains(&statuses.ignore, &status) {
                if !statuses.ignore_unexpected {
                    return Err(PollError::Unexpected { status });
                }
                warn!(%status, "ignoring unexpected status");
            }
            last_status = Some(status);

            let budget_spent = self.max_attempts.is_some_and(|limit| attempts >= limit);
            let deadline_passed = deadline.is_some_and(|at| Instant::now() + self.interval > at);
            if budget_spent || deadline_passed {
                return Err(PollError::Timeout {
                    attempts,
                    last_status,
                });
            }

            self.pause().await?;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(Cancellation::is_cancelled)
    }

    async fn pause(&self) -> Result<(), PollError> {
        match &self.cancellation {
            Some(token) => {
                tokio::select! {
                    () = sleep(self.interval) => Ok(()),
                    () = token.cancelled() => Err(PollError::Cancelled),
                }
            }
            None => {
                sleep(self.interval).await;
                Ok(())
            }
        }
    }
}
