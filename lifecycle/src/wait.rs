/*!

The polling primitive every other wait is built on.

A wait repeatedly evaluates a check until it reports [`ReadinessState::Ready`], reports
[`ReadinessState::Failed`], returns an error, or the [`WaitSpec`] timeout elapses. The first
evaluation happens immediately and the final evaluation happens exactly at the deadline, so a
check that becomes true at `e` returns before `e + poll_interval`, and a check that never becomes
true fails before `timeout + poll_interval`.

!*/

use crate::clients::{self, HttpStatusCode};
use crate::constants::{DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT};
use crate::error::{self, Result};
use log::{debug, info};
use snafu::{OptionExt, ResultExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// The outcome of evaluating a readiness predicate once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Ready,
    NotYetReady,
    /// The observed state can never become ready, stop waiting.
    Failed(String),
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    pub fn failed<S: Into<String>>(reason: S) -> Self {
        ReadinessState::Failed(reason.into())
    }
}

impl From<bool> for ReadinessState {
    fn from(ready: bool) -> Self {
        if ready {
            ReadinessState::Ready
        } else {
            ReadinessState::NotYetReady
        }
    }
}

/// How often and for how long a single wait polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSpec {
    poll_interval: Duration,
    timeout: Duration,
}

impl WaitSpec {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// A copy of this spec with a different timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// A copy of this spec with a different poll interval.
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..self
        }
    }
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT)
    }
}

/// Poll `check` until it reports ready.
///
/// - `Ok(ReadinessState::Ready)` ends the wait successfully.
/// - `Ok(ReadinessState::NotYetReady)` sleeps for the poll interval and tries again.
/// - `Ok(ReadinessState::Failed(reason))` ends the wait with [`Error::PredicateFailed`].
/// - `Err(e)` ends the wait with `e`.
///
/// If the deadline passes first the wait ends with [`Error::TimeoutExceeded`].
///
/// [`Error::PredicateFailed`]: crate::Error::PredicateFailed
/// [`Error::TimeoutExceeded`]: crate::Error::TimeoutExceeded
pub async fn wait_until<F, Fut>(description: &str, spec: &WaitSpec, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ReadinessState>>,
{
    let start = Instant::now();
    let deadline = start + spec.timeout;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        debug!(
            "Checking {} (attempt {}, {:?} elapsed)",
            description,
            attempt,
            start.elapsed()
        );
        match check().await? {
            ReadinessState::Ready => {
                info!("{} is ready after {:?}", description, start.elapsed());
                return Ok(());
            }
            ReadinessState::Failed(reason) => {
                return error::PredicateFailedSnafu {
                    description,
                    reason,
                }
                .fail();
            }
            ReadinessState::NotYetReady => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return error::TimeoutExceededSnafu {
                description,
                timeout: spec.timeout,
            }
            .fail();
        }
        tokio::time::sleep(spec.poll_interval.min(deadline - now)).await;
    }
}

/// Classify the result of a collaborator call made from inside a poll loop. Transient failures,
/// including an object that is not visible yet, become `Ok(None)` so that the wait keeps going.
/// Everything else is a real error.
pub fn observe<T>(result: clients::Result<T>, what: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_transient() => {
            debug!(
                "{} is not observable yet ({:?}): {}",
                what,
                e.status_code(),
                e
            );
            Ok(None)
        }
        Err(e) => Err(e).context(error::ClientSnafu {
            action: format!("observe {}", what),
        }),
    }
}

/// Make a single collaborator call, repeating it at the poll interval for as long as it fails
/// transiently. A non-transient error ends the retries at once.
pub(crate) async fn retry_transient<T, F, Fut>(
    description: &str,
    spec: &WaitSpec,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = clients::Result<T>>,
{
    let outcome = Mutex::new(None);
    let slot = &outcome;
    wait_until(description, spec, || {
        let attempt = call();
        async move {
            Ok(match observe(attempt.await, description)? {
                Some(value) => {
                    *slot.lock().await = Some(value);
                    ReadinessState::Ready
                }
                None => ReadinessState::NotYetReady,
            })
        }
    })
    .await?;
    outcome
        .into_inner()
        .context(error::NotFoundSnafu { what: description })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_check_does_not_sleep() {
        let start = Instant::now();
        wait_until("immediate", &WaitSpec::default(), || async {
            Ok(ReadinessState::Ready)
        })
        .await
        .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_short_circuits() {
        let start = Instant::now();
        let calls = &AtomicU32::new(0);
        let err = wait_until("doomed", &WaitSpec::default(), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                Ok(ReadinessState::failed("phase is Failed"))
            } else {
                Ok(ReadinessState::NotYetReady)
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::PredicateFailed { ref reason, .. } if reason == "phase is Failed"));
        assert_eq!(start.elapsed(), DEFAULT_POLL_INTERVAL * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn last_sleep_is_clipped_to_the_deadline() {
        let spec = WaitSpec::new(Duration::from_secs(3), Duration::from_secs(10));
        let start = Instant::now();
        let calls = &AtomicU32::new(0);
        let err = wait_until("never", &spec, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ReadinessState::NotYetReady)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::TimeoutExceeded { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        // 0s, 3s, 6s, 9s and the deadline at 10s
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    fn api_error(code: u16) -> clients::Error {
        clients::Error::kube_api_call(
            "get",
            "ConfigMap tests/a",
            kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("status {}", code),
                reason: "Test".to_string(),
                code,
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retry_repeats_a_call_that_failed_transiently() {
        let spec = WaitSpec::new(Duration::from_secs(2), Duration::from_secs(10));
        let start = Instant::now();
        let calls = &AtomicU32::new(0);
        let value = retry_transient("a flaky read", &spec, || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(api_error(503)),
                _ => Ok(7),
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_stops_at_a_permanent_error() {
        let calls = &AtomicU32::new(0);
        let err = retry_transient("a forbidden read", &WaitSpec::default(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(api_error(403))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Client { .. }), "{}", err);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bool_conversion() {
        assert_eq!(ReadinessState::from(true), ReadinessState::Ready);
        assert_eq!(ReadinessState::from(false), ReadinessState::NotYetReady);
    }
}
