//! Waiting on the outcome of a dispatched call.
//!
//! The worker writes an [`OutcomeRecord`] to the result key once the call
//! has run. A [`ResultHandle`] polls that key until the record appears or
//! the attempt budget is spent. Only not-found is retried; every other
//! store failure is returned straight away.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parcel_proto::OutcomeRecord;
use parcel_state::BlobStore;
use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

use crate::error::ResultError;

const DEFAULT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// How long to keep polling for a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Pause after each attempt that finds nothing.
    pub delay: Duration,
    pub max_attempts: u32,
}

impl WaitPolicy {
    #[must_use]
    pub const fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }

    /// Total time the policy allows for.
    #[must_use]
    pub fn budget(&self) -> Duration {
        self.delay.saturating_mul(self.max_attempts)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS)
    }
}

/// Pause between polling attempts.
#[async_trait]
pub trait Suspend: Send + Sync {
    async fn suspend(&self, delay: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleep;

#[async_trait]
impl Suspend for ThreadSleep {
    async fn suspend(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Yields to the Tokio scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerSleep;

#[async_trait]
impl Suspend for SchedulerSleep {
    async fn suspend(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Pending outcome of one remote call.
///
/// Resolves at most once. After the record has been read, further calls
/// return the memoized value without touching the blob store.
pub struct ResultHandle {
    store: Arc<dyn BlobStore>,
    bucket: String,
    key: String,
    outcome: Option<OutcomeRecord>,
}

impl ResultHandle {
    /// Handle for a result at a known key.
    pub fn new(
        store: Arc<dyn BlobStore>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            key: key.into(),
            outcome: None,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// The outcome record, if it has been read.
    pub fn outcome(&self) -> Option<&OutcomeRecord> {
        self.outcome.as_ref()
    }

    /// Wait for the outcome without blocking the executor.
    pub async fn wait(&mut self, policy: WaitPolicy) -> Result<&OutcomeRecord, ResultError> {
        self.poll(&SchedulerSleep, policy).await
    }

    /// Wait for the outcome on the current thread.
    ///
    /// Outside a runtime a private current-thread runtime drives the polls.
    /// On a multi-thread runtime, worker and `spawn_blocking` threads alike,
    /// the wait runs in `block_in_place` on the ambient runtime. A
    /// current-thread runtime has no spare thread to block, so the call is
    /// refused with [`ResultError::BlockingInRuntime`].
    pub fn wait_blocking(&mut self, policy: WaitPolicy) -> Result<&OutcomeRecord, ResultError> {
        if self.outcome.is_some() {
            return self.resolved();
        }

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
                return Err(ResultError::BlockingInRuntime);
            }
            Ok(handle) => {
                tokio::task::block_in_place(|| {
                    handle.block_on(self.poll(&ThreadSleep, policy)).map(|_| ())
                })?;
            }
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(ResultError::Runtime)?;
                runtime.block_on(self.poll(&ThreadSleep, policy))?;
            }
        }
        self.resolved()
    }

    /// Wait, then return the remote function's return value.
    ///
    /// A captured remote failure comes back as [`ResultError::Remote`].
    pub async fn result(&mut self, policy: WaitPolicy) -> Result<Value, ResultError> {
        into_value(self.wait(policy).await?)
    }

    pub fn result_blocking(&mut self, policy: WaitPolicy) -> Result<Value, ResultError> {
        into_value(self.wait_blocking(policy)?)
    }

    async fn poll<S: Suspend>(
        &mut self,
        suspend: &S,
        policy: WaitPolicy,
    ) -> Result<&OutcomeRecord, ResultError> {
        if self.outcome.is_some() {
            return self.resolved();
        }

        let started = Instant::now();
        for attempt in 1..=policy.max_attempts {
            match self.store.get(&self.bucket, &self.key).await {
                Ok(raw) => {
                    debug!(
                        key = %self.key,
                        attempts = attempt,
                        elapsed_ms = started.elapsed().as_millis(),
                        "found result"
                    );
                    self.outcome = Some(OutcomeRecord::from_slice(&raw)?);
                    return self.resolved();
                }
                Err(e) if e.is_not_found() => {
                    debug!(key = %self.key, attempt, "result not ready");
                    suspend.suspend(policy.delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ResultError::Timeout {
            key: self.key.clone(),
            budget: policy.budget(),
        })
    }

    fn resolved(&self) -> Result<&OutcomeRecord, ResultError> {
        self.outcome.as_ref().ok_or_else(|| ResultError::Timeout {
            key: self.key.clone(),
            budget: Duration::ZERO,
        })
    }
}

impl std::fmt::Debug for ResultHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

fn into_value(record: &OutcomeRecord) -> Result<Value, ResultError> {
    match record {
        OutcomeRecord::Result { result } => Ok(result.clone()),
        OutcomeRecord::Exception {
            exception,
            traceback,
        } => Err(ResultError::Remote {
            exception: exception.clone(),
            traceback: traceback.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_state::MemoryBlobStore;
    use serde_json::json;

    const BUCKET: &str = "bucket";
    const KEY: &str = "results/f/2020/01/01/000000/k.json";

    fn handle(store: &MemoryBlobStore) -> ResultHandle {
        ResultHandle::new(Arc::new(store.clone()), BUCKET, KEY)
    }

    fn fast() -> WaitPolicy {
        WaitPolicy::new(Duration::from_millis(10), 5)
    }

    #[tokio::test]
    async fn returns_the_recorded_value() {
        let store = MemoryBlobStore::new();
        store.put(BUCKET, KEY, br#"{"result": [1, 2]}"#).await.unwrap();

        let mut handle = handle(&store);
        assert!(!handle.is_resolved());
        assert_eq!(handle.result(fast()).await.unwrap(), json!([1, 2]));
        assert!(handle.is_resolved());
    }

    #[tokio::test]
    async fn remote_failure_carries_the_exception() {
        let store = MemoryBlobStore::new();
        store
            .put(
                BUCKET,
                KEY,
                br#"{"exception": "ValueError(\"x\")", "traceback": "tb"}"#,
            )
            .await
            .unwrap();

        let err = handle(&store).result(fast()).await.unwrap_err();
        assert_eq!(err.to_string(), r#"ValueError("x")"#);
        assert!(matches!(err, ResultError::Remote { ref traceback, .. } if traceback == "tb"));
    }

    #[tokio::test]
    async fn times_out_after_the_budget() {
        let store = MemoryBlobStore::new();
        let mut handle = handle(&store);

        let started = Instant::now();
        let err = handle
            .result(WaitPolicy::new(Duration::from_millis(10), 1))
            .await
            .unwrap_err();

        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(started.elapsed() < Duration::from_secs(1));
        match err {
            ResultError::Timeout { key, budget } => {
                assert_eq!(key, KEY);
                assert_eq!(budget, Duration::from_millis(10));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.get_count(), 1);
    }

    #[tokio::test]
    async fn picks_up_a_late_result() {
        let store = MemoryBlobStore::new();
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            writer.put(BUCKET, KEY, br#"{"result": "late"}"#).await.unwrap();
        });

        let mut handle = handle(&store);
        let value = handle
            .result(WaitPolicy::new(Duration::from_millis(10), 50))
            .await
            .unwrap();
        assert_eq!(value, json!("late"));
        assert!(store.get_count() >= 2);
    }

    #[tokio::test]
    async fn resolved_handle_makes_no_further_requests() {
        let store = MemoryBlobStore::new();
        store.put(BUCKET, KEY, br#"{"result": "pong"}"#).await.unwrap();

        let mut handle = handle(&store);
        handle.result(fast()).await.unwrap();
        let after_first = store.get_count();

        let value = handle
            .result(WaitPolicy::new(Duration::from_millis(10), 0))
            .await
            .unwrap();
        assert_eq!(value, json!("pong"));
        assert_eq!(store.get_count(), after_first);
    }

    #[tokio::test]
    async fn zero_attempts_on_unresolved_handle_times_out() {
        let store = MemoryBlobStore::new();
        let err = handle(&store)
            .wait(WaitPolicy::new(Duration::from_secs(1), 0))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(store.get_count(), 0);
    }

    #[tokio::test]
    async fn blocking_wait_refuses_a_current_thread_runtime() {
        let store = MemoryBlobStore::new();
        let err = handle(&store).wait_blocking(fast()).unwrap_err();
        assert!(matches!(err, ResultError::BlockingInRuntime));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_wait_runs_on_the_blocking_pool() {
        let store = MemoryBlobStore::new();
        store.put(BUCKET, KEY, br#"{"result": "pooled"}"#).await.unwrap();

        let mut handle = handle(&store);
        let value = tokio::task::spawn_blocking(move || handle.result_blocking(fast()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!("pooled"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_wait_on_a_worker_sees_a_late_result() {
        let store = MemoryBlobStore::new();
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(25)).await;
            writer.put(BUCKET, KEY, br#"{"result": "late"}"#).await.unwrap();
        });

        let mut handle = handle(&store);
        let value = handle
            .result_blocking(WaitPolicy::new(Duration::from_millis(10), 50))
            .unwrap();
        assert_eq!(value, json!("late"));
    }

    #[test]
    fn blocking_wait_polls_with_thread_sleep() {
        let store = MemoryBlobStore::new();
        let mut handle = handle(&store);

        let started = Instant::now();
        let err = handle
            .result_blocking(WaitPolicy::new(Duration::from_millis(10), 2))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(store.get_count(), 2);
    }

    #[test]
    fn blocking_result_is_memoized() {
        let store = MemoryBlobStore::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime
            .block_on(store.put(BUCKET, KEY, br#"{"result": 3}"#))
            .unwrap();
        drop(runtime);

        let mut handle = handle(&store);
        assert_eq!(handle.result_blocking(fast()).unwrap(), json!(3));
        assert_eq!(handle.result_blocking(fast()).unwrap(), json!(3));
        assert_eq!(store.get_count(), 1);
    }

    #[test]
    fn default_policy_budget() {
        assert_eq!(WaitPolicy::default().budget(), Duration::from_secs(100));
    }
}
