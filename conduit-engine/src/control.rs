//! Out-of-band control of a running task
//!
//! Cancellation, approval decisions and breakpoint releases arrive from the
//! submission surface while the scheduler is suspended. Each of them bumps a
//! watch channel so suspended waiters re-check their condition.

use conduit_core::dto::task::BreakpointPosition;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a suspended wait ended
#[derive(Debug, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Done(T),
    Cancelled,
    TimedOut,
}

pub struct TaskControl {
    cancel: CancellationToken,
    signal: watch::Sender<u64>,
    released: Mutex<HashSet<(String, BreakpointPosition)>>,
    release_all: AtomicBool,
}

impl TaskControl {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(0);
        Self {
            cancel: CancellationToken::new(),
            signal,
            released: Mutex::new(HashSet::new()),
            release_all: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.notify();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wakes every waiter so it re-checks its condition
    pub fn notify(&self) {
        self.signal.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub fn release_breakpoint(&self, job_key: &str, position: BreakpointPosition) {
        self.released
            .lock()
            .insert((job_key.to_string(), position));
        self.notify();
    }

    /// Releases every current and future breakpoint
    pub fn release_all(&self) {
        self.release_all.store(true, Ordering::SeqCst);
        self.notify();
    }

    /// Consumes a pending release for the breakpoint
    pub fn take_release(&self, job_key: &str, position: BreakpointPosition) -> bool {
        if self.release_all.load(Ordering::SeqCst) {
            return true;
        }
        self.released
            .lock()
            .remove(&(job_key.to_string(), position))
    }

    /// Suspends until `check` yields a value, the task is cancelled, or the
    /// deadline passes
    ///
    /// `check` runs once up front and again after every notification.
    pub async fn wait_until<T>(
        &self,
        deadline: Option<Instant>,
        mut check: impl FnMut() -> Option<T>,
    ) -> WaitOutcome<T> {
        let mut rx = self.signal.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            if let Some(value) = check() {
                return WaitOutcome::Done(value);
            }

            let sleep = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => return WaitOutcome::Cancelled,
                _ = sleep => return WaitOutcome::TimedOut,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return WaitOutcome::Cancelled;
                    }
                }
            }
        }
    }
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_on_notify() {
        let control = Arc::new(TaskControl::new());
        let flag = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let control = control.clone();
            let flag = flag.clone();
            tokio::spawn(async move {
                control
                    .wait_until(None, || (flag.load(Ordering::SeqCst) == 1).then_some("ok"))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        flag.store(1, Ordering::SeqCst);
        control.notify();

        assert_eq!(waiter.await.unwrap(), WaitOutcome::Done("ok"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let control = TaskControl::new();
        let deadline = Instant::now() + Duration::from_secs(60);
        let outcome = control.wait_until::<()>(Some(deadline), || None).await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_observes_cancel() {
        let control = Arc::new(TaskControl::new());
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_until::<()>(None, || None).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        control.cancel();
        assert_eq!(waiter.await.unwrap(), WaitOutcome::Cancelled);
    }

    #[test]
    fn test_breakpoint_release_is_consumed() {
        let control = TaskControl::new();
        control.release_breakpoint("deploy.a", BreakpointPosition::Before);

        assert!(!control.take_release("deploy.a", BreakpointPosition::After));
        assert!(control.take_release("deploy.a", BreakpointPosition::Before));
        assert!(!control.take_release("deploy.a", BreakpointPosition::Before));

        control.release_all();
        assert!(control.take_release("anything", BreakpointPosition::After));
    }
}
