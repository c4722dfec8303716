//! Debounced field persister
//!
//! Trailing-edge debounce for rapidly edited fields: every scheduled value
//! restarts the quiet-period timer and only the latest value is handed to
//! the persist function once input pauses.
//!
//! One worker task per field owns the timer and the pending value, so the
//! persist function never runs concurrently with itself. The worker is tied
//! to the persister's lifetime: `cancel()` or dropping the persister (view
//! teardown) aborts any pending save.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use vinylia_common::Result;

enum Command<T> {
    Value(T),
    Flush,
}

/// Single-slot coalescing queue in front of a persist function
pub struct DebouncedPersister<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    worker: JoinHandle<()>,
    delay: Duration,
}

impl<T: Send + 'static> DebouncedPersister<T> {
    /// Spawn the worker on the current tokio runtime
    ///
    /// Errors returned by `persist_fn` are logged and dropped: no retry, and
    /// nothing is reported back to whoever scheduled the value.
    pub fn new<F, Fut>(delay: Duration, persist_fn: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, delay, persist_fn));
        Self { tx, worker, delay }
    }

    /// Replace the pending value and restart the timer
    pub fn schedule_persist(&self, value: T) {
        if self.tx.send(Command::Value(value)).is_err() {
            debug!("Persister cancelled, dropping scheduled value");
        }
    }

    /// Persist the pending value now instead of waiting out the delay
    pub fn flush(&self) {
        if self.tx.send(Command::Flush).is_err() {
            debug!("Persister cancelled, nothing to flush");
        }
    }

    /// Abort the pending timer; nothing is persisted afterwards
    pub fn cancel(&self) {
        self.worker.abort();
    }

    /// False once cancelled
    pub fn is_active(&self) -> bool {
        !self.worker.is_finished()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<T> Drop for DebouncedPersister<T> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker<T, F, Fut>(mut rx: mpsc::UnboundedReceiver<Command<T>>, delay: Duration, persist_fn: F)
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    while let Some(command) = rx.recv().await {
        let mut pending = match command {
            Command::Value(value) => value,
            Command::Flush => continue,
        };

        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Value(value)) => {
                        pending = value;
                        timer.as_mut().reset(Instant::now() + delay);
                    }
                    Some(Command::Flush) => break,
                    None => return,
                },
                () = &mut timer => break,
            }
        }

        if let Err(e) = persist_fn(pending).await {
            warn!("Debounced persist failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use vinylia_common::Error;

    type Calls = Arc<Mutex<Vec<String>>>;

    fn recording_persister(delay_ms: u64) -> (DebouncedPersister<String>, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let persister = DebouncedPersister::new(Duration::from_millis(delay_ms), move |value: String| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(value);
                Ok(())
            }
        });
        (persister, calls)
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_values_coalesce_to_latest() {
        let (persister, calls) = recording_persister(2000);

        persister.schedule_persist("a".to_string());
        sleep_ms(100).await;
        persister.schedule_persist("ab".to_string());
        sleep_ms(100).await;
        persister.schedule_persist("abc".to_string());

        sleep_ms(1900).await;
        assert!(calls.lock().unwrap().is_empty(), "timer restarted on each value");

        sleep_ms(200).await;
        assert_eq!(*calls.lock().unwrap(), vec!["abc".to_string()]);

        sleep_ms(5000).await;
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_pending_persist() {
        let (persister, calls) = recording_persister(2000);

        persister.schedule_persist("draft".to_string());
        sleep_ms(500).await;
        drop(persister);

        sleep_ms(5000).await;
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_worker() {
        let (persister, calls) = recording_persister(2000);

        persister.schedule_persist("draft".to_string());
        persister.cancel();
        sleep_ms(5000).await;
        persister.schedule_persist("later".to_string());
        sleep_ms(5000).await;

        assert!(!persister.is_active());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_after_cancel_is_noop() {
        let (persister, calls) = recording_persister(2000);

        persister.schedule_persist("draft".to_string());
        persister.cancel();
        sleep_ms(10).await;
        persister.flush();
        sleep_ms(5000).await;

        assert!(!persister.is_active());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_quiet_periods_persist_separately() {
        let (persister, calls) = recording_persister(2000);

        persister.schedule_persist("first".to_string());
        sleep_ms(2500).await;
        persister.schedule_persist("second".to_string());
        sleep_ms(2500).await;

        assert_eq!(*calls.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_persists_immediately() {
        let (persister, calls) = recording_persister(2000);

        persister.flush();
        persister.schedule_persist("typed".to_string());
        persister.flush();
        sleep_ms(10).await;

        assert_eq!(*calls.lock().unwrap(), vec!["typed".to_string()]);
        sleep_ms(5000).await;
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_persist_is_not_retried() {
        let attempts = Arc::new(Mutex::new(0u32));
        let counter = attempts.clone();
        let persister = DebouncedPersister::new(Duration::from_millis(2000), move |_value: String| {
            let counter = counter.clone();
            async move {
                *counter.lock().unwrap() += 1;
                Err(Error::NetworkFailure("offline".to_string()))
            }
        });

        persister.schedule_persist("text".to_string());
        sleep_ms(10_000).await;

        assert_eq!(*attempts.lock().unwrap(), 1);
        assert!(persister.is_active(), "worker survives a failed persist");
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_never_overlaps_itself() {
        let in_flight = Arc::new(Mutex::new((0u32, 0u32))); // (current, max)
        let tracker = in_flight.clone();
        let persister = DebouncedPersister::new(Duration::from_millis(100), move |_value: String| {
            let tracker = tracker.clone();
            async move {
                {
                    let mut t = tracker.lock().unwrap();
                    t.0 += 1;
                    t.1 = t.1.max(t.0);
                }
                tokio::time::sleep(Duration::from_millis(1000)).await;
                tracker.lock().unwrap().0 -= 1;
                Ok(())
            }
        });

        persister.schedule_persist("one".to_string());
        sleep_ms(150).await;
        persister.schedule_persist("two".to_string());
        sleep_ms(150).await;
        persister.schedule_persist("three".to_string());
        sleep_ms(5000).await;

        assert_eq!(in_flight.lock().unwrap().1, 1);
    }
}
