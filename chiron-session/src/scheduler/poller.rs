//! Keyed polling tasks
//!
//! Each key owns one self-rescheduling task: sleep for the interval, run one
//! tick, and arm again only once the tick has completed. Ticks of the same key
//! therefore never overlap, however slow they are. A tick returning `false`
//! ends its chain.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::debug;

/// Arena of cancellable polling tasks indexed by key
#[derive(Default)]
pub struct PollingScheduler {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PollingScheduler {
    /// Creates an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the polling chain for `key`, cancelling any chain already armed for it
    ///
    /// # Arguments
    /// * `key` - Identity of the chain
    /// * `interval` - Delay before each tick
    /// * `tick` - Produces one poll; resolves to whether the chain continues
    pub fn schedule<F, Fut>(&self, key: &str, interval: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let task_key = key.to_string();
        let handle = tokio::spawn(async move {
            loop {
                time::sleep(interval).await;

                if !tick().await {
                    debug!("Polling chain for {} stopped", task_key);
                    break;
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        if let Some(previous) = tasks.insert(key.to_string(), handle) {
            previous.abort();
        }
        debug!("Scheduled polling for {} every {:?}", key, interval);
    }

    /// Cancels the chain for `key`
    ///
    /// Returns whether a live chain was cancelled.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.tasks.lock().unwrap().remove(key);
        match removed {
            Some(handle) => {
                let live = !handle.is_finished();
                handle.abort();
                live
            }
            None => false,
        }
    }

    /// Whether a chain for `key` is armed and has not ended
    pub fn is_scheduled(&self, key: &str) -> bool {
        self.tasks
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Keys with a live chain
    pub fn scheduled_keys(&self) -> Vec<String> {
        let tasks = self.tasks.lock().unwrap();
        let mut keys: Vec<String> = tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Cancels every chain
    pub fn cancel_all(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> = self.tasks.lock().unwrap().drain().collect();
        for (key, handle) in tasks {
            debug!("Cancelling polling for {}", key);
            handle.abort();
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_tick(
        counter: Arc<AtomicUsize>,
        stop_after: usize,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = bool> + Send>> + Send + 'static
    {
        move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move { counter.fetch_add(1, Ordering::SeqCst) + 1 < stop_after })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_ticks_until_tick_returns_false() {
        let scheduler = PollingScheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        scheduler.schedule("w1", Duration::from_secs(5), counting_tick(ticks.clone(), 3));
        assert!(scheduler.is_scheduled("w1"));

        time::sleep(Duration::from_secs(60)).await;

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!scheduler.is_scheduled("w1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous_chain() {
        let scheduler = PollingScheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler.schedule("w1", Duration::from_secs(5), counting_tick(first.clone(), 100));
        scheduler.schedule("w1", Duration::from_secs(5), counting_tick(second.clone(), 100));

        time::sleep(Duration::from_millis(12_500)).await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.scheduled_keys(), vec!["w1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ticks_do_not_overlap() {
        let scheduler = PollingScheduler::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let (current, max) = (in_flight.clone(), max_in_flight.clone());
        scheduler.schedule("w1", Duration::from_secs(1), move || {
            let (current, max) = (current.clone(), max.clone());
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                time::sleep(Duration::from_secs(3)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                true
            }
        });

        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_cancel_all() {
        let scheduler = PollingScheduler::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        scheduler.schedule("w1", Duration::from_secs(5), counting_tick(ticks.clone(), 100));
        scheduler.schedule("w2", Duration::from_secs(5), counting_tick(ticks.clone(), 100));

        assert!(scheduler.cancel("w1"));
        assert!(!scheduler.cancel("w1"));
        assert!(!scheduler.is_scheduled("w1"));
        assert!(scheduler.is_scheduled("w2"));

        scheduler.cancel_all();
        time::sleep(Duration::from_secs(20)).await;

        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        assert!(scheduler.scheduled_keys().is_empty());
    }
}
