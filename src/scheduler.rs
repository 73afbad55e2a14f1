use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Owns at most one recurring job.
pub struct Scheduler {
    job: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { job: Mutex::new(None) }
    }

    /// Runs `job` every `period`, first one period from now. A run never
    /// overlaps the previous one. Replaces any job already scheduled.
    pub async fn start<F, Fut>(&self, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                job().await;
            }
        });

        if let Some(previous) = self.job.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Cancels the job. Returns whether one was scheduled.
    pub async fn stop(&self) -> bool {
        match self.job.lock().await.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.job
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.job.get_mut().take() {
            handle.abort();
        }
    }
}
