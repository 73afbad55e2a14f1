use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::engine::StatusResolver;
use crate::models::{EntryState, MonitorEntry, ServerTarget};
use crate::notify::Notifier;
use crate::scheduler::Scheduler;

struct MonitorCore {
    resolver: Arc<StatusResolver>,
    entries: Mutex<Vec<MonitorEntry>>,
    notifier: RwLock<Option<Arc<dyn Notifier>>>,
}

/// Watches the configured targets and reports every Up/Down transition once.
pub struct PeriodicMonitor {
    core: Arc<MonitorCore>,
    scheduler: Scheduler,
}

impl PeriodicMonitor {
    pub fn new(resolver: Arc<StatusResolver>, targets: Vec<ServerTarget>) -> Self {
        let entries = scannable(targets).into_iter().map(MonitorEntry::new).collect();
        Self {
            core: Arc::new(MonitorCore {
                resolver,
                entries: Mutex::new(entries),
                notifier: RwLock::new(None),
            }),
            scheduler: Scheduler::new(),
        }
    }

    /// Binds the channel transition messages go out on.
    pub async fn bind(&self, notifier: Arc<dyn Notifier>) {
        *self.core.notifier.write().await = Some(notifier);
    }

    pub async fn unbind(&self) {
        *self.core.notifier.write().await = None;
    }

    pub async fn is_bound(&self) -> bool {
        self.core.notifier.read().await.is_some()
    }

    /// Schedules a pass every `interval_seconds`. Returns false when there is
    /// nothing to watch or the interval is zero. Restarts a running monitor.
    pub async fn start(&self, interval_seconds: u64) -> bool {
        let count = self.core.entries.lock().await.len();
        if count == 0 {
            warn!("No servers configured for scanning, monitor not started");
            return false;
        }
        if interval_seconds == 0 {
            warn!("Monitor interval must be at least one second");
            return false;
        }

        let core = Arc::clone(&self.core);
        self.scheduler
            .start(Duration::from_secs(interval_seconds), move || {
                let core = Arc::clone(&core);
                async move { core.run_tick().await }
            })
            .await;
        info!("Monitoring {} servers every {}s", count, interval_seconds);
        true
    }

    /// Cancels the recurring pass; `release_binding` also drops the notifier.
    pub async fn stop(&self, release_binding: bool) -> bool {
        if self.scheduler.stop().await {
            info!("Monitor stopped");
        }
        if release_binding {
            self.unbind().await;
        }
        true
    }

    pub async fn is_running(&self) -> bool {
        self.scheduler.is_running().await
    }

    /// Swaps in a new target list. Targets that were already watched keep
    /// their state; new ones start out unknown.
    pub async fn replace_targets(&self, targets: Vec<ServerTarget>) {
        let mut entries = self.core.entries.lock().await;
        let previous = std::mem::take(&mut *entries);
        *entries = scannable(targets)
            .into_iter()
            .map(|target| {
                previous
                    .iter()
                    .find(|entry| entry.target.same_server(&target))
                    .map(|entry| MonitorEntry {
                        target: target.clone(),
                        ..entry.clone()
                    })
                    .unwrap_or_else(|| MonitorEntry::new(target))
            })
            .collect();
        info!("Monitor targets replaced: {} servers", entries.len());
    }

    pub async fn snapshot(&self) -> Vec<MonitorEntry> {
        self.core.entries.lock().await.clone()
    }

    /// One sequential pass over every target.
    pub async fn run_tick(&self) {
        self.core.run_tick().await;
    }
}

impl MonitorCore {
    async fn run_tick(&self) {
        let start_time = Utc::now();
        // Held for the whole pass so reconfiguration waits for it to finish.
        let mut entries = self.entries.lock().await;
        let notifier = self.notifier.read().await.clone();

        for entry in entries.iter_mut() {
            let target = entry.target.clone();
            let result = self
                .resolver
                .resolve_for_group(&target.address, Some(target.group_id))
                .await;
            entry.last_checked = Some(Utc::now());

            let message = match result {
                Ok(outcome) => {
                    entry.last_message = Some(format!(
                        "{} {} ({}/{} players) {}",
                        outcome.protocol_variant,
                        outcome.version,
                        outcome.online_players,
                        outcome.max_players,
                        outcome.motd_text()
                    ).trim_end().to_string());
                    let was_down = entry.is_down();
                    entry.state = EntryState::Up;
                    if !was_down {
                        continue;
                    }
                    warn!("[CHANGE] {} (group {}) -> Up", target.address, target.group_id);
                    restored_message(&target)
                }
                Err(e) => {
                    let reason = e.to_string();
                    entry.last_message = Some(reason.clone());
                    if entry.is_down() {
                        continue;
                    }
                    entry.state = EntryState::Down;
                    error!("[CHANGE] {} (group {}) -> Down: {}", target.address, target.group_id, reason);
                    lost_message(&target, &reason)
                }
            };

            // Delivery runs on its own task; the pass never waits on it.
            if let Some(notifier) = &notifier {
                let notifier = Arc::clone(notifier);
                let group_id = target.group_id;
                tokio::spawn(async move {
                    if let Err(e) = notifier.notify(group_id, &message).await {
                        warn!("Failed to notify group {}: {:#}", group_id, e);
                    }
                });
            }
        }

        let duration = Utc::now() - start_time;
        info!(
            "Monitor pass completed {} checks in {:.2}s.",
            entries.len(),
            duration.num_milliseconds() as f64 / 1000.0
        );
    }
}

fn scannable(targets: Vec<ServerTarget>) -> Vec<ServerTarget> {
    targets
        .into_iter()
        .filter(|target| target.need_scan && !target.address.trim().is_empty())
        .collect()
}

pub fn lost_message(target: &ServerTarget, reason: &str) -> String {
    format!("⚠️ Server {} connection lost: {}", target.address, reason)
}

pub fn restored_message(target: &ServerTarget) -> String {
    format!("✅ Server {} connection restored", target.address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{java_status, resolver_with, Answer, ScriptedProbe};
    use crate::engine::Defaults;
    use crate::models::ProtocolVariant;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, String)>>,
    }

    impl RecordingNotifier {
        async fn sent(&self) -> Vec<(i64, String)> {
            self.sent.lock().await.clone()
        }

        /// Waits for `count` deliveries, which happen on spawned tasks.
        async fn wait_for(&self, count: usize) -> Vec<(i64, String)> {
            for _ in 0..100 {
                let sent = self.sent().await;
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            self.sent().await
        }

        /// Lets any spawned delivery finish before the caller looks.
        async fn settled(&self) -> Vec<(i64, String)> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.sent().await
        }
    }

    /// Accepts messages and never finishes delivering them.
    struct StuckNotifier;

    #[async_trait]
    impl Notifier for StuckNotifier {
        async fn notify(&self, _group_id: i64, _message: &str) -> anyhow::Result<()> {
            futures::future::pending().await
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, group_id: i64, message: &str) -> anyhow::Result<()> {
            self.sent.lock().await.push((group_id, message.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        java: Arc<ScriptedProbe>,
        monitor: PeriodicMonitor,
        notifier: Arc<RecordingNotifier>,
    }

    async fn fixture(targets: Vec<ServerTarget>, java_answer: Answer) -> Fixture {
        let java = ScriptedProbe::new(ProtocolVariant::Java, 5, java_answer);
        let bedrock = ScriptedProbe::new(ProtocolVariant::Bedrock, 0, Answer::Refused);
        let resolver = Arc::new(resolver_with(Arc::clone(&java), bedrock, Defaults::default()));
        let monitor = PeriodicMonitor::new(resolver, targets);
        let notifier = Arc::new(RecordingNotifier::default());
        monitor.bind(notifier.clone()).await;
        Fixture { java, monitor, notifier }
    }

    #[tokio::test]
    async fn test_start_requires_targets() {
        let empty = fixture(vec![], Answer::Refused).await;
        assert!(!empty.monitor.start(60).await);
        assert!(!empty.monitor.is_running().await);

        let unscanned = ServerTarget {
            need_scan: false,
            ..ServerTarget::new("mc.example.com", 1)
        };
        let skipped = fixture(vec![unscanned], Answer::Refused).await;
        assert!(!skipped.monitor.start(60).await);

        let f = fixture(vec![ServerTarget::new("mc.example.com", 1)], Answer::Refused).await;
        assert!(!f.monitor.start(0).await);
        assert!(f.monitor.start(60).await);
        assert!(f.monitor.is_running().await);
        assert!(f.monitor.stop(false).await);
        assert!(!f.monitor.is_running().await);
        assert!(f.monitor.is_bound().await);
        assert!(f.monitor.stop(true).await);
        assert!(!f.monitor.is_bound().await);
    }

    #[tokio::test]
    async fn test_transitions_notify_once() {
        let target = ServerTarget::new("mc.example.com", 1001);
        let f = fixture(vec![target.clone()], Answer::Refused).await;

        f.monitor.run_tick().await;
        f.monitor.run_tick().await;
        let sent = f.notifier.settled().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1001);
        assert!(sent[0].1.starts_with("⚠️ Server mc.example.com connection lost: "), "{}", sent[0].1);
        assert!(sent[0].1.contains("offline"), "{}", sent[0].1);
        assert!(f.monitor.snapshot().await[0].is_down());

        f.java.set_answer(Answer::Up(java_status()));
        f.monitor.run_tick().await;
        f.monitor.run_tick().await;
        f.monitor.run_tick().await;
        let sent = f.notifier.settled().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], (1001, restored_message(&target)));

        let entry = &f.monitor.snapshot().await[0];
        assert_eq!(entry.state, EntryState::Up);
        assert!(entry.last_checked.is_some());
        assert_eq!(entry.last_message.as_deref(), Some("Java 1.20.1 (5/20 players) ABC"));
    }

    #[tokio::test]
    async fn test_first_success_is_silent() {
        let f = fixture(vec![ServerTarget::new("mc.example.com", 1)], Answer::Up(java_status())).await;
        f.monitor.run_tick().await;
        assert!(f.notifier.settled().await.is_empty());
        assert_eq!(f.monitor.snapshot().await[0].state, EntryState::Up);
    }

    #[tokio::test]
    async fn test_targets_are_checked_one_at_a_time() {
        let targets = vec![
            ServerTarget::new("a.example.com", 1),
            ServerTarget::new("b.example.com", 2),
            ServerTarget::new("c.example.com", 3),
        ];
        let f = fixture(targets, Answer::Up(java_status())).await;
        f.monitor.run_tick().await;
        assert_eq!(f.java.started.load(Ordering::SeqCst), 3);
        assert_eq!(f.java.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replace_targets_keeps_down_flags() {
        let old = ServerTarget::new("mc.example.com", 1);
        let new = ServerTarget::new("new.example.com", 2);
        let f = fixture(vec![old.clone()], Answer::Refused).await;
        f.monitor.run_tick().await;
        assert_eq!(f.notifier.wait_for(1).await.len(), 1);

        f.monitor.replace_targets(vec![old.clone(), new.clone()]).await;
        let entries = f.monitor.snapshot().await;
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_down());
        assert_eq!(entries[1].state, EntryState::Unknown);

        f.java.set_answer(Answer::Up(java_status()));
        f.monitor.run_tick().await;
        let sent = f.notifier.settled().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], (1, restored_message(&old)));

        f.monitor.replace_targets(vec![new]).await;
        assert_eq!(f.monitor.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_pass_runs() {
        let f = fixture(vec![ServerTarget::new("mc.example.com", 1)], Answer::Refused).await;
        assert!(f.monitor.start(1).await);
        tokio::time::sleep(Duration::from_millis(1300)).await;
        f.monitor.stop(false).await;
        assert_eq!(f.notifier.wait_for(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unbound_monitor_still_tracks_state() {
        let f = fixture(vec![ServerTarget::new("mc.example.com", 1)], Answer::Refused).await;
        f.monitor.stop(true).await;
        f.monitor.run_tick().await;
        assert!(f.notifier.settled().await.is_empty());
        assert!(f.monitor.snapshot().await[0].is_down());
    }

    #[tokio::test]
    async fn test_stuck_notifier_does_not_stall_monitoring() {
        let targets = vec![
            ServerTarget::new("a.example.com", 1),
            ServerTarget::new("b.example.com", 2),
        ];
        let f = fixture(targets, Answer::Refused).await;
        f.monitor.bind(Arc::new(StuckNotifier)).await;

        let pass = tokio::time::timeout(Duration::from_secs(2), f.monitor.run_tick()).await;
        assert!(pass.is_ok(), "pass did not finish");
        assert_eq!(f.java.started.load(Ordering::SeqCst), 2);

        let snapshot = tokio::time::timeout(Duration::from_secs(2), f.monitor.snapshot()).await.unwrap();
        assert!(snapshot.iter().all(MonitorEntry::is_down));

        f.java.set_answer(Answer::Up(java_status()));
        tokio::time::timeout(Duration::from_secs(2), f.monitor.run_tick()).await.unwrap();
        assert_eq!(f.java.started.load(Ordering::SeqCst), 4);
    }
}
