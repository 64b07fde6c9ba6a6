//! # Connection Supervisor
//!
//! Owns the reconnect loop for one room. Each iteration launches a fresh session and
//! waits for it to end:
//!
//! - `Stopped` leaves the loop.
//! - `BroadcastEnded` stops the supervisor itself, so no reconnect follows.
//! - `Closed` / `Failed` count as a disconnect. Once the count exceeds the alert
//!   threshold the alert channel is notified, at most once per supervisor. The loop
//!   then backs off for the retry interval (cut short by `stop`) and tries again.
//!
//! Only one session is alive at any time because the loop awaits each one before
//! launching the next.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::collaborators::AlertChannel;
use crate::core::session::SessionOutcome;

/// Runs one session to completion. `stop` is cancelled when the supervisor stops.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn run_session(&self, attempt: u64, stop: CancellationToken) -> SessionOutcome;
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Pause between a lost session and the next attempt.
    pub retry_interval: Duration,
    /// Disconnects tolerated before alerting.
    pub alert_threshold: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            alert_threshold: 5,
        }
    }
}

/// Where the reconnect loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    Idle,
    Session { attempt: u64 },
    Backoff { failures: u64 },
    Stopped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("supervisor is already running")]
    AlreadyRunning,

    #[error("supervisor has been stopped")]
    Stopped,
}

pub struct ConnectionSupervisor {
    launcher: Arc<dyn SessionLauncher>,
    alert: Arc<dyn AlertChannel>,
    settings: SupervisorSettings,
    shutdown: CancellationToken,
    running: AtomicBool,
    disconnect_count: AtomicU64,
    alert_sent: AtomicBool,
    phase: watch::Sender<SupervisorPhase>,
}

impl ConnectionSupervisor {
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        alert: Arc<dyn AlertChannel>,
        settings: SupervisorSettings,
    ) -> Self {
        let (phase, _) = watch::channel(SupervisorPhase::Idle);
        Self {
            launcher,
            alert,
            settings,
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            disconnect_count: AtomicU64::new(0),
            alert_sent: AtomicBool::new(false),
            phase,
        }
    }

    /// Runs the reconnect loop until [`stop`](Self::stop) is called or the broadcast
    /// ends. A second concurrent `start` is rejected, as is a restart after stop.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("start requested while the supervisor is already running");
            return Err(SupervisorError::AlreadyRunning);
        }
        if self.shutdown.is_cancelled() {
            self.running.store(false, Ordering::SeqCst);
            return Err(SupervisorError::Stopped);
        }

        info!(
            retry_secs = self.settings.retry_interval.as_secs_f64(),
            alert_threshold = self.settings.alert_threshold,
            "supervisor started"
        );

        let mut attempt: u64 = 0;
        while !self.shutdown.is_cancelled() {
            attempt += 1;
            self.phase.send_replace(SupervisorPhase::Session { attempt });

            let outcome = self
                .launcher
                .run_session(attempt, self.shutdown.child_token())
                .await;

            if !outcome.is_disconnect() {
                if matches!(outcome, SessionOutcome::BroadcastEnded) {
                    info!(attempt, "broadcast ended; not reconnecting");
                    self.stop();
                } else {
                    info!(attempt, "session stopped");
                }
                break;
            }

            let failures = self.record_disconnect();
            warn!(attempt, failures, %outcome, "session lost");

            self.phase.send_replace(SupervisorPhase::Backoff { failures });
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.retry_interval) => {}
            }
        }

        self.phase.send_replace(SupervisorPhase::Stopped);
        self.running.store(false, Ordering::SeqCst);
        info!(
            disconnects = self.disconnect_count(),
            "supervisor stopped"
        );
        Ok(())
    }

    /// Requests shutdown: ends the current session and any backoff wait. Idempotent.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u64 {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    pub fn alert_sent(&self) -> bool {
        self.alert_sent.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> watch::Receiver<SupervisorPhase> {
        self.phase.subscribe()
    }

    fn record_disconnect(&self) -> u64 {
        let failures = self.disconnect_count.fetch_add(1, Ordering::SeqCst) + 1;
        if failures > self.settings.alert_threshold && !self.alert_sent.swap(true, Ordering::SeqCst)
        {
            error!(failures, threshold = self.settings.alert_threshold, "disconnect threshold exceeded; raising alert");
            self.alert.notify();
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Fails `failures` times, then ends with `last`.
    struct ScriptedLauncher {
        failures: u64,
        last: fn() -> SessionOutcome,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedLauncher {
        fn new(failures: u64, last: fn() -> SessionOutcome) -> Arc<Self> {
            Arc::new(Self {
                failures,
                last,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SessionLauncher for ScriptedLauncher {
        async fn run_session(&self, attempt: u64, stop: CancellationToken) -> SessionOutcome {
            self.calls.lock().unwrap().push(Instant::now());
            if attempt <= self.failures {
                return SessionOutcome::Failed(SessionError::IdleTimeout(Duration::from_secs(60)));
            }
            let outcome = (self.last)();
            if matches!(outcome, SessionOutcome::Stopped) {
                stop.cancelled().await;
            }
            outcome
        }
    }

    #[derive(Default)]
    struct CountingAlert(AtomicUsize);

    impl AlertChannel for CountingAlert {
        fn notify(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ended() -> SessionOutcome {
        SessionOutcome::BroadcastEnded
    }

    fn blocked() -> SessionOutcome {
        SessionOutcome::Stopped
    }

    async fn run_until_ended(failures: u64) -> (Arc<ScriptedLauncher>, Arc<CountingAlert>, ConnectionSupervisor) {
        let launcher = ScriptedLauncher::new(failures, ended);
        let alert = Arc::new(CountingAlert::default());
        let supervisor = ConnectionSupervisor::new(launcher.clone(), alert.clone(), SupervisorSettings::default());
        supervisor.start().await.unwrap();
        (launcher, alert, supervisor)
    }

    #[tokio::test(start_paused = true)]
    async fn below_threshold_never_alerts() {
        let (launcher, alert, supervisor) = run_until_ended(4).await;
        assert_eq!(launcher.calls(), 5);
        assert_eq!(supervisor.disconnect_count(), 4);
        assert_eq!(alert.0.load(Ordering::SeqCst), 0);
        assert!(!supervisor.alert_sent());
    }

    #[tokio::test(start_paused = true)]
    async fn alert_fires_once_past_threshold() {
        let (_, alert, supervisor) = run_until_ended(6).await;
        assert_eq!(supervisor.disconnect_count(), 6);
        assert_eq!(alert.0.load(Ordering::SeqCst), 1);
        assert!(supervisor.alert_sent());

        let (_, alert, supervisor) = run_until_ended(10).await;
        assert_eq!(supervisor.disconnect_count(), 10);
        assert_eq!(alert.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_spaced_by_retry_interval() {
        let (launcher, _, _) = run_until_ended(3).await;
        let calls = launcher.calls.lock().unwrap();
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn broadcast_end_stops_without_reconnecting() {
        let (launcher, alert, supervisor) = run_until_ended(0).await;
        assert_eq!(launcher.calls(), 1);
        assert_eq!(supervisor.disconnect_count(), 0);
        assert_eq!(alert.0.load(Ordering::SeqCst), 0);
        assert_eq!(*supervisor.phase().borrow(), SupervisorPhase::Stopped);
        assert_eq!(supervisor.start().await, Err(SupervisorError::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_backoff() {
        let launcher = ScriptedLauncher::new(u64::MAX, blocked);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            launcher.clone(),
            Arc::new(CountingAlert::default()),
            SupervisorSettings {
                retry_interval: Duration::from_secs(300),
                alert_threshold: 5,
            },
        ));

        let runner = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.start().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*supervisor.phase().borrow(), SupervisorPhase::Backoff { failures: 1 });

        let before = Instant::now();
        supervisor.stop();
        runner.await.unwrap().unwrap();
        assert!(before.elapsed() < Duration::from_secs(300));
        assert_eq!(launcher.calls(), 1);
        assert!(!supervisor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected_while_running() {
        let launcher = ScriptedLauncher::new(0, blocked);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            launcher.clone(),
            Arc::new(CountingAlert::default()),
            SupervisorSettings::default(),
        ));

        let runner = {
            let supervisor = Arc::clone(&supervisor);
            tokio::spawn(async move { supervisor.start().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(supervisor.is_running());
        assert_eq!(supervisor.start().await, Err(SupervisorError::AlreadyRunning));

        supervisor.stop();
        assert_eq!(runner.await.unwrap(), Ok(()));
        assert_eq!(launcher.calls(), 1);
    }
}
