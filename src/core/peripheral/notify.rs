//! Notification sessions and the periodic tasks that feed them.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

/// On/off state of a characteristic's notifications.
///
/// An active session owns a child token of the simulator's shutdown token;
/// stopping the session, or shutting the simulator down, cancels whatever
/// was spawned against it.
#[derive(Debug)]
pub struct NotifySession {
    parent: CancellationToken,
    active: Mutex<Option<CancellationToken>>,
}

impl NotifySession {
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            parent,
            active: Mutex::new(None),
        }
    }

    /// Activates the session. Returns the session token, or `None` if it was
    /// already active.
    pub fn start(&self) -> Option<CancellationToken> {
        let mut active = self.active.lock().unwrap();
        if active.as_ref().is_some_and(|t| !t.is_cancelled()) {
            return None;
        }
        let token = self.parent.child_token();
        *active = Some(token.clone());
        Some(token)
    }

    /// Deactivates the session. Returns false if it was not active.
    pub fn stop(&self) -> bool {
        match self.active.lock().unwrap().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }
}

/// Runs `tick` every `period`, first after one full period, until `token` is
/// cancelled. A zero period runs every millisecond.
pub fn spawn_periodic<F>(period: Duration, token: CancellationToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => tick(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_session_start_is_idempotent() {
        let session = NotifySession::new(CancellationToken::new());
        assert!(session.start().is_some());
        assert!(session.start().is_none());
        assert!(session.is_active());

        assert!(session.stop());
        assert!(!session.stop());
        assert!(!session.is_active());
        assert!(session.start().is_some());
    }

    #[test]
    fn test_parent_cancellation_ends_session() {
        let parent = CancellationToken::new();
        let session = NotifySession::new(parent.clone());
        let token = session.start().unwrap();
        parent.cancel();

        assert!(token.is_cancelled());
        assert!(!session.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = ticks.clone();
        let handle = spawn_periodic(Duration::from_secs(1), token.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_does_not_kill_the_task() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let counter = ticks.clone();
        let handle = spawn_periodic(Duration::ZERO, token.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(ticks.load(Ordering::SeqCst) > 0);

        token.cancel();
        handle.await.unwrap();
    }
}
