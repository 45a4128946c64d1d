//! Cooperative, phase-aware cancellation shared between a caller and a
//! running attempt.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::domain::error::{HivemindError, Result};
use crate::domain::progress::UpdatePhase;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    /// Pid of the running analysis process; 0 when none.
    process_id: AtomicU32,
    notify: Notify,
}

/// Cancellation token. Clones share state.
///
/// The token transitions once, from active to cancellation-requested.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` only for the call that performed
    /// the transition.
    pub fn cancel(&self) -> bool {
        let first = !self.state.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.state.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`HivemindError::Cancelled`] if cancellation was requested
    /// and `phase` is interruptible.
    pub fn check(&self, phase: UpdatePhase) -> Result<()> {
        if self.is_cancelled() && phase.is_interruptible() {
            return Err(HivemindError::Cancelled { phase });
        }
        Ok(())
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn register_process(&self, pid: u32) {
        self.state.process_id.store(pid, Ordering::SeqCst);
    }

    pub(crate) fn clear_process(&self) {
        self.state.process_id.store(0, Ordering::SeqCst);
    }

    /// Pid of the external process the attempt is waiting on, if any.
    pub fn process_id(&self) -> Option<u32> {
        match self.state.process_id.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_transitions_once() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.clone().is_cancelled());
    }

    #[test]
    fn test_check_exempts_risky_phases() {
        let token = CancellationToken::new();
        token.check(UpdatePhase::Cloning).unwrap();

        token.cancel();
        assert!(token.check(UpdatePhase::Staging).is_err());
        assert!(token.check(UpdatePhase::Analyzing).is_err());
        token.check(UpdatePhase::Committing).unwrap();
        token.check(UpdatePhase::RepointingCurrent).unwrap();
    }

    #[test]
    fn test_process_registration() {
        let token = CancellationToken::new();
        assert_eq!(token.process_id(), None);
        token.register_process(4242);
        assert_eq!(token.process_id(), Some(4242));
        token.clear_process();
        assert_eq!(token.process_id(), None);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_set() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("already cancelled");
    }
}
