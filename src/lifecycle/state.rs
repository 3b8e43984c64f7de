//! Server lifecycle states.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Lifecycle of one server run.
///
/// ```text
/// Created → Bootstrapped → ListenerAssembled → ServicesStarting → Listening → ShuttingDown → Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Created,
    Bootstrapped,
    ListenerAssembled,
    ServicesStarting,
    Listening,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Shared, observable lifecycle state.
#[derive(Debug, Clone)]
pub struct StateTracker {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Created);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Move forward to `next`. States never move backwards.
    pub fn advance(&self, next: LifecycleState) {
        let previous = self.tx.send_replace(next.max(self.get()));
        if previous < next {
            tracing::debug!(from = %previous, to = %next, "Lifecycle transition");
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_only_move_forward() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.get(), LifecycleState::Created);

        tracker.advance(LifecycleState::Listening);
        tracker.advance(LifecycleState::ServicesStarting);
        assert_eq!(tracker.get(), LifecycleState::Listening);

        tracker.advance(LifecycleState::Stopped);
        assert_eq!(tracker.get(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let tracker = StateTracker::new();
        let mut rx = tracker.subscribe();
        tracker.advance(LifecycleState::Bootstrapped);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LifecycleState::Bootstrapped);
    }
}
