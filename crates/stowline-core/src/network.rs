//! Connectivity signal consumed by the operation queue.

use std::sync::Arc;

use tokio::sync::watch;

/// Boolean "is currently online" accessor.
pub trait NetworkStatus: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity state fed by the host application.
///
/// Transitions are published on a watch channel so a scheduler can drain the
/// outbox as soon as the device comes back online.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Record the current connectivity. Returns `true` on an offline to online transition.
    pub fn set_online(&self, online: bool) -> bool {
        let mut previous = online;
        let changed = self.tx.send_if_modified(|current| {
            previous = std::mem::replace(current, online);
            previous != online
        });
        if changed {
            tracing::info!(online, "Network status changed");
        }
        !previous && online
    }

    /// Subscribe to online/offline transitions. Repeating the current state does not notify.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkStatus for NetworkMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

impl<N: NetworkStatus + ?Sized> NetworkStatus for Arc<N> {
    fn is_online(&self) -> bool {
        (**self).is_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn reports_reconnect_transitions() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();
        assert!(!monitor.is_online());

        assert!(monitor.set_online(true));
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        assert!(!monitor.set_online(true));
        assert!(!rx.has_changed().unwrap());
        assert!(!monitor.set_online(false));
        assert!(rx.has_changed().unwrap());
        assert!(!monitor.is_online());
    }
}
