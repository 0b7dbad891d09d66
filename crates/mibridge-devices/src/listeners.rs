//! [`ListenerRegistry`] – one-shot report listeners attached to a device.
//!
//! The command sender waits for *any* report from the target device as a
//! delivery confirmation. It registers a handle here before publishing and
//! awaits the paired [`oneshot::Receiver`]. Every report dispatched to the
//! device fires and removes all registered handles.
//!
//! Removal is tied to [`ListenerGuard`]: dropping the guard removes the
//! handle if it has not fired yet, so a handle cannot outlive the operation
//! that registered it, whichever way that operation ends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct Slots {
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<()>>,
}

/// Set of one-shot listeners for a single device.
///
/// Clone it cheaply – all clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct ListenerRegistry {
    slots: Arc<Mutex<Slots>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new one-shot listener.
    ///
    /// The receiver resolves with `Ok(())` the next time [`notify_all`]
    /// runs. Keep the guard alive for as long as the listener should stay
    /// registered.
    ///
    /// [`notify_all`]: ListenerRegistry::notify_all
    pub fn register(&self) -> (ListenerGuard, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.lock();
        let id = slots.next_id;
        slots.next_id = slots.next_id.wrapping_add(1);
        slots.pending.insert(id, tx);
        let guard = ListenerGuard {
            id,
            slots: self.slots.clone(),
        };
        (guard, rx)
    }

    /// Fire and remove every registered listener.
    ///
    /// Returns the number of listeners that were fired.
    pub fn notify_all(&self) -> usize {
        let fired: Vec<_> = self.lock().pending.drain().map(|(_, tx)| tx).collect();
        let count = fired.len();
        for tx in fired {
            // The waiter may already have given up; nothing to do then.
            let _ = tx.send(());
        }
        count
    }

    /// Number of listeners currently registered.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a listener registered; removes it on drop.
#[derive(Debug)]
pub struct ListenerGuard {
    id: u64,
    slots: Arc<Mutex<Slots>>,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.pending.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_fires_and_removes_listener() {
        let registry = ListenerRegistry::new();
        let (_guard, rx) = registry.register();
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.notify_all(), 1);
        assert!(registry.is_empty());
        assert!(rx.await.is_ok());
    }

    #[test]
    fn dropping_guard_deregisters() {
        let registry = ListenerRegistry::new();
        let (guard, _rx) = registry.register();
        let (_other, _rx2) = registry.register();
        assert_eq!(registry.len(), 2);

        drop(guard);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropping_guard_after_fire_is_noop() {
        let registry = ListenerRegistry::new();
        let (guard, _rx) = registry.register();
        registry.notify_all();
        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn notify_with_no_listeners_fires_nothing() {
        let registry = ListenerRegistry::new();
        assert_eq!(registry.notify_all(), 0);
    }

    #[test]
    fn notify_after_receiver_dropped_does_not_panic() {
        let registry = ListenerRegistry::new();
        let (_guard, rx) = registry.register();
        drop(rx);
        assert_eq!(registry.notify_all(), 1);
    }

    #[test]
    fn register_and_drop_race_with_notify() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let registry = ListenerRegistry::new();
        let done = Arc::new(AtomicBool::new(false));

        let notifier = {
            let registry = registry.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut fired = 0;
                while !done.load(Ordering::Acquire) {
                    fired += registry.notify_all();
                    thread::yield_now();
                }
                fired
            })
        };

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let mut resolved = 0;
                    for _ in 0..500 {
                        let (guard, rx) = registry.register();
                        thread::yield_now();
                        drop(guard);
                        // With the guard gone the handle was either fired or
                        // removed, so the receiver settles either way.
                        if rx.blocking_recv().is_ok() {
                            resolved += 1;
                        }
                    }
                    resolved
                })
            })
            .collect();

        let resolved: usize = workers.into_iter().map(|h| h.join().unwrap()).sum();
        done.store(true, Ordering::Release);
        let fired = notifier.join().unwrap();

        assert_eq!(resolved, fired);
        assert!(registry.is_empty());
    }

    #[test]
    fn clones_share_the_same_set() {
        let registry = ListenerRegistry::new();
        let clone = registry.clone();
        let (_guard, _rx) = registry.register();
        assert_eq!(clone.len(), 1);
        clone.notify_all();
        assert!(registry.is_empty());
    }
}
