//! [`SequenceTracker`] – per-device duplicate report detection.
//!
//! A device reachable through several gateways receives the same report
//! once per gateway. Each copy carries the same `tid`, so remembering the
//! last observed value is enough to drop the redundant deliveries.

use std::sync::{Mutex, PoisonError};

use mibridge_types::Tid;

/// Last-seen sequence id of one device.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: Mutex<Option<Tid>>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `tid` and report whether the carrying report is fresh.
    ///
    /// Returns `false` only when `tid` equals the stored value; the stored
    /// value is left untouched in that case. A report without a `tid` is
    /// always fresh and does not change the stored value. The comparison and
    /// the update happen under one lock.
    pub fn observe(&self, tid: Option<&Tid>) -> bool {
        let Some(tid) = tid else {
            return true;
        };
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(tid) {
            return false;
        }
        *last = Some(tid.clone());
        true
    }

    /// The stored sequence id, if any report with a `tid` was observed.
    pub fn last(&self) -> Option<Tid> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn repeated_tid_is_a_duplicate() {
        let seq = SequenceTracker::new();
        assert!(seq.observe(Some(&Tid::from(5))));
        assert!(!seq.observe(Some(&Tid::from(5))));
        assert_eq!(seq.last(), Some(Tid::from(5)));
    }

    #[test]
    fn different_tid_is_applied_and_stored() {
        let seq = SequenceTracker::new();
        assert!(seq.observe(Some(&Tid::from(5))));
        assert!(seq.observe(Some(&Tid::from(6))));
        assert_eq!(seq.last(), Some(Tid::from(6)));
        // Going back to an older id is not a duplicate of the latest one.
        assert!(seq.observe(Some(&Tid::from(5))));
    }

    #[test]
    fn string_tid_compares_by_value() {
        let seq = SequenceTracker::new();
        assert!(seq.observe(Some(&Tid::from("158"))));
        assert!(!seq.observe(Some(&Tid::from("158"))));
        assert!(seq.observe(Some(&Tid::from(158))));
        assert_eq!(seq.last(), Some(Tid::from(158)));
    }

    #[test]
    fn missing_tid_never_deduplicates() {
        let seq = SequenceTracker::new();
        assert!(seq.observe(Some(&Tid::from(5))));
        assert!(seq.observe(None));
        assert!(seq.observe(None));
        assert_eq!(seq.last(), Some(Tid::from(5)));
    }

    #[test]
    fn concurrent_observers_accept_a_tid_once() {
        let seq = Arc::new(SequenceTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = seq.clone();
                thread::spawn(move || seq.observe(Some(&Tid::from(42))))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fresh| *fresh)
            .count();
        assert_eq!(accepted, 1);
    }
}
