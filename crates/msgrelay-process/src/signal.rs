use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Slot<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`SharedSignal::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

/// Thread-safe fan-out of one event to any number of slots.
///
/// Slots may be invoked from background threads, so they must be
/// `Send + Sync`. They run in registration order on the emitting thread and
/// without any internal lock held; a slot disconnected before its turn is
/// skipped.
pub struct SharedSignal<T> {
    slots: Mutex<Vec<(SignalId, Slot<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for SharedSignal<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> SharedSignal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `slot` and return its id.
    pub fn connect(&self, slot: impl Fn(&T) + Send + Sync + 'static) -> SignalId {
        let id = SignalId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(slot)));
        id
    }

    /// Remove a slot. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: SignalId) -> bool {
        let mut slots = self.lock();
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    pub fn slot_count(&self) -> usize {
        self.lock().len()
    }

    /// Invoke every connected slot with `value`.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<(SignalId, Slot<T>)> = self.lock().clone();
        for (id, slot) in snapshot {
            let still_connected = self.lock().iter().any(|(slot_id, _)| *slot_id == id);
            if still_connected {
                slot(value);
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(SignalId, Slot<T>)>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for SharedSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSignal")
            .field("slots", &self.slot_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn emits_across_threads() {
        let signal = Arc::new(SharedSignal::<u32>::new());
        let total = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&total);
        signal.connect(move |value| {
            sink.fetch_add(*value as usize, Ordering::SeqCst);
        });

        let handles: Vec<_> = (1..=4u32)
            .map(|n| {
                let signal = Arc::clone(&signal);
                std::thread::spawn(move || signal.emit(&n))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(total.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn disconnect_removes_slot() {
        let signal = SharedSignal::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&hits);
        let id = signal.connect(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        signal.emit(&1);
        assert!(signal.disconnect(id));
        assert!(!signal.disconnect(id));
        signal.emit(&2);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(signal.slot_count(), 0);
    }

    #[test]
    fn slot_may_disconnect_a_later_slot() {
        let signal = Arc::new(SharedSignal::<u32>::new());
        let later_hits = Arc::new(AtomicUsize::new(0));
        let later_id = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&signal);
        let target = Arc::clone(&later_id);
        signal.connect(move |_| {
            let id = *target.lock().unwrap();
            if let (Some(signal), Some(id)) = (weak.upgrade(), id) {
                signal.disconnect(id);
            }
        });
        let sink = Arc::clone(&later_hits);
        *later_id.lock().unwrap() = Some(signal.connect(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        signal.emit(&0);
        assert_eq!(later_hits.load(Ordering::SeqCst), 0);
    }
}
