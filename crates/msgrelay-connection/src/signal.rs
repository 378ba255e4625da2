use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Handle returned by [`Signal::connect`], used to disconnect the slot again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

/// Single-threaded fan-out of one event to any number of slots.
///
/// Slots run in registration order. Emission works on a snapshot, so slots
/// may connect or disconnect (themselves or others) while being called; a
/// slot disconnected before its turn is skipped, a slot connected during
/// emission first runs on the next emission.
pub struct Signal<F: ?Sized> {
    slots: RefCell<Vec<(SlotId, Rc<F>)>>,
    next_id: Cell<u64>,
}

impl<F: ?Sized> Default for Signal<F> {
    fn default() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }
}

impl<F: ?Sized> Signal<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `slot` and return its id.
    pub fn connect(&self, slot: Rc<F>) -> SlotId {
        let id = SlotId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.slots.borrow_mut().push((id, slot));
        id
    }

    /// Remove a slot. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|(slot_id, _)| *slot_id != id);
        slots.len() != before
    }

    /// Drop every slot.
    pub fn disconnect_all(&self) {
        self.slots.borrow_mut().clear();
    }

    pub fn slot_count(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Invoke every connected slot through `call`.
    pub fn emit(&self, mut call: impl FnMut(&F)) {
        let snapshot: Vec<(SlotId, Rc<F>)> = self.slots.borrow().clone();
        for (id, slot) in snapshot {
            if !self.is_connected(id) {
                continue;
            }
            call(&*slot);
        }
    }

    fn is_connected(&self, id: SlotId) -> bool {
        self.slots.borrow().iter().any(|(slot_id, _)| *slot_id == id)
    }
}

impl<F: ?Sized> std::fmt::Debug for Signal<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("slots", &self.slot_count())
            .finish()
    }
}
