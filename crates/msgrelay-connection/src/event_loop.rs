use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

type Task = Box<dyn FnOnce()>;

/// Cooperative single-threaded queue of deferred work.
///
/// Tasks are run in submission order. A task queued while the loop is
/// processing is held back until the next call to
/// [`EventLoop::process_pending`], so deferred work never runs inside the
/// callback that scheduled it.
#[derive(Default)]
pub struct EventLoop {
    tasks: RefCell<VecDeque<Task>>,
}

impl EventLoop {
    /// Create a new, empty loop behind a shared handle.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Run `task` on a later iteration.
    pub fn call_later(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run `task` on a later iteration, handing it ownership of `arg`.
    pub fn call_later_move<A: 'static>(&self, task: impl FnOnce(A) + 'static, arg: A) {
        self.call_later(move || task(arg));
    }

    /// Drop `object` on a later iteration.
    pub fn delete_later<T: 'static>(&self, object: T) {
        self.call_later(move || drop(object));
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Run the tasks queued before this call. Returns how many ran.
    pub fn process_pending(&self) -> usize {
        let ready = self.pending();
        for _ in 0..ready {
            // Tasks may queue more work; no borrow is held while one runs.
            let task = self.tasks.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        if ready > 0 {
            trace!(ran = ready, left = self.pending(), "processed deferred tasks");
        }
        ready
    }

    /// Keep processing until the queue is empty. Returns the total number of
    /// tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0usize;
        loop {
            let ran = self.process_pending();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .finish()
    }
}
