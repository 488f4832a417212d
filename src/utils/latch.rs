use parking_lot::{Condvar, Mutex};
use std::time::Duration;

type Callback<T> = Box<dyn FnOnce(&T) + Send>;

struct LatchState<T> {
    value: Option<T>,
    callbacks: Vec<Callback<T>>,
}

/// One-shot event that keeps its payload.
///
/// `fire` succeeds once. Subscribers registered before that are called from
/// the firing thread; subscribers registered afterwards are called
/// immediately with the stored payload.
pub struct Latch<T> {
    state: Mutex<LatchState<T>>,
    fired: Condvar,
}

impl<T: Clone> Latch<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LatchState { value: None, callbacks: Vec::new() }),
            fired: Condvar::new(),
        }
    }

    /// Stores `value` and notifies subscribers. Returns `false` if the latch
    /// had already fired, in which case `value` is dropped.
    pub fn fire(&self, value: T) -> bool {
        let callbacks = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return false;
            }

            state.value = Some(value.clone());
            self.fired.notify_all();
            std::mem::take(&mut state.callbacks)
        };

        // Called outside the lock so a callback may query the latch again.
        for callback in callbacks {
            callback(&value);
        }

        true
    }

    pub fn subscribe<F>(&self, callback: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let value = {
            let mut state = self.state.lock();
            match &state.value {
                Some(value) => value.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };

        callback(&value);
    }

    pub fn get(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    pub fn is_fired(&self) -> bool {
        self.state.lock().value.is_some()
    }

    /// Blocks until the latch fires or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        if state.value.is_none() {
            self.fired.wait_while_for(&mut state, |state| state.value.is_none(), timeout);
        }

        state.value.clone()
    }
}

impl<T: Clone> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}
