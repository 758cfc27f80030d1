//! Observable values.
//!
//! Every piece of published engine state is a subject that notifies its
//! observers synchronously, on the thread that performed the mutation.
//! Only the tick loop and control methods mutate subjects; the audio thread
//! never does.

use std::fmt;

/// Handle returned by `observe`, used to detach the observer
pub type ObserverId = u64;

type Callback<T> = Box<dyn FnMut(&T) + Send>;

/// A value with change notification
pub struct ValueSubject<T> {
    value: T,
    observers: Vec<(ObserverId, Callback<T>)>,
    next_id: ObserverId,
}

/// A list value with change notification
pub type ListSubject<T> = ValueSubject<Vec<T>>;

impl<T: Clone + PartialEq> ValueSubject<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            observers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// Store `value` and notify only if it differs from the current value.
    /// Returns whether the value changed.
    pub fn set_if_changed(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.notify();
        true
    }

    /// Store `value` and notify unconditionally
    pub fn set_always(&mut self, value: T) {
        self.value = value;
        self.notify();
    }

    /// Register an observer. It is called once immediately with the current
    /// value, then on every notification.
    pub fn observe<F>(&mut self, mut callback: F) -> ObserverId
    where
        F: FnMut(&T) + Send + 'static,
    {
        callback(&self.value);
        let id = self.next_id;
        self.next_id += 1;
        self.observers.push((id, Box::new(callback)));
        id
    }

    /// Detach an observer; returns false if the id was unknown
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn notify(&mut self) {
        for (_, callback) in &mut self.observers {
            callback(&self.value);
        }
    }
}

impl<T: Clone + PartialEq + Default> Default for ValueSubject<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueSubject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSubject")
            .field("value", &self.value)
            .field("observers", &self.observers.len())
            .finish()
    }
}
