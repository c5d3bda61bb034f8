//! Single most-recent-value handoff between execution contexts.
//!
//! Writers overwrite, readers peek or take. There is no queue behind it: a
//! value overwritten before anyone read it is gone.

use parking_lot::Mutex;

#[derive(Debug)]
pub struct Slot<T> {
    value: Mutex<Option<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

impl<T: Clone> Slot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    /// Replace whatever is in the slot.
    pub fn write(&self, value: T) {
        *self.value.lock() = Some(value);
    }

    /// Copy of the most recent value; the slot keeps it.
    pub fn latest(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Most recent value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    pub fn latest_or(&self, default: T) -> T {
        self.latest().unwrap_or(default)
    }

    pub fn clear(&self) {
        *self.value.lock() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.value.lock().is_none()
    }
}
