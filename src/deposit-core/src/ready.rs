//! One-shot readiness of an external collaborator
//!
//! Image processing and OCR libraries may finish loading after the capture
//! session starts. A [`Readiness`] is handed to the session immediately; the
//! matching [`Initializer`] resolves it exactly once when the library is up.

use std::rc::Rc;

use tokio::sync::watch;

/// Shared view of a collaborator that may not be loaded yet
pub struct Readiness<T> {
    rx: watch::Receiver<Option<Rc<T>>>,
}

/// Resolves a [`Readiness`]. Consumed on use, so it can fire only once.
pub struct Initializer<T> {
    tx: watch::Sender<Option<Rc<T>>>,
}

impl<T> Readiness<T> {
    /// A collaborator still loading
    pub fn pending() -> (Self, Initializer<T>) {
        let (tx, rx) = watch::channel(None);
        (Self { rx }, Initializer { tx })
    }

    /// A collaborator available from the start
    pub fn ready(value: T) -> Self {
        let (tx, rx) = watch::channel(Some(Rc::new(value)));
        // Receivers keep the last value after the sender is gone
        drop(tx);
        Self { rx }
    }

    /// Non-blocking poll
    pub fn get(&self) -> Option<Rc<T>> {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

impl<T> Clone for Readiness<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> Initializer<T> {
    pub fn resolve(self, value: T) {
        self.tx.send_replace(Some(Rc::new(value)));
    }
}
