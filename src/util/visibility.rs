//! Visibility port.
//!
//! A context either has a visible/hidden distinction (an interactive tab)
//! or it does not (server rendering, CLI). `current()` returning `None`
//! means the latter; background refresh is disabled there.

#[cfg(test)]
#[path = "visibility_test.rs"]
mod visibility_test;

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

pub trait VisibilitySource: Send + Sync {
    /// Current visibility, or `None` when the context has no such concept.
    fn current(&self) -> Option<Visibility>;

    /// Stream of visibility changes, if the context emits them.
    fn changes(&self) -> Option<watch::Receiver<Visibility>>;
}

/// Context without visibility.
#[derive(Clone, Copy, Debug, Default)]
pub struct Headless;

impl VisibilitySource for Headless {
    fn current(&self) -> Option<Visibility> {
        None
    }

    fn changes(&self) -> Option<watch::Receiver<Visibility>> {
        None
    }
}

/// Visibility driven by whoever owns the handle (a host shell, a test).
#[derive(Debug)]
pub struct VisibilityWatch {
    tx: watch::Sender<Visibility>,
}

impl VisibilityWatch {
    #[must_use]
    pub fn new(initial: Visibility) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Update visibility. Returns `false` when the value did not change,
    /// in which case no change is emitted.
    pub fn set(&self, visibility: Visibility) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == visibility {
                return false;
            }
            *current = visibility;
            true
        })
    }

    #[must_use]
    pub fn get(&self) -> Visibility {
        *self.tx.borrow()
    }
}

impl Default for VisibilityWatch {
    fn default() -> Self {
        Self::new(Visibility::Visible)
    }
}

impl VisibilitySource for VisibilityWatch {
    fn current(&self) -> Option<Visibility> {
        Some(self.get())
    }

    fn changes(&self) -> Option<watch::Receiver<Visibility>> {
        Some(self.tx.subscribe())
    }
}
