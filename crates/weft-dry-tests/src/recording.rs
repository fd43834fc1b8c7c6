// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Subscription callbacks that record what they receive.

use std::cell::RefCell;
use std::rc::Rc;

use weft_core::{Snapshot, SnapshotCallback};

/// Records every snapshot delivered to the callbacks it hands out.
///
/// Clones share the same log, so a test keeps one handle and passes
/// [`RecordingCallback::callback`] to the environment.
#[derive(Clone, Default)]
pub struct RecordingCallback {
    log: Rc<RefCell<Vec<Snapshot>>>,
}

impl RecordingCallback {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// A boxed callback appending into this recorder.
    pub fn callback(&self) -> SnapshotCallback {
        let log = Rc::clone(&self.log);
        Box::new(move |snapshot| log.borrow_mut().push(snapshot.clone()))
    }

    /// Number of deliveries so far.
    pub fn count(&self) -> usize {
        self.log.borrow().len()
    }

    /// Most recent delivery.
    pub fn last(&self) -> Option<Snapshot> {
        self.log.borrow().last().cloned()
    }

    /// Forgets every delivery.
    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }
}
