//! Pending-add retry ring
//!
//! Device paths announced by hotplug are often not openable yet (udev
//! permission rules still running, firmware settling). Candidates wait
//! here and are retried one per poll cycle. The ring is bounded so a
//! hotplug storm cannot grow memory without limit: a full ring evicts
//! its oldest entry in favor of the newest.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::debug;

pub(crate) struct PendingQueue {
    slots: VecDeque<PathBuf>,
    capacity: usize,
}

impl PendingQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a candidate path. Duplicates are ignored; a full ring
    /// drops its oldest entry. Returns whether the path was queued.
    pub(crate) fn push(&mut self, path: PathBuf) -> bool {
        if self.slots.iter().any(|p| *p == path) {
            return false;
        }
        if self.slots.len() == self.capacity {
            if let Some(evicted) = self.slots.pop_front() {
                debug!("Pending-add ring full, evicting {}", evicted.display());
            }
        }
        self.slots.push_back(path);
        true
    }

    /// Dequeue the oldest candidate
    pub(crate) fn pop(&mut self) -> Option<PathBuf> {
        self.slots.pop_front()
    }

    /// Drop a path whose device disappeared before it could be opened
    pub(crate) fn remove(&mut self, path: &Path) {
        self.slots.retain(|p| p != path);
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
