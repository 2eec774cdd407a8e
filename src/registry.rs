//! Controller registry
//!
//! Owns every handle the subsystem has produced: connected ones and
//! disconnected ones that callers still retain. A handle is reclaimed
//! only once it is both disconnected and externally unreferenced, which
//! is checked after every disconnect and at the end of every poll
//! cycle. The snapshot array is reused across cycles and only ever
//! grows.

use std::path::Path;

use tracing::info;

use crate::pad::Gamepad;
use crate::types::{EventSink, PadEvent};

#[derive(Default)]
pub(crate) struct Registry {
    /// All retained handles, newest first
    pads: Vec<Gamepad>,
    /// Reusable connected-list, rebuilt on demand
    snapshot: Vec<Gamepad>,
    connected: usize,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adopt a freshly probed handle and announce it
    pub(crate) fn register(&mut self, pad: Gamepad, sink: &mut dyn EventSink) {
        info!(
            "Controller connected: \"{}\" at {}",
            pad.info().name,
            pad.path().display()
        );
        self.pads.insert(0, pad.clone());
        self.connected += 1;
        sink.on_event(PadEvent::Connection {
            pad,
            connected: true,
        });
    }

    /// Close a handle's device and announce the loss. Idempotent: a
    /// second disconnect of the same handle does nothing.
    pub(crate) fn disconnect(&mut self, pad: &Gamepad, sink: &mut dyn EventSink) {
        if !pad.force_disconnect() {
            return;
        }
        info!(
            "Controller disconnected: \"{}\" at {}",
            pad.info().name,
            pad.path().display()
        );
        self.connected -= 1;
        sink.on_event(PadEvent::Connection {
            pad: pad.clone(),
            connected: false,
        });
    }

    /// Connected handle opened from `path`, if any
    pub(crate) fn find_by_path(&self, path: &Path) -> Option<Gamepad> {
        self.pads
            .iter()
            .find(|p| p.is_connected() && p.path() == path)
            .cloned()
    }

    pub(crate) fn is_registered(&self, path: &Path) -> bool {
        self.find_by_path(path).is_some()
    }

    /// Free every handle that is simultaneously disconnected and
    /// unreferenced. The stale snapshot is dropped first so its clones
    /// do not keep handles alive.
    pub(crate) fn reclaim(&mut self) {
        self.snapshot.clear();
        self.pads
            .retain(|p| p.is_connected() || p.external_refs() > 0);
    }

    /// Rebuild and return the canonical connected list. Valid until the
    /// next poll cycle.
    pub(crate) fn snapshot(&mut self) -> &[Gamepad] {
        self.snapshot.clear();
        self.snapshot
            .extend(self.pads.iter().filter(|p| p.is_connected()).cloned());
        &self.snapshot
    }

    /// Connected handles, cloned for iteration that may disconnect them
    pub(crate) fn connected_pads(&self) -> Vec<Gamepad> {
        self.pads
            .iter()
            .filter(|p| p.is_connected())
            .cloned()
            .collect()
    }

    pub(crate) fn connected_count(&self) -> usize {
        self.connected
    }

    /// Teardown: close every device without emitting notifications.
    /// Externally retained handles stay allocated until their last
    /// clone drops.
    pub(crate) fn close_all(&mut self) {
        for pad in &self.pads {
            if pad.force_disconnect() {
                self.connected -= 1;
            }
        }
        self.snapshot.clear();
        self.pads.clear();
    }
}
