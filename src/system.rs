//! Controller subsystem entry point
//!
//! A [`GamepadSystem`] ties the pieces together: an initial directory
//! scan, live hot-plug discovery, the pending-add retry ring, per-device
//! input draining and handle reclamation. Everything runs inside
//! [`GamepadSystem::poll`], which the application calls from its event
//! loop; `poll_fds` exposes the fds to sleep on between calls.

use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::config::SystemConfig;
use crate::error::{is_transient_open, ProbeError};
use crate::hotplug::{self, DiscoveryStrategy, HotplugAction};
use crate::pad::{DrainStatus, Gamepad};
use crate::probe;
use crate::queue::PendingQueue;
use crate::registry::Registry;
use crate::types::{EventSink, SystemId};

static NEXT_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

/// The controller subsystem. One per process is typical, several are fine.
pub struct GamepadSystem {
    id: SystemId,
    config: SystemConfig,
    registry: Registry,
    strategy: Option<Box<dyn DiscoveryStrategy>>,
    pending: PendingQueue,
    /// Scratch buffer reused across poll cycles
    actions: Vec<HotplugAction>,
    need_rescan: bool,
}

impl GamepadSystem {
    /// Default-configured subsystem watching `/dev/input`
    pub fn new() -> Self {
        Self::with_config(SystemConfig::default())
    }

    pub fn with_config(config: SystemConfig) -> Self {
        let id = SystemId(NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed));
        let strategy = hotplug::init_strategy(config.hotplug, &config.device_dir);
        if let Some(strategy) = &strategy {
            debug!("Hot-plug discovery via {}", strategy.name());
        }
        let pending = PendingQueue::new(config.pending_capacity);
        Self {
            id,
            config,
            registry: Registry::new(),
            strategy,
            pending,
            actions: Vec::new(),
            need_rescan: false,
        }
    }

    /// Identity of this subsystem instance
    pub fn id(&self) -> SystemId {
        self.id
    }

    /// Enumerate the device directory and try every `event*` node.
    ///
    /// Emits a connection notification per recognized controller. Nodes
    /// that fail transiently land in the retry ring.
    pub fn scan(&mut self, sink: &mut dyn EventSink) -> io::Result<()> {
        let mut nodes: Vec<PathBuf> = std::fs::read_dir(&self.config.device_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| hotplug::is_event_node(&entry.file_name()))
            .map(|entry| entry.path())
            .collect();
        nodes.sort();
        for path in nodes {
            self.try_add(&path, sink);
        }
        Ok(())
    }

    /// Probe one candidate node and register it if it is a controller
    fn try_add(&mut self, path: &Path, sink: &mut dyn EventSink) {
        if self.registry.is_registered(path) {
            return;
        }
        let outcome = probe::probe(path).map(|probed| Gamepad::new(self.id, probed));
        self.admit(path, outcome, sink);
    }

    /// Route one probe outcome: register, retry later, or drop
    fn admit(
        &mut self,
        path: &Path,
        outcome: Result<Gamepad, ProbeError>,
        sink: &mut dyn EventSink,
    ) {
        match outcome {
            Ok(pad) => self.registry.register(pad, sink),
            Err(ProbeError::NotGamepad) => {
                debug!("{} is not a game controller", path.display());
            }
            Err(ProbeError::Open(e)) if is_transient_open(&e) => {
                debug!("{} not openable yet ({e}), queueing retry", path.display());
                self.pending.push(path.to_path_buf());
            }
            Err(ProbeError::Open(e)) => {
                warn!("Could not open {}: {e}", path.display());
            }
        }
    }

    /// One subsystem cycle: hot-plug intake, one pending retry, input
    /// draining, handle reclamation.
    ///
    /// Retries are rate-limited to a single candidate per cycle so a
    /// misbehaving node cannot monopolize the loop.
    pub fn poll(&mut self, sink: &mut dyn EventSink) {
        self.drain_hotplug(sink);

        if self.need_rescan {
            self.need_rescan = false;
            self.pending.clear();
            if let Err(e) = self.scan(sink) {
                warn!(
                    "Rescan of {} failed: {e}",
                    self.config.device_dir.display()
                );
            }
        } else if let Some(path) = self.pending.pop() {
            self.try_add(&path, sink);
        }

        for pad in self.registry.connected_pads() {
            if pad.drain_events(sink) == DrainStatus::Disconnected {
                self.registry.disconnect(&pad, sink);
            }
        }

        self.registry.reclaim();
    }

    fn drain_hotplug(&mut self, sink: &mut dyn EventSink) {
        let Some(strategy) = &mut self.strategy else {
            return;
        };
        let mut actions = std::mem::take(&mut self.actions);
        if let Err(e) = strategy.drain(&mut actions) {
            warn!("Hot-plug drain via {} failed: {e}", strategy.name());
        }
        for action in actions.drain(..) {
            match action {
                HotplugAction::Add(path) => {
                    if !self.registry.is_registered(&path) {
                        self.pending.push(path);
                    }
                }
                HotplugAction::Remove(path) => {
                    self.pending.remove(&path);
                    if let Some(pad) = self.registry.find_by_path(&path) {
                        self.registry.disconnect(&pad, sink);
                    }
                }
                HotplugAction::Rescan => self.need_rescan = true,
            }
        }
        self.actions = actions;
    }

    /// Fds the caller can block on until the next `poll` is worthwhile:
    /// the discovery socket plus every connected device
    pub fn poll_fds(&mut self, out: &mut Vec<RawFd>) {
        if let Some(strategy) = &self.strategy {
            out.push(strategy.raw_fd());
        }
        for pad in self.registry.snapshot() {
            if let Some(fd) = pad.raw_fd() {
                out.push(fd);
            }
        }
    }

    /// Currently connected controllers, in registration order (newest
    /// first). The slice is valid until the next `poll` or `scan`.
    pub fn snapshot(&mut self) -> &[Gamepad] {
        self.registry.snapshot()
    }

    pub fn connected_count(&self) -> usize {
        self.registry.connected_count()
    }

    /// Retry candidates currently waiting in the ring
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for GamepadSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for GamepadSystem {
    /// Teardown closes every device silently; retained handles simply
    /// observe themselves disconnected.
    fn drop(&mut self) {
        self.registry.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HotplugPreference;
    use crate::probe::assemble;
    use crate::probe::tests::xbox_caps;
    use crate::types::PadEvent;

    fn quiet_system(dir: &Path) -> GamepadSystem {
        GamepadSystem::with_config(SystemConfig {
            device_dir: dir.to_path_buf(),
            pending_capacity: 8,
            hotplug: HotplugPreference::Disabled,
        })
    }

    #[test]
    fn test_system_ids_are_unique() {
        let a = quiet_system(Path::new("/nonexistent"));
        let b = quiet_system(Path::new("/nonexistent"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_scan_missing_directory_errors() {
        let mut sys = quiet_system(Path::new("/nonexistent/input-nodes"));
        let mut events = Vec::new();
        let err = sys.scan(&mut |e| events.push(e)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(events.is_empty());
    }

    #[test]
    fn test_scan_ignores_non_event_nodes() {
        let dir = std::env::temp_dir().join(format!("evpad-scan-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("js0"), b"").unwrap();
        std::fs::write(dir.join("by-id"), b"").unwrap();

        let mut sys = quiet_system(&dir);
        let mut events: Vec<PadEvent> = Vec::new();
        sys.scan(&mut |e| events.push(e)).unwrap();
        assert!(events.is_empty());
        assert_eq!(sys.connected_count(), 0);
        assert_eq!(sys.pending_count(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_plain_file_event_node_is_rejected_not_queued() {
        // A regular file is not an evdev device; the open fails with a
        // definitive error, so nothing lands in the retry ring.
        let dir = std::env::temp_dir().join(format!("evpad-reject-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("event0"), b"not a device").unwrap();

        let mut sys = quiet_system(&dir);
        let mut events: Vec<PadEvent> = Vec::new();
        sys.scan(&mut |e| events.push(e)).unwrap();
        assert!(events.is_empty());
        assert_eq!(sys.connected_count(), 0);
        assert_eq!(sys.pending_count(), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_transient_failure_retries_to_single_connection() {
        let mut sys = quiet_system(Path::new("/nonexistent"));
        let path = Path::new("/dev/input/event7");
        let mut events: Vec<PadEvent> = Vec::new();
        let busy = || ProbeError::Open(io::Error::from_raw_os_error(libc::EBUSY));

        // Announced but not openable yet: queued, no notification
        sys.admit(path, Err(busy()), &mut |e| events.push(e));
        assert_eq!(sys.pending_count(), 1);
        assert!(events.is_empty());

        // Next cycle's attempt still fails transiently: requeued once
        let retry = sys.pending.pop().unwrap();
        assert_eq!(retry, path);
        sys.admit(&retry, Err(busy()), &mut |e| events.push(e));
        assert_eq!(sys.pending_count(), 1);
        assert!(events.is_empty());

        // The attempt after that succeeds: exactly one connection-added
        let retry = sys.pending.pop().unwrap();
        let pad = Gamepad::disembodied("/dev/input/event7", assemble(&xbox_caps()).unwrap());
        sys.admit(&retry, Ok(pad), &mut |e| events.push(e));
        assert_eq!(sys.connected_count(), 1);
        assert_eq!(sys.pending_count(), 0);
        assert!(matches!(
            events.as_slice(),
            [PadEvent::Connection {
                connected: true,
                ..
            }]
        ));

        // A re-announced registered path is dropped before probing
        sys.try_add(&retry, &mut |e| events.push(e));
        assert_eq!(sys.pending_count(), 0);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_poll_without_devices_is_a_noop() {
        let mut sys = quiet_system(Path::new("/nonexistent"));
        let mut events: Vec<PadEvent> = Vec::new();
        sys.poll(&mut |e| events.push(e));
        assert!(events.is_empty());
        let mut fds = Vec::new();
        sys.poll_fds(&mut fds);
        assert!(fds.is_empty());
    }
}
