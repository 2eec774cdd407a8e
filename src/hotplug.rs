//! Hot-plug discovery
//!
//! Two interchangeable strategies feed device arrival and departure into
//! the poll loop. The primary one listens on a udev monitor socket for
//! the `input` subsystem; when udev is unavailable (containers, stripped
//! systems) an inotify watch on the device directory stands in. Both are
//! non-blocking and drained once per poll cycle.

use std::ffi::OsStr;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use inotify::{Inotify, WatchMask};
use tracing::{debug, warn};

use crate::config::HotplugPreference;

/// One discovery observation, ready for the poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HotplugAction {
    /// A device node appeared or became accessible
    Add(PathBuf),
    /// A device node went away
    Remove(PathBuf),
    /// The watch lost track of the directory; rescan from scratch
    Rescan,
}

/// A non-blocking source of hot-plug observations
pub(crate) trait DiscoveryStrategy {
    fn name(&self) -> &'static str;

    /// Pollable fd that signals readable when observations are waiting
    fn raw_fd(&self) -> RawFd;

    /// Drain every queued observation into `out` without blocking
    fn drain(&mut self, out: &mut Vec<HotplugAction>) -> io::Result<()>;
}

/// Whether a directory entry names an evdev device node (`event<N>`)
pub(crate) fn is_event_node(name: &OsStr) -> bool {
    let Some(name) = name.to_str() else {
        return false;
    };
    match name.strip_prefix("event") {
        Some(rest) => !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// udev monitor socket filtered to the `input` subsystem
pub(crate) struct UdevMonitor {
    socket: udev::MonitorSocket,
}

impl UdevMonitor {
    pub(crate) fn new() -> io::Result<Self> {
        let socket = udev::MonitorBuilder::new()?
            .match_subsystem("input")?
            .listen()?;
        // The socket must never stall the poll loop
        let fd = socket.as_raw_fd();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { socket })
    }
}

impl DiscoveryStrategy for UdevMonitor {
    fn name(&self) -> &'static str {
        "udev monitor"
    }

    fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn drain(&mut self, out: &mut Vec<HotplugAction>) -> io::Result<()> {
        for event in self.socket.iter() {
            let Some(devnode) = event.devnode() else {
                // Parent devices and js nodes without a devnode
                continue;
            };
            let Some(file_name) = devnode.file_name() else {
                continue;
            };
            if !is_event_node(file_name) {
                continue;
            }
            match event.event_type() {
                udev::EventType::Add => out.push(HotplugAction::Add(devnode.to_path_buf())),
                udev::EventType::Remove => out.push(HotplugAction::Remove(devnode.to_path_buf())),
                _ => {}
            }
        }
        Ok(())
    }
}

/// inotify watch on the device directory, for systems without udev
#[derive(Debug)]
pub(crate) struct DirWatch {
    inotify: Inotify,
    dir: PathBuf,
}

fn dir_watch_mask() -> WatchMask {
    WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::ATTRIB
        | WatchMask::DELETE_SELF
        | WatchMask::MOVE_SELF
}

impl DirWatch {
    pub(crate) fn new(dir: &Path) -> io::Result<Self> {
        let inotify = Inotify::init()?;
        inotify.watches().add(dir, dir_watch_mask())?;
        Ok(Self {
            inotify,
            dir: dir.to_path_buf(),
        })
    }

    /// Re-establish the watch after the directory itself moved or was
    /// recreated. Failure here means hotplug is gone until re-init.
    fn rearm(&mut self) -> io::Result<()> {
        self.inotify.watches().add(&self.dir, dir_watch_mask())?;
        Ok(())
    }
}

impl DiscoveryStrategy for DirWatch {
    fn name(&self) -> &'static str {
        "directory watch"
    }

    fn raw_fd(&self) -> RawFd {
        self.inotify.as_raw_fd()
    }

    fn drain(&mut self, out: &mut Vec<HotplugAction>) -> io::Result<()> {
        use inotify::EventMask;

        let mut buffer = [0u8; 1024];
        loop {
            let events = match self.inotify.read_events(&mut buffer) {
                Ok(events) => events,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            };
            let mut lost_dir = false;
            for event in events {
                if event
                    .mask
                    .intersects(EventMask::DELETE_SELF | EventMask::MOVE_SELF)
                {
                    lost_dir = true;
                    continue;
                }
                let Some(name) = event.name else {
                    continue;
                };
                if !is_event_node(name) {
                    continue;
                }
                let path = self.dir.join(name);
                // ATTRIB covers the common case of a node created before
                // udev rules made it readable
                if event
                    .mask
                    .intersects(EventMask::CREATE | EventMask::MOVED_TO | EventMask::ATTRIB)
                {
                    out.push(HotplugAction::Add(path));
                } else if event
                    .mask
                    .intersects(EventMask::DELETE | EventMask::MOVED_FROM)
                {
                    out.push(HotplugAction::Remove(path));
                }
            }
            if lost_dir {
                if let Err(e) = self.rearm() {
                    debug!("Could not re-arm directory watch: {e}");
                }
                out.push(HotplugAction::Rescan);
            }
        }
    }
}

/// Build the discovery strategy the configuration asks for.
///
/// `Auto` tries udev first and falls back to the directory watch; either
/// failing is logged, not fatal. `None` means hotplug is off and only
/// explicit rescans will notice new devices.
pub(crate) fn init_strategy(
    preference: HotplugPreference,
    device_dir: &Path,
) -> Option<Box<dyn DiscoveryStrategy>> {
    match preference {
        HotplugPreference::Disabled => None,
        HotplugPreference::DeviceManager => match UdevMonitor::new() {
            Ok(monitor) => Some(Box::new(monitor)),
            Err(e) => {
                warn!("udev monitor unavailable: {e}");
                None
            }
        },
        HotplugPreference::DirectoryWatch => match DirWatch::new(device_dir) {
            Ok(watch) => Some(Box::new(watch)),
            Err(e) => {
                warn!("Directory watch on {} unavailable: {e}", device_dir.display());
                None
            }
        },
        HotplugPreference::Auto => match UdevMonitor::new() {
            Ok(monitor) => Some(Box::new(monitor)),
            Err(e) => {
                debug!("udev monitor unavailable ({e}), trying directory watch");
                match DirWatch::new(device_dir) {
                    Ok(watch) => Some(Box::new(watch)),
                    Err(e) => {
                        warn!("No hot-plug strategy available: {e}");
                        None
                    }
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_node_names() {
        assert!(is_event_node(OsStr::new("event0")));
        assert!(is_event_node(OsStr::new("event27")));
        assert!(!is_event_node(OsStr::new("event")));
        assert!(!is_event_node(OsStr::new("event2a")));
        assert!(!is_event_node(OsStr::new("js0")));
        assert!(!is_event_node(OsStr::new("mouse1")));
        assert!(!is_event_node(OsStr::new("by-id")));
    }

    #[test]
    fn test_disabled_preference_yields_no_strategy() {
        let strategy = init_strategy(HotplugPreference::Disabled, Path::new("/dev/input"));
        assert!(strategy.is_none());
    }

    #[test]
    fn test_dir_watch_missing_directory_fails() {
        let err = DirWatch::new(Path::new("/nonexistent/input-nodes")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_dir_watch_reports_created_nodes() {
        let dir = std::env::temp_dir().join(format!("evpad-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut watch = DirWatch::new(&dir).unwrap();

        std::fs::write(dir.join("event5"), b"").unwrap();
        std::fs::write(dir.join("js0"), b"").unwrap();

        let mut actions = Vec::new();
        watch.drain(&mut actions).unwrap();
        assert_eq!(actions, vec![HotplugAction::Add(dir.join("event5"))]);

        std::fs::remove_file(dir.join("event5")).unwrap();
        actions.clear();
        watch.drain(&mut actions).unwrap();
        assert_eq!(actions, vec![HotplugAction::Remove(dir.join("event5"))]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
