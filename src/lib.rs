//! Game-controller input over the Linux evdev interface.
//!
//! A [`GamepadSystem`] discovers controllers under `/dev/input`, keeps a
//! registry of refcounted [`Gamepad`] handles, and surfaces connection
//! and button notifications through an [`EventSink`]. Discovery is live:
//! a udev monitor (or an inotify directory watch where udev is missing)
//! feeds hot-plug into the poll loop, with a bounded retry ring for
//! nodes that are announced before they become openable.
//!
//! ```no_run
//! use evpad::{GamepadSystem, PadEvent};
//!
//! let mut system = GamepadSystem::new();
//! let mut sink = |event: PadEvent| println!("{event:?}");
//! system.scan(&mut sink)?;
//! loop {
//!     system.poll(&mut sink);
//!     for pad in system.snapshot() {
//!         let _left_x = pad.axis(evpad::Axis::LeftX);
//!     }
//!     # break;
//! }
//! # Ok::<(), std::io::Error>(())
//! ```

mod config;
mod error;
mod hotplug;
mod pad;
mod probe;
mod queue;
mod registry;
mod system;
mod types;

pub use config::{HotplugPreference, SystemConfig};
pub use error::{PadError, ProbeError};
pub use pad::{Gamepad, MetricsSnapshot, HAPTIC_CHANNELS};
pub use system::GamepadSystem;
pub use types::{
    Axis, AxisChannel, AxisSource, Button, ButtonChannel, ButtonSource, EventSink, GamepadInfo,
    HatDirection, PadEvent, SystemId, STANDARD_AXES, STANDARD_BUTTONS,
};
