//! Common types for the controller subsystem

use crate::pad::Gamepad;

/// Number of standard analog channels every handle exposes
pub const STANDARD_AXES: usize = 6;

/// Number of standard digital channels every handle exposes
pub const STANDARD_BUTTONS: usize = 15;

/// Standard analog channels, in channel-index order: the two sticks,
/// then the left and right analog triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    LeftX,
    LeftY,
    RightX,
    RightY,
    TriggerLeft,
    TriggerRight,
}

impl Axis {
    /// Channel index of this axis in a handle's analog channel table
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Standard digital channels, in channel-index order.
///
/// The eleven physical buttons come first, then the four D-pad
/// directions (which may be synthesized from a hat switch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    /// Bottom face button (A / Cross)
    South,
    /// Right face button (B / Circle)
    East,
    /// Left face button (X / Square)
    West,
    /// Top face button (Y / Triangle)
    North,
    /// Back / Select
    Back,
    /// Guide / Home
    Guide,
    /// Start / Menu
    Start,
    /// Left stick click
    LeftStick,
    /// Right stick click
    RightStick,
    /// Left bumper
    LeftShoulder,
    /// Right bumper
    RightShoulder,
    /// D-pad up
    DpadUp,
    /// D-pad down
    DpadDown,
    /// D-pad left
    DpadLeft,
    /// D-pad right
    DpadRight,
}

impl Button {
    /// Channel index of this button in a handle's digital channel table
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One of the four directions synthesized from a two-axis hat switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HatDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Where an analog channel's values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSource {
    /// Native `ABS_*` axis code
    pub code: u16,
    /// Whether the device actually reports this axis
    pub present: bool,
    /// Trigger channels normalize to `[0,1]`, sticks to `[-1,1]`
    pub trigger: bool,
    /// Observed minimum raw value
    pub min: i32,
    /// Observed maximum raw value
    pub max: i32,
}

impl AxisSource {
    /// An axis the device does not report; always normalizes to zero
    pub(crate) fn absent(code: u16, trigger: bool) -> Self {
        Self {
            code,
            present: false,
            trigger,
            min: 0,
            max: 0,
        }
    }

    /// Normalize a raw reading through this channel's recorded range.
    ///
    /// Triggers map `[min,max]` to `[0,1]`; symmetric channels map about
    /// the range midpoint to `[-1,1]`. Both clamp, and a degenerate
    /// range (`max <= min`) yields `0.0`.
    pub fn normalize(&self, raw: i32) -> f32 {
        if !self.present || self.max <= self.min {
            return 0.0;
        }
        let span = (self.max - self.min) as f32;
        let unit = (raw - self.min) as f32 / span;
        if self.trigger {
            unit.clamp(0.0, 1.0)
        } else {
            (unit * 2.0 - 1.0).clamp(-1.0, 1.0)
        }
    }
}

/// Where a digital channel's state comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonSource {
    /// The device has no physical source for this channel
    Unmapped,
    /// Native `BTN_*`/`KEY_*` code
    Key(u16),
    /// Synthesized from the sign of a hat axis
    Hat(HatDirection),
}

/// Metadata for one analog channel
#[derive(Debug, Clone)]
pub struct AxisChannel {
    /// Display name (`left_x`, `trigger_right`, `abs_40`, ...)
    pub name: String,
    pub source: AxisSource,
}

/// Metadata for one digital channel
#[derive(Debug, Clone)]
pub struct ButtonChannel {
    /// Display name (`south`, `dpad_up`, `btn_704`, ...)
    pub name: String,
    pub source: ButtonSource,
}

/// Hardware identity of a controller
#[derive(Debug, Clone)]
pub struct GamepadInfo {
    /// Kernel-reported display name
    pub name: String,
    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
    /// 16-byte GUID assembled from bus/vendor/product/version
    pub guid: [u8; 16],
    /// All four primary stick axes and all eleven primary buttons present
    pub standardized: bool,
}

/// Assemble the portable 16-byte hardware GUID.
///
/// Little-endian u16 fields at 4-byte strides: bus, vendor, product,
/// version, with the intervening bytes zero.
pub(crate) fn hardware_guid(bus: u16, vendor: u16, product: u16, version: u16) -> [u8; 16] {
    let mut guid = [0u8; 16];
    guid[0..2].copy_from_slice(&bus.to_le_bytes());
    guid[4..6].copy_from_slice(&vendor.to_le_bytes());
    guid[8..10].copy_from_slice(&product.to_le_bytes());
    guid[12..14].copy_from_slice(&version.to_le_bytes());
    guid
}

/// Identity of the owning [`GamepadSystem`](crate::GamepadSystem).
///
/// Handles outlive disconnection and may outlive their system; the owner
/// id lets callers route a handle back to the context that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub(crate) u64);

/// Notifications emitted by the subsystem
#[derive(Clone)]
pub enum PadEvent {
    /// A controller connected (`true`) or disconnected (`false`)
    Connection { pad: Gamepad, connected: bool },
    /// A digital channel changed state
    Button {
        pad: Gamepad,
        /// Digital channel index
        channel: usize,
        pressed: bool,
    },
}

impl std::fmt::Debug for PadEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PadEvent::Connection { pad, connected } => f
                .debug_struct("Connection")
                .field("pad", &pad.info().name)
                .field("connected", connected)
                .finish(),
            PadEvent::Button {
                pad,
                channel,
                pressed,
            } => f
                .debug_struct("Button")
                .field("pad", &pad.info().name)
                .field("channel", channel)
                .field("pressed", pressed)
                .finish(),
        }
    }
}

/// Receiver for subsystem notifications.
///
/// The subsystem only calls this seam; how and when the application
/// consumes the result is the caller's business. Implemented for any
/// `FnMut(PadEvent)` closure.
pub trait EventSink {
    /// Deliver one notification
    fn on_event(&mut self, event: PadEvent);
}

impl<F: FnMut(PadEvent)> EventSink for F {
    fn on_event(&mut self, event: PadEvent) {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stick(min: i32, max: i32) -> AxisSource {
        AxisSource {
            code: 0,
            present: true,
            trigger: false,
            min,
            max,
        }
    }

    fn trigger(min: i32, max: i32) -> AxisSource {
        AxisSource {
            code: 2,
            present: true,
            trigger: true,
            min,
            max,
        }
    }

    #[test]
    fn test_stick_bounds() {
        let s = stick(-32768, 32767);
        assert_eq!(s.normalize(-32768), -1.0);
        assert_eq!(s.normalize(32767), 1.0);
        assert!(s.normalize(0).abs() < 1e-3);
    }

    #[test]
    fn test_trigger_bounds() {
        let t = trigger(0, 255);
        assert_eq!(t.normalize(0), 0.0);
        assert_eq!(t.normalize(255), 1.0);
        assert!((t.normalize(128) - 0.502).abs() < 1e-3);
    }

    #[test]
    fn test_normalize_clamps_out_of_range() {
        let t = trigger(0, 255);
        assert_eq!(t.normalize(-50), 0.0);
        assert_eq!(t.normalize(400), 1.0);
        let s = stick(-100, 100);
        assert_eq!(s.normalize(-500), -1.0);
        assert_eq!(s.normalize(500), 1.0);
    }

    #[test]
    fn test_normalize_is_monotonic() {
        let s = stick(-7, 13);
        let mut last = f32::MIN;
        for raw in -7..=13 {
            let v = s.normalize(raw);
            assert!(v >= last, "normalize not monotonic at {raw}");
            last = v;
        }
    }

    #[test]
    fn test_degenerate_range_is_zero() {
        let s = stick(10, 10);
        assert_eq!(s.normalize(10), 0.0);
        let t = trigger(5, -5);
        assert_eq!(t.normalize(0), 0.0);
    }

    #[test]
    fn test_absent_axis_is_zero() {
        let a = AxisSource::absent(3, false);
        assert_eq!(a.normalize(12345), 0.0);
    }

    #[test]
    fn test_guid_layout() {
        let guid = hardware_guid(0x0003, 0x045e, 0x028e, 0x0114);
        assert_eq!(
            guid,
            [
                0x03, 0x00, 0x00, 0x00, 0x5e, 0x04, 0x00, 0x00, 0x8e, 0x02, 0x00, 0x00, 0x14,
                0x01, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_standard_channel_indices() {
        assert_eq!(Axis::TriggerRight.index(), STANDARD_AXES - 1);
        assert_eq!(Button::DpadRight.index(), STANDARD_BUTTONS - 1);
        assert_eq!(Button::RightShoulder.index(), 10);
    }
}
