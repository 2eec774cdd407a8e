//! Capability prober
//!
//! Decides whether a candidate device is a game controller and builds
//! its channel tables: source codes with per-channel fallbacks, hat
//! synthesis, extras, and initial state. The kernel queries live in
//! [`gather`]; everything after that is pure and unit-tested against
//! synthetic capability sets.

use std::path::{Path, PathBuf};

use evdev::{AbsoluteAxisCode, Device, FFEffectCode, KeyCode};
use tracing::debug;

use crate::error::ProbeError;
use crate::types::{
    hardware_guid, Axis, AxisChannel, AxisSource, Button, ButtonChannel, ButtonSource,
    GamepadInfo, HatDirection,
};

pub(crate) const ABS_HAT0X: u16 = 0x10;
pub(crate) const ABS_HAT0Y: u16 = 0x11;

/// Button-space key codes; anything below is keyboard/mouse territory
const BTN_RANGE: std::ops::RangeInclusive<u16> = 0x100..=0x2ff;

/// A device is a controller only if it claims one of these
const GAMEPAD_MARKERS: [u16; 5] = [
    KeyCode::BTN_SOUTH.0,
    KeyCode::BTN_EAST.0,
    KeyCode::BTN_NORTH.0,
    KeyCode::BTN_WEST.0,
    KeyCode::BTN_MODE.0,
];

struct StdAxis {
    axis: Axis,
    name: &'static str,
    code: u16,
    fallback: Option<u16>,
    trigger: bool,
}

impl StdAxis {
    const fn stick(axis: Axis, name: &'static str, code: AbsoluteAxisCode) -> Self {
        Self {
            axis,
            name,
            code: code.0,
            fallback: None,
            trigger: false,
        }
    }

    const fn trigger(
        axis: Axis,
        name: &'static str,
        code: AbsoluteAxisCode,
        fallback: AbsoluteAxisCode,
    ) -> Self {
        Self {
            axis,
            name,
            code: code.0,
            fallback: Some(fallback.0),
            trigger: true,
        }
    }
}

/// Standard analog channels with their native codes. Triggers carry a
/// fallback for devices that report them on the brake/gas axes.
const STD_AXES: [StdAxis; 6] = [
    StdAxis::stick(Axis::LeftX, "left_x", AbsoluteAxisCode::ABS_X),
    StdAxis::stick(Axis::LeftY, "left_y", AbsoluteAxisCode::ABS_Y),
    StdAxis::stick(Axis::RightX, "right_x", AbsoluteAxisCode::ABS_RX),
    StdAxis::stick(Axis::RightY, "right_y", AbsoluteAxisCode::ABS_RY),
    StdAxis::trigger(
        Axis::TriggerLeft,
        "trigger_left",
        AbsoluteAxisCode::ABS_Z,
        AbsoluteAxisCode::ABS_BRAKE,
    ),
    StdAxis::trigger(
        Axis::TriggerRight,
        "trigger_right",
        AbsoluteAxisCode::ABS_RZ,
        AbsoluteAxisCode::ABS_GAS,
    ),
];

struct StdButton {
    button: Button,
    name: &'static str,
    code: u16,
    fallback: Option<u16>,
}

impl StdButton {
    const fn key(button: Button, name: &'static str, code: KeyCode) -> Self {
        Self {
            button,
            name,
            code: code.0,
            fallback: None,
        }
    }

    const fn dpad(button: Button, name: &'static str, code: KeyCode, fallback: KeyCode) -> Self {
        Self {
            button,
            name,
            code: code.0,
            fallback: Some(fallback.0),
        }
    }
}

/// Standard digital channels. The D-pad carries trigger-happy fallbacks
/// for xpad-style devices that report directions there.
const STD_BUTTONS: [StdButton; 15] = [
    StdButton::key(Button::South, "south", KeyCode::BTN_SOUTH),
    StdButton::key(Button::East, "east", KeyCode::BTN_EAST),
    StdButton::key(Button::West, "west", KeyCode::BTN_WEST),
    StdButton::key(Button::North, "north", KeyCode::BTN_NORTH),
    StdButton::key(Button::Back, "back", KeyCode::BTN_SELECT),
    StdButton::key(Button::Guide, "guide", KeyCode::BTN_MODE),
    StdButton::key(Button::Start, "start", KeyCode::BTN_START),
    StdButton::key(Button::LeftStick, "left_stick", KeyCode::BTN_THUMBL),
    StdButton::key(Button::RightStick, "right_stick", KeyCode::BTN_THUMBR),
    StdButton::key(Button::LeftShoulder, "left_shoulder", KeyCode::BTN_TL),
    StdButton::key(Button::RightShoulder, "right_shoulder", KeyCode::BTN_TR),
    StdButton::dpad(
        Button::DpadUp,
        "dpad_up",
        KeyCode::BTN_DPAD_UP,
        KeyCode::BTN_TRIGGER_HAPPY1,
    ),
    StdButton::dpad(
        Button::DpadDown,
        "dpad_down",
        KeyCode::BTN_DPAD_DOWN,
        KeyCode::BTN_TRIGGER_HAPPY2,
    ),
    StdButton::dpad(
        Button::DpadLeft,
        "dpad_left",
        KeyCode::BTN_DPAD_LEFT,
        KeyCode::BTN_TRIGGER_HAPPY3,
    ),
    StdButton::dpad(
        Button::DpadRight,
        "dpad_right",
        KeyCode::BTN_DPAD_RIGHT,
        KeyCode::BTN_TRIGGER_HAPPY4,
    ),
];

/// One reported absolute axis, as gathered from the kernel.
/// `range` is `None` when the absinfo query failed; the channel then
/// degrades to unavailable instead of aborting the probe.
pub(crate) struct RawAxis {
    pub(crate) code: u16,
    pub(crate) range: Option<(i32, i32)>,
    pub(crate) value: i32,
}

/// Everything the prober reads from a device descriptor. Key and axis
/// lists are ascending by code; `key_down` holds currently-held keys.
pub(crate) struct RawCaps {
    pub(crate) name: String,
    pub(crate) bus: u16,
    pub(crate) vendor: u16,
    pub(crate) product: u16,
    pub(crate) version: u16,
    pub(crate) keys: Vec<u16>,
    pub(crate) key_down: Vec<u16>,
    pub(crate) axes: Vec<RawAxis>,
    pub(crate) has_rumble: bool,
}

/// Channel tables and initial state assembled from [`RawCaps`]
pub(crate) struct Assembled {
    pub(crate) info: GamepadInfo,
    pub(crate) axes: Vec<AxisChannel>,
    pub(crate) buttons: Vec<ButtonChannel>,
    pub(crate) axis_values: Vec<f32>,
    pub(crate) button_states: Vec<bool>,
    pub(crate) has_rumble: bool,
}

/// A successfully probed controller, ready for registration
pub(crate) struct ProbedPad {
    pub(crate) path: PathBuf,
    pub(crate) device: Device,
    pub(crate) assembled: Assembled,
}

/// Open and classify a candidate path. The open is read-write with a
/// read-only fallback (the evdev crate does this itself); the
/// descriptor is switched to non-blocking for later drains.
pub(crate) fn probe(path: &Path) -> Result<ProbedPad, ProbeError> {
    let mut device = Device::open(path).map_err(ProbeError::Open)?;
    device.set_nonblocking(true).map_err(ProbeError::Open)?;

    let caps = gather(&device);
    let assembled = assemble(&caps)?;

    debug!(
        "Probed {}: \"{}\" {:04x}:{:04x} axes={} buttons={} rumble={} standardized={}",
        path.display(),
        assembled.info.name,
        assembled.info.vendor,
        assembled.info.product,
        assembled.axes.len(),
        assembled.buttons.len(),
        assembled.has_rumble,
        assembled.info.standardized,
    );

    Ok(ProbedPad {
        path: path.to_path_buf(),
        device,
        assembled,
    })
}

/// Read capabilities, identity, ranges and current state. Query
/// failures degrade rather than failing the probe.
fn gather(device: &Device) -> RawCaps {
    let keys: Vec<u16> = device
        .supported_keys()
        .map(|set| set.iter().map(|k| k.0).collect())
        .unwrap_or_default();

    let abs_codes: Vec<u16> = device
        .supported_absolute_axes()
        .map(|set| set.iter().map(|a| a.0).collect())
        .unwrap_or_default();

    let abs_state = device.get_abs_state().ok();
    let mut axes: Vec<RawAxis> = abs_codes
        .into_iter()
        .map(|code| {
            match abs_state
                .as_ref()
                .and_then(|state| state.get(code as usize))
            {
                Some(info) => RawAxis {
                    code,
                    range: Some((info.minimum, info.maximum)),
                    value: info.value,
                },
                None => RawAxis {
                    code,
                    range: None,
                    value: 0,
                },
            }
        })
        .collect();
    axes.sort_unstable_by_key(|a| a.code);

    let key_down: Vec<u16> = device
        .get_key_state()
        .map(|set| set.iter().map(|k| k.0).collect())
        .unwrap_or_default();

    let id = device.input_id();
    let has_rumble = device
        .supported_ff()
        .is_some_and(|ff| ff.contains(FFEffectCode::FF_RUMBLE));

    RawCaps {
        name: device.name().unwrap_or("<unknown>").to_string(),
        bus: id.bus_type().0,
        vendor: id.vendor(),
        product: id.product(),
        version: id.version(),
        keys,
        key_down,
        axes,
        has_rumble,
    }
}

/// Build channel tables and initial state from raw capabilities.
/// Fails only when the device is not a controller.
pub(crate) fn assemble(caps: &RawCaps) -> Result<Assembled, ProbeError> {
    if !caps.keys.iter().any(|c| GAMEPAD_MARKERS.contains(c)) {
        return Err(ProbeError::NotGamepad);
    }

    let find_axis = |code: u16| caps.axes.iter().find(|a| a.code == code);
    let has_key = |code: u16| caps.keys.contains(&code);
    let key_down = |code: u16| caps.key_down.contains(&code);
    let hat_value = |code: u16| find_axis(code).map_or(0, |a| a.value);

    let mut axes = Vec::with_capacity(STD_AXES.len());
    let mut axis_values = Vec::with_capacity(STD_AXES.len());
    let mut claimed_axes = Vec::new();

    for std in &STD_AXES {
        let chosen = std::iter::once(std.code)
            .chain(std.fallback)
            .find(|&c| find_axis(c).is_some());
        let (source, raw_value) = match chosen {
            Some(code) => {
                claimed_axes.push(code);
                match find_axis(code) {
                    Some(RawAxis {
                        range: Some((min, max)),
                        value,
                        ..
                    }) => (
                        AxisSource {
                            code,
                            present: true,
                            trigger: std.trigger,
                            min: *min,
                            max: *max,
                        },
                        *value,
                    ),
                    _ => (AxisSource::absent(code, std.trigger), 0),
                }
            }
            None => (AxisSource::absent(std.code, std.trigger), 0),
        };
        axis_values.push(source.normalize(raw_value));
        axes.push(AxisChannel {
            name: std.name.to_string(),
            source,
        });
        debug_assert_eq!(std.axis.index(), axes.len() - 1);
    }

    let has_hat_x = find_axis(ABS_HAT0X).is_some();
    let has_hat_y = find_axis(ABS_HAT0Y).is_some();

    // Surplus axes become extra channels, ascending by raw code. Hat
    // axes are consumed by D-pad synthesis, never exposed as extras.
    for raw in &caps.axes {
        if claimed_axes.contains(&raw.code) || raw.code == ABS_HAT0X || raw.code == ABS_HAT0Y {
            continue;
        }
        let source = match raw.range {
            Some((min, max)) => AxisSource {
                code: raw.code,
                present: true,
                trigger: false,
                min,
                max,
            },
            None => AxisSource::absent(raw.code, false),
        };
        axis_values.push(source.normalize(raw.value));
        axes.push(AxisChannel {
            name: format!("abs_{}", raw.code),
            source,
        });
    }

    let mut buttons = Vec::with_capacity(STD_BUTTONS.len());
    let mut button_states = Vec::with_capacity(STD_BUTTONS.len());
    let mut claimed_keys = Vec::new();

    for std in &STD_BUTTONS {
        let chosen = std::iter::once(std.code)
            .chain(std.fallback)
            .find(|&c| has_key(c));
        let (source, pressed) = match chosen {
            Some(code) => {
                claimed_keys.push(code);
                (ButtonSource::Key(code), key_down(code))
            }
            None => match hat_direction(std.button) {
                Some(dir @ (HatDirection::Up | HatDirection::Down)) if has_hat_y => {
                    (ButtonSource::Hat(dir), hat_pressed(dir, hat_value(ABS_HAT0Y)))
                }
                Some(dir @ (HatDirection::Left | HatDirection::Right)) if has_hat_x => {
                    (ButtonSource::Hat(dir), hat_pressed(dir, hat_value(ABS_HAT0X)))
                }
                _ => (ButtonSource::Unmapped, false),
            },
        };
        button_states.push(pressed);
        buttons.push(ButtonChannel {
            name: std.name.to_string(),
            source,
        });
        debug_assert_eq!(std.button.index(), buttons.len() - 1);
    }

    // Surplus buttons, ascending by raw code
    for &code in &caps.keys {
        if !BTN_RANGE.contains(&code) || claimed_keys.contains(&code) {
            continue;
        }
        button_states.push(key_down(code));
        buttons.push(ButtonChannel {
            name: format!("btn_{}", code),
            source: ButtonSource::Key(code),
        });
    }

    let standardized = axes[..4].iter().all(|a| a.source.present)
        && buttons[..11]
            .iter()
            .all(|b| matches!(b.source, ButtonSource::Key(_)));

    let info = GamepadInfo {
        name: caps.name.clone(),
        bus: caps.bus,
        vendor: caps.vendor,
        product: caps.product,
        version: caps.version,
        guid: hardware_guid(caps.bus, caps.vendor, caps.product, caps.version),
        standardized,
    };

    Ok(Assembled {
        info,
        axes,
        buttons,
        axis_values,
        button_states,
        has_rumble: caps.has_rumble,
    })
}

fn hat_direction(button: Button) -> Option<HatDirection> {
    match button {
        Button::DpadUp => Some(HatDirection::Up),
        Button::DpadDown => Some(HatDirection::Down),
        Button::DpadLeft => Some(HatDirection::Left),
        Button::DpadRight => Some(HatDirection::Right),
        _ => None,
    }
}

/// Whether a hat axis reading means "pressed" for one direction.
/// Negative is up/left, positive is down/right, zero releases both.
pub(crate) fn hat_pressed(dir: HatDirection, value: i32) -> bool {
    match dir {
        HatDirection::Up | HatDirection::Left => value < 0,
        HatDirection::Down | HatDirection::Right => value > 0,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{STANDARD_AXES, STANDARD_BUTTONS};

    /// An xpad-style device: sticks, brake/gas triggers, hat D-pad,
    /// one vendor extra button, rumble.
    pub(crate) fn xbox_caps() -> RawCaps {
        let stick = |code| RawAxis {
            code,
            range: Some((-32768, 32767)),
            value: 0,
        };
        let trigger = |code| RawAxis {
            code,
            range: Some((0, 1023)),
            value: 0,
        };
        let hat = |code| RawAxis {
            code,
            range: Some((-1, 1)),
            value: 0,
        };
        RawCaps {
            name: "Test Pad".into(),
            bus: 0x03,
            vendor: 0x045e,
            product: 0x028e,
            version: 0x0114,
            keys: vec![
                KeyCode::BTN_SOUTH.0,
                KeyCode::BTN_EAST.0,
                KeyCode::BTN_NORTH.0,
                KeyCode::BTN_WEST.0,
                KeyCode::BTN_TL.0,
                KeyCode::BTN_TR.0,
                KeyCode::BTN_SELECT.0,
                KeyCode::BTN_START.0,
                KeyCode::BTN_MODE.0,
                KeyCode::BTN_THUMBL.0,
                KeyCode::BTN_THUMBR.0,
                KeyCode::BTN_TRIGGER_HAPPY5.0,
            ],
            key_down: vec![],
            axes: vec![
                stick(AbsoluteAxisCode::ABS_X.0),
                stick(AbsoluteAxisCode::ABS_Y.0),
                stick(AbsoluteAxisCode::ABS_RX.0),
                stick(AbsoluteAxisCode::ABS_RY.0),
                trigger(AbsoluteAxisCode::ABS_BRAKE.0),
                trigger(AbsoluteAxisCode::ABS_GAS.0),
                hat(ABS_HAT0X),
                hat(ABS_HAT0Y),
            ],
            has_rumble: true,
        }
    }

    #[test]
    fn test_keyboard_is_not_a_gamepad() {
        let caps = RawCaps {
            keys: vec![30, 31, 32], // KEY_A, KEY_S, KEY_D
            ..xbox_caps()
        };
        assert!(matches!(assemble(&caps), Err(ProbeError::NotGamepad)));
    }

    #[test]
    fn test_standard_channel_minimums() {
        let pad = assemble(&xbox_caps()).unwrap();
        assert!(pad.axes.len() >= STANDARD_AXES);
        assert!(pad.buttons.len() >= STANDARD_BUTTONS);
        assert_eq!(pad.axis_values.len(), pad.axes.len());
        assert_eq!(pad.button_states.len(), pad.buttons.len());
    }

    #[test]
    fn test_trigger_fallback_codes() {
        let pad = assemble(&xbox_caps()).unwrap();
        let tl = &pad.axes[Axis::TriggerLeft.index()].source;
        assert!(tl.present && tl.trigger);
        assert_eq!(tl.code, AbsoluteAxisCode::ABS_BRAKE.0);
        let tr = &pad.axes[Axis::TriggerRight.index()].source;
        assert_eq!(tr.code, AbsoluteAxisCode::ABS_GAS.0);
    }

    #[test]
    fn test_dpad_synthesized_from_hat() {
        let pad = assemble(&xbox_caps()).unwrap();
        assert_eq!(
            pad.buttons[Button::DpadUp.index()].source,
            ButtonSource::Hat(HatDirection::Up)
        );
        assert_eq!(
            pad.buttons[Button::DpadRight.index()].source,
            ButtonSource::Hat(HatDirection::Right)
        );
    }

    #[test]
    fn test_dpad_prefers_real_keys_over_hat() {
        let mut caps = xbox_caps();
        caps.keys.push(KeyCode::BTN_DPAD_UP.0);
        let pad = assemble(&caps).unwrap();
        assert_eq!(
            pad.buttons[Button::DpadUp.index()].source,
            ButtonSource::Key(KeyCode::BTN_DPAD_UP.0)
        );
        // Other directions still come from the hat
        assert_eq!(
            pad.buttons[Button::DpadDown.index()].source,
            ButtonSource::Hat(HatDirection::Down)
        );
    }

    #[test]
    fn test_extra_channels_named_from_raw_code() {
        let mut caps = xbox_caps();
        caps.axes.push(RawAxis {
            code: AbsoluteAxisCode::ABS_THROTTLE.0,
            range: Some((0, 255)),
            value: 0,
        });
        let pad = assemble(&caps).unwrap();
        let extra_axes: Vec<&str> = pad.axes[STANDARD_AXES..]
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(extra_axes, vec!["abs_6"]); // ABS_THROTTLE == 0x06
        let extra_buttons: Vec<&str> = pad.buttons[STANDARD_BUTTONS..]
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(extra_buttons, vec!["btn_708"]); // BTN_TRIGGER_HAPPY5
    }

    #[test]
    fn test_extra_ordering_is_ascending() {
        let mut caps = xbox_caps();
        caps.keys.push(KeyCode::BTN_TRIGGER_HAPPY7.0);
        caps.keys.insert(0, KeyCode::BTN_TRIGGER_HAPPY6.0);
        caps.keys.sort_unstable();
        let pad = assemble(&caps).unwrap();
        let extras: Vec<&str> = pad.buttons[STANDARD_BUTTONS..]
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        assert_eq!(extras, vec!["btn_708", "btn_709", "btn_710"]);
    }

    #[test]
    fn test_hat_axes_never_become_extras() {
        let pad = assemble(&xbox_caps()).unwrap();
        assert!(!pad.axes.iter().any(|a| a.name.starts_with("abs_16")
            || a.name.starts_with("abs_17")));
    }

    #[test]
    fn test_standardized_flag() {
        assert!(assemble(&xbox_caps()).unwrap().info.standardized);

        // Drop the right stick: no longer standardized
        let mut caps = xbox_caps();
        caps.axes
            .retain(|a| a.code != AbsoluteAxisCode::ABS_RX.0);
        let pad = assemble(&caps).unwrap();
        assert!(!pad.info.standardized);
        assert!(!pad.axes[Axis::RightX.index()].source.present);

        // Drop the guide button: no longer standardized
        let mut caps = xbox_caps();
        caps.keys.retain(|&c| c != KeyCode::BTN_MODE.0);
        assert!(!assemble(&caps).unwrap().info.standardized);
    }

    #[test]
    fn test_unreadable_range_degrades_channel() {
        let mut caps = xbox_caps();
        for axis in &mut caps.axes {
            axis.range = None;
        }
        let pad = assemble(&caps).unwrap();
        assert!(!pad.axes[Axis::LeftX.index()].source.present);
        assert_eq!(pad.axis_values[Axis::LeftX.index()], 0.0);
    }

    #[test]
    fn test_initial_state_reflects_hardware() {
        let mut caps = xbox_caps();
        caps.key_down.push(KeyCode::BTN_SOUTH.0);
        if let Some(hat_y) = caps.axes.iter_mut().find(|a| a.code == ABS_HAT0Y) {
            hat_y.value = -1;
        }
        if let Some(x) = caps
            .axes
            .iter_mut()
            .find(|a| a.code == AbsoluteAxisCode::ABS_X.0)
        {
            x.value = 32767;
        }
        let pad = assemble(&caps).unwrap();
        assert!(pad.button_states[Button::South.index()]);
        assert!(pad.button_states[Button::DpadUp.index()]);
        assert!(!pad.button_states[Button::DpadDown.index()]);
        assert_eq!(pad.axis_values[Axis::LeftX.index()], 1.0);
    }

    #[test]
    fn test_guid_in_info() {
        let pad = assemble(&xbox_caps()).unwrap();
        assert_eq!(&pad.info.guid[0..2], &[0x03, 0x00]);
        assert_eq!(&pad.info.guid[4..6], &[0x5e, 0x04]);
    }
}
