//! Controller handle
//!
//! A [`Gamepad`] is a cheap-to-clone shared handle: cloning retains,
//! dropping releases, both safe from any thread. The open descriptor
//! and any uploaded effect become `None` on disconnect while the
//! handle survives until it is both disconnected and unreferenced.
//! All other mutation happens on the owner thread.

use std::any::Any;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use evdev::{
    Device, EventSummary, FFEffect, FFEffectData, FFEffectKind, FFReplay, FFTrigger,
    SynchronizationCode,
};
use tracing::debug;

use crate::error::PadError;
use crate::probe::{hat_pressed, ProbedPad, ABS_HAT0X, ABS_HAT0Y};
use crate::types::{
    Axis, AxisChannel, Button, ButtonChannel, ButtonSource, EventSink, GamepadInfo, HatDirection,
    PadEvent, SystemId,
};

/// Number of haptic channels a rumble-capable device exposes:
/// low-frequency (strong) and high-frequency (weak)
pub const HAPTIC_CHANNELS: usize = 2;

/// Per-handle counters, reset on demand
#[derive(Default)]
struct PadMetrics {
    events: AtomicU64,
    button_changes: AtomicU64,
    axis_updates: AtomicU64,
    sync_drops: AtomicU64,
}

/// Point-in-time copy of a handle's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Raw input records drained from the device
    pub events: u64,
    /// Digital channel transitions that produced a notification
    pub button_changes: u64,
    /// Analog channel re-normalizations
    pub axis_updates: u64,
    /// Kernel-reported event-buffer overruns (`SYN_DROPPED`)
    pub sync_drops: u64,
}

/// Resources that only exist while the device is plugged in.
/// Field order matters: the effect must be removed before the
/// descriptor closes.
struct PadIo {
    effect: Option<FFEffect>,
    device: Device,
}

/// Owner-thread mutable state
struct PadLive {
    io: Option<PadIo>,
    axis_values: Vec<f32>,
    button_states: Vec<bool>,
    haptic_levels: [f32; HAPTIC_CHANNELS],
}

struct PadShared {
    owner: SystemId,
    path: PathBuf,
    info: GamepadInfo,
    axes: Vec<AxisChannel>,
    buttons: Vec<ButtonChannel>,
    haptic_count: usize,
    connected: AtomicBool,
    metrics: PadMetrics,
    user_data: Mutex<Option<Box<dyn Any + Send>>>,
    live: Mutex<PadLive>,
}

/// Shared, reference-counted handle to one physical controller
#[derive(Clone)]
pub struct Gamepad {
    inner: Arc<PadShared>,
}

/// What a drain pass learned about the device
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DrainStatus {
    Alive,
    Disconnected,
}

impl Gamepad {
    pub(crate) fn new(owner: SystemId, probed: ProbedPad) -> Self {
        let ProbedPad {
            path,
            device,
            assembled,
        } = probed;
        Self::from_parts(
            owner,
            path,
            assembled,
            Some(PadIo {
                effect: None,
                device,
            }),
        )
    }

    fn from_parts(
        owner: SystemId,
        path: PathBuf,
        assembled: crate::probe::Assembled,
        io: Option<PadIo>,
    ) -> Self {
        let haptic_count = if assembled.has_rumble {
            HAPTIC_CHANNELS
        } else {
            0
        };
        Self {
            inner: Arc::new(PadShared {
                owner,
                path,
                info: assembled.info,
                axes: assembled.axes,
                buttons: assembled.buttons,
                haptic_count,
                connected: AtomicBool::new(true),
                metrics: PadMetrics::default(),
                user_data: Mutex::new(None),
                live: Mutex::new(PadLive {
                    io,
                    axis_values: assembled.axis_values,
                    button_states: assembled.button_states,
                    haptic_levels: [0.0; HAPTIC_CHANNELS],
                }),
            }),
        }
    }

    fn live(&self) -> MutexGuard<'_, PadLive> {
        self.inner.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn user_data(&self) -> MutexGuard<'_, Option<Box<dyn Any + Send>>> {
        self.inner
            .user_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn info(&self) -> &GamepadInfo {
        &self.inner.info
    }

    /// Device node this handle was opened from
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Id of the system that produced this handle
    pub fn owner(&self) -> SystemId {
        self.inner.owner
    }

    /// Whether the device is still plugged in and owned by this handle
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// A lost handle survives only for callers that still retain it
    pub fn is_lost(&self) -> bool {
        !self.is_connected()
    }

    /// Total strong references, including the registry's own.
    /// Diagnostic only; racy by nature.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Strong references besides the one held by `self`
    pub(crate) fn external_refs(&self) -> usize {
        Arc::strong_count(&self.inner) - 1
    }

    /// Number of analog channels (standard six plus extras)
    pub fn axis_count(&self) -> usize {
        self.inner.axes.len()
    }

    /// Number of digital channels (standard fifteen plus extras)
    pub fn button_count(&self) -> usize {
        self.inner.buttons.len()
    }

    /// Number of haptic channels (2 for rumble-capable devices, else 0)
    pub fn haptic_count(&self) -> usize {
        self.inner.haptic_count
    }

    /// Analog channel metadata, indexed like the live value array
    pub fn axes(&self) -> &[AxisChannel] {
        &self.inner.axes
    }

    /// Digital channel metadata, indexed like the live state array
    pub fn buttons(&self) -> &[ButtonChannel] {
        &self.inner.buttons
    }

    /// Copy of all live analog values, already normalized
    pub fn axis_values(&self) -> Vec<f32> {
        self.live().axis_values.clone()
    }

    /// Copy of all live digital states
    pub fn button_states(&self) -> Vec<bool> {
        self.live().button_states.clone()
    }

    pub fn axis_value(&self, channel: usize) -> Option<f32> {
        self.live().axis_values.get(channel).copied()
    }

    pub fn button_state(&self, channel: usize) -> Option<bool> {
        self.live().button_states.get(channel).copied()
    }

    pub fn axis(&self, axis: Axis) -> f32 {
        self.axis_value(axis.index()).unwrap_or(0.0)
    }

    pub fn button(&self, button: Button) -> bool {
        self.button_state(button.index()).unwrap_or(false)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events: self.inner.metrics.events.load(Ordering::Relaxed),
            button_changes: self.inner.metrics.button_changes.load(Ordering::Relaxed),
            axis_updates: self.inner.metrics.axis_updates.load(Ordering::Relaxed),
            sync_drops: self.inner.metrics.sync_drops.load(Ordering::Relaxed),
        }
    }

    pub fn reset_metrics(&self) {
        self.inner.metrics.events.store(0, Ordering::Relaxed);
        self.inner.metrics.button_changes.store(0, Ordering::Relaxed);
        self.inner.metrics.axis_updates.store(0, Ordering::Relaxed);
        self.inner.metrics.sync_drops.store(0, Ordering::Relaxed);
    }

    /// Attach caller-owned data to this handle
    pub fn set_user_data(&self, data: Option<Box<dyn Any + Send>>) {
        *self.user_data() = data;
    }

    /// Access the caller-owned data attached to this handle
    pub fn with_user_data<R>(&self, f: impl FnOnce(Option<&mut (dyn Any + Send)>) -> R) -> R {
        f(self.user_data().as_deref_mut())
    }

    /// Descriptor for poll-fd aggregation, while connected
    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.live().io.as_ref().map(|io| io.device.as_raw_fd())
    }

    /// Close the descriptor (removing any uploaded effect first) and
    /// mark the handle lost. Idempotent; returns whether this call did
    /// the transition.
    pub(crate) fn force_disconnect(&self) -> bool {
        if !self.inner.connected.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.live().io = None;
        true
    }

    /// Non-blockingly drain all pending input records, updating channel
    /// state and emitting button-change notifications. A read error
    /// other than "would block" reports the device as gone.
    pub(crate) fn drain_events(&self, sink: &mut dyn EventSink) -> DrainStatus {
        let metrics = &self.inner.metrics;
        let mut changed: Vec<(usize, bool)> = Vec::new();
        let status = {
            let mut live = self.live();
            let PadLive {
                io,
                axis_values,
                button_states,
                ..
            } = &mut *live;
            let Some(io) = io.as_mut() else {
                return DrainStatus::Disconnected;
            };
            loop {
                match io.device.fetch_events() {
                    Ok(events) => {
                        let mut drained = 0u64;
                        for event in events {
                            drained += 1;
                            match event.destructure() {
                                EventSummary::Key(ev, code, _) => apply_key(
                                    &self.inner.buttons,
                                    button_states,
                                    code.0,
                                    ev.value() != 0,
                                    &mut changed,
                                ),
                                EventSummary::AbsoluteAxis(ev, code, _) => {
                                    if apply_abs(
                                        &self.inner.axes,
                                        &self.inner.buttons,
                                        axis_values,
                                        button_states,
                                        code.0,
                                        ev.value(),
                                        &mut changed,
                                    ) {
                                        metrics.axis_updates.fetch_add(1, Ordering::Relaxed);
                                    }
                                }
                                EventSummary::Synchronization(
                                    _,
                                    SynchronizationCode::SYN_DROPPED,
                                    _,
                                ) => {
                                    metrics.sync_drops.fetch_add(1, Ordering::Relaxed);
                                }
                                _ => {}
                            }
                        }
                        if drained == 0 {
                            break DrainStatus::Alive;
                        }
                        metrics.events.fetch_add(drained, Ordering::Relaxed);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        break DrainStatus::Alive;
                    }
                    Err(e) => {
                        debug!(
                            "Read error on {} ({}), treating as disconnect",
                            self.inner.path.display(),
                            e
                        );
                        break DrainStatus::Disconnected;
                    }
                }
            }
        };
        // The guard is released before dispatch so sinks may call back
        // into the handle's accessors.
        for (channel, pressed) in changed {
            metrics.button_changes.fetch_add(1, Ordering::Relaxed);
            sink.on_event(PadEvent::Button {
                pad: self.clone(),
                channel,
                pressed,
            });
        }
        status
    }

    /// Set force-feedback intensities starting at `first_channel`:
    /// channel 0 the low-frequency (strong) motor, channel 1 the
    /// high-frequency (weak) one, clamped to `[0,1]`. An empty slice is
    /// a no-op success. Kernel rejection of the upload or play request
    /// surfaces as [`PadError::Io`], leaving the previously uploaded
    /// effect and the stored levels untouched.
    pub fn set_haptic_levels(&self, first_channel: usize, levels: &[f32]) -> Result<(), PadError> {
        if levels.is_empty() {
            return Ok(());
        }
        if !self.is_connected() {
            return Err(PadError::Disconnected);
        }
        if self.inner.haptic_count == 0 {
            return Err(PadError::NoHaptics);
        }
        let end = first_channel + levels.len();
        if end > self.inner.haptic_count {
            return Err(PadError::InvalidChannel {
                index: end - 1,
                count: self.inner.haptic_count,
            });
        }

        let mut live = self.live();
        let mut merged = live.haptic_levels;
        for (slot, level) in merged[first_channel..end].iter_mut().zip(levels) {
            *slot = level.clamp(0.0, 1.0);
        }
        let strong_magnitude = (merged[0] * f32::from(u16::MAX)) as u16;
        let weak_magnitude = (merged[1] * f32::from(u16::MAX)) as u16;

        let io = live.io.as_mut().ok_or(PadError::Disconnected)?;
        let data = FFEffectData {
            direction: 0,
            trigger: FFTrigger {
                button: 0,
                interval: 0,
            },
            replay: FFReplay {
                length: 0,
                delay: 0,
            },
            kind: FFEffectKind::Rumble {
                strong_magnitude,
                weak_magnitude,
            },
        };
        // The replacement is uploaded before the old effect guard is
        // dropped, so a rejected upload leaves the previous effect
        // playing. The kernel effect id is tied to the guard's
        // lifetime; storing the new guard removes the old effect.
        let mut effect = io.device.upload_ff_effect(data)?;
        effect.play(1)?;
        io.effect = Some(effect);
        live.haptic_levels = merged;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn disembodied(path: &str, assembled: crate::probe::Assembled) -> Self {
        Self::from_parts(SystemId(0), PathBuf::from(path), assembled, None)
    }
}

impl PartialEq for Gamepad {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Gamepad {}

impl std::fmt::Debug for Gamepad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gamepad")
            .field("name", &self.inner.info.name)
            .field("path", &self.inner.path)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Update a key-sourced digital channel; records only actual changes.
fn apply_key(
    buttons: &[ButtonChannel],
    states: &mut [bool],
    code: u16,
    pressed: bool,
    changed: &mut Vec<(usize, bool)>,
) {
    if let Some(idx) = buttons
        .iter()
        .position(|b| b.source == ButtonSource::Key(code))
    {
        if states[idx] != pressed {
            states[idx] = pressed;
            changed.push((idx, pressed));
        }
    }
}

/// Apply an absolute-axis record: hat axes re-derive the synthesized
/// D-pad channels, anything else re-normalizes the matching analog
/// channel. Returns whether an analog value was updated.
fn apply_abs(
    axes: &[AxisChannel],
    buttons: &[ButtonChannel],
    axis_values: &mut [f32],
    button_states: &mut [bool],
    code: u16,
    value: i32,
    changed: &mut Vec<(usize, bool)>,
) -> bool {
    if code == ABS_HAT0X || code == ABS_HAT0Y {
        for (idx, button) in buttons.iter().enumerate() {
            let ButtonSource::Hat(dir) = button.source else {
                continue;
            };
            let on_this_axis = match dir {
                HatDirection::Left | HatDirection::Right => code == ABS_HAT0X,
                HatDirection::Up | HatDirection::Down => code == ABS_HAT0Y,
            };
            if !on_this_axis {
                continue;
            }
            let pressed = hat_pressed(dir, value);
            if button_states[idx] != pressed {
                button_states[idx] = pressed;
                changed.push((idx, pressed));
            }
        }
        return false;
    }
    if let Some(idx) = axes
        .iter()
        .position(|a| a.source.present && a.source.code == code)
    {
        axis_values[idx] = axes[idx].source.normalize(value);
        return true;
    }
    false
}
