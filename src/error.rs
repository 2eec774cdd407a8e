//! Controller subsystem error types

use std::io;

use thiserror::Error;

/// Errors surfaced by public controller operations
#[derive(Error, Debug)]
pub enum PadError {
    /// The controller has been unplugged; the handle is still valid but inert
    #[error("Controller disconnected")]
    Disconnected,

    /// The device exposes no force-feedback channels
    #[error("Controller has no haptic channels")]
    NoHaptics,

    /// A channel index outside the device's channel table
    #[error("Invalid channel {index} (device has {count})")]
    InvalidChannel {
        /// Offending channel index
        index: usize,
        /// Number of channels the device exposes
        count: usize,
    },

    /// Kernel-level I/O failure (ioctl, read, effect upload/play)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Why a candidate device path did not become a controller handle
#[derive(Error, Debug)]
pub enum ProbeError {
    /// The device opened but is not a game controller; never retried
    #[error("Not a game controller")]
    NotGamepad,

    /// The device could not be opened; may be retried if transient
    #[error("Failed to open device: {0}")]
    Open(#[source] io::Error),
}

/// Classify an open failure as retry-able.
///
/// A device announced by udev often exists before its permissions are
/// applied or while another process still holds it, so access and busy
/// errors are worth retrying on a later poll cycle. A path that vanished
/// is retried too; the matching remove event purges it from the queue.
pub(crate) fn is_transient_open(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::PermissionDenied
            | io::ErrorKind::NotFound
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
    ) {
        return true;
    }
    matches!(e.raw_os_error(), Some(libc::EBUSY))
}
