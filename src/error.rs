//! Error taxonomy.
//!
//! `Timeout` on the wait primitive is deliberately *not* represented here:
//! a wait that exhausts its deadline with an empty ready mask is a
//! successful call that returns an empty mask, not a failure. Likewise a
//! per-event sync mismatch is recorded as a bitfield on the header, not
//! raised as an error.

use thiserror::Error;

/// Errors that can be returned by the driver's public operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An SPI ioctl, GPIO read/write, or file operation returned fewer
    /// bytes than expected, or the underlying syscall failed outright.
    #[error("I/O failure talking to the board: {0}")]
    Io(#[from] std::io::Error),

    /// A POSIX call (signal delivery, advisory lock, poll) failed.
    #[error("system call failed: {0}")]
    Nix(#[from] nix::Error),

    /// A second thread attempted to enter the wait primitive while one
    /// was already waiting.
    #[error("a wait is already in progress")]
    Busy,

    /// `cancel_wait` had already set the cancellation flag before this
    /// call entered the wait primitive; the flag was cleared and the call
    /// returned immediately without blocking.
    #[error("wait was pre-cancelled")]
    Again,

    /// The wait primitive was unblocked by a cancellation signal while a
    /// syscall was in progress.
    #[error("wait was interrupted")]
    Intr,

    /// ADC-delay calibration did not converge within `MAX_MISERY`
    /// attempts.
    #[error("ADC delay calibration failed to converge")]
    CalibrationFailed,

    /// A mandatory step of a reset sequence failed.
    #[error("reset sequence failed: {0}")]
    ResetFailed(&'static str),

    /// The device's SPI/GPIO paths could not be locked or opened.
    #[error("failed to open device: {0}")]
    Open(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
