//! Transport abstraction between the SPI transaction buffer and the
//! kernel character devices.
//!
//! Nothing above this layer cares whether a transfer actually crosses a
//! `/dev/spidevN` ioctl or is served out of an in-memory register file;
//! [`SpiPort`] and [`InterruptPort`] are the seam that lets the rest of
//! the driver be exercised against [`fake::FakeBoard`] in tests instead
//! of real hardware.

pub mod fake;
pub mod linux;

use std::time::Duration;

use crate::error::Result;

/// One half-duplex SPI transfer: a 4-byte command out, a 4-byte response
/// in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Transfer {
    pub tx: [u8; 4],
    pub rx: [u8; 4],
}

/// A batched SPI transport for a single board.
///
/// Implementations issue every queued transfer as one multi-message
/// ioctl (or, for the fake, one pass over a scripted register file) and
/// report a byte-accurate failure if any transfer came back short.
pub trait SpiPort: Send {
    /// Issues `transfers` as a single batched operation, filling in each
    /// transfer's `rx` field in place.
    fn transfer_batch(&mut self, transfers: &mut [Transfer]) -> Result<()>;
}

/// The GPIO-backed interrupt-ready line, when the board is wired with
/// one.
///
/// A read of the underlying file descriptor returns a 32-bit interrupt
/// token; writing `1` back re-arms it for the next edge.
pub trait InterruptPort: Send {
    /// Blocks until the line is readable or `timeout` elapses. Returns
    /// `true` if the line became readable, `false` on timeout.
    ///
    /// Must be interruptible by a signal delivered to the calling thread
    /// (see [`crate::wait`]); on interruption, returns
    /// [`crate::error::Error::Intr`].
    fn wait_readable(&self, timeout: Duration) -> Result<bool>;

    /// Reads and re-arms the interrupt after a successful wait.
    fn rearm(&mut self) -> Result<()>;
}
