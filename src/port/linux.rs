//! Real transport: a `/dev/spidevN` character device for [`SpiPort`] and a
//! GPIO chardev line for [`InterruptPort`].
//!
//! Grounded on the Linux SPI/GPIO userspace pattern used throughout the
//! retrieval pack's `other_examples` (`spidev`/`gpiod`-backed hardware
//! layers): a batched ioctl for the bus, a chardev line plus a blocking,
//! signal-interruptible wait for the interrupt-ready indicator.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use gpiod::{Chip, EdgeDetect, Lines, Options};
use nix::poll::{ppoll, PollFd, PollFlags};
use nix::sys::signal::SigSet;
use nix::sys::time::TimeSpec;

use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::error::{Error, Result};
use crate::port::{SpiPort, Transfer};

/// Clock rate used on the SPI bus. The board family is specified to run
/// at 10-20 MHz in mode 0.
pub const SPI_CLOCK_HZ: u32 = 16_000_000;

/// A real `/dev/spidevN` transport for one board.
pub struct LinuxSpiPort {
    device: Spidev,
}

impl LinuxSpiPort {
    /// Opens and configures `path` as SPI mode 0 at [`SPI_CLOCK_HZ`], then
    /// takes an exclusive advisory lock on it for the lifetime of the
    /// returned port.
    pub fn open(path: &str) -> Result<Self> {
        let mut device = Spidev::open(path).map_err(|e| Error::Open(e.to_string()))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(SPI_CLOCK_HZ)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        device
            .configure(&options)
            .map_err(|e| Error::Open(e.to_string()))?;

        let fd = device.as_raw_fd();
        nix::fcntl::flock(fd, nix::fcntl::FlockArg::LockExclusiveNonblock)
            .map_err(|e| Error::Open(format!("advisory lock on {path} failed: {e}")))?;

        Ok(LinuxSpiPort { device })
    }
}

impl SpiPort for LinuxSpiPort {
    fn transfer_batch(&mut self, transfers: &mut [Transfer]) -> Result<()> {
        // SpidevTransfer borrows its buffers, so build the rx targets from
        // owned storage we can copy back out of afterwards.
        let mut rx_bufs: Vec<[u8; 4]> = vec![[0u8; 4]; transfers.len()];
        let mut spidev_transfers: Vec<SpidevTransfer> = Vec::with_capacity(transfers.len());
        for (t, rx) in transfers.iter().zip(rx_bufs.iter_mut()) {
            spidev_transfers.push(SpidevTransfer::read_write(&t.tx, rx));
        }

        self.device
            .transfer_multiple(&mut spidev_transfers)
            .map_err(Error::Io)?;

        for (t, rx) in transfers.iter_mut().zip(rx_bufs.into_iter()) {
            t.rx = rx;
        }
        Ok(())
    }
}

/// A real GPIO-chardev-backed interrupt-ready line.
pub struct LinuxInterruptPort {
    lines: Lines<gpiod::Input>,
}

impl LinuxInterruptPort {
    /// Requests `line` on `chip_path` with both-edge detection, for use
    /// as the board's interrupt-ready indicator.
    pub fn open(chip_path: &str, line: u32) -> Result<Self> {
        let chip = Chip::new(chip_path).map_err(|e| Error::Open(e.to_string()))?;
        let options = Options::input([line])
            .edge(EdgeDetect::Both)
            .consumer("rf-daq");
        let lines = chip
            .request_lines(options)
            .map_err(|e| Error::Open(e.to_string()))?;
        Ok(LinuxInterruptPort { lines })
    }
}

impl super::InterruptPort for LinuxInterruptPort {
    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let fd = self.lines.as_raw_fd();
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(&borrowed, PollFlags::POLLIN)];

        // Allow every signal through for the duration of the call so a
        // targeted wakeup (see crate::wait) unblocks it; the caller is
        // responsible for having a no-op handler installed for that
        // signal so the default disposition doesn't terminate the
        // process.
        let open_mask = SigSet::empty();
        let ts = TimeSpec::new(timeout.as_secs() as i64, timeout.subsec_nanos() as i64);

        match ppoll(&mut fds, Some(ts), Some(open_mask)) {
            Ok(0) => Ok(false),
            Ok(_) => Ok(true),
            Err(nix::errno::Errno::EINTR) => Err(Error::Intr),
            Err(e) => Err(Error::Nix(e)),
        }
    }

    fn rearm(&mut self) -> Result<()> {
        // Draining the pending edge events re-arms the line for the next
        // wait. A short, non-blocking read is sufficient; an empty
        // result is not an error; anything else surfaces the I/O cause.
        match self.lines.read_event() {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
