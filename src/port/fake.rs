//! In-memory fake transport used by the test suite.
//!
//! [`FakeBoard`] is a scriptable register file: tests preload responses
//! keyed by opcode (and, for the two-phase read protocol, by the target
//! register most recently selected via `SET_READ_REG`), then assert on
//! the sequence of command words the driver actually sent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::regs::Register;

use super::{InterruptPort, SpiPort, Transfer};

#[derive(Default)]
struct Shared {
    /// Every command word ever sent to this board, in order.
    log: Vec<[u8; 4]>,
    /// Register responses to serve, keyed by the opcode most recently
    /// named by a `SET_READ_REG` (or, for non-paired reads, the opcode of
    /// the read itself).
    responses: std::collections::HashMap<u8, VecDeque<[u8; 4]>>,
    /// The register last targeted by `SET_READ_REG`.
    read_target: Option<u8>,
    /// Forces the next `transfer_batch` call to fail, simulating a short
    /// ioctl.
    fail_next: bool,
}

/// A fake board: a shared, scriptable register file plus the log of
/// commands sent to it. Clone to hand the same underlying state to both
/// a [`SpiPort`] consumer and the test assertions.
#[derive(Clone, Default)]
pub struct FakeBoard {
    shared: Arc<Mutex<Shared>>,
}

impl FakeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `response` to be returned the next time `opcode` is read
    /// (directly, or via the `SET_READ_REG`/`READ` two-phase sequence).
    pub fn push_response(&self, opcode: u8, response: [u8; 4]) {
        self.shared
            .lock()
            .unwrap()
            .responses
            .entry(opcode)
            .or_default()
            .push_back(response);
    }

    /// Queues a 24-bit register value, pre-split into the wire's
    /// `[target, hi, mid, lo]` layout.
    pub fn push_register_value(&self, opcode: u8, value: u32) {
        let (hi, mid, lo) = crate::bits::split_24(value);
        self.push_response(opcode, [opcode, hi, mid, lo]);
    }

    /// Returns every command word sent so far, in order.
    pub fn log(&self) -> Vec<[u8; 4]> {
        self.shared.lock().unwrap().log.clone()
    }

    /// Clears the recorded log without touching queued responses.
    pub fn clear_log(&self) {
        self.shared.lock().unwrap().log.clear();
    }

    /// Arranges for the next batch to fail as if the ioctl came back
    /// short.
    pub fn fail_next_batch(&self) {
        self.shared.lock().unwrap().fail_next = true;
    }

    /// Returns a [`SpiPort`] handle bound to this board's shared state.
    pub fn port(&self) -> FakeSpiPort {
        FakeSpiPort {
            shared: self.shared.clone(),
        }
    }
}

/// The [`SpiPort`] side of a [`FakeBoard`].
pub struct FakeSpiPort {
    shared: Arc<Mutex<Shared>>,
}

impl SpiPort for FakeSpiPort {
    fn transfer_batch(&mut self, transfers: &mut [Transfer]) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        if shared.fail_next {
            shared.fail_next = false;
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "fake short transfer",
            )));
        }

        for t in transfers.iter_mut() {
            shared.log.push(t.tx);
            let opcode = t.tx[0];

            if opcode == Register::SetReadReg.opcode() {
                shared.read_target = Some(t.tx[3]);
                t.rx = [0; 4];
                continue;
            }

            let key = if opcode == Register::Read.opcode() {
                shared.read_target.unwrap_or(0)
            } else {
                opcode
            };

            t.rx = shared
                .responses
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .unwrap_or([key, 0, 0, 0]);
        }
        Ok(())
    }
}

/// A fake interrupt-ready line, fired on demand by the test.
#[derive(Clone, Default)]
pub struct FakeInterruptPort {
    shared: Arc<Mutex<FakeInterruptState>>,
}

#[derive(Default)]
struct FakeInterruptState {
    ready: bool,
    cancelled: bool,
}

impl FakeInterruptPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the GPIO line going readable (a buffer became ready).
    pub fn fire(&self) {
        self.shared.lock().unwrap().ready = true;
    }

    /// Simulates a cancellation signal arriving while a wait is blocked.
    pub fn interrupt(&self) {
        self.shared.lock().unwrap().cancelled = true;
    }
}

impl InterruptPort for FakeInterruptPort {
    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            {
                let mut s = self.shared.lock().unwrap();
                if s.cancelled {
                    s.cancelled = false;
                    return Err(Error::Intr);
                }
                if s.ready {
                    return Ok(true);
                }
            }
            if std::time::Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    fn rearm(&mut self) -> Result<()> {
        self.shared.lock().unwrap().ready = false;
        Ok(())
    }
}
