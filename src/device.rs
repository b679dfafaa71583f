//! The public `Device` handle.
//!
//! Ties together a board's [`Link`], the optional slave's `Link`, the
//! [`BufferRing`] cursor, the [`Wait`] primitive, and the host-side
//! readout parameters (`buffer_length`, `pretrigger`, `start_time`,
//! software `event_counter`) into the single object an application
//! opens, configures, reads from, and closes.
//!
//! `inner` is this driver's command lock: every logical command
//! sequence (a config write, a readout, a reset step)
//! takes the lock for its duration, so the transaction buffer and the
//! board state cache stay coherent across threads. [`Wait::wait`]'s own
//! internal single-waiter gate is the separate "wait lock"; the status
//! register read it performs between polls takes and releases `inner`
//! for just that read, so a configuration thread is never blocked for
//! longer than one register read.
//!
//! `interrupt` is handed to [`Wait::wait`] as a lock, not a pre-acquired
//! guard, so it is only ever held for the duration of a single
//! `wait_readable`/`rearm` port call and is always released before the
//! status read touches `inner`. Neither [`Device::wait`] nor
//! [`Device::reset`] (which passes `interrupt` the same way down to
//! [`reset::perform_reset`]) ever holds both `inner` and `interrupt` at
//! once, so the two locks have no ordering to violate.

use std::sync::Mutex;
use std::time::Duration;

use crate::bits::split_24;
use crate::board::Generation;
use crate::buffer_ring::BufferRing;
use crate::config::{self, TrigEnables, TrigOut, VetoOptions};
use crate::consts::{CALIBRATION_BUFFER_LENGTH, CALIBRATION_TRIGGER_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_US};
use crate::error::Result;
use crate::header::{Event, Header, PerBoard, ScalerSnapshot};
use crate::link::Link;
use crate::port::linux::{LinuxInterruptPort, LinuxSpiPort};
use crate::port::{InterruptPort, SpiPort};
use crate::reader;
use crate::regio::read_registers;
use crate::regs::{Register, TrigPol};
use crate::reset::{self, RealSleeper, ResetLevel};
use crate::scaler;
use crate::wait::Wait;

/// Builder for the parameters [`Device::open_linux`] needs to reach the
/// real kernel character devices.
pub struct DeviceOpenOptions {
    master_path: String,
    slave_path: Option<String>,
    gpio: Option<(String, u32)>,
    generation: Generation,
    poll_interval: Duration,
}

impl DeviceOpenOptions {
    pub fn new(master_path: impl Into<String>, generation: Generation) -> Self {
        DeviceOpenOptions {
            master_path: master_path.into(),
            slave_path: None,
            gpio: None,
            generation,
            poll_interval: Duration::from_micros(DEFAULT_POLL_INTERVAL_US),
        }
    }

    /// Adds a second, slave board at `path`.
    pub fn slave(mut self, path: impl Into<String>) -> Self {
        self.slave_path = Some(path.into());
        self
    }

    /// Binds an interrupt-ready GPIO line, switching the wait primitive
    /// to the interrupt-backed strategy.
    pub fn gpio(mut self, chip: impl Into<String>, line: u32) -> Self {
        self.gpio = Some((chip.into(), line));
        self
    }

    /// Overrides the poll-mode wait interval (ignored if a GPIO is
    /// bound).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

struct Inner<P: SpiPort, Q: SpiPort> {
    master: Link<P>,
    slave: Option<Link<Q>>,
    buffer_ring: BufferRing,
    event_counter: u32,
    buffer_length: u32,
    pretrigger: u32,
    start_time: (u64, u32),
    channel_read_mask: PerBoard<u8>,
    /// Upper 32 bits are the seconds-since-epoch at the moment this
    /// device was opened; lower 32 bits are zero and are replaced with
    /// each readout's hardware event counter at assembly time.
    readout_number_offset: u64,
}

/// An open driver session for one master board and an optional slave.
pub struct Device<P: SpiPort, Q: SpiPort, I: InterruptPort> {
    inner: Mutex<Inner<P, Q>>,
    interrupt: Mutex<Option<I>>,
    wait: Wait,
}

/// The concrete device type returned by [`Device::open_linux`].
pub type LinuxDevice = Device<LinuxSpiPort, LinuxSpiPort, LinuxInterruptPort>;

impl<P: SpiPort, Q: SpiPort, I: InterruptPort> Device<P, Q, I> {
    /// Builds a device directly from already-open ports, without
    /// issuing a reset. Real callers should follow this with
    /// [`Device::reset`]; [`Device::open_linux`] does so automatically.
    pub fn new(
        master_port: P,
        slave_port: Option<Q>,
        interrupt: Option<I>,
        generation: Generation,
        poll_interval: Duration,
    ) -> Self {
        let opened_at_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Device {
            inner: Mutex::new(Inner {
                master: Link::new(master_port, generation),
                slave: slave_port.map(|p| Link::new(p, generation)),
                buffer_ring: BufferRing::new(),
                event_counter: 0,
                buffer_length: 0,
                pretrigger: 0,
                start_time: (0, 0),
                channel_read_mask: PerBoard {
                    master: 0xFF,
                    slave: 0xFF,
                },
                readout_number_offset: opened_at_secs << 32,
            }),
            interrupt: Mutex::new(interrupt),
            wait: Wait::new(poll_interval),
        }
    }

    /// Cancels any in-progress wait, flushes both boards' pending
    /// transfers, and consumes the device. File descriptors and the
    /// advisory locks they hold are released as the underlying ports
    /// drop.
    pub fn close(self) -> Result<()> {
        self.wait.cancel();
        let mut inner = self.inner.lock().unwrap();
        inner.master.buf.flush()?;
        if let Some(s) = inner.slave.as_mut() {
            s.buf.flush()?;
        }
        Ok(())
    }

    /// Blocks until at least one buffer is ready or `timeout` elapses.
    /// Returns the ready-buffer mask (possibly empty, on timeout).
    ///
    /// `self.interrupt` is passed down as a lock, not a held guard: this
    /// call never holds it across the status-register read, so it can
    /// never contend with `self.inner` in the order [`Device::reset`]
    /// takes them.
    pub fn wait(&self, timeout: Duration) -> Result<u8> {
        self.wait.wait(
            timeout,
            || {
                let mut inner = self.inner.lock().unwrap();
                let status =
                    read_registers(&mut inner.master.buf, &[Register::Status.opcode()])?[0];
                let (_, _, lo) = split_24(status);
                Ok(lo & 0xF)
            },
            &self.interrupt,
        )
    }

    /// Unblocks a concurrent [`Device::wait`] call from any thread.
    pub fn cancel_wait(&self) {
        self.wait.cancel();
    }

    pub fn set_buffer_length(&self, samples: u32) {
        self.inner.lock().unwrap().buffer_length = samples;
    }

    pub fn buffer_length(&self) -> u32 {
        self.inner.lock().unwrap().buffer_length
    }

    pub fn set_pretrigger(&self, units: u32) {
        self.inner.lock().unwrap().pretrigger = units;
    }

    pub fn pretrigger(&self) -> u32 {
        self.inner.lock().unwrap().pretrigger
    }

    pub fn set_channel_read_mask(&self, mask: PerBoard<u8>) {
        self.inner.lock().unwrap().channel_read_mask = mask;
    }

    /// Reads and decodes every buffer currently reported ready, in
    /// cursor order, clearing each as it is consumed.
    pub fn read_ready_buffers(&self) -> Result<Vec<(Header, Event)>> {
        let mut inner = self.inner.lock().unwrap();

        let status = read_registers(&mut inner.master.buf, &[Register::Status.opcode()])?[0];
        let (_, _, raw_mask) = split_24(status);
        let mask = raw_mask & 0xF;
        inner.buffer_ring.reconcile(mask);

        let mut results = Vec::new();
        let mut remaining = mask;
        while remaining != 0 {
            let buffer = inner.buffer_ring.next_read_buffer();
            if remaining & (1 << buffer) == 0 {
                break;
            }

            let buffer_length = inner.buffer_length;
            let pretrigger = inner.pretrigger;
            let start_time = inner.start_time;
            let software_event_counter = inner.event_counter;
            let channel_read_mask = inner.channel_read_mask;
            let readout_number_offset = inner.readout_number_offset;

            let (header, event) = reader::read_one_buffer(
                &mut inner.master,
                inner.slave.as_mut(),
                buffer,
                buffer_length,
                pretrigger,
                start_time,
                software_event_counter,
                channel_read_mask,
                readout_number_offset,
            )?;
            reader::clear_buffer(&mut inner.master, inner.slave.as_mut(), buffer)?;

            inner.event_counter = inner.event_counter.wrapping_add(1);
            inner.buffer_ring.advance();
            remaining &= !(1 << buffer);
            results.push((header, event));
        }
        Ok(results)
    }

    /// Runs one graded reset level. Updates `start_time` (and resets the
    /// software event counter to zero) from the counter-reset step every
    /// level performs last.
    pub fn reset(&self, level: ResetLevel) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let sleeper = RealSleeper;
        let (secs, nanos) = reset::perform_reset(
            level,
            &mut inner.master,
            inner.slave.as_mut(),
            &self.wait,
            &self.interrupt,
            &sleeper,
            CALIBRATION_BUFFER_LENGTH,
            Duration::from_millis(CALIBRATION_TRIGGER_TIMEOUT_MS),
        )?;
        inner.start_time = (secs, nanos);
        inner.event_counter = 0;
        Ok(())
    }

    pub fn set_threshold(&self, beam_index: u8, value: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_threshold(&mut inner.master, beam_index, value)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_threshold(s, beam_index, value)?;
        }
        Ok(())
    }

    pub fn get_threshold(&self, beam_index: u8) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        config::get_threshold(&mut inner.master, beam_index)
    }

    pub fn set_attenuation(&self, values: &[u8; 8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_attenuation(&mut inner.master, values)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_attenuation(s, values)?;
        }
        Ok(())
    }

    pub fn get_attenuation(&self) -> Result<[u8; 8]> {
        let mut inner = self.inner.lock().unwrap();
        config::get_attenuation(&mut inner.master)
    }

    pub fn set_trigger_mask(&self, mask: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_trigger_mask(&mut inner.master, mask)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_trigger_mask(s, mask)?;
        }
        Ok(())
    }

    pub fn get_trigger_mask(&self) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap();
        config::get_trigger_mask(&mut inner.master)
    }

    pub fn set_trigger_enables(&self, enables: TrigEnables) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_trigger_enables(&mut inner.master, enables)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_trigger_enables(s, enables)?;
        }
        Ok(())
    }

    pub fn get_trigger_enables(&self) -> Result<TrigEnables> {
        let mut inner = self.inner.lock().unwrap();
        config::get_trigger_enables(&mut inner.master)
    }

    pub fn set_trigger_polarization(&self, pol: TrigPol) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_trigger_polarization(&mut inner.master, pol)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_trigger_polarization(s, pol)?;
        }
        Ok(())
    }

    pub fn set_dynamic_masking(&self, enabled: bool, threshold: u8, holdoff: u16) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_dynamic_masking(&mut inner.master, enabled, threshold, holdoff)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_dynamic_masking(s, enabled, threshold, holdoff)?;
        }
        Ok(())
    }

    pub fn set_veto_options(&self, opts: VetoOptions) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_veto_options(&mut inner.master, opts)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_veto_options(s, opts)?;
        }
        Ok(())
    }

    pub fn set_veto_cuts(&self, saturation: u8, cw: u8, sideswipe: u8, extended: u8) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_veto_cuts(&mut inner.master, saturation, cw, sideswipe, extended)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_veto_cuts(s, saturation, cw, sideswipe, extended)?;
        }
        Ok(())
    }

    pub fn set_trigger_delays(&self, delays: &[u8; 8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_trigger_delays(&mut inner.master, delays)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_trigger_delays(s, delays)?;
        }
        Ok(())
    }

    pub fn set_trigger_output(&self, out: TrigOut) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_trigger_output(&mut inner.master, out)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_trigger_output(s, out)?;
        }
        Ok(())
    }

    pub fn set_external_input(&self, use_as_trigger: bool, delay: u16) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        config::set_external_input(&mut inner.master, use_as_trigger, delay)?;
        if let Some(s) = inner.slave.as_mut() {
            config::set_external_input(s, use_as_trigger, delay)?;
        }
        Ok(())
    }

    pub fn read_scalers(&self) -> Result<ScalerSnapshot> {
        let mut inner = self.inner.lock().unwrap();
        scaler::read_scalers(&mut inner.master)
    }
}

impl LinuxDevice {
    /// Opens the master (and optional slave) SPI device, the GPIO
    /// interrupt line if one was configured, and issues a global reset
    /// before returning, per the device handle's open lifecycle.
    pub fn open_linux(options: DeviceOpenOptions) -> Result<Self> {
        let master_port = LinuxSpiPort::open(&options.master_path)?;
        let slave_port = options
            .slave_path
            .as_deref()
            .map(LinuxSpiPort::open)
            .transpose()?;
        let interrupt = match options.gpio {
            Some((chip, line)) => Some(LinuxInterruptPort::open(&chip, line)?),
            None => None,
        };

        let device = Device::new(
            master_port,
            slave_port,
            interrupt,
            options.generation,
            options.poll_interval,
        );
        device.reset(ResetLevel::Global)?;
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::fake::{FakeBoard, FakeInterruptPort};

    fn new_device(board: &FakeBoard) -> Device<crate::port::fake::FakeSpiPort, crate::port::fake::FakeSpiPort, FakeInterruptPort> {
        Device::new(
            board.port(),
            None,
            None,
            Generation::Bn,
            Duration::from_micros(200),
        )
    }

    #[test]
    fn wait_returns_ready_mask_once_status_register_reports_it() {
        let board = FakeBoard::new();
        let device = new_device(&board);
        board.push_register_value(Register::Status.opcode(), 0x1);

        let mask = device.wait(Duration::from_millis(50)).unwrap();
        assert_eq!(mask, 0x1);
    }

    #[test]
    fn cancel_wait_unblocks_an_infinite_wait_from_another_thread() {
        use std::sync::Arc;
        use std::thread;

        let board = FakeBoard::new();
        let device = Arc::new(new_device(&board));

        let d = device.clone();
        let handle = thread::spawn(move || d.wait(crate::wait::FOREVER));

        thread::sleep(Duration::from_millis(5));
        device.cancel_wait();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(crate::error::Error::Intr)));
    }

    #[test]
    fn set_buffer_length_and_pretrigger_round_trip() {
        let board = FakeBoard::new();
        let device = new_device(&board);
        device.set_buffer_length(512);
        device.set_pretrigger(3);
        assert_eq!(device.buffer_length(), 512);
        assert_eq!(device.pretrigger(), 3);
    }
}
