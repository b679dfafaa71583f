//! Reset & calibration driver.
//!
//! Four graded reset levels, strictly ordered in severity:
//! [`ResetLevel::Global`] and [`ResetLevel::AlmostGlobal`] reload the
//! FPGA; [`ResetLevel::Calibrate`] runs the ADC-delay alignment against
//! the on-board calibration pulser; [`ResetLevel::Counters`] is the
//! lightest level and is folded into every other level as its final
//! step (see [`perform_reset`]).

use std::sync::Mutex;
use std::time::Duration;

use log::{info, warn};

use crate::bits::{self, split_24};
use crate::config::{self, TrigEnables};
use crate::consts::{
    CALIBRATION_RETRY_SECONDS, CALPULSER_STATE, MAX_MAX_SPREAD,
    MAX_MISERY, MIN_GOOD_MAX_V, NUM_BUFFER, NUM_CHAN, RESET_RELOAD_SECONDS,
};
use crate::error::{Error, Result};
use crate::header::{PerBoard, MASTER, SLAVE};
use crate::link::Link;
use crate::port::{InterruptPort, SpiPort};
use crate::reader;
use crate::regio::read_registers;
use crate::regs::Register;
use crate::sync_cmd;
use crate::wait::Wait;

/// Abstracts `std::thread::sleep` so the 20-second FPGA-reload and
/// 1-second calibration-retry waits are injectable in tests.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// The real, blocking sleeper used outside of tests.
pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Graded reset level, strictly ordered by severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetLevel {
    Global,
    AlmostGlobal,
    Calibrate,
    Counters,
}

/// Disables trigger readout and clears every buffer. Every reset level
/// performs this step first.
fn disable_trigger_and_clear_buffers<P: SpiPort, Q: SpiPort>(
    master: &mut Link<P>,
    mut slave: Option<&mut Link<Q>>,
) -> Result<()> {
    config::set_trigger_enables(master, TrigEnables::default())?;
    if let Some(s) = slave.as_deref_mut() {
        config::set_trigger_enables(s, TrigEnables::default())?;
    }
    for buffer in 0..NUM_BUFFER as u8 {
        reader::clear_buffer(master, slave.as_deref_mut(), buffer)?;
    }
    Ok(())
}

/// `RESET_ALL=1`, synchronized, then a 20 s sleep for the FPGA reload.
pub fn reset_global<P: SpiPort, Q: SpiPort, S: Sleeper>(
    master: &mut Link<P>,
    mut slave: Option<&mut Link<Q>>,
    sleeper: &S,
) -> Result<()> {
    sync_cmd::run_synchronized(
        &mut master.buf,
        slave.as_deref_mut().map(|s| &mut s.buf),
        &[[Register::ResetAll.opcode(), 0, 0, 1]],
    )?;
    master.state.invalidate();
    if let Some(s) = slave.as_deref_mut() {
        s.state.invalidate();
    }
    info!("global reset issued, sleeping {RESET_RELOAD_SECONDS}s for FPGA reload");
    sleeper.sleep(Duration::from_secs(RESET_RELOAD_SECONDS));
    Ok(())
}

/// `RESET_ALL=2`, synchronized, then a 20 s sleep for the FPGA reload.
pub fn reset_almost_global<P: SpiPort, Q: SpiPort, S: Sleeper>(
    master: &mut Link<P>,
    mut slave: Option<&mut Link<Q>>,
    sleeper: &S,
) -> Result<()> {
    sync_cmd::run_synchronized(
        &mut master.buf,
        slave.as_deref_mut().map(|s| &mut s.buf),
        &[[Register::ResetAll.opcode(), 0, 0, 2]],
    )?;
    master.state.invalidate();
    if let Some(s) = slave.as_deref_mut() {
        s.state.invalidate();
    }
    info!("almost-global reset issued, sleeping {RESET_RELOAD_SECONDS}s for FPGA reload");
    sleeper.sleep(Duration::from_secs(RESET_RELOAD_SECONDS));
    Ok(())
}

fn wall_clock_now() -> (u64, u32) {
    let d = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    (d.as_secs(), d.subsec_nanos())
}

fn midpoint(a: (u64, u32), b: (u64, u32)) -> (u64, u32) {
    let a_ns = a.0 as u128 * 1_000_000_000 + a.1 as u128;
    let b_ns = b.0 as u128 * 1_000_000_000 + b.1 as u128;
    let mid_ns = (a_ns + b_ns) / 2;
    ((mid_ns / 1_000_000_000) as u64, (mid_ns % 1_000_000_000) as u32)
}

/// Selects timestamp free-running mode, issues a synchronized
/// `RESET_COUNTER=1`, and returns the wall-clock midpoint of the two
/// samples taken immediately before and after the write — the new
/// `start_time`.
pub fn reset_counters<P: SpiPort, Q: SpiPort>(
    master: &mut Link<P>,
    mut slave: Option<&mut Link<Q>>,
) -> Result<(u64, u32)> {
    master.buf.append([Register::TimestampMode.opcode(), 0, 0, 1])?;
    master.buf.flush()?;
    if let Some(s) = slave.as_deref_mut() {
        s.buf.append([Register::TimestampMode.opcode(), 0, 0, 1])?;
        s.buf.flush()?;
    }

    let before = wall_clock_now();
    sync_cmd::run_synchronized(
        &mut master.buf,
        slave.as_deref_mut().map(|s| &mut s.buf),
        &[[Register::ResetCounter.opcode(), 0, 0, 1]],
    )?;
    let after = wall_clock_now();

    Ok(midpoint(before, after))
}

/// Per-channel `(sample index, value)` of the maximum over
/// `data[channel][..buffer_length]`.
fn channel_maxima(
    data: &[[u8; crate::consts::MAX_WAVEFORM_LENGTH]; NUM_CHAN],
    buffer_length: usize,
) -> ([usize; NUM_CHAN], [u8; NUM_CHAN]) {
    let mut idx = [0usize; NUM_CHAN];
    let mut val = [0u8; NUM_CHAN];
    for (c, channel_data) in data.iter().enumerate() {
        let (i, v) = channel_data[..buffer_length]
            .iter()
            .enumerate()
            .max_by_key(|&(_, &sample)| sample)
            .map(|(i, &sample)| (i, sample))
            .unwrap_or((0, 0));
        idx[c] = i;
        val[c] = v;
    }
    (idx, val)
}

/// Whether a round's per-channel maxima are tight and tall enough to
/// accept as a calibration pulse.
fn converges(idx: &[usize; NUM_CHAN], val: &[u8; NUM_CHAN]) -> bool {
    let min_max_i = *idx.iter().min().unwrap();
    let max_max_i = *idx.iter().max().unwrap();
    let min_max_v = *val.iter().min().unwrap();
    min_max_v >= MIN_GOOD_MAX_V && (max_max_i as i32 - min_max_i as i32) <= MAX_MAX_SPREAD
}

/// Computes and writes the per-ADC-pair delay registers from a
/// converged round's channel maxima.
fn write_adc_delays<P: SpiPort>(link: &mut Link<P>, idx: &[usize; NUM_CHAN]) -> Result<()> {
    let min_max_i = *idx.iter().min().unwrap() as i32;
    for k in 0..NUM_CHAN / 2 {
        let delay = ((idx[2 * k] + idx[2 * k + 1]) as i32 - 2 * min_max_i) / 2;
        let nibble = (delay as u8 & 0xF) | 0x10;
        link.buf
            .append([Register::AdcDelays.opcode() + k as u8, 0, nibble, nibble])?;
    }
    link.buf.flush()?;
    Ok(())
}

/// Runs the ADC-delay alignment loop described in the reset driver's
/// calibration procedure: fires the calpulser, reads back one event per
/// attempt, and writes per-ADC-pair delays once a board's channel
/// maxima converge. Bounded by [`MAX_MISERY`] attempts.
#[allow(clippy::too_many_arguments)]
fn run_calibration_loop<P: SpiPort, Q: SpiPort, I: InterruptPort, S: Sleeper>(
    master: &mut Link<P>,
    mut slave: Option<&mut Link<Q>>,
    wait: &Wait,
    interrupt: &Mutex<Option<I>>,
    sleeper: &S,
    buffer_length: u32,
    trigger_timeout: Duration,
) -> Result<()> {
    master
        .buf
        .append([Register::Calpulser.opcode(), 0, 0, CALPULSER_STATE])?;
    master.buf.flush()?;
    if let Some(s) = slave.as_deref_mut() {
        s.buf
            .append([Register::Calpulser.opcode(), 0, 0, CALPULSER_STATE])?;
        s.buf.flush()?;
    }

    let mut master_happy = false;
    let mut slave_happy = slave.is_none();
    let mut attempt = 0u32;

    while !(master_happy && slave_happy) {
        if attempt >= MAX_MISERY {
            return Err(Error::CalibrationFailed);
        }

        sync_cmd::run_synchronized(
            &mut master.buf,
            slave.as_deref_mut().map(|s| &mut s.buf),
            &[[Register::SoftwareTrigger.opcode(), 0, 0, 1]],
        )?;

        let mask = wait.wait(
            trigger_timeout,
            || {
                let status = read_registers(&mut master.buf, &[Register::Status.opcode()])?[0];
                let (_, _, lo) = split_24(status);
                Ok(lo)
            },
            interrupt,
        )?;

        if mask == 0 {
            warn!("calibration attempt {attempt}: no buffer ready within timeout");
            attempt += 1;
            continue;
        }
        let buffer = bits::lowest_set_bit(mask).expect("mask is non-zero");

        let channel_mask = PerBoard {
            master: 0xFFu8,
            slave: 0xFFu8,
        };
        let (_, event) = reader::read_one_buffer(
            master,
            slave.as_deref_mut(),
            buffer,
            buffer_length,
            0,
            (0, 0),
            0,
            channel_mask,
            0,
        )?;

        let mut retry = false;

        if !master_happy {
            let (idx, val) = channel_maxima(&event.data[MASTER], buffer_length as usize);
            if converges(&idx, &val) {
                write_adc_delays(master, &idx)?;
                master_happy = true;
            } else {
                retry = true;
            }
        }
        if !slave_happy {
            let (idx, val) = channel_maxima(&event.data[SLAVE], buffer_length as usize);
            if converges(&idx, &val) {
                let slave_link = slave.as_deref_mut().expect("slave_happy false implies slave present");
                write_adc_delays(slave_link, &idx)?;
                slave_happy = true;
            } else {
                retry = true;
            }
        }

        reader::clear_buffer(master, slave.as_deref_mut(), buffer)?;

        if retry {
            warn!("calibration attempt {attempt}: channel maxima out of tolerance, resetting ADC clock");
            sync_cmd::run_synchronized(
                &mut master.buf,
                slave.as_deref_mut().map(|s| &mut s.buf),
                &[[Register::AdcClockReset.opcode(), 0, 0, 1]],
            )?;
            if attempt > 0 {
                sleeper.sleep(Duration::from_secs(CALIBRATION_RETRY_SECONDS));
            }
        }
        attempt += 1;
    }
    Ok(())
}

/// Runs [`run_calibration_loop`] and, win or lose, always disables the
/// calpulser and restores the trigger enables captured before this
/// reset level disabled them.
#[allow(clippy::too_many_arguments)]
pub fn calibrate_adc_delays<P: SpiPort, Q: SpiPort, I: InterruptPort, S: Sleeper>(
    master: &mut Link<P>,
    mut slave: Option<&mut Link<Q>>,
    wait: &Wait,
    interrupt: &Mutex<Option<I>>,
    sleeper: &S,
    buffer_length: u32,
    trigger_timeout: Duration,
    master_enables: TrigEnables,
    slave_enables: Option<TrigEnables>,
) -> Result<()> {
    let outcome = run_calibration_loop(
        master,
        slave.as_deref_mut(),
        wait,
        interrupt,
        sleeper,
        buffer_length,
        trigger_timeout,
    );

    master.buf.append([Register::Calpulser.opcode(), 0, 0, 0])?;
    master.buf.flush()?;
    config::set_trigger_enables(master, master_enables)?;
    if let Some(s) = slave.as_deref_mut() {
        s.buf.append([Register::Calpulser.opcode(), 0, 0, 0])?;
        s.buf.flush()?;
        if let Some(enables) = slave_enables {
            config::set_trigger_enables(s, enables)?;
        }
    }

    outcome
}

/// Runs one graded reset level end to end: disable-and-clear, the
/// level's own procedure, then a counter reset (performed by every
/// level, last).
#[allow(clippy::too_many_arguments)]
pub fn perform_reset<P: SpiPort, Q: SpiPort, I: InterruptPort, S: Sleeper>(
    level: ResetLevel,
    master: &mut Link<P>,
    mut slave: Option<&mut Link<Q>>,
    wait: &Wait,
    interrupt: &Mutex<Option<I>>,
    sleeper: &S,
    calibration_buffer_length: u32,
    calibration_trigger_timeout: Duration,
) -> Result<(u64, u32)> {
    let captured_enables = if level == ResetLevel::Calibrate {
        let m = config::get_trigger_enables(master)?;
        let s = match slave.as_deref_mut() {
            Some(link) => Some(config::get_trigger_enables(link)?),
            None => None,
        };
        Some((m, s))
    } else {
        None
    };

    disable_trigger_and_clear_buffers(master, slave.as_deref_mut())?;

    match level {
        ResetLevel::Global => reset_global(master, slave.as_deref_mut(), sleeper)?,
        ResetLevel::AlmostGlobal => reset_almost_global(master, slave.as_deref_mut(), sleeper)?,
        ResetLevel::Calibrate => {
            let (master_enables, slave_enables) =
                captured_enables.expect("captured above for ResetLevel::Calibrate");
            calibrate_adc_delays(
                master,
                slave.as_deref_mut(),
                wait,
                interrupt,
                sleeper,
                calibration_buffer_length,
                calibration_trigger_timeout,
                master_enables,
                slave_enables,
            )?;
        }
        ResetLevel::Counters => {}
    }

    reset_counters(master, slave.as_deref_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Generation;
    use crate::port::fake::{FakeBoard, FakeInterruptPort};

    #[derive(Default)]
    struct NoopSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl Sleeper for NoopSleeper {
        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }

    #[test]
    fn channel_maxima_picks_index_and_value_of_largest_sample() {
        let mut data = [[0u8; crate::consts::MAX_WAVEFORM_LENGTH]; NUM_CHAN];
        data[0][100] = 50;
        data[1][102] = 55;
        let (idx, val) = channel_maxima(&data, 128);
        assert_eq!(idx[0], 100);
        assert_eq!(val[0], 50);
        assert_eq!(idx[1], 102);
        assert_eq!(val[1], 55);
    }

    #[test]
    fn converges_rejects_low_amplitude_and_wide_spread() {
        let idx = [100, 102, 100, 104, 100, 102, 100, 104];
        let tall = [50u8; NUM_CHAN];
        assert!(converges(&idx, &tall));

        let short = [MIN_GOOD_MAX_V - 1; NUM_CHAN];
        assert!(!converges(&idx, &short));

        let spread_idx = [0, 200, 0, 0, 0, 0, 0, 0];
        assert!(!converges(&spread_idx, &tall));
    }

    #[test]
    fn write_adc_delays_matches_worked_example() {
        let board = FakeBoard::new();
        let mut link = Link::new(board.port(), Generation::Bn);
        let idx = [100, 102, 100, 104, 100, 102, 100, 104];
        write_adc_delays(&mut link, &idx).unwrap();

        let logged = board.log();
        assert_eq!(logged[0], [Register::AdcDelays.opcode(), 0, 0x11, 0x11]);
        assert_eq!(logged[1], [Register::AdcDelays.opcode() + 1, 0, 0x12, 0x12]);
    }

    #[test]
    fn reset_global_sleeps_for_the_reload_window() {
        let board = FakeBoard::new();
        let mut master = Link::new(board.port(), Generation::Np);
        let sleeper = NoopSleeper::default();

        reset_global::<_, crate::port::fake::FakeSpiPort, _>(&mut master, None, &sleeper).unwrap();

        assert_eq!(
            board.log(),
            vec![[Register::ResetAll.opcode(), 0, 0, 1]]
        );
        assert_eq!(
            *sleeper.slept.lock().unwrap(),
            vec![Duration::from_secs(RESET_RELOAD_SECONDS)]
        );
    }

    #[test]
    fn reset_counters_straddles_a_synchronized_write_with_wall_clock_samples() {
        let board = FakeBoard::new();
        let mut master = Link::new(board.port(), Generation::Bn);

        let (secs, _nanos) =
            reset_counters::<_, crate::port::fake::FakeSpiPort>(&mut master, None).unwrap();

        assert!(secs > 0);
        assert_eq!(
            board.log(),
            vec![
                [Register::TimestampMode.opcode(), 0, 0, 1],
                [Register::ResetCounter.opcode(), 0, 0, 1],
            ]
        );
    }

    #[test]
    fn calibration_times_out_and_fails_when_no_buffer_ever_becomes_ready() {
        let board = FakeBoard::new();
        let mut master = Link::new(board.port(), Generation::Bn);
        let wait = Wait::new(Duration::from_micros(200));
        let sleeper = NoopSleeper::default();

        // MAX_MISERY is 100 real-world attempts; shrink the loop's patience
        // for the test by driving a tiny per-wait timeout instead of
        // waiting out the full constant, keeping this test fast while
        // still exercising the give-up path.
        let result = run_calibration_loop::<_, crate::port::fake::FakeSpiPort, FakeInterruptPort, _>(
            &mut master,
            None,
            &wait,
            &Mutex::new(None),
            &sleeper,
            16,
            Duration::from_micros(500),
        );
        // Without any scripted status/event-counter responses the fake
        // board returns zeroed registers forever, so the status mask is
        // always 0 and the loop exhausts MAX_MISERY attempts.
        assert!(matches!(result, Err(Error::CalibrationFailed)));
    }
}
