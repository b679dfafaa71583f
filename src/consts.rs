//! Fixed geometry and timing constants for the board family: buffer,
//! channel, and beam counts, wire sizing, and reset/calibration timing.

use static_assertions::const_assert;

/// Number of hardware event buffers in the ring (`0..3`).
pub const NUM_BUFFER: usize = 4;

/// Number of ADC/digitizer channels per board.
pub const NUM_CHAN: usize = 8;

/// Number of phased-array beams evaluated by the trigger.
pub const NUM_BEAMS: usize = 20;

/// Number of rate scalers, both global and per-beam.
pub const NUM_SCALERS: usize = 2;

/// Longest waveform, in samples, that a buffer can hold.
pub const MAX_WAVEFORM_LENGTH: usize = 2048;

/// SPI word size, in bytes. Every command and every register response is
/// exactly one word.
pub const WORD: usize = 4;

/// Number of 4-byte chunks a single RAM address is read out in.
pub const NUM_CHUNK: usize = 2;

/// Samples per pretrigger unit (`pretrigger_samples = pretrigger * 128`).
pub const PRETRIGGER_UNIT: u32 = 128;

/// Minimum sample depth of a useful calibration pulse.
pub const MIN_GOOD_MAX_V: u8 = 20;

/// Maximum spread, in samples, between the earliest and latest
/// per-channel pulse maximum that calibration will accept.
pub const MAX_MAX_SPREAD: i32 = 16;

/// Calibration gives up after this many failed attempts.
pub const MAX_MISERY: u32 = 100;

/// Maximum number of transfers a single [`crate::spi::TransactionBuffer`]
/// batches before an implicit flush.
pub const MAX_BATCH: usize = 511;

/// Default polling interval for the poll-mode wait primitive, in
/// microseconds. Zero means "yield cooperatively every iteration."
pub const DEFAULT_POLL_INTERVAL_US: u64 = 500;

/// Upper bound on the number of clock ticks two boards' trigger times may
/// legitimately differ by before it is flagged as drift.
pub const MAX_TRIG_TIME_DRIFT: i64 = 2;

/// Calibration pulser state that injects a usable alignment pulse.
pub const CALPULSER_STATE: u8 = 3;

/// Sleep, in seconds, after a `GLOBAL`/`ALMOST_GLOBAL` reset while the FPGA
/// reloads.
pub const RESET_RELOAD_SECONDS: u64 = 20;

/// Sleep, in seconds, between ADC-clock-reset calibration retries.
pub const CALIBRATION_RETRY_SECONDS: u64 = 1;

/// Buffer length, in samples, used while calibrating ADC delays.
pub const CALIBRATION_BUFFER_LENGTH: u32 = 1024;

/// Maximum time to wait for a calibration software-trigger to produce a
/// ready buffer.
pub const CALIBRATION_TRIGGER_TIMEOUT_MS: u64 = 1000;

// ADC-delay calibration pairs up channels (see reset::write_adc_delays),
// and the status register's ready mask packs one bit per buffer into a
// byte: both layouts this crate assumes are worth pinning down.
const_assert!(NUM_CHAN % 2 == 0);
const_assert!(NUM_BUFFER <= 8);
