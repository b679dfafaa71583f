//! Header, event, and scaler-snapshot records populated by the event
//! reader.

use crate::consts::{MAX_WAVEFORM_LENGTH, NUM_BEAMS, NUM_CHAN, NUM_SCALERS};
use crate::regs::{TrigPol, TrigType};

/// Bit flags recorded in [`Header::sync_problem`].
pub mod sync_problem {
    /// Software/hardware buffer-number cursor mismatch.
    pub const BUFFER_MISMATCH: u8 = 1 << 0;
    /// Master/slave trig-number mismatch.
    pub const TRIG_NUMBER_MISMATCH: u8 = 1 << 1;
    /// Master/slave trig-time drift exceeding the allowed tolerance.
    pub const TRIG_TIME_DRIFT: u8 = 1 << 2;
    /// Master/slave buffer-number drift.
    pub const BUFFER_DRIFT: u8 = 1 << 3;
    /// Software event counter diverged from the hardware counter.
    pub const EVENT_COUNTER_MISMATCH: u8 = 1 << 4;
}

/// Per-board fields carried alongside the logical event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerBoard<T> {
    pub master: T,
    pub slave: T,
}

/// A fully decoded event header.
#[derive(Clone, Debug)]
pub struct Header {
    /// Upper 32 bits are the seconds-since-epoch at device open time
    /// ([`crate::device::Device`]'s `readout_number_offset`); lower 32
    /// bits are the hardware event counter for this readout.
    pub event_number: u64,
    pub trig_number: u32,
    pub buffer_length: u32,
    pub pretrigger_samples: u32,
    pub readout_time: PerBoard<u32>,
    pub readout_time_ns: PerBoard<u32>,
    pub trig_time: PerBoard<u64>,
    pub approx_trigger_time_s: u64,
    pub approx_trigger_time_ns: u32,
    pub triggered_beams: u32,
    pub beam_mask: u32,
    pub beam_power: u32,
    pub channel_mask: u8,
    pub channel_read_mask: PerBoard<u8>,
    pub trig_type: TrigType,
    pub calpulser: bool,
    pub deadtime: PerBoard<u32>,
    pub buffer_number: u8,
    pub buffer_mask: u8,
    pub board_id: PerBoard<u32>,
    pub pps_counter: u32,
    pub dynamic_beam_mask: u32,
    pub veto_deadtime_counter: u32,
    pub gate_flag: bool,
    pub trig_pol: TrigPol,
    /// Bitfield of [`sync_problem`] flags; zero means "no discrepancies
    /// observed."
    pub sync_problem: u8,
}

/// Channel waveform data for one logical event.
pub struct Event {
    /// Same epoch-stamped readout number as [`Header::event_number`].
    pub event_number: u64,
    pub buffer_length: u32,
    pub board_id: [u32; 2],
    pub data: Box<[[[u8; MAX_WAVEFORM_LENGTH]; NUM_CHAN]; 2]>,
}

impl Event {
    pub fn new() -> Self {
        Event {
            event_number: 0,
            buffer_length: 0,
            board_id: [0; 2],
            data: Box::new([[[0u8; MAX_WAVEFORM_LENGTH]; NUM_CHAN]; 2]),
        }
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

/// Index into [`Event::data`]/[`PerBoard`] for the master board.
pub const MASTER: usize = 0;
/// Index into [`Event::data`]/[`PerBoard`] for the slave board.
pub const SLAVE: usize = 1;

/// A snapshot of the board's rate-counter status.
#[derive(Clone, Debug)]
pub struct ScalerSnapshot {
    pub global: [u32; NUM_SCALERS],
    pub beams: [[u32; NUM_BEAMS]; NUM_SCALERS],
    pub thresholds: [u32; NUM_BEAMS],
    pub pps_time: u64,
    pub dynamic_beam_mask: u32,
    pub veto_active: bool,
}
