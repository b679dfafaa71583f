//! Register map.
//!
//! Abstracted opcode addresses for the board's register file. All SPI
//! traffic is a fixed 4-byte word `[opcode, payload_hi, payload_mid,
//! payload_lo]`; register reads are a two-phase sequence: write
//! `[SET_READ_REG, 0, 0, target]`, then a `READ` transfer returns
//! `[target, data_hi, data_mid, data_lo]` on the following transfer.

use enum_primitive::FromPrimitive;
use enum_primitive::enum_from_primitive;

/// A register opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    Status = 0x01,
    SetReadReg = 0x02,
    Read = 0x03,

    EventCounterLo = 0x10,
    EventCounterHi = 0x11,
    TrigCounterLo = 0x12,
    TrigCounterHi = 0x13,
    TrigTimeLo = 0x14,
    TrigTimeHi = 0x15,
    Deadtime = 0x16,
    TrigInfo = 0x17,
    ChannelMask = 0x18,
    UserBeamMask = 0x19,
    LastBeam = 0x1A,
    BeamPower = 0x1B,
    PpsCounter = 0x1C,
    DynamicBeamMask = 0x1D,
    VetoDeadtimeCounter = 0x1E,
    ChannelReadMask = 0x1F,

    Mode = 0x20,
    BufferSelect = 0x21,
    ChannelSelect = 0x22,
    RamAddr = 0x23,
    Chunk = 0x24,
    Clear = 0x25,

    ResetAll = 0x30,
    ResetCounter = 0x31,
    Sync = 0x32,
    AdcClockReset = 0x33,
    TimestampMode = 0x34,
    SoftwareTrigger = 0x35,

    UpdateScalers = 0x40,
    PickScaler = 0x41,
    ScalerRead = 0x42,

    Thresholds = 0x50,
    Attenuation0 = 0x58,
    Attenuation1 = 0x59,
    Attenuation2 = 0x5A,
    TrigMask = 0x60,
    TrigEnables = 0x61,
    TrigPol = 0x62,
    TrigDelays0 = 0x63,
    TrigDelays1 = 0x64,
    TrigDelays2 = 0x65,
    DynamicMask = 0x66,
    DynamicHoldoff = 0x67,
    VetoOptions = 0x68,
    VetoCut1 = 0x69,
    VetoCut2 = 0x6A,
    TrigOut = 0x6B,
    ExtInputEnable = 0x6C,
    ExtInputDelay = 0x6D,

    AdcDelays = 0x70,
    Calpulser = 0x71,
}

impl Register {
    /// The register's opcode byte.
    pub const fn opcode(self) -> u8 {
        self as u8
    }
}

/// Trigger source decoded from bits 15-16 of `trig_info`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrigType {
    Software,
    Rf,
    External,
    Calpulser,
}

impl TrigType {
    /// Decodes a trigger type from the two-bit field found in `trig_info`.
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => TrigType::Software,
            1 => TrigType::Rf,
            2 => TrigType::External,
            _ => TrigType::Calpulser,
        }
    }
}

enum_from_primitive! {
    /// Trigger polarization selection.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum TrigPol {
        H = 0,
        V = 1,
        Both = 2,
    }
}
