//! Hardware generation parameters.
//!
//! The board family ships in two generations, "NP" and "BN", which share a
//! register map but differ in clock rate and in how a handful of command
//! fields are encoded on the wire. A [`Generation`] is a runtime property
//! of an open [`crate::device::Device`], not a build-time feature: a
//! single process may drive either generation, so the choice lives in
//! data rather than behind `cfg`.

/// Which hardware generation a board belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Generation {
    /// The original board generation.
    Np,
    /// The newer board generation.
    Bn,
}

impl Generation {
    /// Trigger/readout clock rate, in Hz, used to convert the 48-bit
    /// hardware `trig_time` counter into wall-clock seconds.
    ///
    /// NP boards clock the counter at 7.5 MHz; BN boards divide a 500 MHz
    /// reference by 16.
    pub const fn board_clock_hz(self) -> u64 {
        match self {
            Generation::Np => 7_500_000,
            Generation::Bn => 500_000_000 / 16,
        }
    }

    /// Encodes a channel index for the channel-select command payload.
    ///
    /// BN boards use a one-hot mask (`1 << i`); NP boards use the bare
    /// integer index.
    pub const fn encode_channel(self, index: u8) -> u8 {
        match self {
            Generation::Np => index,
            Generation::Bn => 1u8 << index,
        }
    }

    /// Encodes a chunk index for the RAM-chunk read command.
    ///
    /// BN boards fold the chunk index into the opcode itself
    /// (`REG_CHUNK + i`, zero payload); NP boards use a single fixed
    /// opcode with the chunk index as payload.
    pub const fn encode_chunk(self, base_opcode: u8, index: u8) -> (u8, u8) {
        match self {
            Generation::Bn => (base_opcode + index, 0),
            Generation::Np => (base_opcode, index),
        }
    }
}
