//! Static command tables.
//!
//! All SPI traffic is four-byte command words `[opcode, payload_hi,
//! payload_mid, payload_lo]`. Rather than format a fresh word on every
//! call, the driver precomputes one row per {mode, channel, buffer,
//! chunk, clear-mask, scaler} index the first time a given
//! [`crate::board::Generation`] is touched, and afterwards only ever
//! copies out of that read-only table. This keeps the hot readout path
//! free of per-call allocation and gives the invariant that table row
//! `i` always equals the live encoding for index `i` somewhere concrete
//! to hold.

use std::sync::OnceLock;

use paste::paste;

use crate::board::Generation;
use crate::consts::{MAX_WAVEFORM_LENGTH, NUM_BUFFER, NUM_CHAN, NUM_CHUNK, NUM_SCALERS, WORD};
use crate::regs::Register;

/// Readout mode the board is switched into before a batch of transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    /// Plain register access; no channel RAM is being streamed.
    Register = 0,
    /// Waveform readout; channel-select and RAM-address commands apply.
    Waveform = 1,
}

pub const NUM_MODES: usize = 2;
const MAX_RAM_ADDR: usize = MAX_WAVEFORM_LENGTH / (WORD * NUM_CHUNK);

/// Declares a `{name}_rows(opcode, len)` builder for a flat
/// `[opcode, 0, 0, i]` index table. Every index kind that does not vary
/// between board generations (mode, buffer, scaler-pick, RAM address)
/// goes through one of these.
macro_rules! flat_index_table {
    ($name:ident) => {
        paste! {
            fn [<$name _rows>](opcode: u8, len: usize) -> Vec<[u8; 4]> {
                (0..len).map(|i| [opcode, 0, 0, i as u8]).collect()
            }
        }
    };
}

flat_index_table!(generic);

/// Precomputed, read-only command tables for one hardware generation.
pub struct CommandTables {
    pub mode: Vec<[u8; 4]>,
    pub channel: Vec<[u8; 4]>,
    pub buffer: Vec<[u8; 4]>,
    pub chunk: Vec<[u8; 4]>,
    pub clear: Vec<[u8; 4]>,
    pub scaler_pick: Vec<[u8; 4]>,
    pub ram_addr: Vec<[u8; 4]>,
}

impl CommandTables {
    fn build(generation: Generation) -> Self {
        let mode = generic_rows(Register::Mode.opcode(), NUM_MODES);
        let buffer = generic_rows(Register::BufferSelect.opcode(), NUM_BUFFER);
        let scaler_pick = generic_rows(Register::PickScaler.opcode(), NUM_SCALERS);
        let ram_addr = generic_rows(Register::RamAddr.opcode(), MAX_RAM_ADDR);

        // Buffer-clear masks are one-hot: clearing buffer `b` writes bit
        // `b` of the clear register, never a bare index.
        let clear = (0..NUM_BUFFER)
            .map(|b| [Register::Clear.opcode(), 0, 0, 1u8 << b])
            .collect();

        // Channel and chunk encodings vary per generation (one-hot vs.
        // integer index for channels; opcode-folded vs. payload-folded
        // for chunks).
        let channel = (0..NUM_CHAN)
            .map(|i| {
                [
                    Register::ChannelSelect.opcode(),
                    0,
                    0,
                    generation.encode_channel(i as u8),
                ]
            })
            .collect();
        let chunk = (0..NUM_CHUNK)
            .map(|i| {
                let (opcode, payload) =
                    generation.encode_chunk(Register::Chunk.opcode(), i as u8);
                [opcode, 0, 0, payload]
            })
            .collect();

        CommandTables {
            mode,
            channel,
            buffer,
            chunk,
            clear,
            scaler_pick,
            ram_addr,
        }
    }
}

static NP_TABLES: OnceLock<CommandTables> = OnceLock::new();
static BN_TABLES: OnceLock<CommandTables> = OnceLock::new();

/// Returns the process-wide, lazily initialized command tables for
/// `generation`. The first caller for a given generation pays the cost of
/// building the table; every subsequent caller, from any thread, shares
/// the same read-only allocation.
pub fn tables_for(generation: Generation) -> &'static CommandTables {
    match generation {
        Generation::Np => NP_TABLES.get_or_init(|| CommandTables::build(generation)),
        Generation::Bn => BN_TABLES.get_or_init(|| CommandTables::build(generation)),
    }
}

/// A mode-select command word, elided by the caller if the board state
/// cache already reports this mode current.
pub fn mode_command(generation: Generation, mode: Mode) -> [u8; 4] {
    tables_for(generation).mode[mode as usize]
}

/// A buffer-select command word.
pub fn buffer_command(generation: Generation, buffer: u8) -> [u8; 4] {
    tables_for(generation).buffer[buffer as usize]
}

/// A channel-select command word.
pub fn channel_command(generation: Generation, channel: u8) -> [u8; 4] {
    tables_for(generation).channel[channel as usize]
}

/// A chunk-read command word.
pub fn chunk_command(generation: Generation, chunk: u8) -> [u8; 4] {
    tables_for(generation).chunk[chunk as usize]
}

/// A buffer-clear command word (one-hot mask for `buffer`).
pub fn clear_command(generation: Generation, buffer: u8) -> [u8; 4] {
    tables_for(generation).clear[buffer as usize]
}

/// A scaler-pick command word.
pub fn scaler_pick_command(generation: Generation, scaler: u8) -> [u8; 4] {
    tables_for(generation).scaler_pick[scaler as usize]
}

/// A RAM-address command word for reading waveform chunk data.
pub fn ram_addr_command(generation: Generation, addr: u16) -> [u8; 4] {
    let row = tables_for(generation).ram_addr[addr as usize];
    [row[0], (addr >> 8) as u8, 0, row[3]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_encoding_is_one_hot_on_bn_and_integer_on_np() {
        let bn = tables_for(Generation::Bn);
        let np = tables_for(Generation::Np);
        for i in 0..NUM_CHAN {
            assert_eq!(bn.channel[i][3], 1u8 << i);
            assert_eq!(np.channel[i][3], i as u8);
        }
    }

    #[test]
    fn chunk_encoding_folds_opcode_on_bn_and_payload_on_np() {
        let bn = tables_for(Generation::Bn);
        let np = tables_for(Generation::Np);
        for i in 0..NUM_CHUNK {
            assert_eq!(bn.chunk[i][0], Register::Chunk.opcode() + i as u8);
            assert_eq!(bn.chunk[i][3], 0);
            assert_eq!(np.chunk[i][0], Register::Chunk.opcode());
            assert_eq!(np.chunk[i][3], i as u8);
        }
    }

    #[test]
    fn table_rows_match_live_encoding_for_every_index() {
        for &gen in &[Generation::Np, Generation::Bn] {
            let t = tables_for(gen);
            for (i, row) in t.buffer.iter().enumerate() {
                assert_eq!(*row, [Register::BufferSelect.opcode(), 0, 0, i as u8]);
            }
            for (i, row) in t.mode.iter().enumerate() {
                assert_eq!(*row, [Register::Mode.opcode(), 0, 0, i as u8]);
            }
            for (b, row) in t.clear.iter().enumerate() {
                assert_eq!(*row, [Register::Clear.opcode(), 0, 0, 1u8 << b]);
            }
        }
    }
}
