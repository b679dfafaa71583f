//! A single physical board's SPI link: its transaction buffer, its
//! board-state cache, and the process-wide id assigned to it at open
//! time.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::board::Generation;
use crate::cmd::{self, Mode};
use crate::error::Result;
use crate::port::SpiPort;
use crate::spi::TransactionBuffer;
use crate::state::BoardState;

static NEXT_BOARD_ID: AtomicU32 = AtomicU32::new(0);

/// Assigns the next process-wide board id. Board ids are handed out in
/// open order and never reused; `open` is not expected to race with
/// itself.
pub fn next_board_id() -> u32 {
    NEXT_BOARD_ID.fetch_add(1, Ordering::SeqCst)
}

/// One board's link: transport, state cache, identity, and generation.
pub struct Link<P: SpiPort> {
    pub buf: TransactionBuffer<P>,
    pub state: BoardState,
    pub id: u32,
    pub generation: Generation,
}

impl<P: SpiPort> Link<P> {
    pub fn new(port: P, generation: Generation) -> Self {
        Link {
            buf: TransactionBuffer::new(port),
            state: BoardState::new(),
            id: next_board_id(),
            generation,
        }
    }

    /// Appends a mode-select command unless the state cache already
    /// reports `mode` current, and updates the cache.
    pub fn select_mode(&mut self, mode: Mode) -> Result<()> {
        if !self.state.mode_is_current(mode) {
            self.buf.append(cmd::mode_command(self.generation, mode))?;
            self.state.set_mode(mode);
        }
        Ok(())
    }

    /// Appends a buffer-select command unless the state cache already
    /// reports `buffer` current, and updates the cache.
    pub fn select_buffer(&mut self, buffer: u8) -> Result<()> {
        if !self.state.buffer_is_current(buffer) {
            self.buf
                .append(cmd::buffer_command(self.generation, buffer))?;
            self.state.set_buffer(buffer);
        }
        Ok(())
    }
}
