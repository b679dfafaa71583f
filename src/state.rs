//! Per-board shadow of the last-selected buffer and readout mode.
//!
//! Readout sequences consult this cache before emitting a mode-select or
//! buffer-select transfer and skip the transfer entirely when the board
//! is already known to be in the requested state. Every code path that
//! may change these fields (mode switches, buffer selection, a global
//! reset) updates the cache inside the same command-lock critical
//! section that issued the transfer, so the cache never lags what was
//! actually written to the board.

use crate::cmd::Mode;

/// Sentinel used for "no buffer selected yet."
const INVALID_BUFFER: u8 = 0xFF;

/// Sentinel used for "no mode selected yet."
const INVALID_MODE: Option<Mode> = None;

/// Tracks the board's last-known mode and buffer selection.
#[derive(Debug)]
pub struct BoardState {
    current_buf: u8,
    current_mode: Option<Mode>,
}

impl Default for BoardState {
    fn default() -> Self {
        BoardState {
            current_buf: INVALID_BUFFER,
            current_mode: INVALID_MODE,
        }
    }
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `mode` need not be re-selected.
    pub fn mode_is_current(&self, mode: Mode) -> bool {
        self.current_mode == Some(mode)
    }

    /// Returns `true` if `buffer` need not be re-selected.
    pub fn buffer_is_current(&self, buffer: u8) -> bool {
        self.current_buf == buffer
    }

    /// Records that `mode` was just selected on the wire.
    pub fn set_mode(&mut self, mode: Mode) {
        self.current_mode = Some(mode);
    }

    /// Records that `buffer` was just selected on the wire.
    pub fn set_buffer(&mut self, buffer: u8) {
        self.current_buf = buffer;
    }

    /// Invalidates the cache, forcing the next mode/buffer selection to
    /// be re-issued on the wire. Used after a reset, where the board's
    /// actual state is no longer known to match our shadow of it.
    pub fn invalidate(&mut self) {
        self.current_buf = INVALID_BUFFER;
        self.current_mode = INVALID_MODE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_matches_nothing() {
        let s = BoardState::new();
        assert!(!s.mode_is_current(Mode::Waveform));
        assert!(!s.buffer_is_current(0));
    }

    #[test]
    fn cache_reflects_last_selection() {
        let mut s = BoardState::new();
        s.set_mode(Mode::Waveform);
        s.set_buffer(2);
        assert!(s.mode_is_current(Mode::Waveform));
        assert!(!s.mode_is_current(Mode::Register));
        assert!(s.buffer_is_current(2));
        assert!(!s.buffer_is_current(1));
    }

    #[test]
    fn invalidate_clears_both_fields() {
        let mut s = BoardState::new();
        s.set_mode(Mode::Register);
        s.set_buffer(3);
        s.invalidate();
        assert!(!s.mode_is_current(Mode::Register));
        assert!(!s.buffer_is_current(3));
    }
}
