//! SPI transaction buffer.
//!
//! A per-board accumulator of up to [`crate::consts::MAX_BATCH`] transfers.
//! `append` queues a command (and, for a two-phase register read, the
//! pending response slot); `flush` issues everything queued as a single
//! batched operation against the board's [`SpiPort`] and clears the
//! queue. Appending past capacity flushes first, so the global transfer
//! order across an unbounded sequence of appends is preserved.

use log::warn;

use crate::consts::MAX_BATCH;
use crate::error::Result;
use crate::port::{SpiPort, Transfer};

/// The accumulator described above, generic over the transport so tests
/// can drive it against [`crate::port::fake::FakeSpiPort`].
pub struct TransactionBuffer<P: SpiPort> {
    port: P,
    pending: Vec<Transfer>,
}

impl<P: SpiPort> TransactionBuffer<P> {
    pub fn new(port: P) -> Self {
        TransactionBuffer {
            port,
            pending: Vec::with_capacity(MAX_BATCH),
        }
    }

    /// Queues `tx` for the next flush. Auto-flushes first if the buffer
    /// is already at [`MAX_BATCH`] capacity, so the overall order of
    /// transfers across the auto-flush boundary is unaffected.
    pub fn append(&mut self, tx: [u8; 4]) -> Result<()> {
        if self.pending.len() >= MAX_BATCH {
            self.flush()?;
        }
        self.pending.push(Transfer { tx, rx: [0; 4] });
        Ok(())
    }

    /// Flushes all pending transfers as one batched operation and
    /// returns their responses in submission order. Clears the queue
    /// regardless of outcome.
    pub fn flush(&mut self) -> Result<Vec<[u8; 4]>> {
        let mut batch = std::mem::take(&mut self.pending);
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let result = self.port.transfer_batch(&mut batch);
        if let Err(ref e) = result {
            warn!("SPI batch of {} transfers failed: {e}", batch.len());
        }
        result?;
        Ok(batch.into_iter().map(|t| t.rx).collect())
    }

    /// Number of transfers currently queued.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::fake::FakeBoard;

    #[test]
    fn append_then_flush_preserves_fifo_order() {
        let board = FakeBoard::new();
        let mut buf = TransactionBuffer::new(board.port());

        buf.append([0xAA, 0, 0, 1]).unwrap();
        buf.append([0xBB, 0, 0, 2]).unwrap();
        buf.flush().unwrap();

        assert_eq!(board.log(), vec![[0xAA, 0, 0, 1], [0xBB, 0, 0, 2]]);
    }

    #[test]
    fn append_beyond_capacity_auto_flushes_preserving_order() {
        let board = FakeBoard::new();
        let mut buf = TransactionBuffer::new(board.port());

        for i in 0..MAX_BATCH {
            buf.append([0xCC, 0, 0, (i % 256) as u8]).unwrap();
        }
        assert_eq!(buf.pending_len(), MAX_BATCH);
        // One more append must auto-flush the first MAX_BATCH before
        // queuing the new one.
        buf.append([0xDD, 0, 0, 0xFF]).unwrap();
        assert_eq!(buf.pending_len(), 1);

        let logged = board.log();
        assert_eq!(logged.len(), MAX_BATCH);
        assert_eq!(logged[0], [0xCC, 0, 0, 0]);

        buf.flush().unwrap();
        assert_eq!(board.log().len(), MAX_BATCH + 1);
        assert_eq!(*board.log().last().unwrap(), [0xDD, 0, 0, 0xFF]);
    }

    #[test]
    fn flush_failure_is_reported_and_clears_queue() {
        let board = FakeBoard::new();
        let mut buf = TransactionBuffer::new(board.port());
        board.fail_next_batch();

        buf.append([0x01, 0, 0, 0]).unwrap();
        assert!(buf.flush().is_err());
        assert_eq!(buf.pending_len(), 0);
    }
}
