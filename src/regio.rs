//! Batched register-read helper shared by the event reader, the
//! configuration surface's getters, and scaler readout.
//!
//! Appends the two-phase `SET_READ_REG`/`READ` pair for every register in
//! `regs` and flushes exactly once, so a whole metadata sequence crosses
//! the wire as a single batched operation rather than one round trip per
//! field.

use crate::bits::assemble_24;
use crate::error::Result;
use crate::port::SpiPort;
use crate::regs::Register;
use crate::spi::TransactionBuffer;

/// Reads every register in `regs`, in order, as one flush. Returns one
/// decoded 24-bit value per register, in the same order.
pub fn read_registers<P: SpiPort>(buf: &mut TransactionBuffer<P>, regs: &[u8]) -> Result<Vec<u32>> {
    for &reg in regs {
        buf.append([Register::SetReadReg.opcode(), 0, 0, reg])?;
        buf.append([Register::Read.opcode(), 0, 0, 0])?;
    }
    let responses = buf.flush()?;
    Ok(regs
        .iter()
        .enumerate()
        .map(|(i, _)| {
            let [_, hi, mid, lo] = responses[2 * i + 1];
            assemble_24(hi, mid, lo)
        })
        .collect())
}

/// Reads a single register, flushing immediately. Prefer
/// [`read_registers`] when reading more than one field so the sequence
/// shares a flush.
pub fn read_register<P: SpiPort>(buf: &mut TransactionBuffer<P>, reg: u8) -> Result<u32> {
    Ok(read_registers(buf, &[reg])?[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::fake::FakeBoard;

    #[test]
    fn reads_multiple_registers_in_one_flush() {
        let board = FakeBoard::new();
        board.push_register_value(0x10, 0x001122);
        board.push_register_value(0x11, 0x334455);

        let mut buf = TransactionBuffer::new(board.port());
        let values = read_registers(&mut buf, &[0x10, 0x11]).unwrap();
        assert_eq!(values, vec![0x001122, 0x334455]);
    }
}
