//! Scaler readout: rate counters, thresholds, latched PPS time, dynamic
//! beam mask, and veto status, assembled into a [`ScalerSnapshot`].
//!
//! The sequence is `UPDATE_SCALERS=1` (latches the counters), then for
//! each of [`NUM_SCALERS`] scaler banks, `PICK_SCALER=i` followed by one
//! `SCALER_READ` per beam plus the bank's global counter, all under one
//! flush.

use crate::consts::{NUM_BEAMS, NUM_SCALERS};
use crate::error::Result;
use crate::header::ScalerSnapshot;
use crate::link::Link;
use crate::port::SpiPort;
use crate::regio::read_registers;
use crate::regs::Register;

/// Reads a full [`ScalerSnapshot`] from `link`.
pub fn read_scalers<P: SpiPort>(link: &mut Link<P>) -> Result<ScalerSnapshot> {
    link.buf
        .append([Register::UpdateScalers.opcode(), 0, 0, 1])?;
    link.buf.flush()?;

    let mut global = [0u32; NUM_SCALERS];
    let mut beams = [[0u32; NUM_BEAMS]; NUM_SCALERS];

    for bank in 0..NUM_SCALERS {
        link.buf
            .append(crate::cmd::scaler_pick_command(link.generation, bank as u8))?;
        link.buf.flush()?;

        // The global counter is read first, then one SCALER_READ per beam.
        let regs = vec![Register::ScalerRead.opcode(); NUM_BEAMS + 1];
        let values = read_registers(&mut link.buf, &regs)?;
        global[bank] = values[0];
        beams[bank].copy_from_slice(&values[1..]);
    }

    let mut thresholds = [0u32; NUM_BEAMS];
    for (i, t) in thresholds.iter_mut().enumerate() {
        *t = crate::config::get_threshold(link, i as u8)?;
    }

    let pps_hi = read_registers(&mut link.buf, &[Register::PpsCounter.opcode()])?[0];
    let pps_lo = read_registers(&mut link.buf, &[Register::PpsCounter.opcode()])?[0];
    let pps_time = crate::bits::assemble_48(pps_lo, pps_hi);

    let dynamic_beam_mask = read_registers(&mut link.buf, &[Register::DynamicMask.opcode()])?[0];
    let veto_raw = read_registers(&mut link.buf, &[Register::VetoOptions.opcode()])?[0];
    let veto_active = veto_raw & 0xF != 0;

    Ok(ScalerSnapshot {
        global,
        beams,
        thresholds,
        pps_time,
        dynamic_beam_mask,
        veto_active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Generation;
    use crate::port::fake::FakeBoard;

    #[test]
    fn reads_global_and_per_beam_scalers_for_each_bank() {
        let board = FakeBoard::new();
        for bank in 0..NUM_SCALERS {
            board.push_register_value(Register::ScalerRead.opcode(), 100 + bank as u32);
            for beam in 0..NUM_BEAMS {
                board.push_register_value(Register::ScalerRead.opcode(), beam as u32);
            }
        }
        for i in 0..NUM_BEAMS {
            board.push_register_value(Register::Thresholds.opcode() + i as u8, 0);
        }
        board.push_register_value(Register::PpsCounter.opcode(), 0);
        board.push_register_value(Register::PpsCounter.opcode(), 0);
        board.push_register_value(Register::DynamicMask.opcode(), 0);
        board.push_register_value(Register::VetoOptions.opcode(), 0);

        let mut link = Link::new(board.port(), Generation::Bn);
        let snapshot = read_scalers(&mut link).unwrap();

        assert_eq!(snapshot.global[0], 100);
        assert_eq!(snapshot.global[1], 101);
        assert_eq!(snapshot.beams[0][5], 5);
        assert!(!snapshot.veto_active);
    }
}
