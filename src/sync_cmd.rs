//! Synchronized-command protocol.
//!
//! Wraps any state-changing command that must land on both boards at the
//! same instant as `SYNC_ON -> slave_cmd -> slave_flush -> master_cmd ->
//! SYNC_OFF`, all under the caller's command lock. For a single-board
//! configuration the command is issued directly on the master with no
//! SYNC wrapper at all.

use crate::error::Result;
use crate::port::SpiPort;
use crate::regs::Register;
use crate::spi::TransactionBuffer;

fn sync_command(on: bool) -> [u8; 4] {
    [Register::Sync.opcode(), 0, 0, on as u8]
}

/// Issues `cmds`, in order, simultaneously on both boards if `slave` is
/// present, or directly on `master` alone otherwise.
///
/// On a two-board configuration the on-wire sequence is exactly:
/// `M:SYNC_ON, S:cmds.., M:cmds.., M:SYNC_OFF` — each leg its own flush,
/// so the slave is guaranteed to see the command while sync is still
/// asserted.
pub fn run_synchronized<P: SpiPort, Q: SpiPort>(
    master: &mut TransactionBuffer<P>,
    slave: Option<&mut TransactionBuffer<Q>>,
    cmds: &[[u8; 4]],
) -> Result<()> {
    match slave {
        Some(slave) => {
            master.append(sync_command(true))?;
            master.flush()?;

            for &cmd in cmds {
                slave.append(cmd)?;
            }
            slave.flush()?;

            for &cmd in cmds {
                master.append(cmd)?;
            }
            master.append(sync_command(false))?;
            master.flush()?;
        }
        None => {
            for &cmd in cmds {
                master.append(cmd)?;
            }
            master.flush()?;
        }
    }
    Ok(())
}

/// Appends the two-phase register-read sequence (`SET_READ_REG` then
/// `READ`) to `buf` and returns the decoded 24-bit value once flushed.
pub fn read_register<P: SpiPort>(buf: &mut TransactionBuffer<P>, reg: u8) -> Result<u32> {
    buf.append([Register::SetReadReg.opcode(), 0, 0, reg])?;
    buf.append([Register::Read.opcode(), 0, 0, 0])?;
    let responses = buf.flush()?;
    let [_, hi, mid, lo] = responses[1];
    Ok(crate::bits::assemble_24(hi, mid, lo))
}

/// Runs `cmds` synchronized (or single-board direct) and then reads back
/// `verify_reg` on both boards, for callers that want to confirm both
/// sides actually applied the command.
pub fn run_synchronized_with_verify<P: SpiPort, Q: SpiPort>(
    master: &mut TransactionBuffer<P>,
    slave: Option<&mut TransactionBuffer<Q>>,
    cmds: &[[u8; 4]],
    verify_reg: u8,
) -> Result<(u32, Option<u32>)> {
    match slave {
        Some(slave) => {
            run_synchronized(master, Some(slave), cmds)?;
            let master_value = read_register(master, verify_reg)?;
            let slave_value = read_register(slave, verify_reg)?;
            Ok((master_value, Some(slave_value)))
        }
        None => {
            run_synchronized::<P, P>(master, None, cmds)?;
            let master_value = read_register(master, verify_reg)?;
            Ok((master_value, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::fake::FakeBoard;

    #[test]
    fn two_board_sequence_is_sync_on_slave_master_sync_off() {
        let master_board = FakeBoard::new();
        let slave_board = FakeBoard::new();
        let mut master = TransactionBuffer::new(master_board.port());
        let mut slave = TransactionBuffer::new(slave_board.port());

        let cmd = [0x99, 0, 0, 0x01];
        run_synchronized(&mut master, Some(&mut slave), &[cmd]).unwrap();

        assert_eq!(
            master_board.log(),
            vec![
                [Register::Sync.opcode(), 0, 0, 1],
                cmd,
                [Register::Sync.opcode(), 0, 0, 0],
            ]
        );
        assert_eq!(slave_board.log(), vec![cmd]);
    }

    #[test]
    fn single_board_sequence_is_direct_command_only() {
        let master_board = FakeBoard::new();
        let mut master = TransactionBuffer::new(master_board.port());

        let cmd = [0x99, 0, 0, 0x01];
        run_synchronized::<_, crate::port::fake::FakeSpiPort>(&mut master, None, &[cmd]).unwrap();

        assert_eq!(master_board.log(), vec![cmd]);
    }
}
