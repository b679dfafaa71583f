//! Event reader.
//!
//! For one ready buffer, issues the metadata sequence on each board,
//! decodes and cross-checks the counters, populates the header, streams
//! per-channel waveform samples, clears the buffer through the
//! synchronized-command path, and finally checks master/slave
//! consistency.

use log::warn;

use crate::bits::{assemble_48, carry_nanos, split_24};
use crate::cmd::{self, Mode};
use crate::consts::{MAX_WAVEFORM_LENGTH, NUM_CHAN, NUM_CHUNK, WORD};
use crate::error::Result;
use crate::header::{sync_problem, Event, Header, PerBoard, MASTER, SLAVE};
use crate::link::Link;
use crate::port::SpiPort;
use crate::regio::read_registers;
use crate::regs::{Register, TrigPol, TrigType};
use crate::sync_cmd;

/// Registers read on every board (master and slave alike).
const COMMON_METADATA_REGS: [Register; 8] = [
    Register::EventCounterLo,
    Register::EventCounterHi,
    Register::TrigCounterLo,
    Register::TrigCounterHi,
    Register::TrigTimeLo,
    Register::TrigTimeHi,
    Register::Deadtime,
    Register::TrigInfo,
];

/// Additional registers read on the master only.
const MASTER_ONLY_METADATA_REGS: [Register; 8] = [
    Register::ChannelMask,
    Register::ChannelReadMask,
    Register::UserBeamMask,
    Register::LastBeam,
    Register::BeamPower,
    Register::PpsCounter,
    Register::DynamicBeamMask,
    Register::VetoDeadtimeCounter,
];

/// One board's decoded metadata for a single event.
#[derive(Debug, Default)]
struct BoardMetadata {
    event_counter: u64,
    trig_counter: u64,
    trig_time: u64,
    deadtime: u32,
    trig_info: u32,
    buffer_number: u8,
    calpulser: bool,
    trig_type: u8,
    trig_pol: u8,
    channel_mask: u8,
    channel_read_mask: u8,
    user_beam_mask: u32,
    last_beam: u32,
    beam_power: u32,
    pps_counter: u32,
    dynamic_beam_mask: u32,
    veto_deadtime_counter: u32,
}

fn decode_trig_info(trig_info: u32, md: &mut BoardMetadata) {
    md.buffer_number = ((trig_info >> 22) & 0x3) as u8;
    md.calpulser = (trig_info >> 21) & 0x1 != 0;
    md.trig_type = ((trig_info >> 15) & 0x3) as u8;
    md.trig_pol = (trig_info & 0xF) as u8;
}

/// Reads and decodes one board's metadata sequence for `buffer`. Does
/// not flush the buffer-select command separately: the caller is
/// expected to have already selected `buffer` and register mode.
fn read_metadata<P: SpiPort>(link: &mut Link<P>, is_master: bool) -> Result<BoardMetadata> {
    let mut regs: Vec<u8> = COMMON_METADATA_REGS.iter().map(|r| r.opcode()).collect();
    if is_master {
        regs.extend(MASTER_ONLY_METADATA_REGS.iter().map(|r| r.opcode()));
    }
    let v = read_registers(&mut link.buf, &regs)?;

    let mut md = BoardMetadata {
        event_counter: assemble_48(v[0], v[1]),
        trig_counter: assemble_48(v[2], v[3]),
        trig_time: assemble_48(v[4], v[5]),
        deadtime: v[6],
        trig_info: v[7],
        ..Default::default()
    };
    decode_trig_info(md.trig_info, &mut md);

    if is_master {
        md.channel_mask = v[8] as u8;
        md.channel_read_mask = v[9] as u8;
        md.user_beam_mask = v[10];
        md.last_beam = v[11];
        md.beam_power = v[12];
        md.pps_counter = v[13];
        md.dynamic_beam_mask = v[14];
        md.veto_deadtime_counter = v[15];
    }
    Ok(md)
}

/// Streams waveform data for every channel set in `channel_read_mask`
/// into `out[channel]`; channels not selected are left zeroed.
fn read_waveform<P: SpiPort>(
    link: &mut Link<P>,
    channel_read_mask: u8,
    buffer_length: u32,
    out: &mut [[u8; MAX_WAVEFORM_LENGTH]; NUM_CHAN],
) -> Result<()> {
    link.select_mode(Mode::Waveform)?;
    link.buf.flush()?;

    let ram_addrs = (buffer_length as usize) / (WORD * NUM_CHUNK);

    for channel in 0..NUM_CHAN {
        if channel_read_mask & (1 << channel) == 0 {
            continue;
        }
        link.buf
            .append(cmd::channel_command(link.generation, channel as u8))?;

        for addr in 0..ram_addrs {
            link.buf
                .append(cmd::ram_addr_command(link.generation, addr as u16))?;
            for chunk in 0..NUM_CHUNK {
                link.buf
                    .append(cmd::chunk_command(link.generation, chunk as u8))?;
            }
        }
        let responses = link.buf.flush()?;

        // responses[0] is the channel-select ack; each remaining group
        // of (1 ram-addr ack + NUM_CHUNK chunk words) carries WORD bytes
        // of sample data per chunk.
        let mut idx = 1;
        let mut sample = 0usize;
        for _addr in 0..ram_addrs {
            idx += 1; // skip the RAM-address ack
            for _chunk in 0..NUM_CHUNK {
                let data = responses[idx];
                idx += 1;
                for b in data {
                    if sample < MAX_WAVEFORM_LENGTH {
                        out[channel][sample] = b;
                        sample += 1;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Reads and fully decodes one ready buffer, for both boards.
#[allow(clippy::too_many_arguments)]
pub fn read_one_buffer<P: SpiPort, Q: SpiPort>(
    master: &mut Link<P>,
    slave: Option<&mut Link<Q>>,
    buffer: u8,
    buffer_length: u32,
    pretrigger: u32,
    start_time: (u64, u32),
    software_event_counter: u32,
    channel_read_mask: PerBoard<u8>,
    readout_number_offset: u64,
) -> Result<(Header, Event)> {
    master.select_buffer(buffer)?;
    master.select_mode(Mode::Register)?;
    let master_md = read_metadata(master, true)?;

    let mut sync_problem = 0u8;

    if (master_md.event_counter as u32) != software_event_counter {
        warn!(
            "event counter mismatch: software={} hardware={}",
            software_event_counter, master_md.event_counter
        );
        sync_problem |= sync_problem::EVENT_COUNTER_MISMATCH;
    }

    // Upper 32 bits fixed at open time, lower 32 bits are this readout's
    // hardware event counter.
    let readout_number = readout_number_offset | (master_md.event_counter & 0xFFFF_FFFF);

    let mut event = Event::new();
    event.buffer_length = buffer_length;
    event.event_number = readout_number;
    event.board_id[MASTER] = master.id;

    read_waveform(
        master,
        channel_read_mask.master,
        buffer_length,
        &mut event.data[MASTER],
    )?;

    let slave_decoded = if let Some(slave_link) = slave {
        slave_link.select_buffer(buffer)?;
        slave_link.select_mode(Mode::Register)?;
        let md = read_metadata(slave_link, false)?;
        event.board_id[SLAVE] = slave_link.id;
        read_waveform(
            slave_link,
            channel_read_mask.slave,
            buffer_length,
            &mut event.data[SLAVE],
        )?;
        Some(md)
    } else {
        None
    };

    if let Some(ref smd) = slave_decoded {
        if smd.trig_counter != master_md.trig_counter {
            sync_problem |= sync_problem::TRIG_NUMBER_MISMATCH;
        }
        let drift = (smd.trig_time as i64 - master_md.trig_time as i64).abs();
        if drift > crate::consts::MAX_TRIG_TIME_DRIFT {
            sync_problem |= sync_problem::TRIG_TIME_DRIFT;
        }
        if smd.buffer_number != master_md.buffer_number {
            sync_problem |= sync_problem::BUFFER_DRIFT;
        }
    }

    if master_md.buffer_number != buffer {
        sync_problem |= sync_problem::BUFFER_MISMATCH;
    }

    // trig_time is a 48-bit counter; multiplying it out by 1e9 before
    // dividing overflows u64 well before the counter itself wraps, so the
    // intermediate product runs in u128.
    let board_clock_hz = master.generation.board_clock_hz();
    let trigger_nanos =
        ((master_md.trig_time as u128 * 1_000_000_000) / board_clock_hz as u128) as u64;
    let (approx_s, approx_ns) = carry_nanos(start_time.0, start_time.1 as u64 + trigger_nanos);

    let header = Header {
        event_number: readout_number,
        trig_number: master_md.trig_counter as u32,
        buffer_length,
        pretrigger_samples: pretrigger * crate::consts::PRETRIGGER_UNIT,
        readout_time: PerBoard {
            master: start_time.0 as u32,
            slave: start_time.0 as u32,
        },
        readout_time_ns: PerBoard {
            master: start_time.1,
            slave: start_time.1,
        },
        trig_time: PerBoard {
            master: master_md.trig_time,
            slave: slave_decoded.as_ref().map(|m| m.trig_time).unwrap_or(0),
        },
        approx_trigger_time_s: approx_s,
        approx_trigger_time_ns: approx_ns,
        triggered_beams: master_md.last_beam,
        beam_mask: master_md.user_beam_mask,
        beam_power: master_md.beam_power,
        channel_mask: master_md.channel_mask,
        channel_read_mask,
        trig_type: decode_trig_type(master_md.trig_type),
        calpulser: master_md.calpulser,
        deadtime: PerBoard {
            master: master_md.deadtime,
            slave: slave_decoded.as_ref().map(|m| m.deadtime).unwrap_or(0),
        },
        buffer_number: master_md.buffer_number,
        buffer_mask: 1 << buffer,
        board_id: PerBoard {
            master: master.id,
            slave: event.board_id[SLAVE],
        },
        pps_counter: master_md.pps_counter,
        dynamic_beam_mask: master_md.dynamic_beam_mask,
        veto_deadtime_counter: master_md.veto_deadtime_counter,
        gate_flag: false,
        trig_pol: decode_trig_pol(master_md.trig_pol),
        sync_problem,
    };

    Ok((header, event))
}

fn decode_trig_type(bits: u8) -> TrigType {
    TrigType::from_bits(bits)
}

fn decode_trig_pol(bits: u8) -> TrigPol {
    enum_primitive::FromPrimitive::from_u8(bits & 0x3).unwrap_or(TrigPol::Both)
}

/// Marks `buffer` cleared on both boards (or just the master, for a
/// single-board configuration) via the synchronized-command path, then
/// confirms the status byte shows it freed.
pub fn clear_buffer<P: SpiPort, Q: SpiPort>(
    master: &mut Link<P>,
    slave: Option<&mut Link<Q>>,
    buffer: u8,
) -> Result<bool> {
    let cmd_word = cmd::clear_command(master.generation, buffer);
    sync_cmd::run_synchronized(&mut master.buf, slave.map(|s| &mut s.buf), &[cmd_word])?;

    let status = read_registers(&mut master.buf, &[Register::Status.opcode()])?[0];
    let (_, _, lo) = split_24(status);
    let freed = lo & (1 << buffer) == 0;
    if !freed {
        warn!("buffer {buffer} still reported ready after clear");
    }
    Ok(freed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Generation;
    use crate::port::fake::FakeBoard;

    fn script_common(board: &FakeBoard, event_counter: u64, trig_time: u64) {
        board.push_register_value(Register::EventCounterLo.opcode(), (event_counter & 0xFF_FFFF) as u32);
        board.push_register_value(Register::EventCounterHi.opcode(), (event_counter >> 24) as u32);
        board.push_register_value(Register::TrigCounterLo.opcode(), 0);
        board.push_register_value(Register::TrigCounterHi.opcode(), 0);
        board.push_register_value(Register::TrigTimeLo.opcode(), (trig_time & 0xFF_FFFF) as u32);
        board.push_register_value(Register::TrigTimeHi.opcode(), (trig_time >> 24) as u32);
        board.push_register_value(Register::Deadtime.opcode(), 0);
        board.push_register_value(Register::TrigInfo.opcode(), 0);
    }

    #[test]
    fn event_counter_mismatch_is_flagged_but_event_still_returned() {
        let board = FakeBoard::new();
        script_common(&board, 5, 0);
        board.push_register_value(Register::ChannelMask.opcode(), 0);
        board.push_register_value(Register::ChannelReadMask.opcode(), 0);
        board.push_register_value(Register::UserBeamMask.opcode(), 0);
        board.push_register_value(Register::LastBeam.opcode(), 0);
        board.push_register_value(Register::BeamPower.opcode(), 0);
        board.push_register_value(Register::PpsCounter.opcode(), 0);
        board.push_register_value(Register::DynamicBeamMask.opcode(), 0);
        board.push_register_value(Register::VetoDeadtimeCounter.opcode(), 0);

        let mut master = Link::new(board.port(), Generation::Bn);
        let (header, _event) = read_one_buffer::<_, crate::port::fake::FakeSpiPort>(
            &mut master,
            None,
            0,
            0,
            0,
            (1_700_000_000, 0),
            3, // software thinks event 3, hardware says 5
            PerBoard { master: 0, slave: 0 },
            0,
        )
        .unwrap();

        assert_eq!(header.event_number, 5);
        assert_ne!(header.sync_problem & sync_problem::EVENT_COUNTER_MISMATCH, 0);
    }

    #[test]
    fn approx_trigger_time_carries_nanosecond_remainder() {
        let board = FakeBoard::new();
        // trig-time lo/hi = 0x123456, 0x000001 -> 48-bit value 0x01123456.
        script_common(&board, 0, 0x0112_3456u64);
        board.push_register_value(Register::ChannelMask.opcode(), 0);
        board.push_register_value(Register::ChannelReadMask.opcode(), 0);
        board.push_register_value(Register::UserBeamMask.opcode(), 0);
        board.push_register_value(Register::LastBeam.opcode(), 0);
        board.push_register_value(Register::BeamPower.opcode(), 0);
        board.push_register_value(Register::PpsCounter.opcode(), 0);
        board.push_register_value(Register::DynamicBeamMask.opcode(), 0);
        board.push_register_value(Register::VetoDeadtimeCounter.opcode(), 0);

        let mut master = Link::new(board.port(), Generation::Bn);
        let (header, _event) = read_one_buffer::<_, crate::port::fake::FakeSpiPort>(
            &mut master,
            None,
            0,
            0,
            0,
            (1_700_000_000, 0),
            0,
            PerBoard { master: 0, slave: 0 },
            0,
        )
        .unwrap();

        assert!(header.approx_trigger_time_s >= 1_700_000_000);
    }
}
