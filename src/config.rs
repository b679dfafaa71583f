//! Configuration surface: typed setters and getters for the board's
//! trigger, threshold, attenuation, and housekeeping registers.
//!
//! Every setter composes one or more 4-byte command words and appends
//! them to a single board's transaction buffer under the caller's
//! command lock, then flushes. None of these are wrapped in the
//! synchronized-command protocol: only the commands
//! [`crate::sync_cmd::run_synchronized`] actually enumerates (software
//! trigger, buffer clear, counter reset, global reset, pretrigger,
//! ADC-clock reset, attenuation-apply) need both boards to see the
//! write at the same instant, and callers driving a two-board
//! configuration apply these setters to each board's [`Link`]
//! independently.

use enum_primitive::FromPrimitive;

use crate::bits::reverse_bits;
use crate::consts::NUM_BEAMS;
use crate::error::Result;
use crate::link::Link;
use crate::port::SpiPort;
use crate::regio::read_register;
use crate::regs::{Register, TrigPol};

const THRESHOLD_MASK: u32 = 0x000F_FFFF;

/// Writes a 20-bit threshold for `beam_index`, clamped to
/// [`THRESHOLD_MASK`].
pub fn set_threshold<P: SpiPort>(link: &mut Link<P>, beam_index: u8, value: u32) -> Result<()> {
    let v = value & THRESHOLD_MASK;
    link.buf.append([
        Register::Thresholds.opcode() + beam_index,
        ((v >> 16) & 0xF) as u8,
        ((v >> 8) & 0xFF) as u8,
        (v & 0xFF) as u8,
    ])?;
    link.buf.flush()?;
    Ok(())
}

/// Reads back the threshold last written for `beam_index`.
pub fn get_threshold<P: SpiPort>(link: &mut Link<P>, beam_index: u8) -> Result<u32> {
    read_register(&mut link.buf, Register::Thresholds.opcode() + beam_index)
}

/// Writes all [`NUM_BEAMS`] thresholds, one register write per beam.
pub fn set_all_thresholds<P: SpiPort>(link: &mut Link<P>, values: &[u32; NUM_BEAMS]) -> Result<()> {
    for (i, &v) in values.iter().enumerate() {
        set_threshold(link, i as u8, v)?;
    }
    Ok(())
}

/// Writes the eight per-channel attenuation values (one nibble-ish value
/// per channel, packed three payload bytes per register across
/// [`Register::Attenuation0`]–[`Register::Attenuation2`]).
///
/// The hardware attenuator serial interface wants each payload byte
/// bit-reversed relative to the rest of the register file; [`reverse_bits`]
/// is applied on the way out and is its own inverse on the way back in,
/// so [`get_attenuation`] undoes it symmetrically.
pub fn set_attenuation<P: SpiPort>(link: &mut Link<P>, values: &[u8; 8]) -> Result<()> {
    let regs = [
        Register::Attenuation0,
        Register::Attenuation1,
        Register::Attenuation2,
    ];
    for (reg_idx, chunk) in values.chunks(3).enumerate() {
        let mut payload = [0u8; 3];
        for (i, &v) in chunk.iter().enumerate() {
            payload[i] = reverse_bits(v);
        }
        link.buf.append([
            regs[reg_idx].opcode(),
            payload[0],
            payload[1],
            payload[2],
        ])?;
    }
    link.buf.flush()?;
    Ok(())
}

/// Reads back the eight attenuation values written by [`set_attenuation`],
/// undoing the bit-reversal.
pub fn get_attenuation<P: SpiPort>(link: &mut Link<P>) -> Result<[u8; 8]> {
    let regs = [
        Register::Attenuation0,
        Register::Attenuation1,
        Register::Attenuation2,
    ];
    let mut out = [0u8; 8];
    let mut i = 0;
    for reg in regs {
        let raw = read_register(&mut link.buf, reg.opcode())?;
        let bytes = [((raw >> 16) & 0xFF) as u8, ((raw >> 8) & 0xFF) as u8, (raw & 0xFF) as u8];
        for b in bytes {
            if i < out.len() {
                out[i] = reverse_bits(b);
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Writes the 24-bit trigger mask.
pub fn set_trigger_mask<P: SpiPort>(link: &mut Link<P>, mask: u32) -> Result<()> {
    let m = mask & 0x00FF_FFFF;
    link.buf.append([
        Register::TrigMask.opcode(),
        ((m >> 16) & 0xFF) as u8,
        ((m >> 8) & 0xFF) as u8,
        (m & 0xFF) as u8,
    ])?;
    link.buf.flush()?;
    Ok(())
}

pub fn get_trigger_mask<P: SpiPort>(link: &mut Link<P>) -> Result<u32> {
    read_register(&mut link.buf, Register::TrigMask.opcode())
}

/// Trigger enable bitfield: beamforming, and the three window widths.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrigEnables {
    pub beamforming: bool,
    pub beam8: bool,
    pub beam4a: bool,
    pub beam4b: bool,
}

impl TrigEnables {
    fn to_bits(self) -> u8 {
        (self.beamforming as u8)
            | ((self.beam8 as u8) << 1)
            | ((self.beam4a as u8) << 2)
            | ((self.beam4b as u8) << 3)
    }

    fn from_bits(bits: u8) -> Self {
        TrigEnables {
            beamforming: bits & 0x1 != 0,
            beam8: bits & 0x2 != 0,
            beam4a: bits & 0x4 != 0,
            beam4b: bits & 0x8 != 0,
        }
    }
}

pub fn set_trigger_enables<P: SpiPort>(link: &mut Link<P>, enables: TrigEnables) -> Result<()> {
    link.buf
        .append([Register::TrigEnables.opcode(), 0, 0, enables.to_bits()])?;
    link.buf.flush()?;
    Ok(())
}

pub fn get_trigger_enables<P: SpiPort>(link: &mut Link<P>) -> Result<TrigEnables> {
    let raw = read_register(&mut link.buf, Register::TrigEnables.opcode())?;
    Ok(TrigEnables::from_bits(raw as u8))
}

/// Writes the trigger polarization selection into the payload's LSB.
pub fn set_trigger_polarization<P: SpiPort>(link: &mut Link<P>, pol: TrigPol) -> Result<()> {
    link.buf
        .append([Register::TrigPol.opcode(), 0, 0, pol as u8])?;
    link.buf.flush()?;
    Ok(())
}

pub fn get_trigger_polarization<P: SpiPort>(link: &mut Link<P>) -> Result<TrigPol> {
    let raw = read_register(&mut link.buf, Register::TrigPol.opcode())?;
    Ok(TrigPol::from_u8((raw & 0x3) as u8).unwrap_or(TrigPol::Both))
}

/// Dynamic beam masking: an enable flag plus an 8-bit threshold in one
/// register, and a 16-bit holdoff in another.
pub fn set_dynamic_masking<P: SpiPort>(
    link: &mut Link<P>,
    enabled: bool,
    threshold: u8,
    holdoff: u16,
) -> Result<()> {
    link.buf.append([
        Register::DynamicMask.opcode(),
        0,
        enabled as u8,
        threshold,
    ])?;
    link.buf.append([
        Register::DynamicHoldoff.opcode(),
        0,
        (holdoff >> 8) as u8,
        (holdoff & 0xFF) as u8,
    ])?;
    link.buf.flush()?;
    Ok(())
}

/// Veto options: pulse width plus four enable bits, written to one
/// register.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VetoOptions {
    pub pulse_width: u8,
    pub enable_saturation: bool,
    pub enable_cw: bool,
    pub enable_sideswipe: bool,
    pub enable_extended: bool,
}

impl VetoOptions {
    fn to_bits(self) -> u8 {
        (self.enable_saturation as u8)
            | ((self.enable_cw as u8) << 1)
            | ((self.enable_sideswipe as u8) << 2)
            | ((self.enable_extended as u8) << 3)
    }
}

pub fn set_veto_options<P: SpiPort>(link: &mut Link<P>, opts: VetoOptions) -> Result<()> {
    link.buf.append([
        Register::VetoOptions.opcode(),
        0,
        opts.pulse_width,
        opts.to_bits(),
    ])?;
    link.buf.flush()?;
    Ok(())
}

/// Writes the two veto cut-value registers: saturation/CW packed into
/// one word, sideswipe/extended into the other.
pub fn set_veto_cuts<P: SpiPort>(
    link: &mut Link<P>,
    saturation: u8,
    cw: u8,
    sideswipe: u8,
    extended: u8,
) -> Result<()> {
    link.buf
        .append([Register::VetoCut1.opcode(), 0, saturation, cw])?;
    link.buf
        .append([Register::VetoCut2.opcode(), 0, sideswipe, extended])?;
    link.buf.flush()?;
    Ok(())
}

/// Writes the eight per-channel 8-bit trigger delays, packed three per
/// register (3+3+2) into [`Register::TrigDelays0`]–[`Register::TrigDelays2`].
pub fn set_trigger_delays<P: SpiPort>(link: &mut Link<P>, delays: &[u8; 8]) -> Result<()> {
    link.buf.append([
        Register::TrigDelays0.opcode(),
        delays[0],
        delays[1],
        delays[2],
    ])?;
    link.buf.append([
        Register::TrigDelays1.opcode(),
        delays[3],
        delays[4],
        delays[5],
    ])?;
    link.buf
        .append([Register::TrigDelays2.opcode(), 0, delays[6], delays[7]])?;
    link.buf.flush()?;
    Ok(())
}

/// Trigger-output pulse configuration: width plus enable/polarity/1 Hz
/// flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrigOut {
    pub width: u8,
    pub enable: bool,
    pub polarity_high: bool,
    pub one_hz: bool,
}

impl TrigOut {
    fn to_bits(self) -> u8 {
        (self.enable as u8) | ((self.polarity_high as u8) << 1) | ((self.one_hz as u8) << 2)
    }
}

pub fn set_trigger_output<P: SpiPort>(link: &mut Link<P>, out: TrigOut) -> Result<()> {
    link.buf
        .append([Register::TrigOut.opcode(), 0, out.width, out.to_bits()])?;
    link.buf.flush()?;
    Ok(())
}

/// External input: use-as-trigger flag plus a 16-bit delay.
pub fn set_external_input<P: SpiPort>(
    link: &mut Link<P>,
    use_as_trigger: bool,
    delay: u16,
) -> Result<()> {
    link.buf.append([
        Register::ExtInputEnable.opcode(),
        0,
        0,
        use_as_trigger as u8,
    ])?;
    link.buf.append([
        Register::ExtInputDelay.opcode(),
        0,
        (delay >> 8) as u8,
        (delay & 0xFF) as u8,
    ])?;
    link.buf.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Generation;
    use crate::port::fake::FakeBoard;

    #[test]
    fn threshold_is_clamped_and_round_trips() {
        let board = FakeBoard::new();
        let mut link = Link::new(board.port(), Generation::Bn);

        set_threshold(&mut link, 2, 0xFFFF_FFFF).unwrap();
        assert_eq!(
            board.log().last().unwrap(),
            &[Register::Thresholds.opcode() + 2, 0xF, 0xFF, 0xFF]
        );

        board.push_register_value(Register::Thresholds.opcode() + 2, 0xFFFFF);
        assert_eq!(get_threshold(&mut link, 2).unwrap(), 0xFFFFF);
    }

    #[test]
    fn attenuation_round_trips_through_bit_reversal() {
        let board = FakeBoard::new();
        let mut link = Link::new(board.port(), Generation::Np);

        let values = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80];
        set_attenuation(&mut link, &values).unwrap();

        let logged = board.log();
        assert_eq!(logged.len(), 3);
        assert_eq!(logged[0][1], reverse_bits(0x01));
        assert_eq!(logged[2][2], reverse_bits(values[7]));

        for (reg, row) in [
            Register::Attenuation0,
            Register::Attenuation1,
            Register::Attenuation2,
        ]
        .into_iter()
        .zip(logged.iter())
        {
            let raw = ((row[1] as u32) << 16) | ((row[2] as u32) << 8) | row[3] as u32;
            board.push_register_value(reg.opcode(), raw);
        }

        assert_eq!(get_attenuation(&mut link).unwrap(), values);
    }

    #[test]
    fn trigger_enables_bitfield_round_trips() {
        let board = FakeBoard::new();
        let mut link = Link::new(board.port(), Generation::Bn);

        let enables = TrigEnables {
            beamforming: true,
            beam8: false,
            beam4a: true,
            beam4b: false,
        };
        set_trigger_enables(&mut link, enables).unwrap();
        assert_eq!(board.log().last().unwrap()[3], 0b0101);

        board.push_register_value(Register::TrigEnables.opcode(), 0b0101);
        assert_eq!(get_trigger_enables(&mut link).unwrap(), enables);
    }
}
