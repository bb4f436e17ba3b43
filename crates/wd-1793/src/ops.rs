//! Command state machines and rotating-media timing.
//!
//! Every command runs as a tagged state machine: `(Command, OpStatus)`
//! selects one arm of one advance function, and each arm either falls
//! through to the next state or schedules the pulse that will re-enter
//! it. Nothing blocks; a revolution of the disk is just a long chain of
//! one-byte polls.
//!
//! # Byte-based scheduling
//!
//! "After N bytes have passed under the head" is converted to ticks
//! from the rotation model: the target byte index is computed (doubled
//! and aligned to the even cell in single density), and a pulse is
//! scheduled for the moment the head reaches it, plus a small safety
//! margin so the poll lands inside the target byte cell. A poll that
//! misses its target counts a sync fault and runs anyway; stalling
//! would wedge the command, while running one byte late merely mimics a
//! marginal drive.

use emu_core::TICKS_PER_SECOND;

use crate::crc;
use crate::media::{STANDARD_TRACK_LENGTH_DD, STANDARD_TRACK_LENGTH_SD, Track};
use crate::{FdcEvent, FdcHost, MAX_TRACKS, Wd1793};

/// Ticks added to every byte-based pulse so the poll lands inside the
/// target byte cell rather than on its leading edge.
const POLL_SAFETY_TICKS: u64 = 10_000;

/// Index pulse width, in millionths of a revolution.
const INDEX_PULSE_ANGLE: u64 = 10_000;

/// Revolutions an address-mark search may consume before seek error.
const IDAM_SEARCH_REVOLUTIONS: u64 = 5;

/// Bytes after the address-field CRC within which a data mark must
/// appear.
const DAM_WINDOW_SD: u16 = 30;
const DAM_WINDOW_DD: u16 = 43;

/// Bytes the CPU gets to respond to DRQ before a sector write starts.
const WRITE_DRQ_WAIT_BYTES: usize = 8;

const FILLER_BYTES_SD: u16 = 6;
const FILLER_BYTES_DD: u16 = 12;
const SYNC_BYTES_DD: u16 = 3;

const IDAM_MARK: u8 = 0xFE;
const DAM_NORMAL: u8 = 0xFB;
const DAM_DELETED: u8 = 0xF8;

/// Decoded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Restore,
    Seek,
    Step,
    ReadSector,
    WriteSector,
    ReadAddress,
    ReadTrack,
    WriteTrack,
    ForceInterrupt,
    ForceInterruptImmediate,
    Reset,
}

impl Command {
    /// Whether the status register reads back in the Type I layout.
    #[must_use]
    pub fn is_type_one(self) -> bool {
        matches!(
            self,
            Self::Restore
                | Self::Seek
                | Self::Step
                | Self::ForceInterrupt
                | Self::ForceInterruptImmediate
                | Self::Reset
        )
    }

    /// Whether the command writes to the medium.
    #[must_use]
    pub fn is_write(self) -> bool {
        matches!(self, Self::WriteSector | Self::WriteTrack)
    }

    pub(crate) fn to_code(self) -> u8 {
        match self {
            Self::Restore => 0,
            Self::Seek => 1,
            Self::Step => 2,
            Self::ReadSector => 3,
            Self::WriteSector => 4,
            Self::ReadAddress => 5,
            Self::ReadTrack => 6,
            Self::WriteTrack => 7,
            Self::ForceInterrupt => 8,
            Self::ForceInterruptImmediate => 9,
            Self::Reset => 10,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, String> {
        Ok(match code {
            0 => Self::Restore,
            1 => Self::Seek,
            2 => Self::Step,
            3 => Self::ReadSector,
            4 => Self::WriteSector,
            5 => Self::ReadAddress,
            6 => Self::ReadTrack,
            7 => Self::WriteTrack,
            8 => Self::ForceInterrupt,
            9 => Self::ForceInterruptImmediate,
            10 => Self::Reset,
            _ => return Err(format!("unknown command code {code}")),
        })
    }
}

/// Where the running command currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Prepare,
    Delay,
    Step,
    CheckVerify,
    SeekingIdam,
    ReadingAddressData,
    VerifyTrack,
    SeekingDam,
    ReadingData,
    ReadCrcHigh,
    ReadCrcLow,
    CheckDrq,
    WriteFiller,
    WriteSync,
    WriteDam,
    WritingData,
    WriteCrcHigh,
    WriteCrcLow,
    WriteTrailer,
    WaitingForIndex,
    ReadingTrackData,
    WritingTrackData,
    NmiDelay,
    OpDone,
}

impl OpStatus {
    pub(crate) fn to_code(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, String> {
        const ALL: [OpStatus; 24] = [
            OpStatus::Prepare,
            OpStatus::Delay,
            OpStatus::Step,
            OpStatus::CheckVerify,
            OpStatus::SeekingIdam,
            OpStatus::ReadingAddressData,
            OpStatus::VerifyTrack,
            OpStatus::SeekingDam,
            OpStatus::ReadingData,
            OpStatus::ReadCrcHigh,
            OpStatus::ReadCrcLow,
            OpStatus::CheckDrq,
            OpStatus::WriteFiller,
            OpStatus::WriteSync,
            OpStatus::WriteDam,
            OpStatus::WritingData,
            OpStatus::WriteCrcHigh,
            OpStatus::WriteCrcLow,
            OpStatus::WriteTrailer,
            OpStatus::WaitingForIndex,
            OpStatus::ReadingTrackData,
            OpStatus::WritingTrackData,
            OpStatus::NmiDelay,
            OpStatus::OpDone,
        ];
        ALL.get(code as usize)
            .copied()
            .ok_or_else(|| format!("unknown op status code {code}"))
    }
}

// ---------------------------------------------------------------------------
// Rotation model
// ---------------------------------------------------------------------------

impl Wd1793 {
    pub(crate) fn ticks_per_rev(&self) -> u64 {
        TICKS_PER_SECOND * 60 / self.timing.disk_rpm
    }

    /// Head position in millionths of a revolution.
    pub(crate) fn disk_angle(&self, now: u64) -> u64 {
        let tpr = self.ticks_per_rev();
        (now % tpr) * 1_000_000 / tpr
    }

    /// Byte index currently under the head.
    pub(crate) fn track_data_index(&self, now: u64) -> usize {
        (self.disk_angle(now) * self.track_length() as u64 / 1_000_000) as usize
    }

    /// Whether the index hole is currently under the sensor.
    pub(crate) fn index_detect(&self, now: u64) -> bool {
        self.motor_on && self.disk_angle(now) < INDEX_PULSE_ANGLE
    }

    /// Full index pulses seen since the last `reset_index_count`.
    pub(crate) fn indexes_found(&self, now: u64) -> u64 {
        now.saturating_sub(self.index_check_start_tick) / self.ticks_per_rev()
    }

    /// Align the index counter to the current revolution boundary.
    pub(crate) fn reset_index_count(&mut self, now: u64) {
        let tpr = self.ticks_per_rev();
        self.index_check_start_tick = now - now % tpr + 10;
    }

    pub(crate) fn track_length(&self) -> usize {
        let default = if self.double_density {
            STANDARD_TRACK_LENGTH_DD
        } else {
            STANDARD_TRACK_LENGTH_SD
        };
        match self.current_track() {
            Some(track) if !track.is_empty() => track.len(),
            _ => default,
        }
    }

    pub(crate) fn current_track(&self) -> Option<&Track> {
        let drive = self.selected_drive()?;
        let floppy = drive.floppy.as_ref()?;
        floppy.track(drive.physical_track, self.side_one_selected)
    }

    fn read_byte_under_head(&self, index: usize) -> u8 {
        self.current_track()
            .map_or(0, |t| t.read_byte(index, self.double_density))
    }

    fn has_idam_under_head(&self, index: usize) -> bool {
        self.current_track()
            .is_some_and(|t| t.has_idam_at(index, self.double_density))
    }

    fn write_byte_under_head(&mut self, index: usize, value: u8) {
        let double_density = self.double_density;
        let side_one = self.side_one_selected;
        if let Some(drive) = self.selected_drive_mut() {
            let physical_track = drive.physical_track;
            if let Some(floppy) = drive.floppy.as_mut()
                && let Some(track) = floppy.track_mut(physical_track, side_one)
            {
                track.write_byte(index, double_density, value);
            }
        }
    }

    fn mark_idam_under_head(&mut self, index: usize) {
        let double_density = self.double_density;
        let side_one = self.side_one_selected;
        if let Some(drive) = self.selected_drive_mut() {
            let physical_track = drive.physical_track;
            if let Some(floppy) = drive.floppy.as_mut()
                && let Some(track) = floppy.track_mut(physical_track, side_one)
            {
                track.mark_idam(index, double_density);
            }
        }
    }

    fn on_track_zero(&self) -> bool {
        self.selected_drive().is_some_and(|d| d.physical_track == 0)
    }

    fn drive_write_protected(&self) -> bool {
        self.selected_drive().is_some_and(|d| d.write_protected)
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    fn schedule_delay_micros<E: Copy + From<FdcEvent>>(
        &mut self,
        host: &mut FdcHost<'_, E>,
        micros: u64,
    ) {
        host.sched.expire(self.command_pulse_req);
        self.is_polling = false;
        let now = host.clock.tick_count();
        self.command_pulse_req =
            host.sched
                .schedule_micros(now, micros, E::from(FdcEvent::Command));
    }

    /// Schedule the advance pulse for when `bytes` more bytes have
    /// passed under the head.
    fn schedule_bytes<E: Copy + From<FdcEvent>>(
        &mut self,
        host: &mut FdcHost<'_, E>,
        bytes: usize,
    ) {
        host.sched.expire(self.command_pulse_req);
        let now = host.clock.tick_count();
        let len = self.track_length() as u64;
        let tpr = self.ticks_per_rev();

        let physical = if self.double_density {
            bytes as u64
        } else {
            bytes as u64 * 2
        };
        let index = self.track_data_index(now) as u64;
        let mut target = (index + physical) % len;
        if !self.double_density {
            target &= !1;
        }
        self.target_data_index = target as u32;
        self.is_polling = true;

        // Ticks until the head reaches the start of the target cell.
        let target_start = target * tpr / len;
        let position = now % tpr;
        let mut delta = (target_start + tpr - position) % tpr;
        if delta == 0 {
            delta = tpr;
        }
        self.command_pulse_req =
            host.sched
                .schedule_ticks(now, delta + POLL_SAFETY_TICKS, E::from(FdcEvent::Command));
    }

    fn raise_drq<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        self.drq = true;
        host.clock.end_wait();
    }

    fn begin_nmi<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        self.op_status = OpStatus::NmiDelay;
        let micros = self.timing.nmi_delay_us;
        self.schedule_delay_micros(host, micros);
    }

    fn do_nmi<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        self.busy = false;
        self.drq = false;
        self.op_status = OpStatus::OpDone;
        host.clock.end_wait();
        host.nmi.latch();
    }

    // -----------------------------------------------------------------------
    // Head stepping
    // -----------------------------------------------------------------------

    fn step_up<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        if let Some(drive) = self.selected_drive_mut()
            && drive.physical_track < MAX_TRACKS
        {
            drive.physical_track += 1;
            host.sound.track_step();
        }
    }

    fn step_down<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        let mut at_zero = false;
        if let Some(drive) = self.selected_drive_mut() {
            if drive.physical_track > 0 {
                drive.physical_track -= 1;
                host.sound.track_step();
            }
            at_zero = drive.physical_track == 0;
        }
        if at_zero {
            self.track_register = 0;
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Advance the running command by one state-machine step. Entered
    /// synchronously when a command is written and again on every fired
    /// command pulse.
    pub(crate) fn advance_op<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        if self.op_status == OpStatus::NmiDelay {
            self.do_nmi(host);
            return;
        }
        match self.command {
            Command::Restore | Command::Seek | Command::Step => self.run_type_one(host),
            Command::ReadSector => self.run_read_sector(host),
            Command::WriteSector => self.run_write_sector(host),
            Command::ReadAddress => self.run_read_address(host),
            Command::ReadTrack => self.run_read_track(host),
            Command::WriteTrack => self.run_write_track(host),
            Command::ForceInterrupt | Command::ForceInterruptImmediate | Command::Reset => {}
        }
    }

    // -----------------------------------------------------------------------
    // Type I: Restore / Seek / Step
    // -----------------------------------------------------------------------

    fn run_type_one<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        loop {
            match self.op_status {
                OpStatus::Prepare => {
                    if self.command == Command::Restore {
                        self.track_register = 0xFF;
                        self.data_register = 0;
                    }
                    self.op_status = OpStatus::Step;
                }
                OpStatus::Step => {
                    if self.command == Command::Step {
                        if self.update_registers {
                            self.track_register = if self.last_step_dir_up {
                                self.track_register.wrapping_add(1)
                            } else {
                                self.track_register.wrapping_sub(1)
                            };
                        }
                        if self.last_step_dir_up {
                            self.step_up(host);
                        } else {
                            self.step_down(host);
                        }
                        self.op_status = OpStatus::CheckVerify;
                        let micros = self.step_rate_ms * 1_000;
                        self.schedule_delay_micros(host, micros);
                        return;
                    }

                    // Seek / Restore: walk the head toward the target.
                    if self.track_register == self.data_register {
                        self.op_status = OpStatus::CheckVerify;
                        continue;
                    }
                    let stepping_up = self.data_register > self.track_register;
                    if !stepping_up && self.on_track_zero() {
                        self.track_register = 0;
                        self.op_status = OpStatus::CheckVerify;
                        continue;
                    }
                    if stepping_up {
                        self.track_register = self.track_register.wrapping_add(1);
                        self.step_up(host);
                    } else {
                        self.track_register = self.track_register.wrapping_sub(1);
                        self.step_down(host);
                    }
                    let micros = self.step_rate_ms * 1_000;
                    self.schedule_delay_micros(host, micros);
                    return;
                }
                OpStatus::CheckVerify => {
                    if self.verify {
                        let now = host.clock.tick_count();
                        self.reset_index_count(now);
                        self.op_status = OpStatus::SeekingIdam;
                        let micros = self.timing.head_load_delay_us;
                        self.schedule_delay_micros(host, micros);
                    } else {
                        self.op_status = OpStatus::Delay;
                        let micros = self.timing.standard_delay_us;
                        self.schedule_delay_micros(host, micros);
                    }
                    return;
                }
                OpStatus::Delay => {
                    self.begin_nmi(host);
                    return;
                }
                OpStatus::SeekingIdam => {
                    self.seek_idam_step(host);
                    return;
                }
                OpStatus::ReadingAddressData => {
                    if self.read_address_byte(host, false) {
                        self.op_status = OpStatus::VerifyTrack;
                        continue;
                    }
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::VerifyTrack => {
                    if self.crc_calc != self.crc {
                        self.crc_error = true;
                        self.op_status = OpStatus::SeekingIdam;
                        self.schedule_bytes(host, 1);
                        return;
                    }
                    if self.read_address_data[0] == self.track_register {
                        self.crc_error = false;
                        self.begin_nmi(host);
                        return;
                    }
                    self.op_status = OpStatus::SeekingIdam;
                    self.schedule_bytes(host, 1);
                    return;
                }
                _ => return,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Type II: ReadSector
    // -----------------------------------------------------------------------

    fn run_read_sector<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        loop {
            match self.op_status {
                OpStatus::Prepare => {
                    self.op_status = OpStatus::Delay;
                    if self.delay {
                        let micros = self.timing.standard_delay_us;
                        self.schedule_delay_micros(host, micros);
                        return;
                    }
                }
                OpStatus::Delay => {
                    let now = host.clock.tick_count();
                    self.reset_index_count(now);
                    self.op_status = OpStatus::SeekingIdam;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::SeekingIdam => {
                    self.seek_idam_step(host);
                    return;
                }
                OpStatus::ReadingAddressData => {
                    if !self.read_address_byte(host, false) {
                        self.schedule_bytes(host, 1);
                        return;
                    }
                    if !self.address_matches() {
                        self.op_status = OpStatus::SeekingIdam;
                        self.schedule_bytes(host, 1);
                        return;
                    }
                    if self.crc_calc != self.crc {
                        self.crc_error = true;
                        self.op_status = OpStatus::SeekingIdam;
                        self.schedule_bytes(host, 1);
                        return;
                    }
                    self.crc_error = false;
                    self.sector_length = sector_length_from_code(self.read_address_data[3]);
                    self.dam_bytes_checked = 0;
                    self.op_status = OpStatus::SeekingDam;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::SeekingDam => {
                    let now = host.clock.tick_count();
                    let byte = self.read_byte_under_head(self.track_data_index(now));
                    self.dam_bytes_checked += 1;
                    if byte == DAM_NORMAL || byte == DAM_DELETED {
                        self.sector_deleted = byte == DAM_DELETED;
                        self.crc_calc = self.crc_preset();
                        self.crc_calc = crc::update(self.crc_calc, byte);
                        self.bytes_read = 0;
                        self.op_status = OpStatus::ReadingData;
                    } else if self.dam_bytes_checked > self.dam_window() {
                        // No data mark behind this header; look for the
                        // next one. The revolution limit still applies.
                        self.op_status = OpStatus::SeekingIdam;
                    }
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::ReadingData => {
                    let now = host.clock.tick_count();
                    let byte = self.read_byte_under_head(self.track_data_index(now));
                    if self.drq {
                        self.lost_data = true;
                    }
                    self.data_register = byte;
                    self.raise_drq(host);
                    self.crc_calc = crc::update(self.crc_calc, byte);
                    self.bytes_read += 1;
                    if self.bytes_read == self.sector_length {
                        self.op_status = OpStatus::ReadCrcHigh;
                    }
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::ReadCrcHigh => {
                    let now = host.clock.tick_count();
                    self.crc_high = self.read_byte_under_head(self.track_data_index(now));
                    self.op_status = OpStatus::ReadCrcLow;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::ReadCrcLow => {
                    let now = host.clock.tick_count();
                    self.crc_low = self.read_byte_under_head(self.track_data_index(now));
                    self.crc = u16::from(self.crc_high) << 8 | u16::from(self.crc_low);
                    if self.crc != self.crc_calc {
                        self.crc_error = true;
                        self.begin_nmi(host);
                        return;
                    }
                    if self.multiple_records {
                        self.sector_register = self.sector_register.wrapping_add(1);
                        self.reset_index_count(now);
                        self.op_status = OpStatus::SeekingIdam;
                        self.schedule_bytes(host, 1);
                        return;
                    }
                    self.begin_nmi(host);
                    return;
                }
                _ => return,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Type II: WriteSector
    // -----------------------------------------------------------------------

    fn run_write_sector<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        loop {
            match self.op_status {
                OpStatus::Prepare => {
                    if self.drive_write_protected() {
                        self.write_protected = true;
                        self.begin_nmi(host);
                        return;
                    }
                    self.op_status = OpStatus::Delay;
                    if self.delay {
                        let micros = self.timing.standard_delay_us;
                        self.schedule_delay_micros(host, micros);
                        return;
                    }
                }
                OpStatus::Delay => {
                    let now = host.clock.tick_count();
                    self.reset_index_count(now);
                    self.op_status = OpStatus::SeekingIdam;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::SeekingIdam => {
                    self.seek_idam_step(host);
                    return;
                }
                OpStatus::ReadingAddressData => {
                    if !self.read_address_byte(host, false) {
                        self.schedule_bytes(host, 1);
                        return;
                    }
                    if !self.address_matches() || self.crc_calc != self.crc {
                        if self.address_matches() {
                            self.crc_error = true;
                        }
                        self.op_status = OpStatus::SeekingIdam;
                        self.schedule_bytes(host, 1);
                        return;
                    }
                    self.crc_error = false;
                    self.sector_length = sector_length_from_code(self.read_address_data[3]);
                    self.raise_drq(host);
                    self.op_status = OpStatus::CheckDrq;
                    self.schedule_bytes(host, WRITE_DRQ_WAIT_BYTES);
                    return;
                }
                OpStatus::CheckDrq => {
                    if self.drq {
                        // CPU never furnished the first byte.
                        self.lost_data = true;
                        self.begin_nmi(host);
                        return;
                    }
                    self.bytes_to_write = if self.double_density {
                        FILLER_BYTES_DD
                    } else {
                        FILLER_BYTES_SD
                    };
                    self.op_status = OpStatus::WriteFiller;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WriteFiller => {
                    let now = host.clock.tick_count();
                    let index = self.track_data_index(now);
                    self.write_byte_under_head(index, 0x00);
                    self.bytes_to_write -= 1;
                    if self.bytes_to_write == 0 {
                        if self.double_density {
                            self.bytes_to_write = SYNC_BYTES_DD;
                            self.op_status = OpStatus::WriteSync;
                        } else {
                            self.op_status = OpStatus::WriteDam;
                        }
                    }
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WriteSync => {
                    let now = host.clock.tick_count();
                    let index = self.track_data_index(now);
                    self.write_byte_under_head(index, 0xA1);
                    self.bytes_to_write -= 1;
                    if self.bytes_to_write == 0 {
                        self.op_status = OpStatus::WriteDam;
                    }
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WriteDam => {
                    let now = host.clock.tick_count();
                    let index = self.track_data_index(now);
                    let mark = if self.mark_sector_deleted {
                        DAM_DELETED
                    } else {
                        DAM_NORMAL
                    };
                    self.write_byte_under_head(index, mark);
                    self.crc_calc = self.crc_preset();
                    self.crc_calc = crc::update(self.crc_calc, mark);
                    self.bytes_read = 0;
                    self.op_status = OpStatus::WritingData;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WritingData => {
                    let now = host.clock.tick_count();
                    let index = self.track_data_index(now);
                    let byte = if self.drq {
                        // CPU missed its slot; pad with zero.
                        self.lost_data = true;
                        0x00
                    } else {
                        self.data_register
                    };
                    self.write_byte_under_head(index, byte);
                    self.crc_calc = crc::update(self.crc_calc, byte);
                    self.bytes_read += 1;
                    if self.bytes_read == self.sector_length {
                        self.op_status = OpStatus::WriteCrcHigh;
                    } else {
                        self.raise_drq(host);
                    }
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WriteCrcHigh => {
                    let now = host.clock.tick_count();
                    let index = self.track_data_index(now);
                    self.write_byte_under_head(index, (self.crc_calc >> 8) as u8);
                    self.op_status = OpStatus::WriteCrcLow;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WriteCrcLow => {
                    let now = host.clock.tick_count();
                    let index = self.track_data_index(now);
                    self.write_byte_under_head(index, self.crc_calc as u8);
                    self.op_status = OpStatus::WriteTrailer;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WriteTrailer => {
                    let now = host.clock.tick_count();
                    let index = self.track_data_index(now);
                    self.write_byte_under_head(index, 0xFF);
                    if self.multiple_records {
                        self.sector_register = self.sector_register.wrapping_add(1);
                        self.reset_index_count(now);
                        self.op_status = OpStatus::SeekingIdam;
                        self.schedule_bytes(host, 1);
                        return;
                    }
                    self.begin_nmi(host);
                    return;
                }
                _ => return,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Type III: ReadAddress
    // -----------------------------------------------------------------------

    fn run_read_address<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        loop {
            match self.op_status {
                OpStatus::Prepare => {
                    self.op_status = OpStatus::Delay;
                    if self.delay {
                        let micros = self.timing.standard_delay_us;
                        self.schedule_delay_micros(host, micros);
                        return;
                    }
                }
                OpStatus::Delay => {
                    let now = host.clock.tick_count();
                    self.reset_index_count(now);
                    self.op_status = OpStatus::SeekingIdam;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::SeekingIdam => {
                    self.seek_idam_step(host);
                    return;
                }
                OpStatus::ReadingAddressData => {
                    if !self.read_address_byte(host, true) {
                        self.schedule_bytes(host, 1);
                        return;
                    }
                    if self.crc_calc != self.crc {
                        self.crc_error = true;
                    }
                    self.track_register = self.read_address_data[0];
                    self.sector_register = self.read_address_data[2];
                    self.begin_nmi(host);
                    return;
                }
                _ => return,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Type III: ReadTrack / WriteTrack
    // -----------------------------------------------------------------------

    fn run_read_track<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        loop {
            match self.op_status {
                OpStatus::Prepare => {
                    self.op_status = OpStatus::Delay;
                    if self.delay {
                        let micros = self.timing.standard_delay_us;
                        self.schedule_delay_micros(host, micros);
                        return;
                    }
                }
                OpStatus::Delay => {
                    let now = host.clock.tick_count();
                    self.reset_index_count(now);
                    self.op_status = OpStatus::WaitingForIndex;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WaitingForIndex => {
                    let now = host.clock.tick_count();
                    if self.indexes_found(now) >= 1 {
                        self.op_status = OpStatus::ReadingTrackData;
                    }
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::ReadingTrackData => {
                    let now = host.clock.tick_count();
                    if self.indexes_found(now) >= 2 {
                        self.begin_nmi(host);
                        return;
                    }
                    let byte = self.read_byte_under_head(self.track_data_index(now));
                    if self.drq {
                        self.lost_data = true;
                    }
                    self.data_register = byte;
                    self.raise_drq(host);
                    self.schedule_bytes(host, 1);
                    return;
                }
                _ => return,
            }
        }
    }

    fn run_write_track<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        loop {
            match self.op_status {
                OpStatus::Prepare => {
                    if self.drive_write_protected() {
                        self.write_protected = true;
                        self.begin_nmi(host);
                        return;
                    }
                    // Request the first byte early so the CPU can stage
                    // it while the index hole comes around.
                    self.raise_drq(host);
                    self.op_status = OpStatus::Delay;
                    if self.delay {
                        let micros = self.timing.standard_delay_us;
                        self.schedule_delay_micros(host, micros);
                        return;
                    }
                }
                OpStatus::Delay => {
                    let now = host.clock.tick_count();
                    self.reset_index_count(now);
                    self.op_status = OpStatus::WaitingForIndex;
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WaitingForIndex => {
                    let now = host.clock.tick_count();
                    if self.indexes_found(now) >= 1 {
                        self.crc_calc = crc::CRC_RESET;
                        self.sync_run = 0;
                        self.crc_low_pending = false;
                        self.op_status = OpStatus::WritingTrackData;
                    }
                    self.schedule_bytes(host, 1);
                    return;
                }
                OpStatus::WritingTrackData => {
                    let now = host.clock.tick_count();
                    if self.indexes_found(now) >= 2 {
                        self.begin_nmi(host);
                        return;
                    }
                    let index = self.track_data_index(now);
                    if self.crc_low_pending {
                        // Second CRC byte goes out without consuming a
                        // CPU byte.
                        self.write_byte_under_head(index, self.crc_low);
                        self.crc_low_pending = false;
                        self.crc_calc = crc::CRC_RESET;
                        self.raise_drq(host);
                    } else {
                        let byte = if self.drq {
                            self.lost_data = true;
                            0x00
                        } else {
                            self.data_register
                        };
                        self.write_track_byte(host, index, byte);
                    }
                    self.schedule_bytes(host, 1);
                    return;
                }
                _ => return,
            }
        }
    }

    /// Translate and write one byte of a track-write stream.
    fn write_track_byte<E: Copy + From<FdcEvent>>(
        &mut self,
        host: &mut FdcHost<'_, E>,
        index: usize,
        byte: u8,
    ) {
        if self.double_density {
            match byte {
                0xF5 => {
                    self.write_byte_under_head(index, 0xA1);
                    self.sync_run = self.sync_run.saturating_add(1);
                    self.crc_calc = crc::CRC_RESET_A1_A1_A1;
                    self.raise_drq(host);
                }
                0xF6 => {
                    self.write_byte_under_head(index, 0xC2);
                    self.sync_run = 0;
                    self.raise_drq(host);
                }
                0xF7 => {
                    self.emit_crc_high(index);
                    self.sync_run = 0;
                }
                _ => {
                    self.write_byte_under_head(index, byte);
                    if byte == IDAM_MARK && self.sync_run > 0 {
                        self.mark_idam_under_head(index);
                    }
                    self.crc_calc = crc::update(self.crc_calc, byte);
                    self.sync_run = 0;
                    self.raise_drq(host);
                }
            }
        } else {
            match byte {
                0xF7 => self.emit_crc_high(index),
                0xF8..=0xFB | 0xFD | 0xFE => {
                    self.crc_calc = crc::update(crc::CRC_RESET, byte);
                    self.write_byte_under_head(index, byte);
                    if byte == IDAM_MARK {
                        self.mark_idam_under_head(index);
                    }
                    self.raise_drq(host);
                }
                _ => {
                    self.write_byte_under_head(index, byte);
                    self.crc_calc = crc::update(self.crc_calc, byte);
                    self.raise_drq(host);
                }
            }
        }
    }

    /// First half of a 0xF7 control byte: write the accumulated CRC
    /// high byte now, hold the low byte for the next cell, and suppress
    /// DRQ until it has gone out.
    fn emit_crc_high(&mut self, index: usize) {
        self.crc_high = (self.crc_calc >> 8) as u8;
        self.crc_low = self.crc_calc as u8;
        self.write_byte_under_head(index, self.crc_high);
        self.crc_low_pending = true;
    }

    // -----------------------------------------------------------------------
    // Shared address-field machinery
    // -----------------------------------------------------------------------

    /// One byte of the IDAM hunt. Terminates the command with a seek
    /// error once the search has consumed five index pulses.
    fn seek_idam_step<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        let now = host.clock.tick_count();
        if self.indexes_found(now) >= IDAM_SEARCH_REVOLUTIONS {
            self.seek_error = true;
            self.begin_nmi(host);
            return;
        }
        let index = self.track_data_index(now);
        if self.has_idam_under_head(index) {
            let mark = self.read_byte_under_head(index);
            self.crc_calc = self.crc_preset();
            self.crc_calc = crc::update(self.crc_calc, mark);
            self.read_address_index = 0;
            self.op_status = OpStatus::ReadingAddressData;
        }
        self.schedule_bytes(host, 1);
    }

    /// Ingest one byte of the six-byte address field. Returns true when
    /// the field is complete. With `deliver`, each byte also goes to the
    /// CPU through the data register.
    fn read_address_byte<E: Copy + From<FdcEvent>>(
        &mut self,
        host: &mut FdcHost<'_, E>,
        deliver: bool,
    ) -> bool {
        let now = host.clock.tick_count();
        let byte = self.read_byte_under_head(self.track_data_index(now));
        let i = usize::from(self.read_address_index);
        self.read_address_data[i] = byte;
        if i < 4 {
            self.crc_calc = crc::update(self.crc_calc, byte);
        }
        if deliver {
            if self.drq {
                self.lost_data = true;
            }
            self.data_register = byte;
            self.raise_drq(host);
        }
        self.read_address_index += 1;
        if self.read_address_index < 6 {
            return false;
        }
        self.crc_high = self.read_address_data[4];
        self.crc_low = self.read_address_data[5];
        self.crc = u16::from(self.crc_high) << 8 | u16::from(self.crc_low);
        true
    }

    /// Whether the just-read address field names the sector the command
    /// is after.
    fn address_matches(&self) -> bool {
        if self.read_address_data[0] != self.track_register {
            return false;
        }
        if self.read_address_data[2] != self.sector_register {
            return false;
        }
        if self.side_select_verify
            && (self.read_address_data[1] & 1) != u8::from(self.side_one_expected)
        {
            return false;
        }
        true
    }

    fn crc_preset(&self) -> u16 {
        if self.double_density {
            crc::CRC_RESET_A1_A1_A1
        } else {
            crc::CRC_RESET
        }
    }

    fn dam_window(&self) -> u16 {
        if self.double_density {
            DAM_WINDOW_DD
        } else {
            DAM_WINDOW_SD
        }
    }
}

fn sector_length_from_code(code: u8) -> u16 {
    128 << (code & 0x03)
}

#[cfg(test)]
mod tests;
