//! Western Digital WD1793 floppy disk controller.
//!
//! Chip-level emulation driven by the shared tick clock and pulse
//! scheduler. The controller never owns its collaborators: every entry
//! point that can advance time takes an [`FdcHost`] carrying the clock,
//! the scheduler, the two NMI latches, and the sound sink.
//!
//! # Register interface
//!
//! Four registers on consecutive ports, plus the drive-select port:
//! - command (write) / status (read)
//! - track register
//! - sector register
//! - data register — reading clears DRQ
//! - drive select — bits 0-3 drive, bit 4 side, bit 6 CPU wait,
//!   bit 7 double density
//!
//! # Command model
//!
//! Commands are decoded into a [`Command`] plus per-command flags, then
//! executed as a tagged state machine ([`OpStatus`]) advanced by
//! scheduled pulses: time-based delays for CPU-domain waits (step rate,
//! head engage, completion), and byte-based polls synchronized to the
//! rotating medium for everything that happens under the head. Every
//! command finishes through a 30 us delay into `DoNMI`, which drops
//! busy and DRQ and latches the command-complete NMI.

mod crc;
mod media;
mod ops;

pub use crc::{CRC_RESET, CRC_RESET_A1_A1_A1};
pub use media::{
    DriveState, Floppy, Idam, MAX_TRACKS, NUM_DRIVES, SECTORS_PER_TRACK_DD, SECTORS_PER_TRACK_SD,
    STANDARD_SECTOR_LENGTH, STANDARD_TRACK_LENGTH_DD, STANDARD_TRACK_LENGTH_SD, Track,
};
pub use ops::{Command, OpStatus};

use emu_core::{Clock, InterruptLatch, PulseReq, PulseScheduler, SnapshotReader, SnapshotWriter};

/// No drive selected.
pub const NO_DRIVE: u8 = 0xFF;

// Status register bits. The meaning of bits 1, 2, 4, and 5 depends on
// the command family; both names are defined where they differ.
pub const ST_BUSY: u8 = 0x01;
pub const ST_INDEX: u8 = 0x02;
pub const ST_DRQ: u8 = 0x02;
pub const ST_TRACK_ZERO: u8 = 0x04;
pub const ST_LOST_DATA: u8 = 0x04;
pub const ST_CRC_ERROR: u8 = 0x08;
pub const ST_SEEK_ERROR: u8 = 0x10;
pub const ST_HEAD_ENGAGED: u8 = 0x20;
pub const ST_RECORD_TYPE: u8 = 0x20;
pub const ST_WRITE_PROTECTED: u8 = 0x40;
pub const ST_NOT_READY: u8 = 0x80;

/// Scheduler token for pulses owned by the controller.
///
/// `Command` is both the state-machine advance pulse and, when
/// `is_polling` is set, the byte-synchronized poll — the pair
/// `(Command, is_polling)` is what snapshots store and re-resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdcEvent {
    Command,
    MotorOn,
    MotorOff,
}

/// Sound interface the controller drives.
pub trait SoundSink {
    fn drive_motor_running(&mut self, running: bool);
    fn track_step(&mut self);
}

/// A sink that discards everything.
#[derive(Debug, Default)]
pub struct NullSound;

impl SoundSink for NullSound {
    fn drive_motor_running(&mut self, _running: bool) {}
    fn track_step(&mut self) {}
}

/// Everything the controller borrows from the machine for one entry
/// point.
pub struct FdcHost<'a, E: Copy + From<FdcEvent>> {
    pub clock: &'a mut Clock,
    pub sched: &'a mut PulseScheduler<E>,
    /// Command-complete NMI latch.
    pub nmi: &'a mut InterruptLatch,
    /// Motor-auto-off NMI latch.
    pub motor_off_nmi: &'a mut InterruptLatch,
    pub sound: &'a mut dyn SoundSink,
}

/// Controller timing knobs, in real-hardware defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdcTiming {
    /// Step rates selected by command bits 0-1, in milliseconds.
    pub step_rates_ms: [u64; 4],
    /// Delay between operation end and the completion NMI.
    pub nmi_delay_us: u64,
    /// Head-settle delay applied before completion and for the
    /// Type II/III delay flag.
    pub standard_delay_us: u64,
    /// Head-engage delay before a verify scan.
    pub head_load_delay_us: u64,
    /// Drive-select to motor-running delay.
    pub motor_on_delay_us: u64,
    /// Idle time before the motor switches itself off.
    pub motor_off_delay_us: u64,
    /// Spindle speed.
    pub disk_rpm: u64,
}

impl Default for FdcTiming {
    fn default() -> Self {
        Self {
            step_rates_ms: [6, 12, 20, 30],
            nmi_delay_us: 30,
            standard_delay_us: 30_000,
            head_load_delay_us: 50_000,
            motor_on_delay_us: 10,
            motor_off_delay_us: 2_000_000,
            disk_rpm: 300,
        }
    }
}

/// The WD1793.
#[derive(Debug)]
pub struct Wd1793 {
    pub(crate) enabled: bool,

    // Hardware registers.
    pub(crate) track_register: u8,
    pub(crate) sector_register: u8,
    pub(crate) command_register: u8,
    pub(crate) data_register: u8,

    // Status flags, assembled into the status byte per command family.
    pub(crate) busy: bool,
    pub(crate) drq: bool,
    pub(crate) seek_error: bool,
    pub(crate) crc_error: bool,
    pub(crate) lost_data: bool,
    pub(crate) write_protected: bool,
    pub(crate) motor_on: bool,
    pub(crate) sector_deleted: bool,
    pub(crate) double_density: bool,
    pub(crate) last_step_dir_up: bool,

    // Per-command decode flags.
    pub(crate) verify: bool,
    pub(crate) delay: bool,
    pub(crate) update_registers: bool,
    pub(crate) side_select_verify: bool,
    pub(crate) side_one_expected: bool,
    pub(crate) mark_sector_deleted: bool,
    pub(crate) multiple_records: bool,
    pub(crate) step_rate_ms: u64,

    // Drive selection.
    pub(crate) current_drive: u8,
    pub(crate) side_one_selected: bool,
    pub(crate) drives: [DriveState; NUM_DRIVES],
    pub(crate) num_drives: usize,

    // Address-field scratch.
    pub(crate) read_address_data: [u8; 6],
    pub(crate) read_address_index: u8,
    pub(crate) dam_bytes_checked: u16,
    pub(crate) sector_length: u16,
    pub(crate) bytes_read: u16,
    pub(crate) bytes_to_write: u16,
    pub(crate) crc: u16,
    pub(crate) crc_calc: u16,
    pub(crate) crc_high: u8,
    pub(crate) crc_low: u8,

    // Operation state.
    pub(crate) command: Command,
    pub(crate) op_status: OpStatus,
    pub(crate) sync_run: u8,
    pub(crate) crc_low_pending: bool,

    // Poll state.
    pub(crate) is_polling: bool,
    pub(crate) target_data_index: u32,
    pub(crate) index_check_start_tick: u64,
    pub(crate) sync_faults: u64,

    // Pending pulse requests.
    pub(crate) command_pulse_req: PulseReq,
    pub(crate) motor_on_pulse_req: PulseReq,
    pub(crate) motor_off_pulse_req: PulseReq,

    pub(crate) timing: FdcTiming,
}

impl Wd1793 {
    #[must_use]
    pub fn new() -> Self {
        Self::with_timing(FdcTiming::default())
    }

    #[must_use]
    pub fn with_timing(timing: FdcTiming) -> Self {
        Self {
            enabled: true,
            track_register: 0,
            sector_register: 0,
            command_register: 0,
            data_register: 0,
            busy: false,
            drq: false,
            seek_error: false,
            crc_error: false,
            lost_data: false,
            write_protected: false,
            motor_on: false,
            sector_deleted: false,
            double_density: false,
            last_step_dir_up: true,
            verify: false,
            delay: false,
            update_registers: false,
            side_select_verify: false,
            side_one_expected: false,
            mark_sector_deleted: false,
            multiple_records: false,
            step_rate_ms: timing.step_rates_ms[0],
            current_drive: NO_DRIVE,
            side_one_selected: false,
            drives: Default::default(),
            num_drives: NUM_DRIVES,
            read_address_data: [0; 6],
            read_address_index: 0,
            dam_bytes_checked: 0,
            sector_length: 0,
            bytes_read: 0,
            bytes_to_write: 0,
            crc: 0,
            crc_calc: 0,
            crc_high: 0,
            crc_low: 0,
            command: Command::Reset,
            op_status: OpStatus::OpDone,
            sync_run: 0,
            crc_low_pending: false,
            is_polling: false,
            target_data_index: 0,
            index_check_start_tick: 0,
            sync_faults: 0,
            command_pulse_req: PulseReq::idle(),
            motor_on_pulse_req: PulseReq::idle(),
            motor_off_pulse_req: PulseReq::idle(),
            timing,
        }
    }

    /// Limit how many of the four drive bays respond to select bits.
    pub fn set_num_drives(&mut self, num_drives: usize) {
        self.num_drives = num_drives.min(NUM_DRIVES);
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // -----------------------------------------------------------------------
    // Media
    // -----------------------------------------------------------------------

    /// Load a floppy into a drive bay. The drive's write-protect tab
    /// follows the floppy's.
    pub fn insert_floppy(&mut self, drive: usize, floppy: Floppy) {
        if let Some(bay) = self.drives.get_mut(drive) {
            bay.write_protected = floppy.is_write_protected();
            bay.floppy = Some(floppy);
        }
    }

    pub fn eject_floppy(&mut self, drive: usize) -> Option<Floppy> {
        self.drives.get_mut(drive).and_then(|bay| bay.floppy.take())
    }

    pub fn set_drive_write_protected(&mut self, drive: usize, protected: bool) {
        if let Some(bay) = self.drives.get_mut(drive) {
            bay.write_protected = protected;
        }
    }

    #[must_use]
    pub fn drive(&self, drive: usize) -> Option<&DriveState> {
        self.drives.get(drive)
    }

    #[must_use]
    pub fn any_drive_loaded(&self) -> bool {
        self.drives.iter().any(DriveState::is_loaded)
    }

    // -----------------------------------------------------------------------
    // Register ports
    // -----------------------------------------------------------------------

    /// Read the status register, assembled for the current command's
    /// family.
    #[must_use]
    pub fn read_status(&self, clock: &Clock) -> u8 {
        if !self.enabled {
            return 0xFF;
        }
        let mut st = 0;
        if self.busy {
            st |= ST_BUSY;
        }
        if !self.motor_on {
            st |= ST_NOT_READY;
        }
        if self.command.is_type_one() {
            if self.index_detect(clock.tick_count()) {
                st |= ST_INDEX;
            }
            if self.selected_drive().is_some_and(|d| d.physical_track == 0) {
                st |= ST_TRACK_ZERO;
            }
            if self.crc_error {
                st |= ST_CRC_ERROR;
            }
            if self.seek_error {
                st |= ST_SEEK_ERROR;
            }
            if self.motor_on {
                st |= ST_HEAD_ENGAGED;
            }
            if self.selected_drive().is_some_and(|d| d.write_protected) {
                st |= ST_WRITE_PROTECTED;
            }
        } else {
            if self.drq {
                st |= ST_DRQ;
            }
            if self.lost_data {
                st |= ST_LOST_DATA;
            }
            if self.crc_error {
                st |= ST_CRC_ERROR;
            }
            if self.seek_error {
                st |= ST_SEEK_ERROR;
            }
            if self.command.is_write() {
                if self.write_protected {
                    st |= ST_WRITE_PROTECTED;
                }
            } else if self.sector_deleted {
                st |= ST_RECORD_TYPE;
            }
        }
        st
    }

    #[must_use]
    pub fn read_track_register(&self) -> u8 {
        if self.enabled { self.track_register } else { 0xFF }
    }

    #[must_use]
    pub fn read_sector_register(&self) -> u8 {
        if self.enabled { self.sector_register } else { 0xFF }
    }

    /// Read the data register. Clears DRQ.
    pub fn read_data(&mut self) -> u8 {
        if !self.enabled {
            return 0xFF;
        }
        self.drq = false;
        self.data_register
    }

    /// Track and sector registers are held while a command runs.
    pub fn write_track_register(&mut self, value: u8) {
        if self.enabled && !self.busy {
            self.track_register = value;
        }
    }

    pub fn write_sector_register(&mut self, value: u8) {
        if self.enabled && !self.busy {
            self.sector_register = value;
        }
    }

    /// Write the data register. Clears DRQ — this is how the CPU
    /// acknowledges a transfer request on the write path.
    pub fn write_data(&mut self, value: u8) {
        if !self.enabled {
            return;
        }
        self.data_register = value;
        self.drq = false;
    }

    /// Write the command register. Decodes and starts the command; only
    /// the force-interrupt family is honored while busy.
    pub fn write_command<E: Copy + From<FdcEvent>>(
        &mut self,
        value: u8,
        host: &mut FdcHost<'_, E>,
    ) {
        if !self.enabled {
            return;
        }
        let family = value >> 4;
        if self.busy && family != 0xD {
            return;
        }
        self.command_register = value;
        match family {
            0x0 => self.begin_type_one(Command::Restore, value, host),
            0x1 => self.begin_type_one(Command::Seek, value, host),
            0x2..=0x7 => {
                match (value >> 5) & 0x03 {
                    0b10 => self.last_step_dir_up = true,
                    0b11 => self.last_step_dir_up = false,
                    _ => {}
                }
                self.begin_type_one(Command::Step, value, host);
            }
            0x8 | 0x9 => self.begin_type_two(Command::ReadSector, value, host),
            0xA | 0xB => self.begin_type_two(Command::WriteSector, value, host),
            0xC => self.begin_type_three(Command::ReadAddress, value, host),
            0xE => self.begin_type_three(Command::ReadTrack, value, host),
            0xF => self.begin_type_three(Command::WriteTrack, value, host),
            _ => {
                let (command, latch_nmi) = match value {
                    0xD0 => (Command::Reset, false),
                    0xD8 => (Command::ForceInterruptImmediate, true),
                    _ => (Command::ForceInterrupt, true),
                };
                self.abort_command(command, latch_nmi, host);
            }
        }
    }

    /// Write the drive-select port: bits 0-3 drive (first set bit
    /// wins), bit 4 side, bit 6 CPU wait request, bit 7 double density.
    /// Starts the motor if it is off, otherwise restarts the auto-off
    /// timer.
    pub fn write_drive_select<E: Copy + From<FdcEvent>>(
        &mut self,
        value: u8,
        host: &mut FdcHost<'_, E>,
    ) {
        if !self.enabled {
            return;
        }
        if value & 0x0F != 0 {
            let first = (value & 0x0F).trailing_zeros() as usize;
            if first < self.num_drives {
                self.current_drive = first as u8;
            }
        }
        self.side_one_selected = value & 0x10 != 0;
        self.double_density = value & 0x80 != 0;
        if value & 0x40 != 0 && self.busy && !self.drq {
            host.clock.start_wait();
        }

        let now = host.clock.tick_count();
        if self.motor_on {
            host.sched.expire(self.motor_off_pulse_req);
            self.motor_off_pulse_req = host.sched.schedule_micros(
                now,
                self.timing.motor_off_delay_us,
                E::from(FdcEvent::MotorOff),
            );
        } else if !host.sched.is_armed(self.motor_on_pulse_req) {
            self.motor_on_pulse_req = host.sched.schedule_micros(
                now,
                self.timing.motor_on_delay_us,
                E::from(FdcEvent::MotorOn),
            );
        }
    }

    /// Deliver a fired pulse back to the controller.
    pub fn handle_event<E: Copy + From<FdcEvent>>(
        &mut self,
        event: FdcEvent,
        host: &mut FdcHost<'_, E>,
    ) {
        match event {
            FdcEvent::Command => {
                self.command_pulse_req = PulseReq::idle();
                if self.is_polling {
                    self.is_polling = false;
                    let now = host.clock.tick_count();
                    if self.track_data_index(now) as u32 != self.target_data_index {
                        // Missed the target byte; recover by running the
                        // step anyway rather than spin-waiting.
                        self.sync_faults += 1;
                    }
                }
                self.advance_op(host);
            }
            FdcEvent::MotorOn => {
                self.motor_on_pulse_req = PulseReq::idle();
                self.motor_on = true;
                host.sound.drive_motor_running(true);
                host.sched.expire(self.motor_off_pulse_req);
                let now = host.clock.tick_count();
                self.motor_off_pulse_req = host.sched.schedule_micros(
                    now,
                    self.timing.motor_off_delay_us,
                    E::from(FdcEvent::MotorOff),
                );
            }
            FdcEvent::MotorOff => {
                self.motor_off_pulse_req = PulseReq::idle();
                self.motor_on = false;
                host.sound.drive_motor_running(false);
                host.motor_off_nmi.latch();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Command setup
    // -----------------------------------------------------------------------

    fn begin_type_one<E: Copy + From<FdcEvent>>(
        &mut self,
        command: Command,
        value: u8,
        host: &mut FdcHost<'_, E>,
    ) {
        self.command = command;
        self.step_rate_ms = self.timing.step_rates_ms[usize::from(value & 0x03)];
        self.verify = value & 0x04 != 0;
        self.update_registers =
            matches!(command, Command::Restore | Command::Seek) || value & 0x10 != 0;
        self.start_command(host);
    }

    fn begin_type_two<E: Copy + From<FdcEvent>>(
        &mut self,
        command: Command,
        value: u8,
        host: &mut FdcHost<'_, E>,
    ) {
        self.command = command;
        self.delay = value & 0x04 != 0;
        self.side_select_verify = value & 0x02 != 0;
        self.side_one_expected = value & 0x08 != 0;
        self.multiple_records = value & 0x10 != 0;
        self.mark_sector_deleted = command == Command::WriteSector && value & 0x01 != 0;
        self.start_command(host);
    }

    fn begin_type_three<E: Copy + From<FdcEvent>>(
        &mut self,
        command: Command,
        value: u8,
        host: &mut FdcHost<'_, E>,
    ) {
        self.command = command;
        self.delay = value & 0x04 != 0;
        self.start_command(host);
    }

    fn start_command<E: Copy + From<FdcEvent>>(&mut self, host: &mut FdcHost<'_, E>) {
        host.sched.expire(self.command_pulse_req);
        self.command_pulse_req = PulseReq::idle();
        self.is_polling = false;
        self.busy = true;
        self.drq = false;
        self.seek_error = false;
        self.crc_error = false;
        self.lost_data = false;
        self.write_protected = false;
        self.sector_deleted = false;
        self.crc_low_pending = false;
        self.sync_run = 0;
        self.op_status = OpStatus::Prepare;
        self.advance_op(host);
    }

    fn abort_command<E: Copy + From<FdcEvent>>(
        &mut self,
        command: Command,
        latch_nmi: bool,
        host: &mut FdcHost<'_, E>,
    ) {
        host.sched.expire(self.command_pulse_req);
        self.command_pulse_req = PulseReq::idle();
        self.is_polling = false;
        self.busy = false;
        self.drq = false;
        self.op_status = OpStatus::OpDone;
        self.command = command;
        host.clock.end_wait();
        if latch_nmi {
            host.nmi.latch();
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn track_register(&self) -> u8 {
        self.track_register
    }

    #[must_use]
    pub fn sector_register(&self) -> u8 {
        self.sector_register
    }

    #[must_use]
    pub fn data_register(&self) -> u8 {
        self.data_register
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        self.busy
    }

    #[must_use]
    pub fn drq(&self) -> bool {
        self.drq
    }

    #[must_use]
    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    #[must_use]
    pub fn current_drive(&self) -> u8 {
        self.current_drive
    }

    #[must_use]
    pub fn side_one_selected(&self) -> bool {
        self.side_one_selected
    }

    #[must_use]
    pub fn double_density(&self) -> bool {
        self.double_density
    }

    #[must_use]
    pub fn command(&self) -> Command {
        self.command
    }

    #[must_use]
    pub fn op_status(&self) -> OpStatus {
        self.op_status
    }

    /// Missed byte-poll targets recovered so far.
    #[must_use]
    pub fn sync_faults(&self) -> u64 {
        self.sync_faults
    }

    pub(crate) fn selected_drive(&self) -> Option<&DriveState> {
        self.drives.get(usize::from(self.current_drive))
    }

    pub(crate) fn selected_drive_mut(&mut self) -> Option<&mut DriveState> {
        self.drives.get_mut(usize::from(self.current_drive))
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    /// Serialize the controller, including loaded floppies and pending
    /// pulse requests.
    pub fn save_state<E: Copy>(
        &self,
        w: &mut SnapshotWriter,
        sched: &PulseScheduler<E>,
        now: u64,
    ) {
        w.write_u8(self.track_register);
        w.write_u8(self.sector_register);
        w.write_u8(self.command_register);
        w.write_u8(self.data_register);

        w.write_bool(self.busy);
        w.write_bool(self.drq);
        w.write_bool(self.seek_error);
        w.write_bool(self.crc_error);
        w.write_bool(self.lost_data);
        w.write_bool(self.write_protected);
        w.write_bool(self.motor_on);
        w.write_bool(self.sector_deleted);
        w.write_bool(self.double_density);
        w.write_bool(self.last_step_dir_up);

        w.write_bool(self.verify);
        w.write_bool(self.delay);
        w.write_bool(self.update_registers);
        w.write_bool(self.side_select_verify);
        w.write_bool(self.side_one_expected);
        w.write_bool(self.mark_sector_deleted);
        w.write_bool(self.multiple_records);
        w.write_u64(self.step_rate_ms);

        for b in self.read_address_data {
            w.write_u8(b);
        }
        w.write_u8(self.read_address_index);
        w.write_u16(self.dam_bytes_checked);
        w.write_u16(self.sector_length);
        w.write_u16(self.bytes_read);
        w.write_u16(self.bytes_to_write);
        w.write_u16(self.crc);
        w.write_u16(self.crc_calc);
        w.write_u8(self.crc_high);
        w.write_u8(self.crc_low);

        for drive in &self.drives {
            drive.save_state(w);
        }

        w.write_u8(self.current_drive);
        w.write_bool(self.side_one_selected);

        w.write_u8(self.command.to_code());
        w.write_u8(self.op_status.to_code());
        w.write_u8(self.sync_run);
        w.write_bool(self.crc_low_pending);
        w.write_bool(self.is_polling);
        w.write_u32(self.target_data_index);
        w.write_u64(self.index_check_start_tick);
        w.write_u64(self.sync_faults);

        w.write_bool(self.enabled);

        for req in [
            self.command_pulse_req,
            self.motor_on_pulse_req,
            self.motor_off_pulse_req,
        ] {
            match sched.remaining(req, now) {
                Some(remaining) => {
                    w.write_bool(true);
                    w.write_u64(remaining);
                }
                None => {
                    w.write_bool(false);
                    w.write_u64(0);
                }
            }
        }
    }

    /// Restore the controller from a snapshot stream, re-registering
    /// any pending pulse requests with the scheduler. The callback for
    /// the command pulse is re-derived from the restored
    /// `(command, is_polling)` pair.
    pub fn load_state<E: Copy + From<FdcEvent>>(
        &mut self,
        r: &mut SnapshotReader,
        version: u32,
        now: u64,
        sched: &mut PulseScheduler<E>,
    ) -> Result<(), String> {
        self.track_register = r.read_u8("fdc track register")?;
        self.sector_register = r.read_u8("fdc sector register")?;
        self.command_register = r.read_u8("fdc command register")?;
        self.data_register = r.read_u8("fdc data register")?;

        self.busy = r.read_bool("fdc busy")?;
        self.drq = r.read_bool("fdc drq")?;
        self.seek_error = r.read_bool("fdc seek error")?;
        self.crc_error = r.read_bool("fdc crc error")?;
        self.lost_data = r.read_bool("fdc lost data")?;
        self.write_protected = r.read_bool("fdc write protected")?;
        self.motor_on = r.read_bool("fdc motor on")?;
        self.sector_deleted = r.read_bool("fdc sector deleted")?;
        self.double_density = r.read_bool("fdc double density")?;
        self.last_step_dir_up = r.read_bool("fdc step direction")?;

        self.verify = r.read_bool("fdc verify flag")?;
        self.delay = r.read_bool("fdc delay flag")?;
        self.update_registers = r.read_bool("fdc update flag")?;
        self.side_select_verify = r.read_bool("fdc side verify flag")?;
        self.side_one_expected = r.read_bool("fdc side expected flag")?;
        self.mark_sector_deleted = r.read_bool("fdc deleted mark flag")?;
        self.multiple_records = r.read_bool("fdc multiple records flag")?;
        self.step_rate_ms = r.read_u64("fdc step rate")?;

        for i in 0..6 {
            self.read_address_data[i] = r.read_u8("fdc address data")?;
        }
        self.read_address_index = r.read_u8("fdc address index")?;
        self.dam_bytes_checked = r.read_u16("fdc dam window")?;
        self.sector_length = r.read_u16("fdc sector length")?;
        self.bytes_read = r.read_u16("fdc bytes read")?;
        self.bytes_to_write = r.read_u16("fdc bytes to write")?;
        self.crc = r.read_u16("fdc crc")?;
        self.crc_calc = r.read_u16("fdc crc calc")?;
        self.crc_high = r.read_u8("fdc crc high")?;
        self.crc_low = r.read_u8("fdc crc low")?;

        for drive in &mut self.drives {
            *drive = DriveState::load_state(r)?;
        }

        self.current_drive = r.read_u8("fdc current drive")?;
        self.side_one_selected = r.read_bool("fdc side selected")?;

        self.command = Command::from_code(r.read_u8("fdc command")?)?;
        self.op_status = OpStatus::from_code(r.read_u8("fdc op status")?)?;
        self.sync_run = r.read_u8("fdc sync run")?;
        self.crc_low_pending = r.read_bool("fdc crc low pending")?;
        self.is_polling = r.read_bool("fdc polling")?;
        self.target_data_index = r.read_u32("fdc poll target")?;
        self.index_check_start_tick = r.read_u64("fdc index start")?;
        self.sync_faults = r.read_u64("fdc sync faults")?;

        self.enabled = if version >= 10 {
            r.read_bool("fdc enabled")?
        } else {
            self.any_drive_loaded()
        };

        self.command_pulse_req = Self::load_pulse(r, now, sched, FdcEvent::Command)?;
        self.motor_on_pulse_req = Self::load_pulse(r, now, sched, FdcEvent::MotorOn)?;
        self.motor_off_pulse_req = Self::load_pulse(r, now, sched, FdcEvent::MotorOff)?;

        Ok(())
    }

    fn load_pulse<E: Copy + From<FdcEvent>>(
        r: &mut SnapshotReader,
        now: u64,
        sched: &mut PulseScheduler<E>,
        event: FdcEvent,
    ) -> Result<PulseReq, String> {
        let armed = r.read_bool("fdc pulse armed")?;
        let remaining = r.read_u64("fdc pulse remaining")?;
        Ok(if armed {
            sched.schedule_ticks(now, remaining, E::from(event))
        } else {
            PulseReq::idle()
        })
    }
}

impl Default for Wd1793 {
    fn default() -> Self {
        Self::new()
    }
}
