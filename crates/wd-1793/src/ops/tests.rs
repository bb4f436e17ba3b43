use emu_core::{Clock, InterruptLatch, PulseScheduler, micros_to_ticks};

use crate::media::STANDARD_SECTOR_LENGTH;
use crate::{
    Command, FdcEvent, FdcHost, Floppy, NullSound, ST_CRC_ERROR, ST_DRQ, ST_RECORD_TYPE,
    ST_SEEK_ERROR, ST_WRITE_PROTECTED, Wd1793,
};

/// Everything a controller needs from the outside world, owned flat so
/// tests can borrow the pieces into an [`FdcHost`] on demand.
struct Env {
    clock: Clock,
    sched: PulseScheduler<FdcEvent>,
    nmi: InterruptLatch,
    motor_off_nmi: InterruptLatch,
    sound: NullSound,
}

impl Env {
    fn new() -> Self {
        Self {
            clock: Clock::new(),
            sched: PulseScheduler::new(),
            nmi: InterruptLatch::new(),
            motor_off_nmi: InterruptLatch::new(),
            sound: NullSound,
        }
    }

    fn command(&mut self, fdc: &mut Wd1793, value: u8) {
        let mut host = FdcHost {
            clock: &mut self.clock,
            sched: &mut self.sched,
            nmi: &mut self.nmi,
            motor_off_nmi: &mut self.motor_off_nmi,
            sound: &mut self.sound,
        };
        fdc.write_command(value, &mut host);
    }

    fn select(&mut self, fdc: &mut Wd1793, value: u8) {
        let mut host = FdcHost {
            clock: &mut self.clock,
            sched: &mut self.sched,
            nmi: &mut self.nmi,
            motor_off_nmi: &mut self.motor_off_nmi,
            sound: &mut self.sound,
        };
        fdc.write_drive_select(value, &mut host);
    }

    /// Advance emulated time, delivering pulses as they come due.
    fn run(&mut self, fdc: &mut Wd1793, ticks: u64) {
        let end = self.clock.tick_count() + ticks;
        loop {
            match self.sched.next_due() {
                Some(due) if due <= end => {
                    self.clock.advance_to(due);
                    while let Some(event) = self.sched.pop_due(self.clock.tick_count()) {
                        let mut host = FdcHost {
                            clock: &mut self.clock,
                            sched: &mut self.sched,
                            nmi: &mut self.nmi,
                            motor_off_nmi: &mut self.motor_off_nmi,
                            sound: &mut self.sound,
                        };
                        fdc.handle_event(event, &mut host);
                    }
                }
                _ => {
                    self.clock.advance_to(end);
                    return;
                }
            }
        }
    }

    fn run_micros(&mut self, fdc: &mut Wd1793, micros: u64) {
        self.run(fdc, micros_to_ticks(micros));
    }

    fn status(&self, fdc: &Wd1793) -> u8 {
        fdc.read_status(&self.clock)
    }
}

/// Poll interval for CPU-side DRQ service loops; comfortably under one
/// byte cell at either density.
const IO_POLL_TICKS: u64 = 16_000;

/// Hard cap for any single operation in these tests (three seconds).
const OP_DEADLINE_TICKS: u64 = 3 * emu_core::TICKS_PER_SECOND;

fn formatted_fdc(double_density: bool) -> (Env, Wd1793) {
    let mut env = Env::new();
    let mut fdc = Wd1793::new();
    fdc.insert_floppy(0, Floppy::formatted(40, 1, double_density));
    spin_up(&mut env, &mut fdc, double_density);
    (env, fdc)
}

fn spin_up(env: &mut Env, fdc: &mut Wd1793, double_density: bool) {
    let select = if double_density { 0x81 } else { 0x01 };
    env.select(fdc, select);
    env.run_micros(fdc, 20);
    assert!(fdc.motor_on(), "motor should be running after spin-up");
}

/// Run a read-style command to completion, collecting every byte the
/// controller offers through DRQ.
fn drain_read(env: &mut Env, fdc: &mut Wd1793) -> Vec<u8> {
    let mut collected = Vec::new();
    let deadline = env.clock.tick_count() + OP_DEADLINE_TICKS;
    while !env.nmi.is_latched() && env.clock.tick_count() < deadline {
        env.run(fdc, IO_POLL_TICKS);
        if fdc.drq() {
            collected.push(fdc.read_data());
        }
    }
    assert!(env.nmi.is_latched(), "command did not complete");
    collected
}

/// Run a write-style command to completion, feeding bytes on DRQ.
/// Feeds `fill` once `data` runs out.
fn feed_write(env: &mut Env, fdc: &mut Wd1793, data: &[u8], fill: u8) {
    let mut next = 0;
    let deadline = env.clock.tick_count() + OP_DEADLINE_TICKS;
    while !env.nmi.is_latched() && env.clock.tick_count() < deadline {
        env.run(fdc, IO_POLL_TICKS);
        if fdc.drq() {
            let byte = data.get(next).copied().unwrap_or(fill);
            fdc.write_data(byte);
            next += 1;
        }
    }
    assert!(env.nmi.is_latched(), "command did not complete");
}

fn write_sector(env: &mut Env, fdc: &mut Wd1793, sector: u8, data: &[u8]) {
    env.nmi.unlatch();
    fdc.write_sector_register(sector);
    env.command(fdc, 0xA0);
    feed_write(env, fdc, data, 0x00);
}

fn read_sector(env: &mut Env, fdc: &mut Wd1793, sector: u8) -> Vec<u8> {
    env.nmi.unlatch();
    fdc.write_sector_register(sector);
    env.command(fdc, 0x80);
    drain_read(env, fdc)
}

// ---------------------------------------------------------------------------
// Motor
// ---------------------------------------------------------------------------

#[test]
fn motor_spins_up_then_times_out() {
    let mut env = Env::new();
    let mut fdc = Wd1793::new();
    fdc.insert_floppy(0, Floppy::formatted(40, 1, true));

    env.select(&mut fdc, 0x81);
    assert!(!fdc.motor_on());
    env.run_micros(&mut fdc, 20);
    assert!(fdc.motor_on());

    env.run_micros(&mut fdc, 2_100_000);
    assert!(!fdc.motor_on(), "motor should auto-stop after two seconds");
    assert!(env.motor_off_nmi.is_latched());
}

#[test]
fn reselect_restarts_motor_off_timer() {
    let mut env = Env::new();
    let mut fdc = Wd1793::new();
    env.select(&mut fdc, 0x01);
    env.run_micros(&mut fdc, 20);

    env.run_micros(&mut fdc, 1_500_000);
    assert!(fdc.motor_on());
    env.select(&mut fdc, 0x01); // restarts the two-second timer
    env.run_micros(&mut fdc, 1_500_000);
    assert!(fdc.motor_on(), "timer should have been restarted");
    env.run_micros(&mut fdc, 600_000);
    assert!(!fdc.motor_on());
}

#[test]
fn drive_select_decodes_bits() {
    let mut env = Env::new();
    let mut fdc = Wd1793::new();

    env.select(&mut fdc, 0b1001_0100); // drive 2, side 1, double density
    assert_eq!(fdc.current_drive(), 2);
    assert!(fdc.side_one_selected());
    assert!(fdc.double_density());

    env.select(&mut fdc, 0b0000_0011); // first set bit wins: drive 0
    assert_eq!(fdc.current_drive(), 0);
    assert!(!fdc.side_one_selected());
    assert!(!fdc.double_density());
}

// ---------------------------------------------------------------------------
// Type I
// ---------------------------------------------------------------------------

#[test]
fn seek_moves_head_and_track_register() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_data(20);
    env.command(&mut fdc, 0x10); // seek, 6 ms steps, no verify
    assert!(fdc.busy());

    env.run_micros(&mut fdc, 20 * 6_000 + 40_000);
    assert_eq!(fdc.track_register(), 20);
    assert_eq!(fdc.drive(0).map(|d| d.physical_track), Some(20));
    assert!(!fdc.busy());
    assert!(env.nmi.is_latched());
}

#[test]
fn restore_homes_the_head() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_data(25);
    env.command(&mut fdc, 0x10);
    env.run_micros(&mut fdc, 25 * 6_000 + 40_000);
    env.nmi.unlatch();

    env.command(&mut fdc, 0x00); // restore, 6 ms steps
    env.run_micros(&mut fdc, 25 * 6_000 + 40_000);
    assert_eq!(fdc.track_register(), 0);
    assert_eq!(fdc.drive(0).map(|d| d.physical_track), Some(0));
    assert!(env.nmi.is_latched());
    assert_eq!(env.status(&fdc) & ST_SEEK_ERROR, 0);
}

#[test]
fn seek_with_verify_confirms_track_header() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_data(7);
    env.command(&mut fdc, 0x14); // seek with verify
    // 7 steps + head engage + up to a revolution of scanning.
    env.run_micros(&mut fdc, 7 * 6_000 + 50_000 + 250_000 + 40_000);
    assert!(env.nmi.is_latched());
    assert_eq!(env.status(&fdc) & ST_SEEK_ERROR, 0);
    assert_eq!(fdc.track_register(), 7);
}

#[test]
fn verify_against_blank_media_seek_errors() {
    let mut env = Env::new();
    let mut fdc = Wd1793::new();
    fdc.insert_floppy(0, Floppy::blank(40, 1, true));
    spin_up(&mut env, &mut fdc, true);

    fdc.write_data(3);
    env.command(&mut fdc, 0x14); // seek with verify
    env.run(&mut fdc, OP_DEADLINE_TICKS);
    assert!(env.nmi.is_latched());
    assert_ne!(env.status(&fdc) & ST_SEEK_ERROR, 0);
}

#[test]
fn step_down_at_track_zero_is_a_no_op() {
    let (mut env, mut fdc) = formatted_fdc(true);
    assert_eq!(fdc.drive(0).map(|d| d.physical_track), Some(0));

    env.command(&mut fdc, 0x70); // step out, update track register
    env.run_micros(&mut fdc, 100_000);
    assert_eq!(fdc.drive(0).map(|d| d.physical_track), Some(0));
    assert_eq!(fdc.track_register(), 0);
}

#[test]
fn step_up_clamps_at_max_track() {
    let (mut env, mut fdc) = formatted_fdc(true);

    for _ in 0..85 {
        env.nmi.unlatch();
        env.command(&mut fdc, 0x40); // step in
        env.run_micros(&mut fdc, 40_000);
    }
    assert_eq!(fdc.drive(0).map(|d| d.physical_track), Some(80));
}

#[test]
fn busy_controller_ignores_new_commands() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_data(39);
    env.command(&mut fdc, 0x10);
    assert!(fdc.busy());
    env.command(&mut fdc, 0x80); // read sector — must be dropped
    assert_eq!(fdc.command(), Command::Seek);

    env.run_micros(&mut fdc, 39 * 6_000 + 40_000);
    assert_eq!(fdc.track_register(), 39);
}

// ---------------------------------------------------------------------------
// Type IV
// ---------------------------------------------------------------------------

#[test]
fn force_interrupt_immediate_aborts_a_running_command() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_sector_register(2);
    env.command(&mut fdc, 0x80);
    env.run_micros(&mut fdc, 100);
    assert!(fdc.busy());

    env.command(&mut fdc, 0xD8);
    assert!(!fdc.busy());
    assert!(!fdc.drq());
    assert!(env.nmi.is_latched());

    // A second force-interrupt leaves the controller in the same state.
    let before = (env.status(&fdc), fdc.track_register(), fdc.sector_register());
    env.command(&mut fdc, 0xD8);
    let after = (env.status(&fdc), fdc.track_register(), fdc.sector_register());
    assert_eq!(before, after);
}

#[test]
fn reset_terminates_without_latching_nmi() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_sector_register(2);
    env.command(&mut fdc, 0x80);
    env.run_micros(&mut fdc, 100);
    env.nmi.unlatch();

    env.command(&mut fdc, 0xD0);
    assert!(!fdc.busy());
    assert!(!env.nmi.is_latched());
}

// ---------------------------------------------------------------------------
// Type II
// ---------------------------------------------------------------------------

#[test]
fn read_sector_delivers_formatted_data() {
    let (mut env, mut fdc) = formatted_fdc(true);

    let data = read_sector(&mut env, &mut fdc, 2);
    assert_eq!(data.len(), STANDARD_SECTOR_LENGTH);
    assert!(data.iter().all(|&b| b == 0));
    assert!(!fdc.busy());
    assert_eq!(env.status(&fdc) & (ST_CRC_ERROR | ST_SEEK_ERROR), 0);
}

#[test]
fn write_then_read_round_trip() {
    let (mut env, mut fdc) = formatted_fdc(true);

    let pattern: Vec<u8> = (0..STANDARD_SECTOR_LENGTH)
        .map(|i| (i as u8) ^ 0x5A)
        .collect();
    write_sector(&mut env, &mut fdc, 3, &pattern);
    assert_eq!(env.status(&fdc) & (ST_CRC_ERROR | ST_SEEK_ERROR), 0);

    env.select(&mut fdc, 0x81); // keep the motor alive
    let back = read_sector(&mut env, &mut fdc, 3);
    assert_eq!(back, pattern);
    assert_eq!(env.status(&fdc) & ST_CRC_ERROR, 0);
}

#[test]
fn single_density_round_trip() {
    let (mut env, mut fdc) = formatted_fdc(false);

    let pattern: Vec<u8> = (0..STANDARD_SECTOR_LENGTH).map(|i| i as u8).collect();
    write_sector(&mut env, &mut fdc, 5, &pattern);
    env.select(&mut fdc, 0x01);
    let back = read_sector(&mut env, &mut fdc, 5);
    assert_eq!(back, pattern);
}

#[test]
fn missing_sector_seek_errors_after_five_revolutions() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_sector_register(30); // formatted tracks stop at 18
    env.command(&mut fdc, 0x80);
    env.run(&mut fdc, OP_DEADLINE_TICKS);

    assert!(env.nmi.is_latched());
    assert!(!fdc.busy());
    assert_ne!(env.status(&fdc) & ST_SEEK_ERROR, 0);
}

#[test]
fn unloaded_drive_seek_errors_after_five_revolutions() {
    let mut env = Env::new();
    let mut fdc = Wd1793::new();
    spin_up(&mut env, &mut fdc, true);

    fdc.write_sector_register(1);
    env.command(&mut fdc, 0x80);
    env.run(&mut fdc, OP_DEADLINE_TICKS);
    assert!(env.nmi.is_latched());
    assert_ne!(env.status(&fdc) & ST_SEEK_ERROR, 0);
}

#[test]
fn write_protected_drive_aborts_before_touching_media() {
    let (mut env, mut fdc) = formatted_fdc(true);
    fdc.set_drive_write_protected(0, true);
    let before = fdc
        .drive(0)
        .and_then(|d| d.floppy.as_ref())
        .and_then(|f| f.track(0, false))
        .map(|t| t.data().to_vec())
        .unwrap_or_default();

    fdc.write_sector_register(1);
    env.command(&mut fdc, 0xA0);
    env.run_micros(&mut fdc, 100);

    assert!(env.nmi.is_latched());
    assert!(!fdc.busy());
    assert_ne!(env.status(&fdc) & ST_WRITE_PROTECTED, 0);

    let after = fdc
        .drive(0)
        .and_then(|d| d.floppy.as_ref())
        .and_then(|f| f.track(0, false))
        .map(|t| t.data().to_vec())
        .unwrap_or_default();
    assert_eq!(before, after, "track buffer must be untouched");
}

#[test]
fn deleted_data_mark_reads_back_as_record_type() {
    let (mut env, mut fdc) = formatted_fdc(true);

    let pattern = vec![0x11; STANDARD_SECTOR_LENGTH];
    env.nmi.unlatch();
    fdc.write_sector_register(4);
    env.command(&mut fdc, 0xA1); // write sector, deleted mark
    feed_write(&mut env, &mut fdc, &pattern, 0x00);

    env.select(&mut fdc, 0x81);
    let back = read_sector(&mut env, &mut fdc, 4);
    assert_eq!(back, pattern);
    assert_ne!(env.status(&fdc) & ST_RECORD_TYPE, 0, "deleted mark bit");
}

#[test]
fn multiple_records_reads_consecutive_sectors() {
    let (mut env, mut fdc) = formatted_fdc(true);

    let first: Vec<u8> = vec![0xAA; STANDARD_SECTOR_LENGTH];
    let second: Vec<u8> = vec![0xBB; STANDARD_SECTOR_LENGTH];
    write_sector(&mut env, &mut fdc, 2, &first);
    env.select(&mut fdc, 0x81);
    write_sector(&mut env, &mut fdc, 3, &second);
    env.select(&mut fdc, 0x81);

    env.nmi.unlatch();
    fdc.write_sector_register(2);
    env.command(&mut fdc, 0x90); // read sector, multiple records

    let mut collected = Vec::new();
    let deadline = env.clock.tick_count() + OP_DEADLINE_TICKS;
    while collected.len() < 2 * STANDARD_SECTOR_LENGTH && env.clock.tick_count() < deadline {
        env.run(&mut fdc, IO_POLL_TICKS);
        if fdc.drq() {
            collected.push(fdc.read_data());
        }
    }
    env.command(&mut fdc, 0xD8); // stop the chain

    assert_eq!(collected.len(), 2 * STANDARD_SECTOR_LENGTH);
    assert!(collected[..STANDARD_SECTOR_LENGTH].iter().all(|&b| b == 0xAA));
    assert!(collected[STANDARD_SECTOR_LENGTH..].iter().all(|&b| b == 0xBB));
    assert_eq!(fdc.sector_register(), 4, "auto-incremented past both");
}

// ---------------------------------------------------------------------------
// Type III
// ---------------------------------------------------------------------------

#[test]
fn read_address_reports_header_and_updates_registers() {
    let (mut env, mut fdc) = formatted_fdc(true);

    env.command(&mut fdc, 0xC0);
    let header = drain_read(&mut env, &mut fdc);
    assert_eq!(header.len(), 6);
    assert_eq!(header[0], 0, "track byte");
    assert_eq!(header[1], 0, "side byte");
    assert!((1..=18).contains(&header[2]), "sector byte");
    assert_eq!(header[3], 1, "size code");
    assert_eq!(fdc.track_register(), header[0]);
    assert_eq!(fdc.sector_register(), header[2]);
    assert_eq!(env.status(&fdc) & ST_CRC_ERROR, 0);
}

#[test]
fn read_track_streams_a_full_revolution() {
    let (mut env, mut fdc) = formatted_fdc(true);

    env.command(&mut fdc, 0xE0);
    let raw = drain_read(&mut env, &mut fdc);
    // One revolution of a 12,500-byte track, give or take the poll
    // cadence at each end.
    assert!(raw.len() > 12_000, "got {} bytes", raw.len());
    assert!(raw.len() <= 12_500, "got {} bytes", raw.len());
    // The stream must contain the address marks of all 18 sectors.
    let fe_count = raw.iter().filter(|&&b| b == 0xFE).count();
    assert!(fe_count >= 18, "expected headers in raw stream");
}

#[test]
fn write_track_formats_a_readable_track() {
    let mut env = Env::new();
    let mut fdc = Wd1793::new();
    fdc.insert_floppy(0, Floppy::blank(1, 1, true));
    spin_up(&mut env, &mut fdc, true);

    // The byte stream DOS would feed for one 18-sector track. 0xF5
    // becomes an 0xA1 sync byte, 0xF7 emits the two CRC bytes.
    let mut stream = vec![0x4E; 60];
    for sector in 1..=18u8 {
        stream.extend_from_slice(&[0x00; 12]);
        stream.extend_from_slice(&[0xF5; 3]);
        stream.extend_from_slice(&[0xFE, 0, 0, sector, 1, 0xF7]);
        stream.extend_from_slice(&[0x4E; 22]);
        stream.extend_from_slice(&[0x00; 12]);
        stream.extend_from_slice(&[0xF5; 3]);
        stream.push(0xFB);
        stream.extend((0..STANDARD_SECTOR_LENGTH).map(|i| sector ^ i as u8));
        stream.push(0xF7);
        stream.extend_from_slice(&[0x4E; 24]);
    }

    env.command(&mut fdc, 0xF0);
    feed_write(&mut env, &mut fdc, &stream, 0x4E);
    assert_eq!(env.status(&fdc) & ST_WRITE_PROTECTED, 0);

    env.select(&mut fdc, 0x81);
    let back = read_sector(&mut env, &mut fdc, 9);
    let expect: Vec<u8> = (0..STANDARD_SECTOR_LENGTH).map(|i| 9 ^ i as u8).collect();
    assert_eq!(back, expect);
    assert_eq!(env.status(&fdc) & ST_CRC_ERROR, 0);
}

// ---------------------------------------------------------------------------
// Rotation model
// ---------------------------------------------------------------------------

#[test]
fn index_count_increments_exactly_at_one_revolution() {
    let mut fdc = Wd1793::new();
    let tpr = fdc.ticks_per_rev();
    let now = 3 * tpr + 12_345;
    fdc.reset_index_count(now);

    let start = now - now % tpr + 10;
    assert_eq!(fdc.indexes_found(start + tpr - 1), 0);
    assert_eq!(fdc.indexes_found(start + tpr), 1);
    assert_eq!(fdc.indexes_found(start + 3 * tpr), 3);
}

#[test]
fn index_pulse_requires_the_motor() {
    let mut env = Env::new();
    let mut fdc = Wd1793::new();
    let tpr = fdc.ticks_per_rev();

    // Head is inside the index window at the top of each revolution,
    // but nothing registers with the motor off.
    assert!(!fdc.index_detect(0));
    spin_up(&mut env, &mut fdc, true);
    env.run(&mut fdc, tpr - env.clock.tick_count() % tpr);
    assert!(fdc.index_detect(env.clock.tick_count()));
    env.run(&mut fdc, tpr / 2);
    assert!(!fdc.index_detect(env.clock.tick_count()));
}

// ---------------------------------------------------------------------------
// Disabled controller
// ---------------------------------------------------------------------------

#[test]
fn disabled_controller_reads_ff() {
    let mut env = Env::new();
    let mut fdc = Wd1793::new();
    fdc.set_enabled(false);

    assert_eq!(env.status(&fdc), 0xFF);
    assert_eq!(fdc.read_track_register(), 0xFF);
    assert_eq!(fdc.read_sector_register(), 0xFF);
    assert_eq!(fdc.read_data(), 0xFF);

    env.command(&mut fdc, 0x80);
    assert!(!fdc.busy());
}

// ---------------------------------------------------------------------------
// DRQ and the data register
// ---------------------------------------------------------------------------

#[test]
fn reading_data_register_clears_drq() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_sector_register(1);
    env.command(&mut fdc, 0x80);
    let deadline = env.clock.tick_count() + OP_DEADLINE_TICKS;
    while !fdc.drq() && env.clock.tick_count() < deadline {
        env.run(&mut fdc, IO_POLL_TICKS);
    }
    assert!(fdc.drq());
    assert_ne!(env.status(&fdc) & ST_DRQ, 0);
    let _ = fdc.read_data();
    assert!(!fdc.drq());
    env.command(&mut fdc, 0xD8);
}

#[test]
fn unserviced_reads_raise_lost_data() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_sector_register(1);
    env.command(&mut fdc, 0x80);
    // Never touch the data register; the controller keeps going and
    // flags lost data.
    env.run(&mut fdc, OP_DEADLINE_TICKS);
    assert!(env.nmi.is_latched());
    assert_ne!(env.status(&fdc) & crate::ST_LOST_DATA, 0);
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[test]
fn snapshot_mid_seek_resumes_and_completes() {
    let (mut env, mut fdc) = formatted_fdc(true);

    fdc.write_data(40);
    env.command(&mut fdc, 0x13); // seek at 30 ms per step
    env.run_micros(&mut fdc, 150_000); // a handful of steps in
    assert!(fdc.busy());

    let mut w = emu_core::SnapshotWriter::new();
    fdc.save_state(&mut w, &env.sched, env.clock.tick_count());
    let bytes = w.into_bytes();

    // Restore into a fresh controller and environment at the same tick.
    let mut env2 = Env::new();
    env2.clock.advance_to(env.clock.tick_count());
    let mut fdc2 = Wd1793::new();
    let mut r = emu_core::SnapshotReader::new(&bytes);
    fdc2.load_state(&mut r, 10, env2.clock.tick_count(), &mut env2.sched)
        .expect("snapshot load");
    assert_eq!(r.remaining(), 0);
    assert!(fdc2.busy());
    assert_eq!(fdc2.command(), Command::Seek);

    env2.run_micros(&mut fdc2, 40 * 30_000 + 40_000);
    assert_eq!(fdc2.track_register(), 40);
    assert_eq!(fdc2.drive(0).map(|d| d.physical_track), Some(40));
    assert!(env2.nmi.is_latched());
}

#[test]
fn snapshot_save_load_save_is_stable() {
    let (mut env, mut fdc) = formatted_fdc(false);
    fdc.write_sector_register(2);
    env.command(&mut fdc, 0x80);
    env.run_micros(&mut fdc, 5_000);

    let mut w = emu_core::SnapshotWriter::new();
    fdc.save_state(&mut w, &env.sched, env.clock.tick_count());
    let first = w.into_bytes();

    let mut env2 = Env::new();
    env2.clock.advance_to(env.clock.tick_count());
    let mut fdc2 = Wd1793::new();
    let mut r = emu_core::SnapshotReader::new(&first);
    fdc2.load_state(&mut r, 10, env2.clock.tick_count(), &mut env2.sched)
        .expect("snapshot load");

    let mut w2 = emu_core::SnapshotWriter::new();
    fdc2.save_state(&mut w2, &env2.sched, env2.clock.tick_count());
    assert_eq!(first, w2.into_bytes());
}
