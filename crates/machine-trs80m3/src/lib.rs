//! TRS-80 Model III peripheral board.
//!
//! This crate is the cycle-timed peripheral core of the machine: the
//! cassette deck, the WD1793 floppy controller, the port routing, the
//! interrupt latches, and the shared clock and pulse scheduler that
//! drive them. The CPU, memory map, video, and keyboard are external;
//! a CPU driver connects through [`Trs80Model3::io_read`] /
//! [`Trs80Model3::io_write`], advances time with
//! [`Trs80Model3::run_for`], and watches the latches for interrupts.
//!
//! Timing is exact to the tick (1/1000 of a T-state): peripherals
//! schedule pulse requests on the shared scheduler and the machine
//! delivers them in deadline order, registration order breaking ties.

mod bus;
pub mod cassette;
mod config;
mod interrupts;
pub mod mcp;
mod snapshot;
pub mod sound;
pub mod transition;

pub use cassette::{Cassette, CassetteEvent, CassetteHost, CassetteStatus};
pub use config::Trs80Config;
pub use interrupts::InterruptLatches;
pub use snapshot::{CURRENT_SNAPSHOT_VERSION, MIN_SNAPSHOT_VERSION, SNAPSHOT_MAGIC};
pub use sound::{CountingSound, NullSound, SoundProbe, SoundSink};
pub use transition::{Polarity, Speed};
pub use wd_1793::{Floppy, Wd1793};

use emu_core::{Clock, PulseScheduler, micros_to_ticks};
use wd_1793::{FdcEvent, FdcHost};

/// Scheduler token for the whole board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    Cassette(CassetteEvent),
    Fdc(FdcEvent),
}

impl From<CassetteEvent> for MachineEvent {
    fn from(event: CassetteEvent) -> Self {
        Self::Cassette(event)
    }
}

impl From<FdcEvent> for MachineEvent {
    fn from(event: FdcEvent) -> Self {
        Self::Fdc(event)
    }
}

/// The peripheral board.
pub struct Trs80Model3 {
    pub clock: Clock,
    pub scheduler: PulseScheduler<MachineEvent>,
    pub latches: InterruptLatches,
    pub cassette: Cassette,
    pub fdc: Wd1793,
    sound: Box<dyn SoundSink>,
    config: Trs80Config,
}

impl Trs80Model3 {
    #[must_use]
    pub fn new(config: Trs80Config) -> Self {
        Self::with_sound(config, Box::new(NullSound))
    }

    #[must_use]
    pub fn with_sound(config: Trs80Config, sound: Box<dyn SoundSink>) -> Self {
        let mut fdc = Wd1793::with_timing(config.fdc_timing());
        fdc.set_num_drives(config.num_drives);
        fdc.set_enabled(config.num_drives > 0);
        let cassette = Cassette::new(config.blank_tape_length, config.max_tape_length);
        Self {
            clock: Clock::new(),
            scheduler: PulseScheduler::new(),
            latches: InterruptLatches::new(),
            cassette,
            fdc,
            sound,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Trs80Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Advance emulated time by `ticks`, delivering scheduled pulses in
    /// deadline order as the clock passes them.
    pub fn run_for(&mut self, ticks: u64) {
        self.run_until(self.clock.tick_count() + ticks);
    }

    /// Advance emulated time to an absolute tick.
    pub fn run_until(&mut self, tick: u64) {
        loop {
            match self.scheduler.next_due() {
                Some(due) if due <= tick => {
                    self.clock.advance_to(due);
                    while let Some(event) = self.scheduler.pop_due(self.clock.tick_count()) {
                        self.dispatch(event);
                    }
                }
                _ => {
                    self.clock.advance_to(tick);
                    return;
                }
            }
        }
    }

    pub fn run_micros(&mut self, micros: u64) {
        self.run_for(micros_to_ticks(micros));
    }

    fn dispatch(&mut self, event: MachineEvent) {
        match event {
            MachineEvent::Cassette(e) => {
                self.with_cassette(|deck, host| deck.handle_event(e, host));
            }
            MachineEvent::Fdc(e) => {
                self.with_fdc(|fdc, host| fdc.handle_event(e, host));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Peripheral plumbing
    // -----------------------------------------------------------------------

    pub(crate) fn with_cassette<R>(
        &mut self,
        f: impl FnOnce(&mut Cassette, &mut CassetteHost<'_, MachineEvent>) -> R,
    ) -> R {
        let mut host = CassetteHost {
            clock: &self.clock,
            sched: &mut self.scheduler,
            rising: &mut self.latches.cassette_rising_edge,
            falling: &mut self.latches.cassette_falling_edge,
        };
        f(&mut self.cassette, &mut host)
    }

    pub(crate) fn with_fdc<R>(
        &mut self,
        f: impl FnOnce(&mut Wd1793, &mut FdcHost<'_, MachineEvent>) -> R,
    ) -> R {
        let mut host = FdcHost {
            clock: &mut self.clock,
            sched: &mut self.scheduler,
            nmi: &mut self.latches.fdc_nmi,
            motor_off_nmi: &mut self.latches.fdc_motor_off_nmi,
            sound: &mut *self.sound,
        };
        f(&mut self.fdc, &mut host)
    }

    // -----------------------------------------------------------------------
    // User controls
    // -----------------------------------------------------------------------

    pub fn cassette_play(&mut self) {
        self.with_cassette(|deck, host| deck.press_play(host));
    }

    pub fn cassette_record(&mut self) {
        self.with_cassette(|deck, host| deck.press_record(host));
    }

    pub fn cassette_stop(&mut self) {
        self.with_cassette(|deck, host| deck.press_stop(host));
    }

    pub fn cassette_rewind(&mut self) {
        self.cassette.rewind();
    }

    pub fn insert_tape(&mut self, data: Vec<u8>) {
        self.with_cassette(|deck, host| deck.insert(data, host));
    }

    pub fn insert_blank_tape(&mut self) {
        self.with_cassette(|deck, host| deck.insert_blank(host));
    }

    pub fn eject_tape(&mut self) -> Vec<u8> {
        self.with_cassette(|deck, host| deck.eject(host))
    }

    pub fn insert_floppy(&mut self, drive: usize, floppy: Floppy) {
        self.fdc.insert_floppy(drive, floppy);
    }

    pub fn eject_floppy(&mut self, drive: usize) -> Option<Floppy> {
        self.fdc.eject_floppy(drive)
    }

    pub fn set_drive_write_protected(&mut self, drive: usize, protected: bool) {
        self.fdc.set_drive_write_protected(drive, protected);
    }
}
