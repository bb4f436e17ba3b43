//! Cassette deck: motor control, tape storage, and both directions of
//! pulse translation.
//!
//! The tape itself is a flat byte buffer, MSB first within each byte.
//! Reading turns bits into polarity transitions through a
//! [`Transition`] and latches the rising/falling interrupt lines as the
//! waveform plays. Writing watches the CPU's polarity writes on the
//! cassette port and classifies the spacing of positive edges back into
//! bits, auto-detecting the baud rate from the spacing as it goes.
//!
//! The motor only turns when both sides agree: the user has pressed
//! play or record (`motor_engaged`) and the CPU has asserted the motor
//! line (`motor_on_signal`).

use emu_core::{Clock, InterruptLatch, PulseReq, PulseScheduler, SnapshotReader, SnapshotWriter};

use crate::transition::{Polarity, Speed, Transition};

/// Length of a fresh blank tape.
pub const BLANK_TAPE_LENGTH: usize = 0x800;

/// Hard cap on tape growth; writing past this stops the deck.
pub const MAX_TAPE_LENGTH: usize = 0x12000;

// Positive-edge spacing classes for write decoding, in ticks. The
// high-speed format produces one full cycle per bit (short for a one,
// long for a zero); the low-speed format produces clock/data pulses
// about half a bit cell apart, or a full cell for a clock-only zero.
const HIGH_ONE_MIN: u64 = 721_000;
const HIGH_ONE_MAX: u64 = 797_000;
const HIGH_ZERO_MIN: u64 = 1_459_000;
const HIGH_ZERO_MAX: u64 = 1_861_000;
const LOW_SHORT_MIN: u64 = 1_923_000;
const LOW_SHORT_MAX: u64 = 2_281_000;
const LOW_LONG_MIN: u64 = 3_858_000;
const LOW_LONG_MAX: u64 = 4_379_000;

/// Below this, a high-speed interval is a one bit.
const HIGH_BIT_SPLIT: u64 = 1_200_000;

/// Above this, a low-speed interval spans a whole bit cell.
const LOW_CLOCK_ONLY_SPLIT: u64 = 3_000_000;

/// Saturation bound and lock-on threshold for speed evidence.
const EVIDENCE_LIMIT: i32 = 16;
const EVIDENCE_THRESHOLD: i32 = 8;

/// Consecutive header bytes needed to lock the read-side baud rate.
const HEADER_RUN: u32 = 21;

/// What the deck is doing, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CassetteStatus {
    /// Motor running, playing back.
    Reading,
    /// Play pressed, waiting for the CPU to start the motor.
    ReadEngaged,
    /// Motor running, recording.
    Writing,
    /// Record pressed, waiting for the CPU to start the motor.
    WriteEngaged,
    /// CPU asserts the motor line but no button is down.
    Waiting,
    Stopped,
}

/// Scheduler token for the deck's single pulse: the next waveform phase
/// boundary on the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CassetteEvent {
    ReadPulse,
}

/// What the deck borrows from the machine for one entry point.
pub struct CassetteHost<'a, E: Copy + From<CassetteEvent>> {
    pub clock: &'a Clock,
    pub sched: &'a mut PulseScheduler<E>,
    /// Rising-edge interrupt latch.
    pub rising: &'a mut InterruptLatch,
    /// Falling-edge interrupt latch.
    pub falling: &'a mut InterruptLatch,
}

/// The cassette deck.
#[derive(Debug)]
pub struct Cassette {
    data: Vec<u8>,
    byte_cursor: usize,
    /// Bit index accessed next; counts 7 down to 0 within each byte.
    bit_cursor: u8,
    is_blank: bool,
    changed: bool,
    speed: Speed,

    motor_engaged: bool,
    motor_on_signal: bool,
    motor_on: bool,
    record_invoked: bool,

    // Write decoding.
    last_write_positive: u64,
    next_last_write_positive: u64,
    last_write_polarity: Polarity,
    high_speed_write_evidence: i32,
    skipped_last: bool,

    // Read path.
    transition: Option<Transition>,
    read_pulse_req: PulseReq,

    // Header detection.
    consecutive_fifty_fives: u32,
    consecutive_zeros: u32,

    blank_length: usize,
    max_length: usize,
}

impl Cassette {
    /// A deck holding a blank tape.
    #[must_use]
    pub fn new(blank_length: usize, max_length: usize) -> Self {
        Self {
            data: vec![0; blank_length],
            byte_cursor: 0,
            bit_cursor: 7,
            is_blank: true,
            changed: false,
            speed: Speed::Low,
            motor_engaged: false,
            motor_on_signal: false,
            motor_on: false,
            record_invoked: false,
            last_write_positive: 0,
            next_last_write_positive: 0,
            last_write_polarity: Polarity::Zero,
            high_speed_write_evidence: 0,
            skipped_last: false,
            transition: None,
            read_pulse_req: PulseReq::idle(),
            consecutive_fifty_fives: 0,
            consecutive_zeros: 0,
            blank_length,
            max_length,
        }
    }

    // -----------------------------------------------------------------------
    // Tape handling
    // -----------------------------------------------------------------------

    /// Load a tape image, replacing whatever is in the deck.
    pub fn insert<E: Copy + From<CassetteEvent>>(
        &mut self,
        data: Vec<u8>,
        host: &mut CassetteHost<'_, E>,
    ) {
        self.press_stop(host);
        self.is_blank = data.iter().all(|&b| b == 0);
        self.data = if data.is_empty() {
            vec![0; self.blank_length]
        } else {
            data
        };
        self.rewind();
        self.changed = false;
    }

    /// Replace the tape with a fresh blank one.
    pub fn insert_blank<E: Copy + From<CassetteEvent>>(&mut self, host: &mut CassetteHost<'_, E>) {
        let blank = vec![0; self.blank_length];
        self.insert(blank, host);
        self.is_blank = true;
    }

    /// Take the tape out, leaving a blank one behind.
    pub fn eject<E: Copy + From<CassetteEvent>>(
        &mut self,
        host: &mut CassetteHost<'_, E>,
    ) -> Vec<u8> {
        self.press_stop(host);
        let out = std::mem::replace(&mut self.data, vec![0; self.blank_length]);
        self.rewind();
        self.is_blank = true;
        self.changed = false;
        out
    }

    /// Wind back to the start. Speed detection starts over.
    pub fn rewind(&mut self) {
        self.byte_cursor = 0;
        self.bit_cursor = 7;
        self.consecutive_fifty_fives = 0;
        self.consecutive_zeros = 0;
        self.skipped_last = false;
    }

    // -----------------------------------------------------------------------
    // Controls
    // -----------------------------------------------------------------------

    pub fn press_play<E: Copy + From<CassetteEvent>>(&mut self, host: &mut CassetteHost<'_, E>) {
        self.motor_engaged = true;
        self.record_invoked = false;
        self.update_motor(host);
    }

    pub fn press_record<E: Copy + From<CassetteEvent>>(&mut self, host: &mut CassetteHost<'_, E>) {
        self.motor_engaged = true;
        self.record_invoked = true;
        self.update_motor(host);
    }

    pub fn press_stop<E: Copy + From<CassetteEvent>>(&mut self, host: &mut CassetteHost<'_, E>) {
        self.motor_engaged = false;
        self.record_invoked = false;
        self.update_motor(host);
    }

    /// CPU side of the motor: bit 1 of the mode port.
    pub fn set_motor_signal<E: Copy + From<CassetteEvent>>(
        &mut self,
        on: bool,
        host: &mut CassetteHost<'_, E>,
    ) {
        self.motor_on_signal = on;
        self.update_motor(host);
    }

    #[must_use]
    pub fn status(&self) -> CassetteStatus {
        if self.motor_on {
            if self.record_invoked {
                CassetteStatus::Writing
            } else {
                CassetteStatus::Reading
            }
        } else if self.motor_engaged {
            if self.record_invoked {
                CassetteStatus::WriteEngaged
            } else {
                CassetteStatus::ReadEngaged
            }
        } else if self.motor_on_signal {
            CassetteStatus::Waiting
        } else {
            CassetteStatus::Stopped
        }
    }

    fn update_motor<E: Copy + From<CassetteEvent>>(&mut self, host: &mut CassetteHost<'_, E>) {
        let on = self.motor_engaged && self.motor_on_signal;
        if on == self.motor_on {
            return;
        }
        self.motor_on = on;
        let now = host.clock.tick_count();
        if on {
            if self.record_invoked {
                // Prime the write decoder; the first positive edge has
                // no meaningful spacing and classifies as noise.
                self.last_write_positive = now;
                self.next_last_write_positive = now;
                self.last_write_polarity = Polarity::Zero;
                self.skipped_last = false;
            } else {
                self.transition = Some(Transition::start(self.speed, now));
                self.advance_read(host);
            }
        } else {
            self.transition = None;
            host.sched.expire(self.read_pulse_req);
            self.read_pulse_req = PulseReq::idle();
        }
    }

    /// Stop from the mechanism's own side (end of tape, overflow).
    fn stop_deck(&mut self) {
        self.motor_engaged = false;
        self.record_invoked = false;
        self.motor_on = false;
    }

    // -----------------------------------------------------------------------
    // Port surface
    // -----------------------------------------------------------------------

    /// Read the cassette port: flip-flop in bit 7, last-non-zero
    /// polarity in bit 0. Reading arms a deferred flip-flop clear.
    pub fn read_port<E: Copy + From<CassetteEvent>>(
        &mut self,
        host: &mut CassetteHost<'_, E>,
    ) -> u8 {
        self.advance_read(host);
        let Some(tr) = self.transition.as_mut() else {
            return 0;
        };
        let mut value = 0;
        if tr.flip_flop() {
            value |= 0x80;
        }
        if tr.last_non_zero() == Polarity::Positive {
            value |= 0x01;
        }
        tr.note_read();
        value
    }

    /// Write the cassette port: bits 0-1 carry the output polarity.
    pub fn write_port<E: Copy + From<CassetteEvent>>(
        &mut self,
        value: u8,
        host: &mut CassetteHost<'_, E>,
    ) {
        let polarity = match value & 0x03 {
            0b01 => Polarity::Positive,
            0b10 => Polarity::Negative,
            _ => Polarity::Zero,
        };
        if polarity == self.last_write_polarity {
            return;
        }
        if self.motor_on && !self.record_invoked {
            // Playback: the ROM pokes the port to reset the flip-flop.
            if let Some(tr) = self.transition.as_mut() {
                tr.clear_flip_flop_now();
            }
        }
        if self.motor_on && self.record_invoked && polarity == Polarity::Positive {
            let now = host.clock.tick_count();
            self.next_last_write_positive = self.last_write_positive;
            self.last_write_positive = now;
            let delta = self.last_write_positive - self.next_last_write_positive;
            self.classify_write_interval(delta);
        }
        self.last_write_polarity = polarity;
    }

    /// Deliver the read-pulse callback.
    pub fn handle_event<E: Copy + From<CassetteEvent>>(
        &mut self,
        event: CassetteEvent,
        host: &mut CassetteHost<'_, E>,
    ) {
        match event {
            CassetteEvent::ReadPulse => self.advance_read(host),
        }
    }

    // -----------------------------------------------------------------------
    // Read path
    // -----------------------------------------------------------------------

    /// Play the waveform forward to the present, latching edges, then
    /// schedule the next phase boundary.
    fn advance_read<E: Copy + From<CassetteEvent>>(&mut self, host: &mut CassetteHost<'_, E>) {
        let Some(mut tr) = self.transition.take() else {
            return;
        };
        let now = host.clock.tick_count();
        loop {
            if tr.needs_bit() {
                match self.next_read_bit() {
                    Some(bit) => {
                        tr.set_speed(self.speed);
                        tr.load_bit(bit);
                    }
                    None => {
                        // Ran off the end of the tape.
                        self.stop_deck();
                        host.sched.expire(self.read_pulse_req);
                        self.read_pulse_req = PulseReq::idle();
                        return;
                    }
                }
            }
            if tr.phase_end() > now {
                break;
            }
            let edges = tr.advance_phase();
            if edges.rising {
                host.rising.latch();
            }
            if edges.falling {
                host.falling.latch();
            }
        }
        host.sched.expire(self.read_pulse_req);
        self.read_pulse_req = host.sched.schedule_ticks(
            now,
            tr.phase_end() - now,
            E::from(CassetteEvent::ReadPulse),
        );
        self.transition = Some(tr);
    }

    /// Next bit under the head; byte boundaries feed the baud detector.
    fn next_read_bit(&mut self) -> Option<bool> {
        if self.byte_cursor >= self.data.len() {
            return None;
        }
        let byte = self.data[self.byte_cursor];
        let bit = byte >> self.bit_cursor & 1 != 0;
        if self.bit_cursor == 0 {
            self.bit_cursor = 7;
            self.byte_cursor += 1;
            self.feed_header_detector(byte);
        } else {
            self.bit_cursor -= 1;
        }
        Some(bit)
    }

    /// A long run of 0x55/0xAA means a high-speed header, a long run of
    /// zeros a low-speed one. Anything else starts both counts over.
    fn feed_header_detector(&mut self, byte: u8) {
        match byte {
            0x55 | 0xAA => {
                self.consecutive_fifty_fives += 1;
                self.consecutive_zeros = 0;
                if self.consecutive_fifty_fives >= HEADER_RUN {
                    self.speed = Speed::High;
                }
            }
            0x00 => {
                self.consecutive_zeros += 1;
                self.consecutive_fifty_fives = 0;
                if self.consecutive_zeros >= HEADER_RUN {
                    self.speed = Speed::Low;
                }
            }
            _ => {
                self.consecutive_fifty_fives = 0;
                self.consecutive_zeros = 0;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Classify the spacing between two positive edges and decode bits
    /// accordingly. Spacing outside every class is noise and ignored.
    fn classify_write_interval(&mut self, delta: u64) {
        let high = (HIGH_ONE_MIN..=HIGH_ONE_MAX).contains(&delta)
            || (HIGH_ZERO_MIN..=HIGH_ZERO_MAX).contains(&delta);
        let low = (LOW_SHORT_MIN..=LOW_SHORT_MAX).contains(&delta)
            || (LOW_LONG_MIN..=LOW_LONG_MAX).contains(&delta);

        if high {
            self.high_speed_write_evidence =
                (self.high_speed_write_evidence + 1).min(EVIDENCE_LIMIT);
            if self.high_speed_write_evidence > EVIDENCE_THRESHOLD {
                self.speed = Speed::High;
            }
            self.record_bit(delta < HIGH_BIT_SPLIT);
        } else if low {
            self.high_speed_write_evidence =
                (self.high_speed_write_evidence - 1).max(-EVIDENCE_LIMIT);
            if self.high_speed_write_evidence < -EVIDENCE_THRESHOLD {
                self.speed = Speed::Low;
            }
            if delta > LOW_CLOCK_ONLY_SPLIT {
                if self.skipped_last {
                    // A clock pulse was pending but the long interval
                    // says the cell ended: the CSAVE sync byte does
                    // this, and the bit it carries is a one.
                    self.record_bit(true);
                    self.skipped_last = false;
                } else {
                    self.record_bit(false);
                }
            } else if self.skipped_last {
                self.record_bit(true);
                self.skipped_last = false;
            } else {
                // This was the clock pulse; the data pulse follows.
                self.skipped_last = true;
            }
        }
    }

    /// Store one decoded bit and advance the cursor, growing the tape
    /// when the write runs past the end.
    fn record_bit(&mut self, value: bool) {
        if self.byte_cursor >= self.data.len() && !self.grow() {
            self.stop_deck();
            return;
        }
        let mask = 1u8 << self.bit_cursor;
        if value {
            self.data[self.byte_cursor] |= mask;
            self.is_blank = false;
        } else {
            self.data[self.byte_cursor] &= !mask;
        }
        self.changed = true;
        if self.bit_cursor == 0 {
            self.bit_cursor = 7;
            self.byte_cursor += 1;
        } else {
            self.bit_cursor -= 1;
        }
    }

    /// Grow by ten percent, capped. Returns false when full.
    fn grow(&mut self) -> bool {
        let len = self.data.len();
        if len >= self.max_length {
            return false;
        }
        let new_len = (len + len / 10).clamp(len + 1, self.max_length);
        self.data.resize(new_len, 0);
        true
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn byte_cursor(&self) -> usize {
        self.byte_cursor
    }

    #[must_use]
    pub fn bit_cursor(&self) -> u8 {
        self.bit_cursor
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.is_blank
    }

    /// Whether a write has modified the tape since it was inserted.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.changed
    }

    #[must_use]
    pub fn speed(&self) -> Speed {
        self.speed
    }

    #[must_use]
    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    #[must_use]
    pub fn write_evidence(&self) -> i32 {
        self.high_speed_write_evidence
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    pub fn save_state<E: Copy>(
        &self,
        w: &mut SnapshotWriter,
        sched: &PulseScheduler<E>,
        now: u64,
    ) {
        w.write_bytes(&self.data);
        w.write_u32(self.byte_cursor as u32);
        w.write_u8(self.bit_cursor);
        w.write_bool(self.is_blank);
        w.write_bool(self.changed);
        w.write_u8(self.speed.to_code());

        w.write_bool(self.motor_engaged);
        w.write_bool(self.motor_on_signal);
        w.write_bool(self.motor_on);
        w.write_bool(self.record_invoked);

        w.write_u64(self.last_write_positive);
        w.write_u64(self.next_last_write_positive);
        w.write_u8(self.last_write_polarity.to_code());
        w.write_i8(self.high_speed_write_evidence as i8);
        w.write_bool(self.skipped_last);

        w.write_bool(self.transition.is_some());
        if let Some(tr) = &self.transition {
            tr.save_state(w);
        }
        match sched.remaining(self.read_pulse_req, now) {
            Some(remaining) => {
                w.write_bool(true);
                w.write_u64(remaining);
            }
            None => {
                w.write_bool(false);
                w.write_u64(0);
            }
        }

        w.write_u32(self.consecutive_fifty_fives);
        w.write_u32(self.consecutive_zeros);
    }

    pub fn load_state<E: Copy + From<CassetteEvent>>(
        &mut self,
        r: &mut SnapshotReader,
        now: u64,
        sched: &mut PulseScheduler<E>,
    ) -> Result<(), String> {
        self.data = r.read_bytes("cassette data")?;
        self.byte_cursor = r.read_u32("cassette byte cursor")? as usize;
        self.bit_cursor = r.read_u8("cassette bit cursor")?;
        if self.bit_cursor > 7 {
            return Err(format!("cassette bit cursor out of range: {}", self.bit_cursor));
        }
        self.is_blank = r.read_bool("cassette blank flag")?;
        self.changed = r.read_bool("cassette changed flag")?;
        self.speed = Speed::from_code(r.read_u8("cassette speed")?)?;

        self.motor_engaged = r.read_bool("cassette motor engaged")?;
        self.motor_on_signal = r.read_bool("cassette motor signal")?;
        self.motor_on = r.read_bool("cassette motor on")?;
        self.record_invoked = r.read_bool("cassette record flag")?;

        self.last_write_positive = r.read_u64("cassette last positive")?;
        self.next_last_write_positive = r.read_u64("cassette previous positive")?;
        self.last_write_polarity = Polarity::from_code(r.read_u8("cassette write polarity")?)?;
        self.high_speed_write_evidence = i32::from(r.read_i8("cassette write evidence")?);
        self.skipped_last = r.read_bool("cassette skipped-last flag")?;

        self.transition = if r.read_bool("cassette transition present")? {
            Some(Transition::load_state(r)?)
        } else {
            None
        };
        let pulse_armed = r.read_bool("cassette pulse armed")?;
        let pulse_remaining = r.read_u64("cassette pulse remaining")?;
        self.read_pulse_req = if pulse_armed {
            sched.schedule_ticks(now, pulse_remaining, E::from(CassetteEvent::ReadPulse))
        } else {
            PulseReq::idle()
        };

        self.consecutive_fifty_fives = r.read_u32("cassette header run")?;
        self.consecutive_zeros = r.read_u32("cassette zero run")?;
        Ok(())
    }
}
