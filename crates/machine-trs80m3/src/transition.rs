//! Cassette read-path waveform generator.
//!
//! Playing a tape means turning stored bits back into the polarity
//! transitions the analog circuit would have produced. A [`Transition`]
//! holds the waveform phases of the bit currently under the head and
//! steps through them as the clock passes each phase boundary; the deck
//! pulls the next bit off the tape whenever the queue runs dry.
//!
//! High speed (~1500 baud) encodes each bit as one square-wave cycle
//! whose half-period depends on the bit value. Low speed (~500 baud)
//! encodes a clock pulse per bit cell with a data pulse in the middle
//! of the cell for a one bit; each pulse is a positive half then a
//! negative half, followed by silence.

use emu_core::{SnapshotReader, SnapshotWriter};

/// High-speed half-cycle for a one bit.
pub const HIGH_ONE_HALF_TICKS: u64 = 378_000;

/// High-speed half-cycle for a zero bit.
pub const HIGH_ZERO_HALF_TICKS: u64 = 771_000;

/// Low-speed pulse half-width (positive and negative halves alike).
pub const LOW_PULSE_HALF_TICKS: u64 = 250_000;

/// Low-speed silence after the clock pulse of a one bit.
pub const LOW_POST_CLOCK_ONE_TICKS: u64 = 1_632_000;

/// Low-speed silence after the data pulse of a one bit.
pub const LOW_POST_DATA_ONE_TICKS: u64 = 1_632_000;

/// Low-speed silence filling the rest of a zero bit cell.
pub const LOW_POST_DATA_ZERO_TICKS: u64 = 3_669_000;

/// Signal polarity at the cassette port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    #[default]
    Zero,
    Positive,
    Negative,
}

impl Polarity {
    pub(crate) fn to_code(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::Positive => 1,
            Self::Negative => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, String> {
        Ok(match code {
            0 => Self::Zero,
            1 => Self::Positive,
            2 => Self::Negative,
            _ => return Err(format!("unknown polarity code {code}")),
        })
    }
}

/// Tape speed, auto-detected on both the read and write paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Speed {
    #[default]
    Low,
    High,
}

impl Speed {
    pub(crate) fn to_code(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::High => 1,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, String> {
        Ok(match code {
            0 => Self::Low,
            1 => Self::High,
            _ => return Err(format!("unknown speed code {code}")),
        })
    }
}

/// Edges produced by one phase step.
#[derive(Debug, Clone, Copy, Default)]
pub struct Edges {
    pub rising: bool,
    pub falling: bool,
}

/// The waveform state of the bit currently being played.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    speed: Speed,
    before: Polarity,
    after: Polarity,
    last_non_zero: Polarity,
    flip_flop: bool,
    /// The CPU has read the port; apply the flip-flop clear at the next
    /// phase step.
    clear_flip_flop: bool,
    /// Tick at which `after` became the live polarity.
    phase_start: u64,
    /// Length of the current phase.
    duration: u64,
    queue: [(Polarity, u64); 6],
    queue_len: u8,
    queue_pos: u8,
}

impl Transition {
    /// Begin a fresh waveform at `now`. The queue starts empty, so the
    /// first phase plays as soon as the deck loads a bit.
    #[must_use]
    pub fn start(speed: Speed, now: u64) -> Self {
        Self {
            speed,
            before: Polarity::Zero,
            after: Polarity::Zero,
            last_non_zero: Polarity::Zero,
            flip_flop: false,
            clear_flip_flop: false,
            phase_start: now,
            duration: 0,
            queue: [(Polarity::Zero, 0); 6],
            queue_len: 0,
            queue_pos: 0,
        }
    }

    #[must_use]
    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Speed changes take effect from the next loaded bit.
    pub fn set_speed(&mut self, speed: Speed) {
        self.speed = speed;
    }

    /// Tick at which the current phase ends.
    #[must_use]
    pub fn phase_end(&self) -> u64 {
        self.phase_start + self.duration
    }

    /// Whether the waveform has exhausted the current bit.
    #[must_use]
    pub fn needs_bit(&self) -> bool {
        self.queue_pos >= self.queue_len
    }

    /// Queue the waveform phases for the next tape bit.
    pub fn load_bit(&mut self, value: bool) {
        use Polarity::{Negative, Positive, Zero};
        let (phases, len): ([(Polarity, u64); 6], u8) = match (self.speed, value) {
            (Speed::High, true) => (
                [
                    (Positive, HIGH_ONE_HALF_TICKS),
                    (Negative, HIGH_ONE_HALF_TICKS),
                    (Zero, 0),
                    (Zero, 0),
                    (Zero, 0),
                    (Zero, 0),
                ],
                2,
            ),
            (Speed::High, false) => (
                [
                    (Positive, HIGH_ZERO_HALF_TICKS),
                    (Negative, HIGH_ZERO_HALF_TICKS),
                    (Zero, 0),
                    (Zero, 0),
                    (Zero, 0),
                    (Zero, 0),
                ],
                2,
            ),
            (Speed::Low, true) => (
                [
                    (Positive, LOW_PULSE_HALF_TICKS),
                    (Negative, LOW_PULSE_HALF_TICKS),
                    (Zero, LOW_POST_CLOCK_ONE_TICKS),
                    (Positive, LOW_PULSE_HALF_TICKS),
                    (Negative, LOW_PULSE_HALF_TICKS),
                    (Zero, LOW_POST_DATA_ONE_TICKS),
                ],
                6,
            ),
            (Speed::Low, false) => (
                [
                    (Positive, LOW_PULSE_HALF_TICKS),
                    (Negative, LOW_PULSE_HALF_TICKS),
                    (Zero, LOW_POST_DATA_ZERO_TICKS),
                    (Zero, 0),
                    (Zero, 0),
                    (Zero, 0),
                ],
                3,
            ),
        };
        self.queue = phases;
        self.queue_len = len;
        self.queue_pos = 0;
    }

    /// Step into the next queued phase, reporting any edge produced.
    /// The caller must have refilled the queue if `needs_bit` was true.
    pub fn advance_phase(&mut self) -> Edges {
        if self.clear_flip_flop {
            self.flip_flop = false;
            self.clear_flip_flop = false;
        }
        let mut edges = Edges::default();
        if self.needs_bit() {
            return edges;
        }
        let (polarity, duration) = self.queue[usize::from(self.queue_pos)];
        self.queue_pos += 1;
        self.phase_start = self.phase_end();
        self.duration = duration;
        self.before = self.after;
        self.after = polarity;
        match polarity {
            Polarity::Positive => {
                if self.before != Polarity::Positive {
                    edges.rising = true;
                    self.flip_flop = true;
                }
                self.last_non_zero = Polarity::Positive;
            }
            Polarity::Negative => {
                if self.before != Polarity::Negative {
                    edges.falling = true;
                }
                self.last_non_zero = Polarity::Negative;
            }
            Polarity::Zero => {}
        }
        edges
    }

    #[must_use]
    pub fn flip_flop(&self) -> bool {
        self.flip_flop
    }

    #[must_use]
    pub fn last_non_zero(&self) -> Polarity {
        self.last_non_zero
    }

    /// The CPU read the port image; the flip-flop clears at the next
    /// phase step.
    pub fn note_read(&mut self) {
        self.clear_flip_flop = true;
    }

    /// A polarity write from the CPU resets the flip-flop outright.
    pub fn clear_flip_flop_now(&mut self) {
        self.flip_flop = false;
        self.clear_flip_flop = false;
    }

    pub fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_u8(self.speed.to_code());
        w.write_u8(self.before.to_code());
        w.write_u8(self.after.to_code());
        w.write_u8(self.last_non_zero.to_code());
        w.write_bool(self.flip_flop);
        w.write_bool(self.clear_flip_flop);
        w.write_u64(self.phase_start);
        w.write_u64(self.duration);
        for (polarity, duration) in self.queue {
            w.write_u8(polarity.to_code());
            w.write_u64(duration);
        }
        w.write_u8(self.queue_len);
        w.write_u8(self.queue_pos);
    }

    pub fn load_state(r: &mut SnapshotReader) -> Result<Self, String> {
        let speed = Speed::from_code(r.read_u8("transition speed")?)?;
        let before = Polarity::from_code(r.read_u8("transition before")?)?;
        let after = Polarity::from_code(r.read_u8("transition after")?)?;
        let last_non_zero = Polarity::from_code(r.read_u8("transition last non-zero")?)?;
        let flip_flop = r.read_bool("transition flip-flop")?;
        let clear_flip_flop = r.read_bool("transition flip-flop clear")?;
        let phase_start = r.read_u64("transition phase start")?;
        let duration = r.read_u64("transition duration")?;
        let mut queue = [(Polarity::Zero, 0); 6];
        for entry in &mut queue {
            let polarity = Polarity::from_code(r.read_u8("transition queue polarity")?)?;
            let duration = r.read_u64("transition queue duration")?;
            *entry = (polarity, duration);
        }
        let queue_len = r.read_u8("transition queue length")?;
        let queue_pos = r.read_u8("transition queue position")?;
        if queue_len > 6 || queue_pos > queue_len {
            return Err("transition queue cursor out of range".to_string());
        }
        Ok(Self {
            speed,
            before,
            after,
            last_non_zero,
            flip_flop,
            clear_flip_flop,
            phase_start,
            duration,
            queue,
            queue_len,
            queue_pos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drain all phases of one loaded bit, returning (polarity, duration)
    /// pairs in play order.
    fn phases_of(speed: Speed, bit: bool) -> Vec<(Polarity, u64)> {
        let mut tr = Transition::start(speed, 0);
        tr.load_bit(bit);
        let mut out = Vec::new();
        while !tr.needs_bit() {
            tr.advance_phase();
            out.push((tr.after, tr.duration));
        }
        out
    }

    #[test]
    fn high_speed_one_is_a_short_cycle() {
        let phases = phases_of(Speed::High, true);
        assert_eq!(
            phases,
            vec![
                (Polarity::Positive, HIGH_ONE_HALF_TICKS),
                (Polarity::Negative, HIGH_ONE_HALF_TICKS),
            ]
        );
    }

    #[test]
    fn high_speed_zero_is_a_long_cycle() {
        let phases = phases_of(Speed::High, false);
        assert_eq!(
            phases,
            vec![
                (Polarity::Positive, HIGH_ZERO_HALF_TICKS),
                (Polarity::Negative, HIGH_ZERO_HALF_TICKS),
            ]
        );
    }

    #[test]
    fn low_speed_one_has_clock_and_data_pulses() {
        let phases = phases_of(Speed::Low, true);
        assert_eq!(phases.len(), 6);
        let positives = phases
            .iter()
            .filter(|(p, _)| *p == Polarity::Positive)
            .count();
        assert_eq!(positives, 2, "clock pulse plus data pulse");
    }

    #[test]
    fn low_speed_zero_has_clock_pulse_only() {
        let phases = phases_of(Speed::Low, false);
        assert_eq!(phases.len(), 3);
        assert_eq!(phases[2], (Polarity::Zero, LOW_POST_DATA_ZERO_TICKS));
    }

    #[test]
    fn rising_edge_sets_flip_flop_and_read_defers_clear() {
        let mut tr = Transition::start(Speed::High, 0);
        tr.load_bit(true);
        let edges = tr.advance_phase();
        assert!(edges.rising);
        assert!(tr.flip_flop());

        tr.note_read();
        assert!(tr.flip_flop(), "clear is deferred to the next step");
        let edges = tr.advance_phase();
        assert!(edges.falling);
        assert!(!tr.flip_flop());
    }

    #[test]
    fn snapshot_round_trip() {
        let mut tr = Transition::start(Speed::Low, 12_345);
        tr.load_bit(true);
        let _ = tr.advance_phase();
        tr.note_read();

        let mut w = SnapshotWriter::new();
        tr.save_state(&mut w);
        let bytes = w.into_bytes();
        let restored = Transition::load_state(&mut SnapshotReader::new(&bytes)).expect("load");
        assert_eq!(restored, tr);
    }
}
