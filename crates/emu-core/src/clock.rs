//! Monotonic tick clock with a CPU wait advisory.

/// The shared tick clock.
///
/// `tick_count` only ever moves forward. The machine advances it; the
/// peripherals read it and schedule pulse requests against it.
///
/// The wait advisory is how the floppy controller parks the CPU during
/// a slow transfer when the drive-select write asked for it: the CPU
/// driver checks `is_waiting()` before executing each instruction and
/// idles (advancing time only) while it is set.
#[derive(Debug, Default)]
pub struct Clock {
    tick_count: u64,
    waiting: bool,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tick count.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Advance by `ticks`.
    pub fn advance(&mut self, ticks: u64) {
        self.tick_count += ticks;
    }

    /// Advance to an absolute tick. Moving backwards is a no-op; the
    /// clock is monotonic.
    pub fn advance_to(&mut self, tick: u64) {
        if tick > self.tick_count {
            self.tick_count = tick;
        }
    }

    /// Ask the CPU driver to stop executing instructions.
    pub fn start_wait(&mut self) {
        self.waiting = true;
    }

    /// Release the CPU driver.
    pub fn end_wait(&mut self) {
        self.waiting = false;
    }

    /// Whether the CPU is currently asked to wait.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Restore from a snapshot.
    pub fn restore(&mut self, tick_count: u64, waiting: bool) {
        self.tick_count = tick_count;
        self.waiting = waiting;
    }
}
