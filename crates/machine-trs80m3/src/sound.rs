//! Sound sinks for the drive mechanism.
//!
//! The peripherals only report events (motor spinning, head stepping);
//! rendering them is a front-end concern. `NullSound` discards
//! everything; [`CountingSound`] records events through shared handles
//! so tests and the control server can observe them.

use std::cell::Cell;
use std::rc::Rc;

pub use wd_1793::{NullSound, SoundSink};

/// A sink that counts head steps and tracks motor state.
#[derive(Debug, Default)]
pub struct CountingSound {
    steps: Rc<Cell<u64>>,
    motor_running: Rc<Cell<bool>>,
}

/// Read-side handle onto a [`CountingSound`].
#[derive(Debug, Clone)]
pub struct SoundProbe {
    steps: Rc<Cell<u64>>,
    motor_running: Rc<Cell<bool>>,
}

impl CountingSound {
    #[must_use]
    pub fn new() -> (Self, SoundProbe) {
        let sink = Self::default();
        let probe = SoundProbe {
            steps: Rc::clone(&sink.steps),
            motor_running: Rc::clone(&sink.motor_running),
        };
        (sink, probe)
    }
}

impl SoundSink for CountingSound {
    fn drive_motor_running(&mut self, running: bool) {
        self.motor_running.set(running);
    }

    fn track_step(&mut self) {
        self.steps.set(self.steps.get() + 1);
    }
}

impl SoundProbe {
    /// Head steps heard so far.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps.get()
    }

    #[must_use]
    pub fn motor_running(&self) -> bool {
        self.motor_running.get()
    }
}
