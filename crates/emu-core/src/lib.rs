//! Core timing and signal primitives for cycle-timed peripheral emulation.
//!
//! Everything in the Model III peripheral board counts time in ticks of
//! 1/1000 of a Z80 T-state. Peripherals never own a clock; they receive
//! `&mut Clock` / `&mut PulseScheduler` from the machine on every entry
//! point, which keeps ownership acyclic.

mod clock;
mod interrupt;
mod scheduler;
mod snapshot;
mod ticks;

pub use clock::Clock;
pub use interrupt::InterruptLatch;
pub use scheduler::{PulseReq, PulseScheduler};
pub use snapshot::{SnapshotReader, SnapshotWriter};
pub use ticks::{
    T_STATES_PER_SECOND, TICKS_PER_SECOND, TICKS_PER_T_STATE, micros_to_ticks, millis_to_ticks,
};
