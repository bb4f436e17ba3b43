//! The fundamental unit of time in the emulator.
//!
//! One tick is 1/1000 of a Z80 T-state. The Model III CPU runs at
//! 2.02752 MHz, so a tick is just under half a nanosecond of emulated
//! time. Sub-T-state resolution is what lets the cassette and floppy
//! pulse timing stay exact without floating point.

/// Z80 T-states per second (2.02752 MHz crystal).
pub const T_STATES_PER_SECOND: u64 = 2_027_520;

/// Ticks per T-state.
pub const TICKS_PER_T_STATE: u64 = 1_000;

/// Ticks per second of emulated time.
pub const TICKS_PER_SECOND: u64 = T_STATES_PER_SECOND * TICKS_PER_T_STATE;

/// Convert microseconds of emulated time to ticks (integer math).
#[must_use]
pub const fn micros_to_ticks(micros: u64) -> u64 {
    micros * (TICKS_PER_SECOND / 1_000) / 1_000
}

/// Convert milliseconds of emulated time to ticks.
#[must_use]
pub const fn millis_to_ticks(millis: u64) -> u64 {
    millis * (TICKS_PER_SECOND / 1_000)
}
