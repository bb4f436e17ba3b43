//! Machine configuration.

use wd_1793::FdcTiming;

use crate::cassette::{BLANK_TAPE_LENGTH, MAX_TAPE_LENGTH};

/// Configuration for a Model III peripheral board. `Default` reproduces
/// stock hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trs80Config {
    /// Bytes in a fresh blank tape.
    pub blank_tape_length: usize,
    /// Tape growth cap; writes stall past this.
    pub max_tape_length: usize,
    /// Drive bays answering the select port (up to four).
    pub num_drives: usize,
    /// Floppy motor auto-off delay.
    pub motor_off_delay_us: u64,
    /// Drive-select to motor-running delay.
    pub motor_on_delay_us: u64,
    /// Command completion to NMI delay.
    pub nmi_delay_us: u64,
    /// Head-settle delay.
    pub standard_delay_us: u64,
    /// Head-engage delay before verify scans.
    pub head_load_delay_us: u64,
    /// Step rates selected by command bits 0-1.
    pub step_rates_ms: [u64; 4],
    /// Spindle speed.
    pub disk_rpm: u64,
}

impl Default for Trs80Config {
    fn default() -> Self {
        Self {
            blank_tape_length: BLANK_TAPE_LENGTH,
            max_tape_length: MAX_TAPE_LENGTH,
            num_drives: 4,
            motor_off_delay_us: 2_000_000,
            motor_on_delay_us: 10,
            nmi_delay_us: 30,
            standard_delay_us: 30_000,
            head_load_delay_us: 50_000,
            step_rates_ms: [6, 12, 20, 30],
            disk_rpm: 300,
        }
    }
}

impl Trs80Config {
    pub(crate) fn fdc_timing(&self) -> FdcTiming {
        FdcTiming {
            step_rates_ms: self.step_rates_ms,
            nmi_delay_us: self.nmi_delay_us,
            standard_delay_us: self.standard_delay_us,
            head_load_delay_us: self.head_load_delay_us,
            motor_on_delay_us: self.motor_on_delay_us,
            motor_off_delay_us: self.motor_off_delay_us,
            disk_rpm: self.disk_rpm,
        }
    }
}
