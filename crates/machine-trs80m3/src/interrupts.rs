//! The four named interrupt latches of the peripheral board.
//!
//! The cassette edges drive the maskable interrupt line; the floppy
//! controller's completion and motor-timeout latches drive NMI. The
//! CPU driver polls these at instruction boundaries and clears them
//! explicitly.

use emu_core::{InterruptLatch, SnapshotReader, SnapshotWriter};

#[derive(Debug, Default)]
pub struct InterruptLatches {
    pub cassette_rising_edge: InterruptLatch,
    pub cassette_falling_edge: InterruptLatch,
    pub fdc_nmi: InterruptLatch,
    pub fdc_motor_off_nmi: InterruptLatch,
}

impl InterruptLatches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the NMI line is asserted.
    #[must_use]
    pub fn nmi_pending(&self) -> bool {
        self.fdc_nmi.triggered() || self.fdc_motor_off_nmi.triggered()
    }

    /// Whether the maskable interrupt line is asserted.
    #[must_use]
    pub fn interrupt_pending(&self) -> bool {
        self.cassette_rising_edge.triggered() || self.cassette_falling_edge.triggered()
    }

    /// Clear all recorded edges (masks are left alone).
    pub fn clear_all(&mut self) {
        self.cassette_rising_edge.unlatch();
        self.cassette_falling_edge.unlatch();
        self.fdc_nmi.unlatch();
        self.fdc_motor_off_nmi.unlatch();
    }

    pub fn save_state(&self, w: &mut SnapshotWriter) {
        for latch in [
            &self.cassette_rising_edge,
            &self.cassette_falling_edge,
            &self.fdc_nmi,
            &self.fdc_motor_off_nmi,
        ] {
            w.write_bool(latch.is_enabled());
            w.write_bool(latch.is_latched());
        }
    }

    pub fn load_state(&mut self, r: &mut SnapshotReader) -> Result<(), String> {
        for latch in [
            &mut self.cassette_rising_edge,
            &mut self.cassette_falling_edge,
            &mut self.fdc_nmi,
            &mut self.fdc_motor_off_nmi,
        ] {
            let enabled = r.read_bool("latch enabled")?;
            let latched = r.read_bool("latch state")?;
            latch.restore(enabled, latched);
        }
        Ok(())
    }
}
