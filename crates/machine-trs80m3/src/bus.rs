//! Port routing.
//!
//! The Model III decodes I/O ports in groups of four. The board claims
//! the NMI latch ports, the mode port (for the cassette motor line),
//! the floppy controller block, and the cassette data port; everything
//! else floats high.

use crate::Trs80Model3;

impl Trs80Model3 {
    /// CPU `IN` instruction.
    pub fn io_read(&mut self, port: u8) -> u8 {
        match port {
            // NMI status: which latches have fired.
            0xE4..=0xE7 => {
                let mut value = 0;
                if self.latches.fdc_nmi.is_latched() {
                    value |= 0x80;
                }
                if self.latches.fdc_motor_off_nmi.is_latched() {
                    value |= 0x40;
                }
                value
            }
            0xF0 => self.fdc.read_status(&self.clock),
            0xF1 => self.fdc.read_track_register(),
            0xF2 => self.fdc.read_sector_register(),
            0xF3 => self.fdc.read_data(),
            0xFF => self.with_cassette(|deck, host| deck.read_port(host)),
            _ => 0xFF,
        }
    }

    /// CPU `OUT` instruction.
    pub fn io_write(&mut self, port: u8, value: u8) {
        match port {
            // NMI enable mask: bit 7 command-complete, bit 6 motor-off.
            0xE4..=0xE7 => {
                self.latches.fdc_nmi.set_enabled(value & 0x80 != 0);
                self.latches
                    .fdc_motor_off_nmi
                    .set_enabled(value & 0x40 != 0);
            }
            // Mode port: bit 1 drives the cassette motor line.
            0xEC..=0xEF => {
                let on = value & 0x02 != 0;
                self.with_cassette(|deck, host| deck.set_motor_signal(on, host));
            }
            0xF0 => self.with_fdc(|fdc, host| fdc.write_command(value, host)),
            0xF1 => self.fdc.write_track_register(value),
            0xF2 => self.fdc.write_sector_register(value),
            0xF3 => self.fdc.write_data(value),
            0xF4..=0xF7 => self.with_fdc(|fdc, host| fdc.write_drive_select(value, host)),
            0xFF => self.with_cassette(|deck, host| deck.write_port(value, host)),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CassetteStatus, Trs80Config};

    fn machine() -> Trs80Model3 {
        Trs80Model3::new(Trs80Config::default())
    }

    #[test]
    fn unclaimed_ports_float_high() {
        let mut m = machine();
        assert_eq!(m.io_read(0x00), 0xFF);
        assert_eq!(m.io_read(0x80), 0xFF);
        m.io_write(0x00, 0x55); // dropped
    }

    #[test]
    fn mode_port_drives_cassette_motor_line() {
        let mut m = machine();
        m.cassette_play();
        assert_eq!(m.cassette.status(), CassetteStatus::ReadEngaged);
        m.io_write(0xEC, 0x02);
        assert_eq!(m.cassette.status(), CassetteStatus::Reading);
        m.io_write(0xEC, 0x00);
        assert_eq!(m.cassette.status(), CassetteStatus::ReadEngaged);
    }

    #[test]
    fn nmi_mask_and_status_port() {
        let mut m = machine();
        assert_eq!(m.io_read(0xE4), 0x00);

        m.latches.fdc_nmi.latch();
        m.latches.fdc_motor_off_nmi.latch();
        assert_eq!(m.io_read(0xE4), 0xC0);

        // Masking gates the NMI line but the status port still shows
        // the recorded edges.
        m.io_write(0xE4, 0x00);
        assert!(!m.latches.nmi_pending());
        assert_eq!(m.io_read(0xE4), 0xC0);

        m.io_write(0xE4, 0xC0);
        assert!(m.latches.nmi_pending());
    }

    #[test]
    fn fdc_register_ports_round_trip() {
        let mut m = machine();
        m.io_write(0xF1, 0x21);
        m.io_write(0xF2, 0x07);
        m.io_write(0xF3, 0x99);
        assert_eq!(m.io_read(0xF1), 0x21);
        assert_eq!(m.io_read(0xF2), 0x07);
        assert_eq!(m.io_read(0xF3), 0x99);
    }

    #[test]
    fn disabled_fdc_reads_ff() {
        let mut m = Trs80Model3::new(Trs80Config {
            num_drives: 0,
            ..Trs80Config::default()
        });
        assert_eq!(m.io_read(0xF0), 0xFF);
        assert_eq!(m.io_read(0xF1), 0xFF);
        assert_eq!(m.io_read(0xF2), 0xFF);
        assert_eq!(m.io_read(0xF3), 0xFF);
    }

    #[test]
    fn drive_select_port_reaches_the_controller() {
        let mut m = machine();
        m.io_write(0xF4, 0x91); // drive 0, side 1, double density
        assert_eq!(m.fdc.current_drive(), 0);
        assert!(m.fdc.side_one_selected());
        assert!(m.fdc.double_density());
        m.run_micros(20);
        assert!(m.fdc.motor_on());
    }
}
