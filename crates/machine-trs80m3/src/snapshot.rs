//! Versioned machine snapshots.
//!
//! A snapshot is a flat byte stream: magic, format version, clock,
//! latches, cassette, floppy controller — every live field including
//! loaded media and pending pulse requests. Loading rebuilds the
//! scheduler from scratch and lets each peripheral re-register its
//! pending pulses, so a restored machine continues mid-command.
//!
//! Version 10 added the controller's `enabled` flag; version 9 streams
//! infer it from whether any drive holds a floppy. Older versions are
//! refused.

use emu_core::{PulseScheduler, SnapshotReader, SnapshotWriter};

use crate::Trs80Model3;

/// Identifies a Model III snapshot stream.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"TRS3";

pub const CURRENT_SNAPSHOT_VERSION: u32 = 10;
pub const MIN_SNAPSHOT_VERSION: u32 = 9;

impl Trs80Model3 {
    /// Serialize the full peripheral state.
    #[must_use]
    pub fn save_snapshot(&self) -> Vec<u8> {
        let now = self.clock.tick_count();
        let mut w = SnapshotWriter::new();
        w.write_u8(SNAPSHOT_MAGIC[0]);
        w.write_u8(SNAPSHOT_MAGIC[1]);
        w.write_u8(SNAPSHOT_MAGIC[2]);
        w.write_u8(SNAPSHOT_MAGIC[3]);
        w.write_u32(CURRENT_SNAPSHOT_VERSION);

        w.write_u64(now);
        w.write_bool(self.clock.is_waiting());
        self.latches.save_state(&mut w);
        self.cassette.save_state(&mut w, &self.scheduler, now);
        self.fdc.save_state(&mut w, &self.scheduler, now);
        w.into_bytes()
    }

    /// Restore from a snapshot stream. On error the machine's contents
    /// are unspecified and the caller should discard it.
    pub fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), String> {
        let mut r = SnapshotReader::new(bytes);
        let magic = [
            r.read_u8("magic")?,
            r.read_u8("magic")?,
            r.read_u8("magic")?,
            r.read_u8("magic")?,
        ];
        if magic != SNAPSHOT_MAGIC {
            return Err("not a Model III snapshot".to_string());
        }
        let version = r.read_u32("version")?;
        if !(MIN_SNAPSHOT_VERSION..=CURRENT_SNAPSHOT_VERSION).contains(&version) {
            return Err(format!("unsupported snapshot version {version}"));
        }

        let tick_count = r.read_u64("clock")?;
        let waiting = r.read_bool("clock wait")?;
        self.clock.restore(tick_count, waiting);

        // Pending pulses are re-registered by the peripherals below.
        self.scheduler = PulseScheduler::new();

        self.latches.load_state(&mut r)?;
        self.cassette
            .load_state(&mut r, tick_count, &mut self.scheduler)?;
        self.fdc
            .load_state(&mut r, version, tick_count, &mut self.scheduler)?;

        if r.remaining() != 0 {
            return Err(format!(
                "snapshot has {} trailing bytes",
                r.remaining()
            ));
        }
        Ok(())
    }
}
