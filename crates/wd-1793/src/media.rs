//! Rotating-media facade: tracks, floppies, and drives.
//!
//! A track is a flat byte buffer plus a table of IDAM offsets. The
//! controller addresses it by the byte index currently under the head.
//! Single-density tracks store every byte doubled on-media, so reads
//! scrub the low index bit and writes fill both cells of the pair.
//!
//! Disk-image file formats live outside this crate; a `Floppy` here is
//! the already-decoded in-memory form a format loader would produce.
//! `Floppy::formatted` builds the standard Model III layout directly,
//! which is also what the sector round-trip tests run against.

use emu_core::{SnapshotReader, SnapshotWriter};

use crate::crc;

/// Physical track buffer length, single density.
pub const STANDARD_TRACK_LENGTH_SD: usize = 6_250;

/// Physical track buffer length, double density.
pub const STANDARD_TRACK_LENGTH_DD: usize = 12_500;

/// Highest physical track the head can step to.
pub const MAX_TRACKS: u8 = 80;

/// Drives addressable through the select port.
pub const NUM_DRIVES: usize = 4;

/// Sector payload length used by the standard format (size code 1).
pub const STANDARD_SECTOR_LENGTH: usize = 256;

/// Sectors per track laid down by `Floppy::formatted`.
pub const SECTORS_PER_TRACK_SD: u8 = 10;
pub const SECTORS_PER_TRACK_DD: u8 = 18;

/// An index address mark recorded in a track's IDAM table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Idam {
    /// Physical byte offset of the 0xFE mark byte.
    pub offset: u32,
    /// Density the mark was written at.
    pub double_density: bool,
}

// ---------------------------------------------------------------------------
// Track
// ---------------------------------------------------------------------------

/// One track's byte buffer with its IDAM table.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    data: Vec<u8>,
    idams: Vec<Idam>,
}

impl Track {
    /// An unformatted track of the standard length for the density.
    #[must_use]
    pub fn blank(double_density: bool) -> Self {
        let len = if double_density {
            STANDARD_TRACK_LENGTH_DD
        } else {
            STANDARD_TRACK_LENGTH_SD
        };
        Self {
            data: vec![0; len],
            idams: Vec::new(),
        }
    }

    /// A track from raw bytes and a pre-built IDAM table (what a disk
    /// image loader would hand over).
    #[must_use]
    pub fn from_parts(data: Vec<u8>, idams: Vec<Idam>) -> Self {
        Self { data, idams }
    }

    /// Physical buffer length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte under the head at `index`. Single density reads the even
    /// cell of the doubled pair.
    #[must_use]
    pub fn read_byte(&self, index: usize, double_density: bool) -> u8 {
        if self.data.is_empty() {
            return 0;
        }
        let mut i = index % self.data.len();
        if !double_density {
            i &= !1;
        }
        self.data[i]
    }

    /// Write the byte under the head at `index`. Single density fills
    /// both cells of the doubled pair. Overwriting an IDAM offset
    /// removes it from the table.
    pub fn write_byte(&mut self, index: usize, double_density: bool, value: u8) {
        if self.data.is_empty() {
            return;
        }
        let mut i = index % self.data.len();
        if !double_density {
            i &= !1;
        }
        self.data[i] = value;
        if !double_density && i + 1 < self.data.len() {
            self.data[i + 1] = value;
        }
        self.idams.retain(|idam| idam.offset != i as u32);
    }

    /// Whether an IDAM written at the given density sits at `index`.
    #[must_use]
    pub fn has_idam_at(&self, index: usize, double_density: bool) -> bool {
        if self.data.is_empty() {
            return false;
        }
        let mut i = index % self.data.len();
        if !double_density {
            i &= !1;
        }
        self.idams
            .iter()
            .any(|idam| idam.offset == i as u32 && idam.double_density == double_density)
    }

    /// Record an IDAM at `index`. Used by the write-track path when it
    /// emits an address mark.
    pub fn mark_idam(&mut self, index: usize, double_density: bool) {
        if self.data.is_empty() {
            return;
        }
        let mut i = index % self.data.len();
        if !double_density {
            i &= !1;
        }
        if !self.has_idam_at(i, double_density) {
            self.idams.push(Idam {
                offset: i as u32,
                double_density,
            });
        }
    }

    /// The IDAM table.
    #[must_use]
    pub fn idams(&self) -> &[Idam] {
        &self.idams
    }

    /// Raw track bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_bytes(&self.data);
        w.write_u16(self.idams.len() as u16);
        for idam in &self.idams {
            w.write_u32(idam.offset);
            w.write_bool(idam.double_density);
        }
    }

    fn load_state(r: &mut SnapshotReader) -> Result<Self, String> {
        let data = r.read_bytes("track data")?;
        let count = r.read_u16("idam count")?;
        let mut idams = Vec::with_capacity(count as usize);
        for _ in 0..count {
            idams.push(Idam {
                offset: r.read_u32("idam offset")?,
                double_density: r.read_bool("idam density")?,
            });
        }
        Ok(Self { data, idams })
    }
}

// ---------------------------------------------------------------------------
// Floppy
// ---------------------------------------------------------------------------

/// An in-memory floppy: per-track buffers for each side.
#[derive(Debug, Clone, PartialEq)]
pub struct Floppy {
    /// Indexed `[track][side]`.
    tracks: Vec<Vec<Track>>,
    write_protected: bool,
}

impl Floppy {
    /// An unformatted floppy.
    #[must_use]
    pub fn blank(num_tracks: u8, sides: u8, double_density: bool) -> Self {
        let sides = sides.clamp(1, 2);
        let num_tracks = num_tracks.min(MAX_TRACKS);
        let tracks = (0..num_tracks)
            .map(|_| (0..sides).map(|_| Track::blank(double_density)).collect())
            .collect();
        Self {
            tracks,
            write_protected: false,
        }
    }

    /// A formatted floppy with the standard sector layout: 256-byte
    /// sectors numbered from 1, 10 per track in single density or 18 in
    /// double density, zero-filled, with valid address and data CRCs.
    #[must_use]
    pub fn formatted(num_tracks: u8, sides: u8, double_density: bool) -> Self {
        let sides = sides.clamp(1, 2);
        let num_tracks = num_tracks.min(MAX_TRACKS);
        let mut tracks = Vec::with_capacity(num_tracks as usize);
        for t in 0..num_tracks {
            let mut per_side = Vec::with_capacity(sides as usize);
            for s in 0..sides {
                per_side.push(if double_density {
                    format_track_dd(t, s)
                } else {
                    format_track_sd(t, s)
                });
            }
            tracks.push(per_side);
        }
        Self {
            tracks,
            write_protected: false,
        }
    }

    #[must_use]
    pub fn track(&self, track: u8, side_one: bool) -> Option<&Track> {
        self.tracks
            .get(track as usize)?
            .get(usize::from(side_one))
    }

    pub fn track_mut(&mut self, track: u8, side_one: bool) -> Option<&mut Track> {
        self.tracks
            .get_mut(track as usize)?
            .get_mut(usize::from(side_one))
    }

    #[must_use]
    pub fn num_tracks(&self) -> u8 {
        self.tracks.len() as u8
    }

    #[must_use]
    pub fn num_sides(&self) -> u8 {
        self.tracks.first().map_or(0, |t| t.len() as u8)
    }

    #[must_use]
    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    pub fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_bool(self.write_protected);
        w.write_u8(self.num_tracks());
        w.write_u8(self.num_sides());
        for per_side in &self.tracks {
            for track in per_side {
                track.save_state(w);
            }
        }
    }

    pub fn load_state(r: &mut SnapshotReader) -> Result<Self, String> {
        let write_protected = r.read_bool("floppy write protect")?;
        let num_tracks = r.read_u8("floppy track count")?;
        let sides = r.read_u8("floppy side count")?;
        if sides == 0 || sides > 2 {
            return Err(format!("floppy side count out of range: {sides}"));
        }
        let mut tracks = Vec::with_capacity(num_tracks as usize);
        for _ in 0..num_tracks {
            let mut per_side = Vec::with_capacity(sides as usize);
            for _ in 0..sides {
                per_side.push(Track::load_state(r)?);
            }
            tracks.push(per_side);
        }
        Ok(Self {
            tracks,
            write_protected,
        })
    }
}

// ---------------------------------------------------------------------------
// Drive
// ---------------------------------------------------------------------------

/// One drive bay: head position, write protection, and whatever floppy
/// is loaded.
#[derive(Debug, Default, Clone)]
pub struct DriveState {
    pub physical_track: u8,
    pub write_protected: bool,
    pub floppy: Option<Floppy>,
}

impl DriveState {
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.floppy.is_some()
    }

    pub fn save_state(&self, w: &mut SnapshotWriter) {
        w.write_u8(self.physical_track);
        w.write_bool(self.write_protected);
        w.write_bool(self.floppy.is_some());
        if let Some(floppy) = &self.floppy {
            floppy.save_state(w);
        }
    }

    pub fn load_state(r: &mut SnapshotReader) -> Result<Self, String> {
        let physical_track = r.read_u8("drive physical track")?;
        let write_protected = r.read_bool("drive write protect")?;
        let loaded = r.read_bool("drive loaded")?;
        let floppy = if loaded {
            Some(Floppy::load_state(r)?)
        } else {
            None
        };
        Ok(Self {
            physical_track,
            write_protected,
            floppy,
        })
    }
}

// ---------------------------------------------------------------------------
// Standard format layout
// ---------------------------------------------------------------------------

fn format_track_dd(track_num: u8, side: u8) -> Track {
    let mut data = Vec::with_capacity(STANDARD_TRACK_LENGTH_DD);
    let mut idams = Vec::new();

    data.extend(std::iter::repeat_n(0x4E, 60)); // pre-index gap

    for sector in 1..=SECTORS_PER_TRACK_DD {
        data.extend(std::iter::repeat_n(0x00, 12));
        data.extend(std::iter::repeat_n(0xA1, 3));
        idams.push(Idam {
            offset: data.len() as u32,
            double_density: true,
        });
        let header = [0xFE, track_num, side, sector, 0x01];
        data.extend_from_slice(&header);
        let crc = crc::update_all(crc::CRC_RESET_A1_A1_A1, &header);
        data.push((crc >> 8) as u8);
        data.push(crc as u8);

        data.extend(std::iter::repeat_n(0x4E, 22));
        data.extend(std::iter::repeat_n(0x00, 12));
        data.extend(std::iter::repeat_n(0xA1, 3));
        data.push(0xFB);
        let mut crc = crc::update(crc::CRC_RESET_A1_A1_A1, 0xFB);
        for _ in 0..STANDARD_SECTOR_LENGTH {
            data.push(0x00);
            crc = crc::update(crc, 0x00);
        }
        data.push((crc >> 8) as u8);
        data.push(crc as u8);
        data.extend(std::iter::repeat_n(0x4E, 24));
    }

    data.resize(STANDARD_TRACK_LENGTH_DD, 0x4E);
    Track::from_parts(data, idams)
}

fn format_track_sd(track_num: u8, side: u8) -> Track {
    // Build the logical byte stream, then double every byte on-media.
    let mut logical = Vec::with_capacity(STANDARD_TRACK_LENGTH_SD / 2);
    let mut idam_logical = Vec::new();

    logical.extend(std::iter::repeat_n(0xFF, 16)); // pre-index gap

    for sector in 1..=SECTORS_PER_TRACK_SD {
        logical.extend(std::iter::repeat_n(0x00, 6));
        idam_logical.push(logical.len());
        let header = [0xFE, track_num, side, sector, 0x01];
        logical.extend_from_slice(&header);
        let crc = crc::update_all(crc::CRC_RESET, &header);
        logical.push((crc >> 8) as u8);
        logical.push(crc as u8);

        logical.extend(std::iter::repeat_n(0xFF, 11));
        logical.extend(std::iter::repeat_n(0x00, 6));
        logical.push(0xFB);
        let mut crc = crc::update(crc::CRC_RESET, 0xFB);
        for _ in 0..STANDARD_SECTOR_LENGTH {
            logical.push(0x00);
            crc = crc::update(crc, 0x00);
        }
        logical.push((crc >> 8) as u8);
        logical.push(crc as u8);
        logical.extend(std::iter::repeat_n(0xFF, 10));
    }

    let mut data = Vec::with_capacity(STANDARD_TRACK_LENGTH_SD);
    for &b in &logical {
        data.push(b);
        data.push(b);
    }
    data.resize(STANDARD_TRACK_LENGTH_SD, 0xFF);

    let idams = idam_logical
        .into_iter()
        .map(|pos| Idam {
            offset: (pos * 2) as u32,
            double_density: false,
        })
        .collect();
    Track::from_parts(data, idams)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_density_reads_scrub_low_bit() {
        let mut track = Track::blank(false);
        track.write_byte(100, false, 0xAB);
        assert_eq!(track.read_byte(100, false), 0xAB);
        assert_eq!(track.read_byte(101, false), 0xAB); // doubled cell
        assert_eq!(track.data()[100], 0xAB);
        assert_eq!(track.data()[101], 0xAB);
    }

    #[test]
    fn double_density_writes_single_cell() {
        let mut track = Track::blank(true);
        track.write_byte(100, true, 0xAB);
        assert_eq!(track.data()[100], 0xAB);
        assert_eq!(track.data()[101], 0x00);
    }

    #[test]
    fn idam_lookup_requires_matching_density() {
        let mut track = Track::blank(true);
        track.mark_idam(200, true);
        assert!(track.has_idam_at(200, true));
        assert!(!track.has_idam_at(200, false));
        assert!(!track.has_idam_at(202, true));
    }

    #[test]
    fn overwriting_an_idam_removes_it() {
        let mut track = Track::blank(true);
        track.mark_idam(200, true);
        track.write_byte(200, true, 0x4E);
        assert!(!track.has_idam_at(200, true));
    }

    #[test]
    fn formatted_dd_geometry() {
        let floppy = Floppy::formatted(40, 1, true);
        assert_eq!(floppy.num_tracks(), 40);
        let track = floppy.track(5, false).expect("track 5");
        assert_eq!(track.len(), STANDARD_TRACK_LENGTH_DD);
        assert_eq!(track.idams().len(), usize::from(SECTORS_PER_TRACK_DD));
    }

    #[test]
    fn formatted_sd_geometry() {
        let floppy = Floppy::formatted(40, 1, false);
        let track = floppy.track(0, false).expect("track 0");
        assert_eq!(track.len(), STANDARD_TRACK_LENGTH_SD);
        assert_eq!(track.idams().len(), usize::from(SECTORS_PER_TRACK_SD));
        // Every IDAM offset is even (doubled cells).
        assert!(track.idams().iter().all(|i| i.offset % 2 == 0));
    }

    #[test]
    fn formatted_dd_header_crc_is_valid() {
        let floppy = Floppy::formatted(40, 1, true);
        let track = floppy.track(12, false).expect("track 12");
        let idam = track.idams()[0];
        let base = idam.offset as usize;

        let mut crc = crc::CRC_RESET_A1_A1_A1;
        for i in 0..5 {
            crc = crc::update(crc, track.read_byte(base + i, true));
        }
        let stored = u16::from(track.read_byte(base + 5, true)) << 8
            | u16::from(track.read_byte(base + 6, true));
        assert_eq!(crc, stored);
        assert_eq!(track.read_byte(base + 1, true), 12); // track byte
    }

    #[test]
    fn formatted_sd_header_crc_is_valid() {
        let floppy = Floppy::formatted(40, 1, false);
        let track = floppy.track(3, false).expect("track 3");
        let idam = track.idams()[2];
        let base = idam.offset as usize;

        let mut crc = crc::CRC_RESET;
        for i in 0..5 {
            crc = crc::update(crc, track.read_byte(base + i * 2, false));
        }
        let stored = u16::from(track.read_byte(base + 10, false)) << 8
            | u16::from(track.read_byte(base + 12, false));
        assert_eq!(crc, stored);
        assert_eq!(track.read_byte(base + 6, false), 3); // sector byte
    }

    #[test]
    fn floppy_snapshot_round_trip() {
        let mut floppy = Floppy::formatted(2, 2, true);
        floppy.set_write_protected(true);
        floppy
            .track_mut(1, true)
            .expect("track")
            .write_byte(500, true, 0x5A);

        let mut w = SnapshotWriter::new();
        floppy.save_state(&mut w);
        let bytes = w.into_bytes();
        let restored = Floppy::load_state(&mut SnapshotReader::new(&bytes)).expect("load");
        assert_eq!(restored, floppy);
    }
}
