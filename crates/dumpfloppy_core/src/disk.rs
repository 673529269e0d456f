/*
    dumpfloppy
    https://github.com/dbalsom/dumpfloppy

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    disk.rs

    The in-memory disk model: per-sector multi-read evidence, per-track
    layout, and whole-disk geometry as discovered during acquisition or
    loaded from an IMD image.
*/

use std::fmt::Display;

use indexmap::IndexMap;

use crate::data_mode::DataMode;

/// Hard bounds of the IMD container and PC controller addressing. These are
/// container invariants, not tuning knobs.
pub const MAX_SECS: usize = 256;
pub const MAX_CYLS: usize = 256;
pub const MAX_HEADS: usize = 2;

/// Largest sector size code the controller accepts (16384 bytes).
pub const MAX_SECTOR_SIZE_CODE: u8 = 7;

/// Sector byte size for a controller size code: 128 * 2^code.
pub fn sector_bytes(size_code: u8) -> usize {
    128usize << size_code
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SectorStatus {
    /// No read of any kind has produced data for this sector.
    #[default]
    Missing,
    /// Only CRC-failed reads so far; `datas` holds every distinct reading.
    Bad,
    /// At least one clean read.
    Good,
}

/// One sector's logical identity and accumulated read evidence.
///
/// `datas` maps each distinct full-sector payload to the number of times it
/// was read. Insertion order is significant: the flattener identifies
/// entries by position when asking the operator to disambiguate, and the
/// IMD codec round-trips them in order, so this must be an insertion-ordered
/// map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sector {
    pub status: SectorStatus,
    pub log_cyl: u8,
    pub log_head: u8,
    pub log_sector: u8,
    pub deleted: bool,
    pub datas: IndexMap<Vec<u8>, u32>,
}

impl Sector {
    pub fn new(log_cyl: u8, log_head: u8, log_sector: u8) -> Self {
        Sector {
            log_cyl,
            log_head,
            log_sector,
            ..Default::default()
        }
    }

    /// Record a clean read. Evidence from earlier failed reads is kept, but
    /// the clean payload is entered with a saturated count so it always
    /// dominates selection.
    pub fn add_good_read(&mut self, data: Vec<u8>, deleted: bool) {
        let count = if self.datas.is_empty() { 1 } else { u32::MAX };
        self.datas.insert(data, count);
        self.status = SectorStatus::Good;
        self.deleted = deleted;
    }

    /// Record a CRC-failed read, folding repeats of the same payload into
    /// its count.
    pub fn add_bad_read(&mut self, data: Vec<u8>) {
        debug_assert!(self.status != SectorStatus::Good);
        self.datas
            .entry(data)
            .and_modify(|count| *count = count.saturating_add(1))
            .or_insert(1);
        self.status = SectorStatus::Bad;
    }

    /// Index of the entry in `datas` with the highest read count. This is
    /// the flattener's default choice for ambiguous sectors.
    pub fn best_data(&self) -> Option<usize> {
        self.datas
            .values()
            .enumerate()
            .max_by_key(|(_, count)| **count)
            .map(|(idx, _)| idx)
    }

    /// The sector invariant: evidence exists exactly when a read happened,
    /// and a deleted mark implies a read happened.
    pub fn invariant_holds(&self) -> bool {
        let evidence_ok = self.datas.is_empty() == (self.status == SectorStatus::Missing);
        let deleted_ok = !self.deleted || self.status != SectorStatus::Missing;
        evidence_ok && deleted_ok
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TrackStatus {
    #[default]
    Unknown,
    /// Layout inherited from a neighbouring track without direct evidence.
    Guessed,
    /// Layout confirmed by READ-ID probing (or restored from an image).
    Probed,
}

/// One physical track. `sectors` is ordered by physical position: the order
/// the sector IDs pass under the head, starting at the index hole.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Track {
    pub status: TrackStatus,
    pub data_mode: Option<&'static DataMode>,
    pub phys_cyl: u8,
    pub phys_head: u8,
    pub sector_size_code: Option<u8>,
    pub sectors: Vec<Sector>,
}

impl Track {
    pub fn new(phys_cyl: u8, phys_head: u8) -> Self {
        Track {
            phys_cyl,
            phys_head,
            ..Default::default()
        }
    }

    pub fn num_sectors(&self) -> usize {
        self.sectors.len()
    }

    /// Sector byte size shared by every sector of this track.
    pub fn sector_bytes(&self) -> Option<usize> {
        self.sector_size_code.map(sector_bytes)
    }

    pub fn all_sectors_good(&self) -> bool {
        !self.sectors.is_empty() && self.sectors.iter().all(|s| s.status == SectorStatus::Good)
    }

    /// Reset to a freshly-constructed track, keeping only the physical
    /// position. Used when a guessed layout turns out to be wrong and the
    /// track must be reprobed.
    pub fn forget_layout(&mut self) {
        *self = Track::new(self.phys_cyl, self.phys_head);
    }

    /// Inherit this track's layout onto `dest`, which must lie on the same
    /// head. Logical cylinder numbers are shifted by the physical cylinder
    /// difference; logical head and sector numbers carry over as-is. No
    /// sector data is copied; `dest` becomes a GUESSED track of MISSING
    /// sectors.
    pub fn copy_layout_to(&self, dest: &mut Track) {
        debug_assert_eq!(self.phys_head, dest.phys_head);
        let cyl_delta = dest.phys_cyl as i32 - self.phys_cyl as i32;

        dest.status = TrackStatus::Guessed;
        dest.data_mode = self.data_mode;
        dest.sector_size_code = self.sector_size_code;
        dest.sectors = self
            .sectors
            .iter()
            .map(|src| {
                Sector::new(
                    (src.log_cyl as i32 + cyl_delta) as u8,
                    src.log_head,
                    src.log_sector,
                )
            })
            .collect();
    }

    /// The track invariant: bounded sector count, uniform size code, and
    /// every sector's own invariant.
    pub fn invariant_holds(&self) -> bool {
        self.sectors.len() <= MAX_SECS
            && (self.status == TrackStatus::Unknown
                || (self.data_mode.is_some() && self.sector_size_code.is_some()))
            && self.sectors.iter().all(|s| s.invariant_holds())
    }
}

impl Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "phys cyl {} head {}", self.phys_cyl, self.phys_head)
    }
}

/// The whole disk: raw comment bytes plus a dense cylinder-by-head grid of
/// tracks. Tracks exist for the full grid from construction; geometry
/// fields bound which of them are meaningful.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Disk {
    pub comment: Vec<u8>,
    pub num_phys_cyls: usize,
    pub num_phys_heads: usize,
    pub tracks: Vec<Vec<Track>>,
}

impl Disk {
    pub fn new() -> Self {
        let tracks = (0..MAX_CYLS)
            .map(|cyl| {
                (0..MAX_HEADS)
                    .map(|head| Track::new(cyl as u8, head as u8))
                    .collect()
            })
            .collect();

        Disk {
            comment: Vec::new(),
            num_phys_cyls: 0,
            num_phys_heads: MAX_HEADS,
            tracks,
        }
    }

    pub fn track(&self, phys_cyl: usize, phys_head: usize) -> &Track {
        &self.tracks[phys_cyl][phys_head]
    }

    pub fn track_mut(&mut self, phys_cyl: usize, phys_head: usize) -> &mut Track {
        &mut self.tracks[phys_cyl][phys_head]
    }

    /// The disk invariant: every track sits at its own grid position.
    pub fn invariant_holds(&self) -> bool {
        self.num_phys_cyls <= MAX_CYLS
            && self.num_phys_heads <= MAX_HEADS
            && self.tracks.iter().enumerate().all(|(c, heads)| {
                heads
                    .iter()
                    .enumerate()
                    .all(|(h, t)| t.phys_cyl as usize == c && t.phys_head as usize == h)
            })
    }
}
