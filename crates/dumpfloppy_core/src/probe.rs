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

    probe.rs

    Track and disk probing: discover a track's data mode, sector size and
    sector ID sequence, and infer whole-disk geometry (sides, doublestep)
    from cylinder 2.
*/

use anyhow::{bail, Result};

use crate::data_mode::DATA_MODES;
use crate::disk::{Disk, Sector, Track, TrackStatus, MAX_SECS};
use crate::fdc::{FdcBackend, FloppyDrive, SectorId};

/// Upper bound on collected IDs per probe. A full revolution of the
/// densest layout fits well inside this; needing more means the IDs never
/// settled into a cycle.
pub const MAX_PROBE_IDS: usize = 100;

/// How many times every observed logical sector must be seen before the ID
/// sequence is considered to cover a whole revolution.
const MIN_SEEN: u32 = 3;

/// Probe one track: discover its data mode and sector ID layout.
///
/// On success the track is PROBED, its `sectors` hold the logical IDs in
/// physical order starting at the index hole, and true is returned. An
/// unreadable or unparseable track leaves the track UNKNOWN and returns
/// false; only transport faults and impossible media (mixed sector sizes)
/// are errors.
pub fn probe_track<B: FdcBackend>(
    drive: &mut FloppyDrive<B>,
    seek_cyl: u8,
    track: &mut Track,
) -> Result<bool> {
    debug_assert_eq!(track.status, TrackStatus::Unknown);

    // The controller's only index-hole synchronization: a failed READ-ID
    // waits out two index holes, so the next successful READ-ID reports
    // the first ID after the index. Issue a probe that is expected to fail
    // (a non-first mode) before the first real attempt; without this the
    // collected sequence is rotated by the disk's arbitrary position.
    let _ = drive.read_id(seek_cyl, track.phys_head, &DATA_MODES[1])?;

    // Mode discovery: the first mode whose READ-ID succeeds wins, and its
    // reply is the first collected ID (it directly follows a failure, so
    // it sits at the index hole).
    let mut found = None;
    for mode in DATA_MODES.iter() {
        if let Some(id) = drive.read_id(seek_cyl, track.phys_head, mode)? {
            found = Some((mode, id));
            break;
        }
    }

    let Some((mode, first_id)) = found else {
        log::debug!(
            "probe_track(): {}: no data mode succeeded; track unreadable",
            track
        );
        return Ok(false);
    };

    log::debug!("probe_track(): {}: data mode {}", track, mode);

    // ID collection: keep reading IDs until every logical sector seen so
    // far has come around MIN_SEEN times, guaranteeing at least one full
    // revolution was captured.
    let mut ids: Vec<SectorId> = Vec::with_capacity(MAX_PROBE_IDS);
    let mut seen = [0u32; MAX_SECS];

    ids.push(first_id);
    seen[first_id.log_sector as usize] += 1;

    loop {
        let complete = ids
            .iter()
            .all(|id| seen[id.log_sector as usize] >= MIN_SEEN);
        if complete {
            break;
        }
        if ids.len() >= MAX_PROBE_IDS {
            log::warn!(
                "probe_track(): {}: no repeating ID cycle within {} IDs",
                track,
                MAX_PROBE_IDS
            );
            return Ok(false);
        }

        let Some(id) = drive.read_id(seek_cyl, track.phys_head, mode)? else {
            log::warn!("probe_track(): {}: READ-ID stopped succeeding", track);
            return Ok(false);
        };

        if id.size_code != first_id.size_code {
            // All sectors in a track must be the same size; the IMD format
            // cannot represent anything else and the controller cannot
            // bulk-read it.
            bail!(
                "mixed sector sizes on {}: {} and {}",
                track,
                first_id.size_code,
                id.size_code
            );
        }

        seen[id.log_sector as usize] += 1;
        ids.push(id);
    }

    // Cycle extraction: the track length is the distance to the first
    // reappearance of the starting ID, provided the rest of the sequence
    // is consistent with that period.
    let Some(end_pos) = (1..ids.len()).find(|&p| ids[p].same_address(&ids[0])) else {
        log::warn!("probe_track(): {}: first ID never came around again", track);
        return Ok(false);
    };

    for (i, id) in ids.iter().enumerate().skip(end_pos) {
        if !id.same_address(&ids[i % end_pos]) {
            log::warn!(
                "probe_track(): {}: ID sequence does not repeat with period {}",
                track,
                end_pos
            );
            return Ok(false);
        }
    }

    track.data_mode = Some(mode);
    track.sector_size_code = Some(first_id.size_code);
    track.sectors = ids[..end_pos]
        .iter()
        .map(|id| Sector::new(id.log_cyl, id.log_head, id.log_sector))
        .collect();
    track.status = TrackStatus::Probed;

    log::info!(
        "probe_track(): {}: {} x {} byte sectors, {}",
        track,
        track.num_sectors(),
        track.sector_bytes().unwrap(),
        mode
    );

    Ok(true)
}

/// Whole-disk geometry inferred from probing cylinder 2.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Physical cylinders stepped per model cylinder: 2 when a 40-track
    /// disk sits in an 80-track drive.
    pub cyl_scale: usize,
    /// Both sides carry logical head 0 ("separate sides" numbering).
    pub separate_sides: bool,
}

/// Probe both sides of cylinder 2 and derive the disk's geometry. Cylinder
/// 0 is no use here: boot-track formats leave it oddly formatted, and
/// doublestepping is invisible at cylinder 0.
///
/// Updates `disk.num_phys_heads` (single-sided media) and halves
/// `disk.num_phys_cyls` when doublestepping is detected. The probed layouts
/// are scratch; the acquisition pass reprobes tracks in model coordinates.
pub fn probe_disk<B: FdcBackend>(drive: &mut FloppyDrive<B>, disk: &mut Disk) -> Result<Geometry> {
    const PROBE_CYL: u8 = 2;

    let mut side0 = Track::new(PROBE_CYL, 0);
    probe_track(drive, PROBE_CYL, &mut side0)?;

    let mut side1 = Track::new(PROBE_CYL, 1);
    if disk.num_phys_heads > 1 {
        probe_track(drive, PROBE_CYL, &mut side1)?;
    }

    let mut separate_sides = false;
    match (side0.status, side1.status) {
        (TrackStatus::Probed, TrackStatus::Probed) => {
            if side0.sectors[0].log_head == 0 && side1.sectors[0].log_head == 0 {
                log::info!("probe_disk(): both sides report logical head 0 (separate-sides numbering)");
                separate_sides = true;
            }
        }
        (TrackStatus::Probed, _) => {
            log::info!("probe_disk(): side 1 unreadable; treating disk as single-sided");
            disk.num_phys_heads = 1;
        }
        (_, TrackStatus::Probed) => {
            log::warn!("probe_disk(): side 0 of cylinder 2 unreadable, but side 1 probes");
        }
        _ => {
            bail!("cylinder 2 unreadable on either side");
        }
    }

    let probed_side = if side0.status == TrackStatus::Probed {
        &side0
    } else {
        &side1
    };
    finish_geometry(disk, probed_side, separate_sides)
}

fn finish_geometry(disk: &mut Disk, probed: &Track, separate_sides: bool) -> Result<Geometry> {
    let phys_cyl = probed.phys_cyl;
    let log_cyl = probed.sectors[0].log_cyl;
    let mut cyl_scale = 1;

    if log_cyl as usize * 2 == phys_cyl as usize {
        log::info!("probe_disk(): doublestepping detected (40-track disk in 80-track drive)");
        cyl_scale = 2;
        disk.num_phys_cyls /= 2;
    } else if log_cyl as usize == phys_cyl as usize * 2 {
        bail!("this looks like an 80-track disk in a 40-track drive; cannot read it");
    } else if log_cyl != phys_cyl {
        log::warn!(
            "probe_disk(): physical cylinder {} reports logical cylinder {}",
            phys_cyl,
            log_cyl
        );
    }

    Ok(Geometry {
        cyl_scale,
        separate_sides,
    })
}
