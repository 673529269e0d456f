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

    read.rs

    The track reader: a whole-track fast path for contiguously-numbered
    tracks, a per-sector fallback, and folding of repeated bad reads into
    per-sector evidence.
*/

use anyhow::Result;

use crate::disk::{SectorStatus, Track, TrackStatus};
use crate::fdc::{FdcBackend, FloppyDrive};

#[derive(Copy, Clone, Debug, Default)]
pub struct ReadOptions {
    /// This is a retry over an already-acquired image: skip clean tracks
    /// and never trust the whole-track fast path.
    pub retry_pass: bool,
    /// Do not read sectors with this logical ID at all.
    pub ignore_sector: Option<u8>,
}

/// If every logical sector ID on the track forms one contiguous run, the
/// whole track can go in a single READ-DATA command. Returns the lowest ID.
fn contiguous_base(track: &Track) -> Option<u8> {
    let first = track.sectors.first()?;
    let mut ids: Vec<u8> = track.sectors.iter().map(|s| s.log_sector).collect();
    ids.sort_unstable();
    let lo = ids[0];

    let contiguous = ids
        .iter()
        .enumerate()
        .all(|(i, &id)| id as usize == lo as usize + i);
    // A single read command also carries a single logical cylinder/head
    // for the whole transfer.
    let uniform = track
        .sectors
        .iter()
        .all(|s| s.log_cyl == first.log_cyl && s.log_head == first.log_head);

    (contiguous && uniform).then_some(lo)
}

/// Read every sector of a probed (or layout-guessed) track, accumulating
/// evidence on failures. Returns true when every non-ignored sector ended
/// up GOOD.
pub fn read_track<B: FdcBackend>(
    drive: &mut FloppyDrive<B>,
    seek_cyl: u8,
    track: &mut Track,
    options: &ReadOptions,
) -> Result<bool> {
    debug_assert!(track.status != TrackStatus::Unknown);
    let mode = track.data_mode.expect("reading an unprobed track");
    let size_code = track.sector_size_code.expect("reading an unprobed track");
    let sector_size = track.sector_bytes().unwrap();

    if options.retry_pass && track.all_sectors_good() {
        return Ok(true);
    }

    if !options.retry_pass {
        if let Some(base) = contiguous_base(track) {
            if read_whole_track(drive, seek_cyl, track, base, sector_size)? {
                return Ok(true);
            }
            log::info!(
                "read_track(): {}: whole-track read failed, falling back to per-sector",
                track
            );
        } else if !track.sectors.is_empty() {
            log::info!(
                "read_track(): {}: non-contiguous sector numbering, reading sector by sector",
                track
            );
        }
    }

    let mut all_ok = true;
    for i in 0..track.sectors.len() {
        let (log_cyl, log_head, log_sector, status) = {
            let s = &track.sectors[i];
            (s.log_cyl, s.log_head, s.log_sector, s.status)
        };

        if Some(log_sector) == options.ignore_sector {
            continue;
        }
        if status == SectorStatus::Good {
            continue;
        }

        let mut buf = vec![0u8; sector_size];
        let result = drive.read(
            seek_cyl,
            track.phys_head,
            mode,
            log_cyl,
            log_head,
            log_sector,
            size_code,
            &mut buf,
        )?;

        let sector = &mut track.sectors[i];
        if result.ok {
            sector.add_good_read(buf, result.deleted_mark());
            if sector.deleted {
                log::info!(
                    "read_track(): {}: sector {} carries a deleted data mark",
                    track,
                    log_sector
                );
            }
        } else if result.data_crc_only() {
            // The bytes made it across with a bad checksum: keep them as
            // one more piece of evidence for this sector.
            sector.add_bad_read(buf);
            let num_datas = sector.datas.len();
            all_ok = false;
            log::debug!(
                "read_track(): {}: sector {} data CRC error ({} distinct readings)",
                track,
                log_sector,
                num_datas
            );
        } else {
            all_ok = false;
            log::debug!(
                "read_track(): {}: sector {} unreadable (ST0 {:02X} ST1 {:02X} ST2 {:02X})",
                track,
                log_sector,
                result.st0,
                result.st1,
                result.st2
            );
        }
    }

    Ok(all_ok)
}

/// Transfer the full track in one command and split the buffer over the
/// sectors. Any failure leaves the track untouched.
fn read_whole_track<B: FdcBackend>(
    drive: &mut FloppyDrive<B>,
    seek_cyl: u8,
    track: &mut Track,
    base: u8,
    sector_size: usize,
) -> Result<bool> {
    let mode = track.data_mode.unwrap();
    let size_code = track.sector_size_code.unwrap();
    let first = &track.sectors[0];
    let (log_cyl, log_head) = (first.log_cyl, first.log_head);

    let mut buf = vec![0u8; track.num_sectors() * sector_size];
    let result = drive.read(
        seek_cyl,
        track.phys_head,
        mode,
        log_cyl,
        log_head,
        base,
        size_code,
        &mut buf,
    )?;

    if !result.ok {
        return Ok(false);
    }

    for sector in track.sectors.iter_mut() {
        let offset = (sector.log_sector - base) as usize * sector_size;
        sector.datas.clear();
        sector.add_good_read(buf[offset..offset + sector_size].to_vec(), false);
    }

    Ok(true)
}
