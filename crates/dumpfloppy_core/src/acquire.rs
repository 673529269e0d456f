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

    acquire.rs

    The acquisition driver: geometry detection, per-track orchestration
    with layout inheritance and retries, resume from an existing image, and
    track-by-track IMD output.
*/

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::PathBuf,
};

use anyhow::{anyhow, bail, Context, Result};
use time::{macros::format_description, OffsetDateTime};

use crate::disk::{Disk, SectorStatus, TrackStatus};
use crate::fdc::{FdcBackend, FloppyDrive};
use crate::imd;
use crate::probe::{probe_disk, probe_track, Geometry};
use crate::read::{read_track, ReadOptions};

/// Fallback cylinder count when neither the caller nor the drive itself
/// supplies one.
const DEFAULT_CYLS: usize = 80;

/// Everything the acquisition driver needs, bound once at startup. There
/// is deliberately no other state shared across a run.
#[derive(Clone, Debug)]
pub struct AcquireConfig {
    pub drive_n: u8,
    /// Forced cylinder count, overriding the drive's own parameters.
    pub tracks: Option<usize>,
    pub image_path: PathBuf,
    /// Probe every track instead of inheriting layout from its neighbour.
    pub always_probe: bool,
    /// Resume from an existing image, retrying its bad sectors.
    pub retry: bool,
    /// Never read sectors with this logical ID.
    pub ignore_sector: Option<u8>,
    /// Attempts per track before moving on.
    pub max_tries: u32,
    /// Extra bytes for the image comment (from standard input).
    pub extra_comment: Option<Vec<u8>>,
}

fn comment_stamp() -> String {
    let format = format_description!("[day]/[month]/[year] [hour]:[minute]:[second]");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&format).unwrap_or_default()
}

/// Capture a whole disk into an IMD image.
pub fn acquire<B: FdcBackend>(drive: &mut FloppyDrive<B>, config: &AcquireConfig) -> Result<()> {
    let image_exists = config.image_path.exists();
    let resuming = config.retry;

    if image_exists && !resuming {
        bail!(
            "image {} already exists; use -r to retry its bad sectors",
            config.image_path.display()
        );
    }
    if !image_exists && resuming {
        bail!(
            "cannot resume: image {} does not exist",
            config.image_path.display()
        );
    }

    drive.reset()?;
    // Recalibrate twice: one pass of 80 step pulses is not enough for a
    // drive parked past cylinder 80.
    drive.recalibrate()?;
    if !drive.recalibrate()? {
        bail!("drive {} will not recalibrate to track 0", drive.drive_n());
    }

    let mut disk;
    if resuming {
        let file = File::open(&config.image_path)
            .with_context(|| format!("opening {}", config.image_path.display()))?;
        disk = imd::read_disk(&mut BufReader::new(file))
            .map_err(|e| anyhow!("reading {}: {}", config.image_path.display(), e))?;
        log::info!(
            "acquire(): resuming from {}: {} cylinders, {} heads",
            config.image_path.display(),
            disk.num_phys_cyls,
            disk.num_phys_heads
        );
    } else {
        disk = Disk::new();
        let mut comment =
            format!("dumpfloppy {}: {}\r\n", crate::VERSION, comment_stamp()).into_bytes();
        if let Some(extra) = &config.extra_comment {
            comment.extend_from_slice(extra);
        }
        disk.comment = comment;
    }

    if let Some(tracks) = config.tracks {
        disk.num_phys_cyls = tracks;
    } else if !resuming {
        disk.num_phys_cyls = match drive.drive_cyls()? {
            Some(cyls) => cyls as usize,
            None => {
                log::warn!(
                    "acquire(): drive reports no parameters; assuming {} cylinders",
                    DEFAULT_CYLS
                );
                DEFAULT_CYLS
            }
        };
    }

    let geometry = if resuming {
        // The image fixes the geometry; probing again would fight it.
        Geometry {
            cyl_scale: 1,
            separate_sides: false,
        }
    } else {
        probe_disk(drive, &mut disk)?
    };

    let file = File::create(&config.image_path)
        .with_context(|| format!("creating {}", config.image_path.display()))?;
    let mut out = BufWriter::new(file);

    acquire_disk(drive, config, &mut disk, resuming, geometry, &mut out)?;

    out.flush()?;
    Ok(())
}

/// The per-track acquisition loop, writing each finished track to `out`
/// and flushing so an aborted run still leaves a valid IMD prefix.
fn acquire_disk<B: FdcBackend, W: Write>(
    drive: &mut FloppyDrive<B>,
    config: &AcquireConfig,
    disk: &mut Disk,
    resuming: bool,
    geometry: Geometry,
    out: &mut W,
) -> Result<()> {
    imd::write_header(out, &disk.comment).map_err(|e| anyhow!("writing image header: {}", e))?;
    out.flush()?;

    let mut tracks_written = 0usize;
    let mut tracks_lost = 0usize;
    let mut bad_sectors = 0usize;

    for cyl in 0..disk.num_phys_cyls {
        for head in 0..disk.num_phys_heads {
            let seek_cyl = (cyl * geometry.cyl_scale) as u8;

            if !config.always_probe
                && !resuming
                && cyl > 0
                && disk.track(cyl, head).status == TrackStatus::Unknown
                && disk.track(cyl - 1, head).status != TrackStatus::Unknown
            {
                let src = disk.track(cyl - 1, head).clone();
                src.copy_layout_to(disk.track_mut(cyl, head));
            }

            let mut all_ok = false;
            for attempt in 0..config.max_tries {
                let track = disk.track_mut(cyl, head);

                if track.status == TrackStatus::Unknown && !probe_track(drive, seek_cyl, track)? {
                    continue;
                }

                // Anything past the first attempt is a retry: the
                // whole-track fast path must not run again, or it would
                // wipe the evidence gathered so far.
                let read_options = ReadOptions {
                    retry_pass: resuming || attempt > 0,
                    ignore_sector: config.ignore_sector,
                };

                if read_track(drive, seek_cyl, track, &read_options)? {
                    all_ok = true;
                    break;
                }

                if track.status == TrackStatus::Guessed {
                    log::info!(
                        "acquire_disk(): {}: guessed layout did not read; reprobing",
                        track
                    );
                    track.forget_layout();
                }

                log::debug!(
                    "acquire_disk(): {}: attempt {} of {} incomplete",
                    disk.track(cyl, head),
                    attempt + 1,
                    config.max_tries
                );
            }

            let track = disk.track(cyl, head);
            if track.status == TrackStatus::Unknown {
                log::warn!("acquire_disk(): {}: unreadable, no track record", track);
                tracks_lost += 1;
            } else {
                if !all_ok {
                    let bad = track
                        .sectors
                        .iter()
                        .filter(|s| s.status != SectorStatus::Good)
                        .count();
                    bad_sectors += bad;
                    log::warn!(
                        "acquire_disk(): {}: {} of {} sectors not clean",
                        track,
                        bad,
                        track.num_sectors()
                    );
                }
                imd::write_track(out, track)
                    .map_err(|e| anyhow!("writing track record: {}", e))?;
                tracks_written += 1;
            }
            out.flush()?;
        }
    }

    log::info!(
        "acquire_disk(): {} tracks written, {} unreadable, {} sectors with errors",
        tracks_written,
        tracks_lost,
        bad_sectors
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_mode::{DataMode, DATA_MODES};
    use crate::fdc::mock::{MockFdc, MockReadOutcome, MockTrack};
    use crate::fdc::SectorId;

    fn mfm250() -> &'static DataMode {
        &DATA_MODES[0]
    }

    fn ids(log_cyl: u8, log_head: u8, sectors: &[u8]) -> Vec<SectorId> {
        sectors
            .iter()
            .map(|&s| SectorId {
                log_cyl,
                log_head,
                log_sector: s,
                size_code: 2,
            })
            .collect()
    }

    fn config(path: &str) -> AcquireConfig {
        AcquireConfig {
            drive_n: 0,
            tracks: None,
            image_path: PathBuf::from(path),
            always_probe: false,
            retry: false,
            ignore_sector: None,
            max_tries: 10,
            extra_comment: None,
        }
    }

    fn temp_image(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dumpfloppy_{}_{}.imd", name, std::process::id()))
    }

    /// Build a mock with `cyls` cylinders of 5 x 512-byte sectors on one
    /// head.
    fn single_sided_mock(cyls: u8) -> MockFdc {
        let mut fdc = MockFdc::new();
        for cyl in 0..cyls {
            fdc.add_track(
                cyl,
                0,
                MockTrack::filled(mfm250(), ids(cyl, 0, &[1, 2, 3, 4, 5]), 512),
            );
        }
        fdc.cyls = Some(cyls);
        fdc
    }

    #[test]
    fn acquires_single_sided_disk_end_to_end() {
        let path = temp_image("single_sided");
        let fdc = single_sided_mock(4);
        let mut drive = FloppyDrive::new(fdc, 0);

        let mut cfg = config(path.to_str().unwrap());
        cfg.tracks = Some(4);
        acquire(&mut drive, &cfg).unwrap();

        // The controller was reset before any track was touched.
        assert!(drive.backend_mut().resets >= 1);

        let disk = imd::read_disk(&mut BufReader::new(File::open(&path).unwrap())).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(String::from_utf8_lossy(&disk.comment).starts_with("dumpfloppy "));
        assert!(disk.comment.ends_with(b"\r\n"));
        assert_eq!(disk.num_phys_cyls, 4);
        assert_eq!(disk.num_phys_heads, 1);
        for cyl in 0..4 {
            let track = disk.track(cyl, 0);
            assert_eq!(track.status, TrackStatus::Probed);
            assert_eq!(track.num_sectors(), 5);
            assert!(track.all_sectors_good());
        }
        assert!(disk.invariant_holds());
    }

    #[test]
    fn inherited_layout_skips_probing() {
        let fdc = single_sided_mock(4);
        let mut drive = FloppyDrive::new(fdc, 0);

        let mut disk = Disk::new();
        disk.num_phys_cyls = 4;
        disk.num_phys_heads = 1;
        let geometry = Geometry {
            cyl_scale: 1,
            separate_sides: false,
        };

        let mut out = Vec::new();
        let cfg = config("/nonexistent");
        acquire_disk(&mut drive, &cfg, &mut disk, false, geometry, &mut out).unwrap();

        // One probe for cylinder 0 only: a failed alignment read, one per
        // mode attempt, and 5 sectors x 3 revolutions of collection. The
        // remaining cylinders inherit.
        let id_reads = drive.backend_mut().id_reads;
        assert!(
            id_reads <= 20,
            "inherited tracks should not reprobe (got {} ID reads)",
            id_reads
        );

        let parsed = imd::read_disk(&mut &out[..]).unwrap();
        for cyl in 0..4 {
            let track = parsed.track(cyl, 0);
            assert!(track.all_sectors_good());
            // The inherited layout follows the physical cylinder.
            assert_eq!(track.sectors[0].log_cyl, cyl as u8);
        }
    }

    #[test]
    fn always_probe_reprobes_every_cylinder() {
        let fdc = single_sided_mock(4);
        let mut drive = FloppyDrive::new(fdc, 0);

        let mut disk = Disk::new();
        disk.num_phys_cyls = 4;
        disk.num_phys_heads = 1;
        let geometry = Geometry {
            cyl_scale: 1,
            separate_sides: false,
        };

        let mut out = Vec::new();
        let mut cfg = config("/nonexistent");
        cfg.always_probe = true;
        acquire_disk(&mut drive, &cfg, &mut disk, false, geometry, &mut out).unwrap();

        // Every cylinder paid the full probe cost (16 ID reads each, see
        // inherited_layout_skips_probing for the breakdown).
        assert_eq!(drive.backend_mut().id_reads, 4 * 16);

        let parsed = imd::read_disk(&mut &out[..]).unwrap();
        for cyl in 0..4 {
            assert!(parsed.track(cyl, 0).all_sectors_good());
        }
    }

    #[test]
    fn wrong_guess_forces_reprobe() {
        // Cylinder 1 is numbered 11..15 instead of the 1..5 the guess
        // expects; the guessed read fails and the reprobe recovers it.
        let mut fdc = MockFdc::new();
        fdc.add_track(0, 0, MockTrack::filled(mfm250(), ids(0, 0, &[1, 2, 3, 4, 5]), 512));
        fdc.add_track(
            1,
            0,
            MockTrack::filled(mfm250(), ids(1, 0, &[11, 12, 13, 14, 15]), 512),
        );
        let mut drive = FloppyDrive::new(fdc, 0);

        let mut disk = Disk::new();
        disk.num_phys_cyls = 2;
        disk.num_phys_heads = 1;
        let geometry = Geometry {
            cyl_scale: 1,
            separate_sides: false,
        };

        let mut out = Vec::new();
        let cfg = config("/nonexistent");
        acquire_disk(&mut drive, &cfg, &mut disk, false, geometry, &mut out).unwrap();

        let parsed = imd::read_disk(&mut &out[..]).unwrap();
        let track = parsed.track(1, 0);
        let sector_ids: Vec<u8> = track.sectors.iter().map(|s| s.log_sector).collect();
        assert_eq!(sector_ids, vec![11, 12, 13, 14, 15]);
        assert!(track.all_sectors_good());
    }

    #[test]
    fn doublestep_seeks_even_cylinders() {
        // Media only exists at even seek positions; with cyl_scale 2 the
        // model stays dense.
        let mut fdc = MockFdc::new();
        for cyl in 0..3u8 {
            fdc.add_track(
                cyl * 2,
                0,
                MockTrack::filled(mfm250(), ids(cyl, 0, &[1, 2, 3]), 512),
            );
        }
        let mut drive = FloppyDrive::new(fdc, 0);

        let mut disk = Disk::new();
        disk.num_phys_cyls = 3;
        disk.num_phys_heads = 1;
        let geometry = Geometry {
            cyl_scale: 2,
            separate_sides: false,
        };

        let mut out = Vec::new();
        let cfg = config("/nonexistent");
        acquire_disk(&mut drive, &cfg, &mut disk, false, geometry, &mut out).unwrap();

        let parsed = imd::read_disk(&mut &out[..]).unwrap();
        assert_eq!(parsed.num_phys_cyls, 3);
        for cyl in 0..3 {
            let track = parsed.track(cyl, 0);
            assert!(track.all_sectors_good());
            assert_eq!(track.sectors[0].log_cyl, cyl as u8);
        }
    }

    #[test]
    fn unreadable_track_is_skipped_not_fatal() {
        // No media at cylinder 1.
        let mut fdc = MockFdc::new();
        fdc.add_track(0, 0, MockTrack::filled(mfm250(), ids(0, 0, &[1, 2, 3, 4, 5]), 512));
        fdc.add_track(2, 0, MockTrack::filled(mfm250(), ids(2, 0, &[1, 2, 3, 4, 5]), 512));
        let mut drive = FloppyDrive::new(fdc, 0);

        let mut disk = Disk::new();
        disk.num_phys_cyls = 3;
        disk.num_phys_heads = 1;
        let geometry = Geometry {
            cyl_scale: 1,
            separate_sides: false,
        };

        let mut out = Vec::new();
        let mut cfg = config("/nonexistent");
        cfg.max_tries = 2;
        acquire_disk(&mut drive, &cfg, &mut disk, false, geometry, &mut out).unwrap();

        let parsed = imd::read_disk(&mut &out[..]).unwrap();
        assert_eq!(parsed.track(0, 0).status, TrackStatus::Probed);
        assert_eq!(parsed.track(1, 0).status, TrackStatus::Unknown);
        assert_eq!(parsed.track(2, 0).status, TrackStatus::Probed);
    }

    #[test]
    fn resume_retries_only_bad_sectors() {
        let path = temp_image("resume");

        // First run: sector 3 of cylinder 0 always fails with a CRC error.
        let mut fdc = single_sided_mock(4);
        let bad = vec![0xBD; 512];
        for _ in 0..16 {
            fdc.track_mut(0, 0)
                .push_outcome(3, MockReadOutcome::CrcError(bad.clone()));
        }
        let mut drive = FloppyDrive::new(fdc, 0);
        let mut cfg = config(path.to_str().unwrap());
        cfg.tracks = Some(4);
        cfg.max_tries = 3;
        acquire(&mut drive, &cfg).unwrap();

        let disk = imd::read_disk(&mut BufReader::new(File::open(&path).unwrap())).unwrap();
        let sector = &disk.track(0, 0).sectors[2];
        assert_eq!(sector.status, SectorStatus::Bad);
        assert_eq!(sector.datas.get(&bad), Some(&3));

        // Second run: the medium reads cleanly now; resume with -r.
        let fdc = single_sided_mock(4);
        let mut drive = FloppyDrive::new(fdc, 0);
        cfg.retry = true;
        acquire(&mut drive, &cfg).unwrap();

        let disk = imd::read_disk(&mut BufReader::new(File::open(&path).unwrap())).unwrap();
        std::fs::remove_file(&path).unwrap();

        let sector = &disk.track(0, 0).sectors[2];
        assert_eq!(sector.status, SectorStatus::Good);
        // The bad evidence survives alongside the dominating clean read.
        assert_eq!(sector.datas.get(&bad), Some(&3));
        assert_eq!(sector.datas.get(&vec![3u8; 512]), Some(&u32::MAX));

        // Very few ID reads on resume: nothing needed reprobing.
        assert_eq!(drive.backend_mut().id_reads, 0);
    }

    #[test]
    fn refuses_to_overwrite_without_retry() {
        let path = temp_image("no_overwrite");
        std::fs::write(&path, b"existing\x1A").unwrap();

        let fdc = single_sided_mock(1);
        let mut drive = FloppyDrive::new(fdc, 0);
        let cfg = config(path.to_str().unwrap());
        let err = acquire(&mut drive, &cfg).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn refuses_to_resume_missing_image() {
        let fdc = single_sided_mock(1);
        let mut drive = FloppyDrive::new(fdc, 0);
        let mut cfg = config("/nonexistent/dumpfloppy_resume_missing.imd");
        cfg.retry = true;
        assert!(acquire(&mut drive, &cfg).is_err());
    }

    #[test]
    fn recalibrate_failure_is_fatal() {
        let path = temp_image("recal");
        let mut fdc = single_sided_mock(1);
        fdc.recalibrate_ok = false;
        let mut drive = FloppyDrive::new(fdc, 0);
        let cfg = config(path.to_str().unwrap());
        let err = acquire(&mut drive, &cfg).unwrap_err();
        assert!(err.to_string().contains("recalibrate"));
    }
}
