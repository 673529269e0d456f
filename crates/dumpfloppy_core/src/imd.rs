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

    imd.rs

    Reader and writer for the ImageDisk (IMD) 1.18 container, including the
    local extensions: multi-read evidence records (ANOTHER-FOLLOWS and
    HAS-COUNT sector data records) and the 1Mbps MFM track mode.
*/

use std::io::{Cursor, Read, Write};

use binrw::{binrw, BinRead, BinWrite};
use thiserror::Error;

use crate::data_mode::DataMode;
use crate::disk::{sector_bytes, Disk, Sector, SectorStatus, Track, TrackStatus, MAX_SECTOR_SIZE_CODE};

/// Terminates the comment block at the head of an IMD file.
pub const COMMENT_TERMINATOR: u8 = 0x1A;

/// Marks "variable sector sizes" in the size code field, a proposed IMD
/// extension this tool does not support.
const SIZE_CODE_VARIABLE: u8 = 0xFF;

const HEAD_FLAG_CYL_MAP: u8 = 0x80;
const HEAD_FLAG_HEAD_MAP: u8 = 0x40;
const HEAD_MASK: u8 = 0x03;

// Sector data record type bytes are a *sum* of these values, not a
// bitfield; decoding must subtract them in descending order.
const SDR_DATA: u8 = 0x01;
const SDR_HAS_COUNT: u8 = 0x10;
const SDR_ANOTHER_FOLLOWS: u8 = 0x08;
const SDR_ERROR: u8 = 0x04;
const SDR_DELETED: u8 = 0x02;
const SDR_COMPRESSED: u8 = 0x01;

#[derive(Error, Debug)]
pub enum ImdError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("binary layout error: {0}")]
    Bin(#[from] binrw::Error),
    #[error("no comment terminator before end of file")]
    UnterminatedComment,
    #[error("comment may not contain the 0x1A terminator byte")]
    CommentTerminator,
    #[error("truncated track header")]
    TruncatedTrackHeader,
    #[error("invalid head byte {head:#04X} in track header")]
    InvalidHeadByte { head: u8 },
    #[error("unknown data mode {mode:#04X} in track header")]
    UnknownMode { mode: u8 },
    #[error("variable sector sizes are not supported")]
    VariableSectorSize,
    #[error("invalid sector size code {code:#04X}")]
    InvalidSizeCode { code: u8 },
    #[error("more than one track record for cyl {cyl} head {head}")]
    DuplicateTrack { cyl: u8, head: u8 },
    #[error("unsupported sector data record type {sdr_type:#04X}")]
    UnsupportedSdrType { sdr_type: u8 },
    #[error("error/deleted flag on a follow-on sector data record")]
    MisplacedSdrFlag,
    #[error("zero read count in sector data record")]
    ZeroReadCount,
    #[error("track cyl {cyl} head {head} has {sectors} sectors, too many to encode")]
    TooManySectors { cyl: u8, head: u8, sectors: usize },
    #[error("sector payload is {len} bytes but the track sector size is {expected}")]
    PayloadSize { len: usize, expected: usize },
}

/// The 5-byte track record header.
#[binrw]
#[derive(Copy, Clone, Debug)]
pub struct ImdTrackHeader {
    pub mode: u8,
    pub c: u8,
    pub h: u8,
    pub sector_ct: u8,
    pub sector_size: u8,
}

impl ImdTrackHeader {
    pub fn head(&self) -> u8 {
        self.h & HEAD_MASK
    }
    pub fn has_cylinder_map(&self) -> bool {
        self.h & HEAD_FLAG_CYL_MAP != 0
    }
    pub fn has_head_map(&self) -> bool {
        self.h & HEAD_FLAG_HEAD_MAP != 0
    }
    /// Head byte may carry only the map flags and a head number below 2.
    pub fn head_byte_valid(&self) -> bool {
        self.h & !(HEAD_FLAG_CYL_MAP | HEAD_FLAG_HEAD_MAP | HEAD_MASK) == 0 && self.head() < 2
    }
}

fn read_u8<R: Read>(reader: &mut R) -> std::io::Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// Parse a whole IMD stream into a disk model. Every track present in the
/// stream comes back PROBED; geometry fields grow monotonically as track
/// records appear.
pub fn read_disk<R: Read>(reader: &mut R) -> Result<Disk, ImdError> {
    let mut disk = Disk::new();
    disk.num_phys_cyls = 0;
    disk.num_phys_heads = 1;

    // Comment: everything up to the terminator, which is consumed but not
    // stored.
    loop {
        match read_u8(reader) {
            Ok(COMMENT_TERMINATOR) => break,
            Ok(byte) => disk.comment.push(byte),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ImdError::UnterminatedComment)
            }
            Err(e) => return Err(e.into()),
        }
    }

    loop {
        // End of stream is only legal on a track record boundary.
        let mut header_bytes = [0u8; 5];
        match reader.read(&mut header_bytes[..1])? {
            0 => break,
            _ => {}
        }
        reader
            .read_exact(&mut header_bytes[1..])
            .map_err(|_| ImdError::TruncatedTrackHeader)?;

        let header = ImdTrackHeader::read_le(&mut Cursor::new(&header_bytes))?;
        log::trace!("read_disk(): track header {:?}", header);

        if !header.head_byte_valid() {
            return Err(ImdError::InvalidHeadByte { head: header.h });
        }
        let mode = DataMode::from_imd(header.mode).ok_or(ImdError::UnknownMode { mode: header.mode })?;
        if header.sector_size == SIZE_CODE_VARIABLE {
            return Err(ImdError::VariableSectorSize);
        }
        if header.sector_size > MAX_SECTOR_SIZE_CODE {
            return Err(ImdError::InvalidSizeCode {
                code: header.sector_size,
            });
        }

        let phys_cyl = header.c;
        let phys_head = header.head();
        let num_sectors = header.sector_ct as usize;

        disk.num_phys_cyls = disk.num_phys_cyls.max(phys_cyl as usize + 1);
        disk.num_phys_heads = disk.num_phys_heads.max(phys_head as usize + 1);

        let mut sector_map = vec![0u8; num_sectors];
        reader.read_exact(&mut sector_map)?;

        let mut cyl_map = vec![phys_cyl; num_sectors];
        if header.has_cylinder_map() {
            reader.read_exact(&mut cyl_map)?;
        }

        let mut head_map = vec![phys_head; num_sectors];
        if header.has_head_map() {
            reader.read_exact(&mut head_map)?;
        }

        let track = disk.track_mut(phys_cyl as usize, phys_head as usize);
        if track.status != TrackStatus::Unknown {
            return Err(ImdError::DuplicateTrack {
                cyl: phys_cyl,
                head: phys_head,
            });
        }

        track.status = TrackStatus::Probed;
        track.data_mode = Some(mode);
        track.sector_size_code = Some(header.sector_size);
        track.sectors = (0..num_sectors)
            .map(|i| Sector::new(cyl_map[i], head_map[i], sector_map[i]))
            .collect();

        let size = sector_bytes(header.sector_size);
        for i in 0..num_sectors {
            read_sdr_chain(reader, size, &mut track.sectors[i])?;
        }
    }

    Ok(disk)
}

/// Read one sector's chain of sector data records.
///
/// The type byte is decoded by subtraction in fixed order; treating it as a
/// bitfield breaks when HAS-COUNT coexists with the low flags.
fn read_sdr_chain<R: Read>(
    reader: &mut R,
    sector_size: usize,
    sector: &mut Sector,
) -> Result<(), ImdError> {
    let mut first = true;

    loop {
        let sdr_type = read_u8(reader)?;

        if sdr_type == 0x00 {
            if !first {
                // An "absent" record cannot continue a data chain.
                return Err(ImdError::UnsupportedSdrType { sdr_type });
            }
            sector.status = SectorStatus::Missing;
            return Ok(());
        }

        let mut rest = sdr_type - SDR_DATA;
        let mut take = |value: u8| {
            if rest >= value {
                rest -= value;
                true
            } else {
                false
            }
        };
        let has_count = take(SDR_HAS_COUNT);
        let another_follows = take(SDR_ANOTHER_FOLLOWS);
        let is_error = take(SDR_ERROR);
        let is_deleted = take(SDR_DELETED);
        let is_compressed = take(SDR_COMPRESSED);
        if rest != 0 {
            return Err(ImdError::UnsupportedSdrType { sdr_type });
        }

        if !first && (is_error || is_deleted) {
            return Err(ImdError::MisplacedSdrFlag);
        }

        let count = if has_count {
            let mut count_bytes = [0u8; 4];
            reader.read_exact(&mut count_bytes)?;
            let count = u32::from_be_bytes(count_bytes);
            if count == 0 {
                return Err(ImdError::ZeroReadCount);
            }
            count
        } else {
            1
        };

        let data = if is_compressed {
            vec![read_u8(reader)?; sector_size]
        } else {
            let mut data = vec![0u8; sector_size];
            reader.read_exact(&mut data)?;
            data
        };

        if first {
            sector.status = if is_error {
                SectorStatus::Bad
            } else {
                SectorStatus::Good
            };
            sector.deleted = is_deleted;
            first = false;
        }

        sector
            .datas
            .entry(data)
            .and_modify(|c| *c = c.saturating_add(count))
            .or_insert(count);

        if !another_follows {
            return Ok(());
        }
    }
}

/// Write the comment block that opens an IMD stream.
pub fn write_header<W: Write>(writer: &mut W, comment: &[u8]) -> Result<(), ImdError> {
    if comment.contains(&COMMENT_TERMINATOR) {
        return Err(ImdError::CommentTerminator);
    }
    writer.write_all(comment)?;
    writer.write_all(&[COMMENT_TERMINATOR])?;
    Ok(())
}

/// Write one track record. The caller is responsible for only passing
/// tracks with a known layout.
pub fn write_track<W: Write>(writer: &mut W, track: &Track) -> Result<(), ImdError> {
    debug_assert!(track.status != TrackStatus::Unknown);
    let mode = track.data_mode.expect("writing an unprobed track");
    let size_code = track.sector_size_code.expect("writing an unprobed track");
    let size = sector_bytes(size_code);

    if track.num_sectors() > u8::MAX as usize {
        return Err(ImdError::TooManySectors {
            cyl: track.phys_cyl,
            head: track.phys_head,
            sectors: track.num_sectors(),
        });
    }

    let need_cyl_map = track.sectors.iter().any(|s| s.log_cyl != track.phys_cyl);
    let need_head_map = track.sectors.iter().any(|s| s.log_head != track.phys_head);

    let mut h = track.phys_head;
    if need_cyl_map {
        h |= HEAD_FLAG_CYL_MAP;
    }
    if need_head_map {
        h |= HEAD_FLAG_HEAD_MAP;
    }

    let header = ImdTrackHeader {
        mode: mode.imd_mode,
        c: track.phys_cyl,
        h,
        sector_ct: track.num_sectors() as u8,
        sector_size: size_code,
    };
    let mut header_bytes = Cursor::new(Vec::with_capacity(5));
    header.write_le(&mut header_bytes)?;
    writer.write_all(header_bytes.get_ref())?;

    let sector_map: Vec<u8> = track.sectors.iter().map(|s| s.log_sector).collect();
    writer.write_all(&sector_map)?;

    if need_cyl_map {
        let cyl_map: Vec<u8> = track.sectors.iter().map(|s| s.log_cyl).collect();
        writer.write_all(&cyl_map)?;
    }
    if need_head_map {
        let head_map: Vec<u8> = track.sectors.iter().map(|s| s.log_head).collect();
        writer.write_all(&head_map)?;
    }

    for sector in &track.sectors {
        write_sdr_chain(writer, size, sector)?;
    }

    Ok(())
}

fn write_sdr_chain<W: Write>(
    writer: &mut W,
    sector_size: usize,
    sector: &Sector,
) -> Result<(), ImdError> {
    if sector.datas.is_empty() {
        writer.write_all(&[0x00])?;
        return Ok(());
    }

    let last = sector.datas.len() - 1;
    for (i, (data, &count)) in sector.datas.iter().enumerate() {
        if data.len() != sector_size {
            return Err(ImdError::PayloadSize {
                len: data.len(),
                expected: sector_size,
            });
        }

        let compressed = data.iter().all(|&b| b == data[0]);

        let mut sdr_type = SDR_DATA;
        if count > 1 {
            sdr_type += SDR_HAS_COUNT;
        }
        if i < last {
            sdr_type += SDR_ANOTHER_FOLLOWS;
        }
        if i == 0 {
            if sector.status == SectorStatus::Bad {
                sdr_type += SDR_ERROR;
            }
            if sector.deleted {
                sdr_type += SDR_DELETED;
            }
        }
        if compressed {
            sdr_type += SDR_COMPRESSED;
        }

        writer.write_all(&[sdr_type])?;
        if count > 1 {
            writer.write_all(&count.to_be_bytes())?;
        }
        if compressed {
            writer.write_all(&data[..1])?;
        } else {
            writer.write_all(data)?;
        }
    }

    Ok(())
}

/// Write a whole disk: comment, then every known track in cylinder-major
/// order. Tracks that were never probed produce no record; track records
/// locate themselves by their physical cylinder byte.
pub fn write_disk<W: Write>(writer: &mut W, disk: &Disk) -> Result<(), ImdError> {
    write_header(writer, &disk.comment)?;

    for cyl in 0..disk.num_phys_cyls {
        for head in 0..disk.num_phys_heads {
            let track = disk.track(cyl, head);
            if track.status == TrackStatus::Unknown {
                continue;
            }
            write_track(writer, track)?;
        }
    }

    Ok(())
}
