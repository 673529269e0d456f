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

    fdc::mod.rs

    The FDC primitive layer: NEC µPD765 command and status register
    definitions, the raw-command backend trait, and the per-drive operations
    (recalibrate, read sector id, read data) built on top of it.
*/

use bitflags::bitflags;
use thiserror::Error;

use crate::data_mode::DataMode;
use crate::disk::sector_bytes;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(test)]
pub(crate) mod mock;

pub const FDC_MAX_DRIVES: u8 = 4;

pub const COMMAND_READ_DATA: u8 = 0x06;
pub const COMMAND_CALIBRATE_DRIVE: u8 = 0x07;
pub const COMMAND_READ_SECTOR_ID: u8 = 0x0A;

/// Set for MFM, cleared for FM, on READ-DATA and READ-SECTOR-ID.
pub const COMMAND_MFM_BIT: u8 = 0x40;

pub const ST0_INTERRUPT_CODE: u8 = 0b1100_0000;
pub const ST0_SEEK_END: u8 = 0b0010_0000;
pub const ST0_UNIT_CHECK: u8 = 0b0001_0000;

pub const ST1_NO_ID: u8 = 0b0000_0001;
pub const ST1_NODATA: u8 = 0b0000_0100;
pub const ST1_CRC_ERROR: u8 = 0b0010_0000;

pub const ST2_WRONG_CYLINDER: u8 = 0b0001_0000;
pub const ST2_DATA_CRC_ERROR: u8 = 0b0010_0000;
pub const ST2_DAD_MARK: u8 = 0b0100_0000;

/// End-of-track sector number passed to READ-DATA. 0xFF keeps the
/// controller from wrapping onto the next logical sector group.
pub const READ_EOT: u8 = 0xFF;

/// Intersector gap value for READ-DATA. The right value is uncertain across
/// controllers; 0x1B matches the common 3.5"/5.25" read gap tables.
pub const READ_GAP3: u8 = 0x1B;

bitflags! {
    /// Flags for a raw controller command submission. Values follow the
    /// Linux fdrawcmd facility, which is the concrete consumer of this
    /// interface.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct RawFlags: u32 {
        /// Command transfers data from the medium to the caller's buffer.
        const READ      = 0x01;
        /// Command is terminated by an interrupt (all of ours are).
        const INTR      = 0x08;
        /// Seek to `seek_track` before issuing the command bytes.
        const NEED_SEEK = 0x80;
    }
}

/// One raw command submission: up to 9 command bytes, the submission flags,
/// a rate select value, the implied-seek target, and an optional transfer
/// buffer. The READ-ID command bytes carry no cylinder number, so the seek
/// target must travel beside the command rather than inside it.
pub struct RawCommand<'a> {
    pub cmd: &'a [u8],
    pub flags: RawFlags,
    pub rate: u8,
    pub seek_track: u8,
    pub buf: Option<&'a mut [u8]>,
}

/// Status registers and result bytes returned by a command.
#[derive(Copy, Clone, Debug, Default)]
pub struct RawReply {
    pub bytes: [u8; 16],
    pub len: usize,
}

impl RawReply {
    pub fn st0(&self) -> u8 {
        self.bytes[0]
    }
    pub fn st1(&self) -> u8 {
        self.bytes[1]
    }
    pub fn st2(&self) -> u8 {
        self.bytes[2]
    }
}

/// Errors from the controller transport itself. Logical command failures
/// (nonzero interrupt code) are not errors at this level; they come back to
/// the caller through the status registers.
#[derive(Error, Debug)]
pub enum FdcError {
    #[error("floppy device error: {0}")]
    Io(#[from] std::io::Error),
    #[error("short reply from controller: expected {expected} bytes, got {got}")]
    ShortReply { expected: usize, got: usize },
    #[error("no raw floppy access on this platform")]
    Unsupported,
}

/// The raw controller capability. The acquisition engine drives everything
/// through this trait; the Linux backend realizes it with fdrawcmd ioctls
/// and tests realize it with a scripted fake.
pub trait FdcBackend {
    /// Submit one raw command and return its reply bytes. Transport
    /// failures are errors; logical failures are normal returns.
    fn submit(&mut self, cmd: RawCommand<'_>) -> Result<RawReply, FdcError>;

    /// Reset the controller.
    fn reset(&mut self) -> Result<(), FdcError>;

    /// The drive's cylinder count as reported by the platform's drive
    /// parameter facility, if it has one. Used only as a default.
    fn drive_cyls(&mut self) -> Result<Option<u8>, FdcError>;
}

/// A sector ID field as returned by READ-SECTOR-ID.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SectorId {
    pub log_cyl: u8,
    pub log_head: u8,
    pub log_sector: u8,
    pub size_code: u8,
}

impl SectorId {
    /// Logical address equality, ignoring the size code.
    pub fn same_address(&self, other: &SectorId) -> bool {
        self.log_cyl == other.log_cyl
            && self.log_head == other.log_head
            && self.log_sector == other.log_sector
    }
}

/// Outcome of a READ-DATA command.
#[derive(Copy, Clone, Debug)]
pub struct DriveReadResult {
    pub ok: bool,
    pub st0: u8,
    pub st1: u8,
    pub st2: u8,
}

impl DriveReadResult {
    pub fn deleted_mark(&self) -> bool {
        self.st2 & ST2_DAD_MARK != 0
    }

    /// True when the only thing wrong with the read was a data CRC failure,
    /// meaning the returned bytes are a usable (if untrusted) reading.
    pub fn data_crc_only(&self) -> bool {
        self.st1 == ST1_CRC_ERROR && self.st2 == ST2_DATA_CRC_ERROR
    }
}

fn st0_normal(st0: u8) -> bool {
    st0 & ST0_INTERRUPT_CODE == 0
}

/// One physical drive behind a controller backend, selected by drive
/// number 0..=3.
pub struct FloppyDrive<B: FdcBackend> {
    backend: B,
    drive_n: u8,
}

impl<B: FdcBackend> FloppyDrive<B> {
    pub fn new(backend: B, drive_n: u8) -> Self {
        assert!(drive_n < FDC_MAX_DRIVES);
        FloppyDrive { backend, drive_n }
    }

    pub fn drive_n(&self) -> u8 {
        self.drive_n
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Head and drive select byte shared by every command we issue.
    fn drive_head_select(&self, phys_head: u8) -> u8 {
        (phys_head << 2) | self.drive_n
    }

    pub fn reset(&mut self) -> Result<(), FdcError> {
        self.backend.reset()
    }

    pub fn drive_cyls(&mut self) -> Result<Option<u8>, FdcError> {
        self.backend.drive_cyls()
    }

    /// Seek to cylinder 0. Returns false if the drive did not report track 0
    /// after stepping; a drive parked beyond cylinder 80 needs a second
    /// attempt.
    pub fn recalibrate(&mut self) -> Result<bool, FdcError> {
        let cmd = [COMMAND_CALIBRATE_DRIVE, self.drive_head_select(0)];
        let reply = self.backend.submit(RawCommand {
            cmd: &cmd,
            flags: RawFlags::INTR,
            rate: 0,
            seek_track: 0,
            buf: None,
        })?;

        let ok = reply.len == 0 || reply.st0() & ST0_UNIT_CHECK == 0;
        if !ok {
            log::debug!("recalibrate(): drive {} did not find track 0", self.drive_n);
        }
        Ok(ok)
    }

    /// Wait for the next sector ID on the given physical track. The
    /// controller gives up after two index holes, which callers exploit as
    /// their only means of index alignment. Returns None on logical failure
    /// (unreadable or wrongly-encoded track).
    pub fn read_id(
        &mut self,
        seek_cyl: u8,
        phys_head: u8,
        mode: &DataMode,
    ) -> Result<Option<SectorId>, FdcError> {
        let mut cmd0 = COMMAND_READ_SECTOR_ID;
        if !mode.is_fm {
            cmd0 |= COMMAND_MFM_BIT;
        }
        let cmd = [cmd0, self.drive_head_select(phys_head)];

        let reply = self.backend.submit(RawCommand {
            cmd: &cmd,
            flags: RawFlags::INTR | RawFlags::NEED_SEEK,
            rate: mode.rate,
            seek_track: seek_cyl,
            buf: None,
        })?;

        if reply.len < 7 {
            return Err(FdcError::ShortReply {
                expected: 7,
                got: reply.len,
            });
        }

        if !st0_normal(reply.st0()) {
            return Ok(None);
        }

        Ok(Some(SectorId {
            log_cyl: reply.bytes[3],
            log_head: reply.bytes[4],
            log_sector: reply.bytes[5],
            size_code: reply.bytes[6],
        }))
    }

    /// Read consecutive logical sectors into `buf`, starting from
    /// `first_log_sector`. `buf` must be a whole multiple of the sector
    /// size. A multi-sector read that hits a deleted data mark is reported
    /// as a failure, since the controller stops transferring at that point.
    #[allow(clippy::too_many_arguments)]
    pub fn read(
        &mut self,
        seek_cyl: u8,
        phys_head: u8,
        mode: &DataMode,
        log_cyl: u8,
        log_head: u8,
        first_log_sector: u8,
        size_code: u8,
        buf: &mut [u8],
    ) -> Result<DriveReadResult, FdcError> {
        let sector_size = sector_bytes(size_code);
        debug_assert!(buf.len() % sector_size == 0 && !buf.is_empty());

        let mut cmd0 = COMMAND_READ_DATA;
        if !mode.is_fm {
            cmd0 |= COMMAND_MFM_BIT;
        }

        // With a zero size code the controller takes the transfer length
        // from the DTL field instead; otherwise DTL must be 0xFF.
        let dtl = if size_code == 0 { sector_size as u8 } else { 0xFF };

        let cmd = [
            cmd0,
            self.drive_head_select(phys_head),
            log_cyl,
            log_head,
            first_log_sector,
            size_code,
            READ_EOT,
            READ_GAP3,
            dtl,
        ];

        let multi_sector = buf.len() > sector_size;

        let reply = self.backend.submit(RawCommand {
            cmd: &cmd,
            flags: RawFlags::INTR | RawFlags::NEED_SEEK | RawFlags::READ,
            rate: mode.rate,
            seek_track: seek_cyl,
            buf: Some(buf),
        })?;

        if reply.len < 7 {
            return Err(FdcError::ShortReply {
                expected: 7,
                got: reply.len,
            });
        }

        let mut ok = st0_normal(reply.st0());
        if ok && multi_sector && reply.st2() & ST2_DAD_MARK != 0 {
            // The controller stopped at the deleted sector, so the rest of
            // the buffer was never filled.
            ok = false;
        }

        Ok(DriveReadResult {
            ok,
            st0: reply.st0(),
            st1: reply.st1(),
            st2: reply.st2(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockFdc, MockTrack};
    use super::*;
    use crate::data_mode::DATA_MODES;

    fn ids(track_cyl: u8, sectors: &[u8]) -> Vec<SectorId> {
        sectors
            .iter()
            .map(|&s| SectorId {
                log_cyl: track_cyl,
                log_head: 0,
                log_sector: s,
                size_code: 2,
            })
            .collect()
    }

    #[test]
    fn read_id_reports_logical_address() {
        let mut fdc = MockFdc::new();
        fdc.add_track(2, 0, MockTrack::filled(&DATA_MODES[0], ids(2, &[1, 2, 3]), 512));
        let mut drive = FloppyDrive::new(fdc, 0);

        let id = drive.read_id(2, 0, &DATA_MODES[0]).unwrap();
        assert_eq!(
            id,
            Some(SectorId {
                log_cyl: 2,
                log_head: 0,
                log_sector: 1,
                size_code: 2
            })
        );
    }

    #[test]
    fn read_id_fails_in_wrong_mode() {
        let mut fdc = MockFdc::new();
        fdc.add_track(2, 0, MockTrack::filled(&DATA_MODES[0], ids(2, &[1, 2, 3]), 512));
        let mut drive = FloppyDrive::new(fdc, 0);

        // FM probe of an MFM track waits out two index holes and fails.
        assert_eq!(drive.read_id(2, 0, &DATA_MODES[1]).unwrap(), None);
    }

    #[test]
    fn whole_track_read_fills_buffer() {
        let mut fdc = MockFdc::new();
        let mut track = MockTrack::filled(&DATA_MODES[0], ids(2, &[1, 2, 3]), 512);
        track.set_payload(2, vec![0x22; 512]);
        fdc.add_track(2, 0, track);
        let mut drive = FloppyDrive::new(fdc, 0);

        let mut buf = vec![0u8; 3 * 512];
        let result = drive
            .read(2, 0, &DATA_MODES[0], 2, 0, 1, 2, &mut buf)
            .unwrap();
        assert!(result.ok);
        assert_eq!(&buf[512..1024], &[0x22; 512][..]);
    }

    #[test]
    fn multi_sector_read_fails_on_deleted_mark() {
        use super::mock::MockReadOutcome;

        let mut fdc = MockFdc::new();
        let mut track = MockTrack::filled(&DATA_MODES[0], ids(2, &[1, 2]), 512);
        track.push_outcome(2, MockReadOutcome::GoodDeleted);
        fdc.add_track(2, 0, track);
        let mut drive = FloppyDrive::new(fdc, 0);

        let mut buf = vec![0u8; 2 * 512];
        let result = drive
            .read(2, 0, &DATA_MODES[0], 2, 0, 1, 2, &mut buf)
            .unwrap();
        assert!(!result.ok);
        assert!(result.deleted_mark());

        // A single-sector read of the same sector succeeds.
        let mut track = MockTrack::filled(&DATA_MODES[0], ids(2, &[1, 2]), 512);
        track.push_outcome(2, MockReadOutcome::GoodDeleted);
        let mut fdc = MockFdc::new();
        fdc.add_track(2, 0, track);
        let mut drive = FloppyDrive::new(fdc, 0);

        let mut buf = vec![0u8; 512];
        let result = drive
            .read(2, 0, &DATA_MODES[0], 2, 0, 2, 2, &mut buf)
            .unwrap();
        assert!(result.ok);
        assert!(result.deleted_mark());
    }
}
