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

    fdc::mock.rs

    A scripted controller backend for tests: simulates a spinning disk with
    per-track ID rotation, the two-index-hole failure behavior of READ-ID,
    and per-sector scripted read outcomes.
*/

use std::collections::{HashMap, VecDeque};

use crate::data_mode::DataMode;
use crate::disk::sector_bytes;
use crate::fdc::{
    FdcBackend, FdcError, RawCommand, RawFlags, RawReply, SectorId, COMMAND_CALIBRATE_DRIVE,
    COMMAND_MFM_BIT, COMMAND_READ_DATA, COMMAND_READ_SECTOR_ID, ST0_SEEK_END, ST0_UNIT_CHECK,
    ST1_CRC_ERROR, ST1_NODATA, ST1_NO_ID, ST2_DAD_MARK, ST2_DATA_CRC_ERROR, ST2_WRONG_CYLINDER,
};

/// What the next single read of a sector should produce. When a sector's
/// script runs dry, reads succeed with the stored payload.
pub(crate) enum MockReadOutcome {
    Good,
    GoodDeleted,
    /// Data CRC failure; the given corrupted bytes are still transferred.
    CrcError(Vec<u8>),
    /// Some unrelated failure; no usable data.
    OtherError,
}

pub(crate) struct MockSector {
    pub payload: Vec<u8>,
    pub outcomes: VecDeque<MockReadOutcome>,
}

pub(crate) struct MockTrack {
    pub mode: &'static DataMode,
    /// Sector IDs in physical order, starting at the index hole.
    pub ids: Vec<SectorId>,
    pub sectors: HashMap<u8, MockSector>,
}

impl MockTrack {
    /// A track whose every sector reads cleanly; each payload is the
    /// logical sector number repeated.
    pub fn filled(mode: &'static DataMode, ids: Vec<SectorId>, size: usize) -> Self {
        let sectors = ids
            .iter()
            .map(|id| {
                (
                    id.log_sector,
                    MockSector {
                        payload: vec![id.log_sector; size],
                        outcomes: VecDeque::new(),
                    },
                )
            })
            .collect();
        MockTrack { mode, ids, sectors }
    }

    pub fn set_payload(&mut self, log_sector: u8, payload: Vec<u8>) {
        self.sectors
            .get_mut(&log_sector)
            .expect("unknown mock sector")
            .payload = payload;
    }

    pub fn push_outcome(&mut self, log_sector: u8, outcome: MockReadOutcome) {
        self.sectors
            .get_mut(&log_sector)
            .expect("unknown mock sector")
            .outcomes
            .push_back(outcome);
    }
}

pub(crate) struct MockFdc {
    tracks: HashMap<(u8, u8), MockTrack>,
    /// Rotational position per track: index of the next ID to pass under
    /// the head.
    positions: HashMap<(u8, u8), usize>,
    pub recalibrate_ok: bool,
    pub cyls: Option<u8>,
    pub resets: u32,
    pub id_reads: u32,
}

impl MockFdc {
    pub fn new() -> Self {
        MockFdc {
            tracks: HashMap::new(),
            positions: HashMap::new(),
            recalibrate_ok: true,
            cyls: Some(80),
            resets: 0,
            id_reads: 0,
        }
    }

    pub fn add_track(&mut self, seek_cyl: u8, phys_head: u8, track: MockTrack) {
        self.tracks.insert((seek_cyl, phys_head), track);
    }

    /// Park the simulated disk so that `pos` is the next ID to come around.
    /// Probing without index alignment will observe a rotated sequence.
    pub fn set_rotation(&mut self, seek_cyl: u8, phys_head: u8, pos: usize) {
        self.positions.insert((seek_cyl, phys_head), pos);
    }

    pub fn track_mut(&mut self, seek_cyl: u8, phys_head: u8) -> &mut MockTrack {
        self.tracks.get_mut(&(seek_cyl, phys_head)).unwrap()
    }

    fn reply(bytes: &[u8]) -> RawReply {
        let mut r = RawReply {
            bytes: [0; 16],
            len: bytes.len(),
        };
        r.bytes[..bytes.len()].copy_from_slice(bytes);
        r
    }

    fn mode_matches(track: &MockTrack, cmd0: u8, rate: u8) -> bool {
        let want_fm = cmd0 & COMMAND_MFM_BIT == 0;
        track.mode.is_fm == want_fm && track.mode.rate == rate
    }
}

impl FdcBackend for MockFdc {
    fn submit(&mut self, cmd: RawCommand<'_>) -> Result<RawReply, FdcError> {
        match cmd.cmd[0] & 0x1F {
            COMMAND_CALIBRATE_DRIVE => {
                let st0 = if self.recalibrate_ok {
                    ST0_SEEK_END
                } else {
                    ST0_SEEK_END | ST0_UNIT_CHECK
                };
                Ok(Self::reply(&[st0]))
            }

            COMMAND_READ_SECTOR_ID => {
                self.id_reads += 1;
                let phys_head = (cmd.cmd[1] >> 2) & 0x01;
                let key = (cmd.seek_track, phys_head);
                let pos = self.positions.entry(key).or_insert(0);

                match self.tracks.get(&key) {
                    Some(track) if Self::mode_matches(track, cmd.cmd[0], cmd.rate) => {
                        let id = track.ids[*pos % track.ids.len()];
                        *pos = (*pos + 1) % track.ids.len();
                        Ok(Self::reply(&[
                            0,
                            0,
                            0,
                            id.log_cyl,
                            id.log_head,
                            id.log_sector,
                            id.size_code,
                        ]))
                    }
                    _ => {
                        // The controller spins through two index holes
                        // looking for an ID, leaving the rotation at the
                        // index position.
                        *pos = 0;
                        Ok(Self::reply(&[0x40, ST1_NO_ID, 0, 0, 0, 0, 0]))
                    }
                }
            }

            COMMAND_READ_DATA => {
                let phys_head = (cmd.cmd[1] >> 2) & 0x01;
                let key = (cmd.seek_track, phys_head);
                let log_cyl = cmd.cmd[2];
                let log_head = cmd.cmd[3];
                let first_sector = cmd.cmd[4];
                let size_code = cmd.cmd[5];
                let size = sector_bytes(size_code);

                let buf = cmd.buf.expect("read command without buffer");
                assert!(cmd.flags.contains(RawFlags::READ));
                let count = buf.len() / size;

                let track = match self.tracks.get_mut(&key) {
                    Some(t) if t.mode.rate == cmd.rate => t,
                    _ => {
                        self.positions.insert(key, 0);
                        return Ok(Self::reply(&[0x40, ST1_NODATA, 0, log_cyl, log_head, first_sector, size_code]));
                    }
                };

                let mut st2 = 0u8;
                for k in 0..count {
                    let sec_num = first_sector.wrapping_add(k as u8);
                    let slice = &mut buf[k * size..(k + 1) * size];

                    let id = track.ids.iter().find(|id| id.log_sector == sec_num);
                    let id = match id {
                        Some(id) => *id,
                        None => {
                            return Ok(Self::reply(&[
                                0x40, ST1_NODATA, st2, log_cyl, log_head, sec_num, size_code,
                            ]))
                        }
                    };
                    if id.log_cyl != log_cyl || id.log_head != log_head {
                        return Ok(Self::reply(&[
                            0x40,
                            ST1_NODATA,
                            ST2_WRONG_CYLINDER,
                            log_cyl,
                            log_head,
                            sec_num,
                            size_code,
                        ]));
                    }

                    let sector = track.sectors.get_mut(&sec_num).unwrap();
                    match sector.outcomes.pop_front().unwrap_or(MockReadOutcome::Good) {
                        MockReadOutcome::Good => {
                            slice.copy_from_slice(&sector.payload);
                        }
                        MockReadOutcome::GoodDeleted => {
                            // With SK=0 the controller transfers the deleted
                            // sector and then terminates the command.
                            slice.copy_from_slice(&sector.payload);
                            st2 |= ST2_DAD_MARK;
                            return Ok(Self::reply(&[
                                0, 0, st2, log_cyl, log_head, sec_num, size_code,
                            ]));
                        }
                        MockReadOutcome::CrcError(bad) => {
                            slice[..bad.len()].copy_from_slice(&bad);
                            return Ok(Self::reply(&[
                                0x40,
                                ST1_CRC_ERROR,
                                ST2_DATA_CRC_ERROR,
                                log_cyl,
                                log_head,
                                sec_num,
                                size_code,
                            ]));
                        }
                        MockReadOutcome::OtherError => {
                            return Ok(Self::reply(&[
                                0x40, ST1_NODATA, 0, log_cyl, log_head, sec_num, size_code,
                            ]));
                        }
                    }
                }

                Ok(Self::reply(&[0, 0, st2, log_cyl, log_head, first_sector, size_code]))
            }

            other => panic!("mock backend got unexpected command {other:#04X}"),
        }
    }

    fn reset(&mut self) -> Result<(), FdcError> {
        self.resets += 1;
        Ok(())
    }

    fn drive_cyls(&mut self) -> Result<Option<u8>, FdcError> {
        Ok(self.cyls)
    }
}
