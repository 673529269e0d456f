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

    util.rs

    Small formatting helpers shared by the frontends: track listings and
    hex dumps.
*/

use std::io::{self, Write};

use crate::disk::{Disk, SectorStatus, TrackStatus};

/// One status glyph per physical sector: `.` good, `?` bad, `X` missing,
/// with a `d` suffix on deleted sectors.
fn sector_glyphs(disk: &Disk, cyl: usize, head: usize) -> String {
    let mut glyphs = String::new();
    for sector in &disk.track(cyl, head).sectors {
        glyphs.push(match sector.status {
            SectorStatus::Good => '.',
            SectorStatus::Bad => '?',
            SectorStatus::Missing => 'X',
        });
        if sector.deleted {
            glyphs.push('d');
        }
    }
    glyphs
}

/// Write a one-line-per-track summary of the disk. With `hex`, every
/// reading of every sector follows as a hex dump.
pub fn print_listing<W: Write>(disk: &Disk, hex: bool, out: &mut W) -> io::Result<()> {
    for cyl in 0..disk.num_phys_cyls {
        for head in 0..disk.num_phys_heads {
            let track = disk.track(cyl, head);
            if track.status == TrackStatus::Unknown {
                continue;
            }

            let ids: Vec<String> = track
                .sectors
                .iter()
                .map(|s| s.log_sector.to_string())
                .collect();
            writeln!(
                out,
                "cyl {:3} head {}: {:9} {:3} x {:5} [{}] {}",
                cyl,
                head,
                track.data_mode.map_or("?", |m| m.name),
                track.num_sectors(),
                track.sector_bytes().unwrap_or(0),
                ids.join(" "),
                sector_glyphs(disk, cyl, head),
            )?;

            if hex {
                for sector in &track.sectors {
                    match sector.status {
                        SectorStatus::Missing => {
                            writeln!(out, "  sector {}: no data", sector.log_sector)?;
                        }
                        _ => {
                            for (i, (data, count)) in sector.datas.iter().enumerate() {
                                writeln!(
                                    out,
                                    "  sector {} data {} (read {} times):",
                                    sector.log_sector, i, count
                                )?;
                                hexdump(data, out)?;
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Write `data` as a canonical 16-bytes-per-row hex dump with an ASCII
/// gutter.
pub fn hexdump<W: Write>(data: &[u8], out: &mut W) -> io::Result<()> {
    for (row, chunk) in data.chunks(16).enumerate() {
        write!(out, "{:08x} ", row * 16)?;
        for col in 0..16 {
            if col % 8 == 0 {
                write!(out, " ")?;
            }
            match chunk.get(col) {
                Some(b) => write!(out, "{:02x} ", b)?,
                None => write!(out, "   ")?,
            }
        }
        write!(out, " |")?;
        for &b in chunk {
            let c = if (0x20..0x7F).contains(&b) { b as char } else { '.' };
            write!(out, "{}", c)?;
        }
        writeln!(out, "|")?;
    }
    Ok(())
}
