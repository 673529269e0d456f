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

    flatten.rs

    Reduce the (cylinder, head, sector) disk model to a linear byte stream:
    slot assignment, operator disambiguation of multi-read sectors, range
    selection, and 0xFF fill for absent sectors.
*/

use std::{
    fmt::Display,
    io::{BufRead, Write},
    str::FromStr,
};

use fxhash::FxHashMap;
use thiserror::Error;

use crate::disk::{sector_bytes, Disk, Sector, SectorStatus};

/// An inclusive range over cylinders, heads or sectors, with either end
/// optionally open. Parsed from `FIRST:LAST`, `FIRST:`, `:LAST` or `ONLY`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Range {
    pub first: Option<usize>,
    pub last: Option<usize>,
}

#[derive(Error, Debug)]
#[error("invalid range '{0}': expected FIRST:LAST, FIRST:, :LAST or ONLY")]
pub struct ParseRangeError(String);

impl Range {
    /// The fully-open range.
    pub fn all() -> Self {
        Range::default()
    }

    pub fn contains(&self, value: usize) -> bool {
        self.first.map_or(true, |f| value >= f) && self.last.map_or(true, |l| value <= l)
    }
}

impl FromStr for Range {
    type Err = ParseRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRangeError(s.to_string());

        if let Some((a, b)) = s.split_once(':') {
            let first = if a.is_empty() {
                None
            } else {
                Some(a.parse().map_err(|_| err())?)
            };
            let last = if b.is_empty() {
                None
            } else {
                Some(b.parse().map_err(|_| err())?)
            };
            if let (Some(f), Some(l)) = (first, last) {
                if f > l {
                    return Err(err());
                }
            }
            Ok(Range { first, last })
        } else {
            let only = s.parse().map_err(|_| err())?;
            Ok(Range {
                first: Some(only),
                last: Some(only),
            })
        }
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.first, self.last) {
            (Some(a), Some(b)) if a == b => write!(f, "{}", a),
            (a, b) => write!(
                f,
                "{}:{}",
                a.map_or(String::new(), |v| v.to_string()),
                b.map_or(String::new(), |v| v.to_string())
            ),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FlattenOptions {
    pub in_cyls: Range,
    pub in_heads: Range,
    pub in_sectors: Range,
    pub out_cyls: Range,
    pub out_heads: Range,
    pub out_sectors: Range,
    /// Accept two sectors claiming the same output slot (the later wins).
    pub permissive: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        FlattenOptions {
            in_cyls: Range::all(),
            in_heads: Range::all(),
            in_sectors: Range::all(),
            out_cyls: Range::all(),
            out_heads: Range::all(),
            out_sectors: Range::all(),
            permissive: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum FlattenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("two sectors found for cyl {cyl} head {head} sector {sec}")]
    DuplicateSector { cyl: usize, head: usize, sec: usize },
    #[error("no sectors selected, so the sector size is unknown")]
    NoSectorSize,
    #[error("output range {axis} is open-ended and no sectors bound it")]
    UnboundedRange { axis: &'static str },
}

/// A slot in the flat image, addressed by physical cylinder, physical head
/// and logical sector number.
pub type Slot = (usize, usize, usize);

/// The non-interactive chooser: take the reading with the highest count.
pub fn choose_best(_slot: Slot, sector: &Sector) -> usize {
    sector.best_data().unwrap_or(0)
}

/// An interactive chooser that prompts the operator on `output` (the
/// diagnostic stream) and reads data ids from `input`. Empty input takes
/// the default (highest read count); anything unparseable reprompts.
pub fn prompt_chooser<'a, R: BufRead, W: Write>(
    input: &'a mut R,
    output: &'a mut W,
) -> impl FnMut(Slot, &Sector) -> usize + 'a {
    move |slot, sector| {
        let default = sector.best_data().unwrap_or(0);
        loop {
            let _ = write!(
                output,
                "cyl {} head {} sector {}: {} distinct readings; IMD data id [{}]: ",
                slot.0,
                slot.1,
                slot.2,
                sector.datas.len(),
                default
            );
            let _ = output.flush();

            let mut line = String::new();
            match input.read_line(&mut line) {
                Ok(0) | Err(_) => return default,
                Ok(_) => {
                    let line = line.trim();
                    if line.is_empty() {
                        return default;
                    }
                    match line.parse::<usize>() {
                        Ok(id) if id < sector.datas.len() => return id,
                        _ => {
                            let _ = writeln!(
                                output,
                                "data id must be between 0 and {}",
                                sector.datas.len() - 1
                            );
                        }
                    }
                }
            }
        }
    }
}

fn extend(range: &mut Option<(usize, usize)>, value: usize) {
    *range = Some(match *range {
        None => (value, value),
        Some((lo, hi)) => (lo.min(value), hi.max(value)),
    });
}

fn resolve(
    user: Range,
    auto: Option<(usize, usize)>,
    axis: &'static str,
) -> Result<Option<(usize, usize)>, FlattenError> {
    let (auto_first, auto_last) = match auto {
        Some((lo, hi)) => (Some(lo), Some(hi)),
        None => (None, None),
    };
    match (user.first.or(auto_first), user.last.or(auto_last)) {
        (Some(first), Some(last)) => Ok(Some((first, last))),
        (None, None) => Ok(None),
        _ => Err(FlattenError::UnboundedRange { axis }),
    }
}

/// Flatten the disk to `out`. `choose` resolves sectors with more than one
/// distinct reading; use [`choose_best`] for unattended operation or
/// [`prompt_chooser`] to ask the operator.
pub fn flatten<W: Write>(
    disk: &Disk,
    options: &FlattenOptions,
    choose: &mut dyn FnMut(Slot, &Sector) -> usize,
    out: &mut W,
) -> Result<(), FlattenError> {
    let mut slots: FxHashMap<Slot, Vec<u8>> = FxHashMap::default();
    let mut auto_cyls = None;
    let mut auto_heads = None;
    let mut auto_sectors = None;
    let mut size_code: Option<u8> = None;

    for cyl in 0..disk.num_phys_cyls {
        if !options.in_cyls.contains(cyl) {
            continue;
        }
        for head in 0..disk.num_phys_heads {
            if !options.in_heads.contains(head) {
                continue;
            }
            let track = disk.track(cyl, head);
            for sector in &track.sectors {
                let sec = sector.log_sector as usize;
                if !options.in_sectors.contains(sec) {
                    continue;
                }

                let slot = (cyl, head, sec);
                extend(&mut auto_cyls, cyl);
                extend(&mut auto_heads, head);
                extend(&mut auto_sectors, sec);

                if sector.status == SectorStatus::Missing {
                    continue;
                }

                if slots.contains_key(&slot) {
                    if !options.permissive {
                        return Err(FlattenError::DuplicateSector { cyl, head, sec });
                    }
                    log::warn!(
                        "flatten(): two sectors found for cyl {} head {} sector {}; keeping the later one",
                        cyl,
                        head,
                        sec
                    );
                }

                match (size_code, track.sector_size_code) {
                    (None, code) => size_code = code,
                    (Some(have), Some(code)) if have != code => {
                        log::warn!(
                            "flatten(): inconsistent sector sizes: code {} at cyl {} head {}, code {} elsewhere",
                            code,
                            cyl,
                            head,
                            have
                        );
                    }
                    _ => {}
                }

                let chosen = if sector.datas.len() > 1 {
                    choose(slot, sector)
                } else {
                    0
                };
                let data = sector
                    .datas
                    .get_index(chosen)
                    .or_else(|| sector.best_data().and_then(|i| sector.datas.get_index(i)))
                    .expect("non-missing sector with no data")
                    .0
                    .clone();
                slots.insert(slot, data);
            }
        }
    }

    let cyls = resolve(options.out_cyls, auto_cyls, "cylinders")?;
    let heads = resolve(options.out_heads, auto_heads, "heads")?;
    let sectors = resolve(options.out_sectors, auto_sectors, "sectors")?;

    let (Some(cyls), Some(heads), Some(sectors)) = (cyls, heads, sectors) else {
        // Nothing selected and nothing requested.
        return Ok(());
    };

    let size_code = size_code.ok_or(FlattenError::NoSectorSize)?;
    let fill = vec![0xFFu8; sector_bytes(size_code)];

    for cyl in cyls.0..=cyls.1 {
        for head in heads.0..=heads.1 {
            for sec in sectors.0..=sectors.1 {
                match slots.get(&(cyl, head, sec)) {
                    Some(data) => out.write_all(data)?,
                    None => out.write_all(&fill)?,
                }
            }
        }
    }

    Ok(())
}
