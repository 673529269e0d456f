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

    data_mode.rs

    Defines the table of data modes (encoding + bit rate) a PC floppy
    controller can use, in the order the track prober tries them.
*/

use std::fmt::Display;

/// A combination of encoding (FM or MFM) and controller rate code that a
/// track may be recorded with.
#[derive(Debug, PartialEq, Eq)]
pub struct DataMode {
    /// The mode byte stored in an IMD track header for this mode.
    /// Mode 6 (MFM at 1Mbps) is an extension to the IMD 1.18 format.
    pub imd_mode: u8,
    pub name: &'static str,
    /// Data rate select value, 0..=3.
    pub rate: u8,
    pub is_fm: bool,
}

/// All modes the controller can produce, in probe order. Denser encodings
/// are more common on PC media so they are tried first. FM at 1Mbps does
/// not exist; the controller cannot select it.
pub static DATA_MODES: [DataMode; 7] = [
    DataMode {
        imd_mode: 5,
        name: "MFM-250k",
        rate: 2,
        is_fm: false,
    },
    DataMode {
        imd_mode: 2,
        name: "FM-250k",
        rate: 2,
        is_fm: true,
    },
    DataMode {
        imd_mode: 4,
        name: "MFM-300k",
        rate: 1,
        is_fm: false,
    },
    DataMode {
        imd_mode: 1,
        name: "FM-300k",
        rate: 1,
        is_fm: true,
    },
    DataMode {
        imd_mode: 3,
        name: "MFM-500k",
        rate: 0,
        is_fm: false,
    },
    DataMode {
        imd_mode: 0,
        name: "FM-500k",
        rate: 0,
        is_fm: true,
    },
    DataMode {
        imd_mode: 6,
        name: "MFM-1000k",
        rate: 3,
        is_fm: false,
    },
];

impl DataMode {
    /// Resolve an IMD track header mode byte to a mode table entry.
    pub fn from_imd(imd_mode: u8) -> Option<&'static DataMode> {
        DATA_MODES.iter().find(|m| m.imd_mode == imd_mode)
    }
}

impl Display for DataMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
