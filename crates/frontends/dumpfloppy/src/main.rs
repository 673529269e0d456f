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

    main.rs

    The dumpfloppy acquisition frontend: read a floppy disk in drive N to
    an IMD image.
*/

use std::{io::Read, path::PathBuf, process::ExitCode};

use anyhow::Result;
use bpaf::Bpaf;

use dumpfloppy_core::acquire::AcquireConfig;

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
struct CmdLineArgs {
    /// Probe every track, instead of assuming the layout of the previous
    /// track carries over
    #[bpaf(short('a'), switch)]
    always_probe: bool,

    /// Drive number to read from
    #[bpaf(short('d'), argument("DRIVE"), fallback(0))]
    drive: u8,

    /// Force the number of cylinders to read
    #[bpaf(short('t'), argument("TRACKS"))]
    tracks: Option<usize>,

    /// Append comment text read from standard input to the image
    #[bpaf(short('C'), switch)]
    read_comment: bool,

    /// Discard sectors with this logical ID
    #[bpaf(short('S'), argument("SEC"))]
    ignore_sector: Option<u8>,

    /// Read attempts per track
    #[bpaf(short('m'), argument("NUM"), fallback(10))]
    max_tries: u32,

    /// Retry the bad sectors of an existing image
    #[bpaf(short('r'), switch)]
    retry: bool,

    /// Output IMD image
    #[bpaf(positional("IMAGE"))]
    image: PathBuf,
}

fn run(args: CmdLineArgs) -> Result<()> {
    let extra_comment = if args.read_comment {
        let mut bytes = Vec::new();
        std::io::stdin().read_to_end(&mut bytes)?;
        Some(bytes)
    } else {
        None
    };

    let config = AcquireConfig {
        drive_n: args.drive,
        tracks: args.tracks,
        image_path: args.image,
        always_probe: args.always_probe,
        retry: args.retry,
        ignore_sector: args.ignore_sector,
        max_tries: args.max_tries,
        extra_comment,
    };

    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            use dumpfloppy_core::fdc::{linux::LinuxFdc, FloppyDrive};
            use dumpfloppy_core::acquire::acquire;

            let backend = LinuxFdc::open(config.drive_n)?;
            let mut drive = FloppyDrive::new(backend, config.drive_n);
            acquire(&mut drive, &config)
        } else {
            let _ = config;
            anyhow::bail!("raw floppy controller access is only available on Linux");
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = cmd_line_args().run();

    if args.drive > 3 {
        eprintln!("dumpfloppy: drive number must be 0..3");
        return ExitCode::from(1);
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dumpfloppy: {:#}", e);
            ExitCode::from(2)
        }
    }
}
