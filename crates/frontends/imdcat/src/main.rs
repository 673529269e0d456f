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

    The imdcat conversion frontend: list IMD images, print their comments,
    and flatten them to linear sector dumps.
*/

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};

use anyhow::{anyhow, Context, Result};
use bpaf::Bpaf;

use dumpfloppy_core::flatten::{flatten, prompt_chooser, FlattenOptions, Range};
use dumpfloppy_core::imd;
use dumpfloppy_core::util::print_listing;

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
struct CmdLineArgs {
    /// Print the image comment
    #[bpaf(short('n'), switch)]
    comment: bool,

    /// Write a flat image of the selected sectors to FILE
    #[bpaf(short('o'), argument("FILE"))]
    output: Option<PathBuf>,

    /// List every track (the default when neither -o nor -n is given)
    #[bpaf(short('v'), switch)]
    verbose: bool,

    /// Include a hex dump of each sector in the listing (implies -v)
    #[bpaf(short('x'), switch)]
    hex: bool,

    /// Allow two sectors to claim the same output location
    #[bpaf(short('p'), switch)]
    permissive: bool,

    /// Input cylinder range (FIRST:LAST, FIRST:, :LAST or ONLY)
    #[bpaf(short('c'), argument("RANGE"))]
    in_cyls: Option<Range>,

    /// Input head range
    #[bpaf(short('h'), argument("RANGE"))]
    in_heads: Option<Range>,

    /// Input logical sector range
    #[bpaf(short('s'), argument("RANGE"))]
    in_sectors: Option<Range>,

    /// Output cylinder range
    #[bpaf(short('C'), argument("RANGE"))]
    out_cyls: Option<Range>,

    /// Output head range
    #[bpaf(short('H'), argument("RANGE"))]
    out_heads: Option<Range>,

    /// Output sector range
    #[bpaf(short('S'), argument("RANGE"))]
    out_sectors: Option<Range>,

    /// IMD image to read
    #[bpaf(positional("IMAGE"))]
    image: PathBuf,
}

fn run(args: CmdLineArgs) -> Result<()> {
    let file = File::open(&args.image)
        .with_context(|| format!("opening {}", args.image.display()))?;
    let disk = imd::read_disk(&mut BufReader::new(file))
        .map_err(|e| anyhow!("reading {}: {}", args.image.display(), e))?;

    let stdout = io::stdout();

    if args.comment {
        let mut out = stdout.lock();
        out.write_all(&disk.comment)?;
        if !disk.comment.ends_with(b"\n") {
            writeln!(out)?;
        }
    }

    let verbose = args.verbose || args.hex || (!args.comment && args.output.is_none());
    if verbose {
        print_listing(&disk, args.hex, &mut stdout.lock())?;
    }

    if let Some(path) = &args.output {
        let options = FlattenOptions {
            in_cyls: args.in_cyls.unwrap_or_default(),
            in_heads: args.in_heads.unwrap_or_default(),
            in_sectors: args.in_sectors.unwrap_or_default(),
            out_cyls: args.out_cyls.unwrap_or_default(),
            out_heads: args.out_heads.unwrap_or_default(),
            out_sectors: args.out_sectors.unwrap_or_default(),
            permissive: args.permissive,
        };

        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::new(file);

        let stdin = io::stdin();
        let mut input = stdin.lock();
        let stderr = io::stderr();
        let mut diag = stderr.lock();
        let mut chooser = prompt_chooser(&mut input, &mut diag);

        flatten(&disk, &options, &mut chooser, &mut out)
            .map_err(|e| anyhow!("flattening {}: {}", args.image.display(), e))?;
        out.flush()?;
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = cmd_line_args().run();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("imdcat: {:#}", e);
            ExitCode::from(2)
        }
    }
}
