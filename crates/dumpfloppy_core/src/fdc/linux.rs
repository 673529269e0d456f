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

    fdc::linux.rs

    The Linux realization of the controller capability, via the kernel's
    raw floppy command facility (FDRAWCMD and friends on /dev/fdN).
*/

use std::{ffi::CString, io, ptr};

use libc::{self, c_int, c_long, c_ulong, ioctl};

use crate::fdc::{FdcBackend, FdcError, RawCommand, RawFlags, RawReply};

const FDRESET: c_ulong = 0x0254;
const FDRAWCMD: c_ulong = 0x0258;
const FDGETPRM: c_ulong = 0x8020_0204;

const FD_RESET_ALWAYS: c_ulong = 2;

/// Mirror of the kernel's `struct floppy_raw_cmd`.
#[repr(C)]
struct FloppyRawCmd {
    flags: u32,
    data: *mut libc::c_void,
    kernel_data: *mut libc::c_char,
    next: *mut FloppyRawCmd,
    length: c_long,
    phys_length: c_long,
    buffer_length: c_int,
    rate: u8,
    cmd_count: u8,
    cmd: [u8; 16],
    reply_count: u8,
    reply: [u8; 16],
    track: c_int,
    resultcode: c_int,
    reserved1: c_int,
    reserved2: c_int,
}

/// Mirror of the kernel's `struct floppy_struct` (drive parameters).
#[repr(C)]
struct FloppyStruct {
    size: u32,
    sect: u32,
    head: u32,
    track: u32,
    stretch: u32,
    gap: u8,
    rate: u8,
    spec1: u8,
    fmt_gap: u8,
    name: *const libc::c_char,
}

/// A raw handle on /dev/fd<N>. Opened with access mode 3 (neither read nor
/// write), which the floppy driver accepts for ioctl-only access without
/// touching the block layer's view of the medium.
pub struct LinuxFdc {
    fd: c_int,
    device: String,
}

impl LinuxFdc {
    pub fn open(drive_n: u8) -> Result<Self, FdcError> {
        let device = format!("/dev/fd{}", drive_n);
        let c_device = CString::new(device.clone()).expect("device path contains NUL");

        let fd = unsafe { libc::open(c_device.as_ptr(), libc::O_ACCMODE | libc::O_NONBLOCK) };
        if fd < 0 {
            return Err(FdcError::Io(io::Error::last_os_error()));
        }

        log::debug!("LinuxFdc::open(): opened {}", device);
        Ok(LinuxFdc { fd, device })
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

impl Drop for LinuxFdc {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl FdcBackend for LinuxFdc {
    fn submit(&mut self, cmd: RawCommand<'_>) -> Result<RawReply, FdcError> {
        assert!(cmd.cmd.len() <= 16);

        let mut raw = FloppyRawCmd {
            flags: cmd.flags.bits(),
            data: ptr::null_mut(),
            kernel_data: ptr::null_mut(),
            next: ptr::null_mut(),
            length: 0,
            phys_length: 0,
            buffer_length: 0,
            rate: cmd.rate,
            cmd_count: cmd.cmd.len() as u8,
            cmd: [0; 16],
            reply_count: 0,
            reply: [0; 16],
            track: cmd.seek_track as c_int,
            resultcode: 0,
            reserved1: 0,
            reserved2: 0,
        };
        raw.cmd[..cmd.cmd.len()].copy_from_slice(cmd.cmd);

        if let Some(buf) = cmd.buf {
            debug_assert!(cmd.flags.contains(RawFlags::READ));
            raw.data = buf.as_mut_ptr() as *mut libc::c_void;
            raw.length = buf.len() as c_long;
        }

        let rc = unsafe { ioctl(self.fd, FDRAWCMD, &mut raw) };
        if rc < 0 {
            return Err(FdcError::Io(io::Error::last_os_error()));
        }

        Ok(RawReply {
            bytes: raw.reply,
            len: raw.reply_count as usize,
        })
    }

    fn reset(&mut self) -> Result<(), FdcError> {
        let rc = unsafe { ioctl(self.fd, FDRESET, FD_RESET_ALWAYS) };
        if rc < 0 {
            return Err(FdcError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn drive_cyls(&mut self) -> Result<Option<u8>, FdcError> {
        let mut params: FloppyStruct = unsafe { std::mem::zeroed() };
        let rc = unsafe { ioctl(self.fd, FDGETPRM, &mut params) };
        if rc < 0 {
            // No autodetected format for the medium; the caller falls back
            // to its own default.
            log::debug!("drive_cyls(): FDGETPRM failed on {}", self.device);
            return Ok(None);
        }
        Ok(Some(params.track.min(255) as u8))
    }
}
