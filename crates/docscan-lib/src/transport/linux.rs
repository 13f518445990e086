//! Linux SCSI generic (`/dev/sgN`) backend.
//!
//! Synchronous commands go through the `SG_IO` ioctl. Queued reads use the sg
//! v3 asynchronous interface: `write()` a request header, `read()` it back
//! once the command has completed. Each queued request owns its CDB, data
//! and sense buffers until it is reaped, so the kernel never sees a pointer
//! into a ring slot that the consumer might be reading.

use std::collections::HashMap;
use std::ffi::CString;
use std::mem;

use libc::{c_int, c_uchar, c_uint, c_ushort, c_void};

use super::{Completion, DeviceInfo, Result, ScsiDevice, ScsiStatus, Token, TransportError};
use crate::protocol::SENSE_LEN;

// ── sg v3 ABI ──

const SG_IO: c_uint = 0x2285;
const SG_GET_VERSION_NUM: c_uint = 0x2282;
const SG_SET_FORCE_PACK_ID: c_uint = 0x227b;
const SG_GET_RESERVED_SIZE: c_uint = 0x2272;

const SG_DXFER_NONE: c_int = -1;
const SG_DXFER_TO_DEV: c_int = -2;
const SG_DXFER_FROM_DEV: c_int = -3;

const SCSI_STATUS_CHECK_CONDITION: u8 = 0x02;
const SCSI_STATUS_BUSY: u8 = 0x08;
const DRIVER_SENSE: c_ushort = 0x08;

const INQUIRY: u8 = 0x12;
const INQUIRY_LEN: usize = 36;

/// Command timeout in milliseconds. Feeding a sheet can take several seconds.
const TIMEOUT_MS: c_uint = 60_000;

/// Requests kept in flight on one file descriptor.
const MAX_QUEUED: usize = 8;

#[repr(C)]
struct SgIoHdr {
    interface_id: c_int,
    dxfer_direction: c_int,
    cmd_len: c_uchar,
    mx_sb_len: c_uchar,
    iovec_count: c_ushort,
    dxfer_len: c_uint,
    dxferp: *mut c_void,
    cmdp: *mut c_uchar,
    sbp: *mut c_uchar,
    timeout: c_uint,
    flags: c_uint,
    pack_id: c_int,
    usr_ptr: *mut c_void,
    status: c_uchar,
    masked_status: c_uchar,
    msg_status: c_uchar,
    sb_len_wr: c_uchar,
    host_status: c_ushort,
    driver_status: c_ushort,
    resid: c_int,
    duration: c_uint,
    info: c_uint,
}

impl SgIoHdr {
    fn new(cdb: &mut [u8], direction: c_int, data: &mut [u8], sense: &mut [u8]) -> Self {
        SgIoHdr {
            interface_id: b'S' as c_int,
            dxfer_direction: direction,
            cmd_len: cdb.len() as c_uchar,
            mx_sb_len: sense.len() as c_uchar,
            iovec_count: 0,
            dxfer_len: data.len() as c_uint,
            dxferp: data.as_mut_ptr().cast(),
            cmdp: cdb.as_mut_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: TIMEOUT_MS,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        }
    }

    fn completion(&self, requested: usize, sense: &[u8]) -> Result<Completion> {
        let transferred = requested.saturating_sub(self.resid.max(0) as usize);
        let has_sense = self.sb_len_wr > 0 || self.driver_status & DRIVER_SENSE != 0;
        if self.status == SCSI_STATUS_CHECK_CONDITION || (has_sense && self.status == 0) {
            let n = (self.sb_len_wr as usize).clamp(8, sense.len());
            return Ok(Completion {
                transferred,
                status: ScsiStatus::CheckCondition(sense[..n].to_vec()),
            });
        }
        if self.status == SCSI_STATUS_BUSY {
            return Ok(Completion {
                transferred: 0,
                status: ScsiStatus::Busy,
            });
        }
        if self.host_status != 0 || self.status != 0 {
            return Err(TransportError::CommandFailed(format!(
                "cmd 0x{:02x}: status 0x{:02x}, host 0x{:04x}, driver 0x{:04x}",
                // SAFETY: cmdp points at the caller's CDB, still alive here.
                unsafe { *self.cmdp },
                self.status,
                self.host_status,
                self.driver_status
            )));
        }
        Ok(Completion::good(transferred))
    }
}

/// A queued request. Boxed buffers keep their addresses while the kernel
/// holds pointers to them.
struct PendingIo {
    hdr: Box<SgIoHdr>,
    _cdb: Box<[u8]>,
    data: Box<[u8]>,
    sense: Box<[u8; SENSE_LEN]>,
    len: usize,
}

pub struct SgDevice {
    fd: c_int,
    info: DeviceInfo,
    pending: HashMap<Token, PendingIo>,
    next_token: Token,
    reserved: usize,
}

// The raw pointers in `PendingIo` only ever refer to buffers owned by the
// same `SgDevice`; the device is used from one thread at a time.
unsafe impl Send for SgDevice {}

impl SgDevice {
    /// Open an sg node and identify the device with INQUIRY.
    pub fn open(path: &str) -> Result<Self> {
        let c_path = CString::new(path)
            .map_err(|e| TransportError::OpenFailed(format!("open {path}: {e}")))?;
        // SAFETY: c_path is a valid NUL-terminated string.
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            return Err(match err.kind() {
                std::io::ErrorKind::NotFound => TransportError::NotFound,
                _ => TransportError::OpenFailed(format!("open {path}: {err}")),
            });
        }

        let mut dev = SgDevice {
            fd,
            info: DeviceInfo {
                path: path.to_string(),
                ..DeviceInfo::default()
            },
            pending: HashMap::new(),
            next_token: 1,
            reserved: 0,
        };

        let mut version: c_int = 0;
        // SAFETY: fd is open; SG_GET_VERSION_NUM writes one int.
        let rc = unsafe { libc::ioctl(dev.fd, SG_GET_VERSION_NUM as _, &mut version as *mut c_int) };
        if rc < 0 || version < 30000 {
            return Err(TransportError::OpenFailed(format!(
                "open {path}: not an sg v3 device (version {version})"
            )));
        }

        let mut reserved: c_int = 0;
        // SAFETY: fd is open; SG_GET_RESERVED_SIZE writes one int.
        if unsafe { libc::ioctl(dev.fd, SG_GET_RESERVED_SIZE as _, &mut reserved as *mut c_int) } == 0 {
            dev.reserved = reserved.max(0) as usize;
        }

        let force: c_int = 1;
        // SAFETY: fd is open; SG_SET_FORCE_PACK_ID reads one int.
        unsafe { libc::ioctl(dev.fd, SG_SET_FORCE_PACK_ID as _, &force as *const c_int) };

        let mut inquiry = [0u8; INQUIRY_LEN];
        let cdb = [INQUIRY, 0, 0, 0, INQUIRY_LEN as u8, 0];
        let completion = dev.execute(&cdb, &[], &mut inquiry)?;
        if completion.status != ScsiStatus::Good {
            return Err(TransportError::OpenFailed(format!(
                "INQUIRY {path}: {:?}",
                completion.status
            )));
        }
        dev.info.vendor = ascii_field(&inquiry[8..16]);
        dev.info.product = ascii_field(&inquiry[16..32]);
        log::info!(
            "opened {path}: {} {} (sg version {version}, reserved {} bytes)",
            dev.info.vendor,
            dev.info.product,
            dev.reserved
        );
        Ok(dev)
    }
}

fn ascii_field(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

impl ScsiDevice for SgDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn execute(&mut self, cdb: &[u8], data_out: &[u8], data_in: &mut [u8]) -> Result<Completion> {
        let mut cdb = cdb.to_vec();
        let mut sense = [0u8; SENSE_LEN];
        let mut out = data_out.to_vec();
        let mut none: Vec<u8> = Vec::new();
        let (direction, data): (c_int, &mut [u8]) = if !out.is_empty() {
            (SG_DXFER_TO_DEV, out.as_mut_slice())
        } else if !data_in.is_empty() {
            (SG_DXFER_FROM_DEV, data_in)
        } else {
            (SG_DXFER_NONE, none.as_mut_slice())
        };
        let requested = data.len();
        let mut hdr = SgIoHdr::new(&mut cdb, direction, data, &mut sense);

        // SAFETY: every pointer in hdr refers to a buffer that outlives the call.
        let rc = unsafe { libc::ioctl(self.fd, SG_IO as _, &mut hdr as *mut SgIoHdr) };
        if rc < 0 {
            return Err(TransportError::CommandFailed(format!(
                "SG_IO cmd 0x{:02x}: {}",
                cdb[0],
                std::io::Error::last_os_error()
            )));
        }
        hdr.completion(requested, &sense)
    }

    fn queue_depth(&self) -> usize {
        MAX_QUEUED
    }

    fn submit(&mut self, cdb: &[u8], len: usize) -> Result<Token> {
        if self.pending.len() >= MAX_QUEUED {
            return Err(TransportError::CommandFailed(format!(
                "sg write: {} requests already queued",
                self.pending.len()
            )));
        }
        let token = self.next_token;
        self.next_token += 1;

        let mut cdb: Box<[u8]> = cdb.into();
        let mut data = vec![0u8; len].into_boxed_slice();
        let mut sense = Box::new([0u8; SENSE_LEN]);
        let mut hdr = Box::new(SgIoHdr::new(
            &mut cdb,
            SG_DXFER_FROM_DEV,
            &mut data,
            &mut sense[..],
        ));
        hdr.pack_id = token as c_int;

        // SAFETY: hdr and the buffers it points to are boxed and stay in
        // `pending` until the matching read() returns.
        let rc = unsafe {
            libc::write(
                self.fd,
                (&*hdr as *const SgIoHdr).cast(),
                mem::size_of::<SgIoHdr>(),
            )
        };
        if rc < 0 {
            return Err(TransportError::CommandFailed(format!(
                "sg write cmd 0x{:02x}: {}",
                cdb[0],
                std::io::Error::last_os_error()
            )));
        }
        self.pending.insert(
            token,
            PendingIo {
                hdr,
                _cdb: cdb,
                data,
                sense,
                len,
            },
        );
        Ok(token)
    }

    fn reap(&mut self, token: Token, dest: &mut [u8]) -> Result<Completion> {
        let Some(mut io) = self.pending.remove(&token) else {
            return Err(TransportError::UnknownToken(token));
        };
        io.hdr.pack_id = token as c_int;
        // SAFETY: the header is the one written for this request; the kernel
        // fills in status fields and the data/sense buffers it points to.
        let rc = unsafe {
            libc::read(
                self.fd,
                (&mut *io.hdr as *mut SgIoHdr).cast(),
                mem::size_of::<SgIoHdr>(),
            )
        };
        if rc < 0 {
            return Err(TransportError::CommandFailed(format!(
                "sg read token {token}: {}",
                std::io::Error::last_os_error()
            )));
        }
        let completion = io.hdr.completion(io.len, &io.sense[..])?;
        let n = completion.transferred.min(dest.len());
        dest[..n].copy_from_slice(&io.data[..n]);
        Ok(completion)
    }

    fn flush(&mut self) -> Result<()> {
        let tokens: Vec<Token> = self.pending.keys().copied().collect();
        let mut scratch = Vec::new();
        for token in tokens {
            let len = self.pending.get(&token).map(|p| p.len).unwrap_or(0);
            scratch.resize(len, 0);
            if let Err(e) = self.reap(token, &mut scratch) {
                log::debug!("flush: {e}");
            }
        }
        Ok(())
    }
}

impl Drop for SgDevice {
    fn drop(&mut self) {
        let _ = self.flush();
        // SAFETY: fd was opened by us and is closed exactly once.
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matches_kernel_abi_size() {
        // 64-bit: 88 bytes, 32-bit: 64 bytes.
        let expected = if mem::size_of::<usize>() == 8 { 88 } else { 64 };
        assert_eq!(mem::size_of::<SgIoHdr>(), expected);
    }

    #[test]
    fn completion_maps_check_condition() {
        let mut cdb = [0x28u8; 10];
        let mut data = [0u8; 16];
        let mut sense = [0u8; SENSE_LEN];
        sense[0] = 0x70;
        sense[2] = 0x03;
        let mut hdr = SgIoHdr::new(&mut cdb, SG_DXFER_FROM_DEV, &mut data, &mut sense);
        hdr.status = SCSI_STATUS_CHECK_CONDITION;
        hdr.sb_len_wr = 18;
        hdr.resid = 6;
        let c = hdr.completion(16, &sense).unwrap();
        assert_eq!(c.transferred, 10);
        match c.status {
            ScsiStatus::CheckCondition(s) => {
                assert_eq!(s.len(), 18);
                assert_eq!(s[2], 0x03);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn completion_maps_busy_and_host_errors() {
        let mut cdb = [0u8; 6];
        let mut sense = [0u8; SENSE_LEN];
        let mut hdr = SgIoHdr::new(&mut cdb, SG_DXFER_NONE, &mut [], &mut sense);
        hdr.status = SCSI_STATUS_BUSY;
        assert_eq!(hdr.completion(0, &sense).unwrap().status, ScsiStatus::Busy);

        hdr.status = 0;
        hdr.host_status = 0x03;
        assert!(matches!(
            hdr.completion(0, &sense),
            Err(TransportError::CommandFailed(_))
        ));
    }

    #[test]
    fn ascii_field_trims() {
        assert_eq!(ascii_field(b"SHARP   "), "SHARP");
        assert_eq!(ascii_field(b"JX-250\0\0"), "JX-250");
    }

    #[test]
    fn open_missing_node_fails() {
        assert!(SgDevice::open("/dev/does-not-exist-sg").is_err());
    }
}
