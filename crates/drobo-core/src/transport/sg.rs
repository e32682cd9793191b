//! Linux `sg` driver transport (`SG_IO` ioctl).

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::ptr;

use tracing::{debug, info, instrument};

use super::traits::{Completion, DataBuffer, ScsiTransport, TransportError};
use crate::protocol::constants::{
    DEFAULT_TIMEOUT_MS, SENSE_BUFFER_LEN, SG_DXFER_NONE, SG_GET_VERSION_NUM, SG_INTERFACE_ID,
    SG_IO,
};

/// `struct sg_io_hdr` from `<scsi/sg.h>`.
#[repr(C)]
#[derive(Debug)]
pub struct SgIoHeader {
    pub interface_id: libc::c_int,
    pub dxfer_direction: libc::c_int,
    pub cmd_len: libc::c_uchar,
    pub mx_sb_len: libc::c_uchar,
    pub iovec_count: libc::c_ushort,
    pub dxfer_len: libc::c_uint,
    pub dxferp: *mut libc::c_void,
    pub cmdp: *mut libc::c_uchar,
    pub sbp: *mut libc::c_uchar,
    pub timeout: libc::c_uint,
    pub flags: libc::c_uint,
    pub pack_id: libc::c_int,
    pub usr_ptr: *mut libc::c_void,
    pub status: libc::c_uchar,
    pub masked_status: libc::c_uchar,
    pub msg_status: libc::c_uchar,
    pub sb_len_wr: libc::c_uchar,
    pub host_status: libc::c_ushort,
    pub driver_status: libc::c_ushort,
    pub resid: libc::c_int,
    pub duration: libc::c_uint,
    pub info: libc::c_uint,
}

impl Default for SgIoHeader {
    fn default() -> Self {
        Self {
            interface_id: SG_INTERFACE_ID,
            dxfer_direction: 0,
            cmd_len: 0,
            mx_sb_len: 0,
            iovec_count: 0,
            dxfer_len: 0,
            dxferp: ptr::null_mut(),
            cmdp: ptr::null_mut(),
            sbp: ptr::null_mut(),
            timeout: DEFAULT_TIMEOUT_MS,
            flags: 0,
            pack_id: 0,
            usr_ptr: ptr::null_mut(),
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
}

/// Pass-through transport over an open `/dev/sgN` (or block device) file.
///
/// The file descriptor is closed when the transport is dropped.
#[derive(Debug)]
pub struct SgTransport {
    file: File,
    path: String,
    trace: bool,
}

impl SgTransport {
    /// Open the device read-write.
    #[instrument(level = "info")]
    pub fn open(path: &str, trace: bool) -> Result<Self, TransportError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| TransportError::OpenFailed {
                path: path.to_string(),
                source,
            })?;

        info!(path, "Device opened");
        Ok(Self {
            file,
            path: path.to_string(),
            trace,
        })
    }

    /// `sg` driver version, e.g. 30536 for 3.5.36.
    pub fn driver_version(&self) -> Result<i32, TransportError> {
        let mut version: libc::c_int = 0;
        // SAFETY: the fd is open for the lifetime of `self` and `version`
        // is a valid c_int the driver writes into.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                SG_GET_VERSION_NUM as _,
                &mut version as *mut libc::c_int,
            )
        };
        if rc < 0 {
            return Err(TransportError::IoctlFailed(io::Error::last_os_error()));
        }
        Ok(version)
    }
}

impl ScsiTransport for SgTransport {
    #[instrument(skip(self, cdb, buffer), fields(opcode = cdb.first().copied().unwrap_or(0), len = buffer.data.len()))]
    fn submit(
        &mut self,
        cdb: &[u8],
        mut buffer: DataBuffer,
        timeout_ms: u32,
    ) -> Result<Completion, TransportError> {
        let mut command = cdb.to_vec();
        let mut sense = [0u8; SENSE_BUFFER_LEN];

        // Data-less commands (vendor actions) carry no transfer at all.
        let dxfer_direction = if buffer.data.is_empty() {
            SG_DXFER_NONE
        } else {
            buffer.direction.sg_value()
        };

        let mut hdr = SgIoHeader {
            dxfer_direction,
            cmd_len: command.len() as libc::c_uchar,
            mx_sb_len: SENSE_BUFFER_LEN as libc::c_uchar,
            dxfer_len: buffer.data.len() as libc::c_uint,
            dxferp: buffer.data.as_mut_ptr().cast(),
            cmdp: command.as_mut_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: timeout_ms,
            ..SgIoHeader::default()
        };

        // SAFETY: every pointer in `hdr` refers to a live local buffer of
        // the advertised length, and none of them move until the call returns.
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                SG_IO as _,
                &mut hdr as *mut SgIoHeader,
            )
        };
        if rc < 0 {
            return Err(TransportError::IoctlFailed(io::Error::last_os_error()));
        }

        debug!(
            status = hdr.status,
            host_status = hdr.host_status,
            driver_status = hdr.driver_status,
            resid = hdr.resid,
            duration_ms = hdr.duration,
            "SG_IO complete"
        );

        let sense_len = (hdr.sb_len_wr as usize).min(SENSE_BUFFER_LEN);
        Ok(Completion {
            data: buffer.data,
            status: hdr.status,
            host_status: hdr.host_status,
            residual: hdr.resid,
            sense: sense[..sense_len].to_vec(),
        })
    }

    fn device_path(&self) -> &str {
        &self.path
    }

    fn trace_enabled(&self) -> bool {
        self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_defaults() {
        let hdr = SgIoHeader::default();
        assert_eq!(hdr.interface_id, 'S' as i32);
        assert_eq!(hdr.timeout, 20_000);
        assert_eq!(hdr.status, 0);
        assert_eq!(hdr.resid, 0);
        assert!(hdr.dxferp.is_null());
    }

    #[test]
    fn test_header_matches_kernel_layout() {
        // 64-bit layout of struct sg_io_hdr
        if cfg!(target_pointer_width = "64") {
            assert_eq!(std::mem::size_of::<SgIoHeader>(), 88);
        }
    }

    #[test]
    fn test_open_missing_device() {
        let err = SgTransport::open("/nonexistent/sg99", false).unwrap_err();
        assert!(matches!(err, TransportError::OpenFailed { .. }));
    }
}
