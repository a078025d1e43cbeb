use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use libc::{IFF_MULTICAST, IFF_POINTOPOINT, O_RDWR, c_int, close, ioctl, open, read, write};

use crate::Tun;
use crate::unix::{Device, PacketFd, set_non_blocking};

// From net/if_tun.h: _IOW('t', 94, int) and _IOW('t', 96, int).
const TUNSIFMODE: libc::c_ulong = 0x8004_745e;
const TUNSIFHEAD: libc::c_ulong = 0x8004_7460;

pub(crate) struct TunFd(RawFd);

impl AsRawFd for TunFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl Drop for TunFd {
    fn drop(&mut self) {
        unsafe { close(self.0) };
    }
}

impl PacketFd for TunFd {
    fn read(&self, dst: &mut [u8]) -> io::Result<usize> {
        match unsafe { read(self.0, dst.as_mut_ptr() as _, dst.len()) } {
            -1 => Err(io::Error::last_os_error()),
            n => Ok(n as usize),
        }
    }

    fn write(&self, src: &[u8]) -> io::Result<usize> {
        match unsafe { write(self.0, src.as_ptr() as _, src.len() as _) } {
            -1 => Err(io::Error::last_os_error()),
            n => Ok(n as usize),
        }
    }
}

pub(crate) fn create(name: &str) -> io::Result<Box<dyn Tun>> {
    let path = CString::new(format!("/dev/{name}"))
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "interface name contains NUL"))?;

    let fd = match unsafe { open(path.as_ptr(), O_RDWR) } {
        -1 => return Err(io::Error::last_os_error()),
        fd => TunFd(fd),
    };

    // Point-to-point, no link-level header on packets.
    let mode: c_int = IFF_POINTOPOINT | IFF_MULTICAST;
    if unsafe { ioctl(fd.0, TUNSIFMODE as _, &mode) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let head: c_int = 0;
    if unsafe { ioctl(fd.0, TUNSIFHEAD as _, &head) } < 0 {
        return Err(io::Error::last_os_error());
    }

    set_non_blocking(fd.0)?;

    tracing::debug!(%name, "Opened TUN device");

    Ok(Box::new(Device::new(fd, name.to_owned())?))
}
