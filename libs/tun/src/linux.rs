use std::ffi::{c_int, c_short, c_uchar};
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use libc::{IFF_NO_PI, IFF_TUN, IFNAMSIZ, O_RDWR, close, ioctl, open, read, sockaddr, write};

use crate::Tun;
use crate::unix::{Device, PacketFd, set_non_blocking};

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const TUN_FILE: &[u8] = b"/dev/net/tun\0";

#[repr(C)]
union IfrIfru {
    ifru_addr: sockaddr,
    ifru_flags: c_short,
    ifru_mtu: c_int,
}

#[repr(C)]
struct ifreq {
    ifr_name: [c_uchar; IFNAMSIZ],
    ifr_ifru: IfrIfru,
}

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
    if name.len() >= IFNAMSIZ {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("interface name `{name}` is too long"),
        ));
    }

    let fd = match unsafe { open(TUN_FILE.as_ptr() as _, O_RDWR) } {
        -1 => return Err(io::Error::last_os_error()),
        fd => TunFd(fd),
    };

    let mut ifr = ifreq {
        ifr_name: [0; IFNAMSIZ],
        ifr_ifru: IfrIfru {
            ifru_flags: (IFF_TUN | IFF_NO_PI) as _,
        },
    };
    ifr.ifr_name[..name.len()].copy_from_slice(name.as_bytes());

    if unsafe { ioctl(fd.0, TUNSETIFF as _, &ifr) } < 0 {
        return Err(io::Error::last_os_error());
    }

    set_non_blocking(fd.0)?;

    tracing::debug!(%name, "Created TUN device");

    Ok(Box::new(Device::new(fd, name.to_owned())?))
}
