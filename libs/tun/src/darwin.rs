use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, RawFd};

use libc::{
    AF_INET, AF_INET6, AF_SYS_CONTROL, AF_SYSTEM, CTLIOCGINFO, PF_SYSTEM, SOCK_DGRAM,
    SYSPROTO_CONTROL, close, connect, ctl_info, ioctl, iovec, msghdr, recvmsg, sendmsg, sockaddr,
    sockaddr_ctl, socket,
};

use crate::Tun;
use crate::unix::{Device, PacketFd, set_non_blocking};

const CTL_NAME: &[u8] = b"com.apple.net.utun_control";

/// utun prepends a 4-byte address-family word to every packet.
///
/// We hide it with scatter/gather I/O: discarded on read, synthesized on write
/// from the IP version nibble.
const AF_PREFIX_LEN: usize = 4;

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
        let mut hdr = [0u8; AF_PREFIX_LEN];

        let mut iov = [
            iovec {
                iov_base: hdr.as_mut_ptr() as _,
                iov_len: hdr.len(),
            },
            iovec {
                iov_base: dst.as_mut_ptr() as _,
                iov_len: dst.len(),
            },
        ];

        let mut msg_hdr = msghdr {
            msg_name: std::ptr::null_mut(),
            msg_namelen: 0,
            msg_iov: &mut iov[0],
            msg_iovlen: iov.len() as _,
            msg_control: std::ptr::null_mut(),
            msg_controllen: 0,
            msg_flags: 0,
        };

        match unsafe { recvmsg(self.0, &mut msg_hdr, 0) } {
            -1 => Err(io::Error::last_os_error()),
            0..=4 => Ok(0),
            n => Ok(n as usize - AF_PREFIX_LEN),
        }
    }

    fn write(&self, src: &[u8]) -> io::Result<usize> {
        // The version nibble of the IP header selects the family word.
        let af = match src.first().map(|b| b >> 4) {
            Some(6) => AF_INET6,
            _ => AF_INET,
        };
        let mut hdr = [0, 0, 0, af as u8];

        let mut iov = [
            iovec {
                iov_base: hdr.as_mut_ptr() as _,
                iov_len: hdr.len(),
            },
            iovec {
                iov_base: src.as_ptr() as _,
                iov_len: src.len(),
            },
        ];

        let msg_hdr = msghdr {
            msg_name: std::ptr::null_mut(),
            msg_namelen: 0,
            msg_iov: &mut iov[0],
            msg_iovlen: iov.len() as _,
            msg_control: std::ptr::null_mut(),
            msg_controllen: 0,
            msg_flags: 0,
        };

        match unsafe { sendmsg(self.0, &msg_hdr, 0) } {
            -1 => Err(io::Error::last_os_error()),
            0..=4 => Ok(0),
            n => Ok(n as usize - AF_PREFIX_LEN),
        }
    }
}

pub(crate) fn create(name: &str) -> io::Result<Box<dyn Tun>> {
    // utun devices are reached through a kernel-control socket; the unit is the
    // numeric suffix plus one.
    let unit = name
        .strip_prefix("utun")
        .and_then(|suffix| suffix.parse::<u32>().ok())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid utun device name: `{name}`"),
            )
        })?;

    let mut info = ctl_info {
        ctl_id: 0,
        ctl_name: [0; 96],
    };
    // SAFETY: We only care about maintaining the same byte values, the slice
    // is just a blob of bytes for us; the conversion exists because `c_char`
    // is `i8` on this platform.
    info.ctl_name[..CTL_NAME.len()]
        .copy_from_slice(unsafe { &*(CTL_NAME as *const [u8] as *const [i8]) });

    let fd = match unsafe { socket(PF_SYSTEM, SOCK_DGRAM, SYSPROTO_CONTROL) } {
        -1 => return Err(io::Error::last_os_error()),
        fd => TunFd(fd),
    };

    if unsafe { ioctl(fd.0, CTLIOCGINFO, &mut info as *mut ctl_info) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let addr = sockaddr_ctl {
        sc_len: size_of::<sockaddr_ctl>() as u8,
        sc_family: AF_SYSTEM as u8,
        ss_sysaddr: AF_SYS_CONTROL as u16,
        sc_id: info.ctl_id,
        sc_unit: unit + 1,
        sc_reserved: Default::default(),
    };

    if unsafe {
        connect(
            fd.0,
            &addr as *const sockaddr_ctl as *const sockaddr,
            size_of::<sockaddr_ctl>() as _,
        )
    } < 0
    {
        return Err(io::Error::last_os_error());
    }

    set_non_blocking(fd.0)?;

    tracing::debug!(%name, "Connected utun control socket");

    Ok(Box::new(Device::new(fd, name.to_owned())?))
}
