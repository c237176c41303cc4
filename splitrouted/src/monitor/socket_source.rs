//! Raw kernel route-change socket, opened once and read on a dedicated
//! blocking thread. No message parsing — any readable byte is treated as an
//! edge-trigger, per the design: the monitor re-samples via the driver
//! rather than decoding the wire format itself.

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use tokio::sync::mpsc;

/// Owns the raw socket fd. `stop()` closes it from another thread, which
/// unblocks the pending `read()` in the reader thread with an error.
pub struct SocketEventSource {
    fd: Arc<AtomicI32>,
}

impl SocketEventSource {
    /// Opens the platform route-change socket and spawns the blocking
    /// reader thread, which sends `()` on `tx` (capacity 1, ticks coalesce)
    /// whenever the socket becomes readable. `error_count` is bumped once
    /// if the read loop exits because of an actual error rather than a
    /// deliberate `stop()` (EOF after the fd is swapped to -1 doesn't count).
    pub fn spawn(tx: mpsc::Sender<()>, error_count: Arc<AtomicU32>) -> io::Result<Self> {
        let fd = open_route_socket()?;
        let shared_fd = Arc::new(AtomicI32::new(fd));
        let reader_fd = Arc::clone(&shared_fd);

        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                let current = reader_fd.load(Ordering::SeqCst);
                if current < 0 {
                    return;
                }
                // SAFETY: `current` is a valid open fd for the lifetime of this call,
                // since `stop()` only ever transitions it to -1 after closing, never reuses it.
                let n = unsafe { libc::read(current, buf.as_mut_ptr().cast(), buf.len()) };
                if n <= 0 {
                    if reader_fd.load(Ordering::SeqCst) >= 0 {
                        error_count.fetch_add(1, Ordering::SeqCst);
                    }
                    return;
                }
                if tx.try_send(()).is_err() {
                    // Receiver full or closed: a tick is already pending, or we're shutting down.
                }
            }
        });

        Ok(Self { fd: shared_fd })
    }

    /// Closes the socket, unblocking the reader thread's `read()` call.
    pub fn stop(&self) {
        let fd = self.fd.swap(-1, Ordering::SeqCst);
        if fd >= 0 {
            // SAFETY: `fd` was opened by `spawn` and has not been closed yet (guarded by the swap above).
            unsafe {
                libc::close(fd);
            }
        }
    }
}

impl Drop for SocketEventSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(target_os = "linux")]
fn open_route_socket() -> io::Result<RawFd> {
    // NETLINK_ROUTE socket subscribed to link and IPv4 route multicast groups.
    const NETLINK_ROUTE: libc::c_int = 0;
    const RTMGRP_LINK: u32 = 0x1;
    const RTMGRP_IPV4_ROUTE: u32 = 0x40;

    // SAFETY: standard libc socket construction; the returned fd is owned by the caller.
    let fd = unsafe { libc::socket(libc::AF_NETLINK, libc::SOCK_RAW | libc::SOCK_CLOEXEC, NETLINK_ROUTE) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as u16;
    addr.nl_groups = RTMGRP_LINK | RTMGRP_IPV4_ROUTE;

    // SAFETY: `addr` is a validly initialized `sockaddr_nl` of the expected size.
    let rc = unsafe {
        libc::bind(
            fd,
            (&addr as *const libc::sockaddr_nl).cast(),
            std::mem::size_of::<libc::sockaddr_nl>() as u32,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        unsafe {
            libc::close(fd);
        }
        return Err(err);
    }
    Ok(fd)
}

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "openbsd", target_os = "netbsd"))]
fn open_route_socket() -> io::Result<RawFd> {
    // SAFETY: standard libc socket construction; the returned fd is owned by the caller.
    let fd = unsafe { libc::socket(libc::AF_ROUTE, libc::SOCK_RAW, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
fn open_route_socket() -> io::Result<RawFd> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "no route-change socket on this platform"))
}
