//! UDP ingest listener.
//!
//! Binds the statsd ingest socket and moves raw datagrams into a bounded
//! channel for the pipeline thread. The socket gets a large receive buffer
//! (`SO_RCVBUFFORCE` when root, plain `SO_RCVBUF` otherwise) because
//! ingest bursts far exceed what the default rmem ceiling absorbs; when the
//! pipeline falls behind, datagrams are dropped at the channel and counted
//! rather than blocking the socket.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use crate::metrics::RelayMetrics;

/// One raw datagram as received from a client. May hold many
/// newline-separated lines.
pub struct Datagram {
    pub data: Vec<u8>,
}

// Clients batch many lines per datagram; accept anything up to the UDP
// payload maximum.
const PKT_CAP: usize = 65536;

const RECV_BUF: usize = 4 * 1024 * 1024;

pub struct Listener {
    socket: Socket,
    tx: Sender<Datagram>,
    metrics: Arc<RelayMetrics>,
}

impl Listener {
    pub fn bind(
        addr: SocketAddr,
        tx: Sender<Datagram>,
        metrics: Arc<RelayMetrics>,
    ) -> Result<Listener> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket
            .bind(&addr.into())
            .with_context(|| format!("failed to bind ingest socket {}", addr))?;

        #[cfg(target_os = "linux")]
        {
            use std::mem::size_of;
            use std::os::unix::io::AsRawFd;
            let fd = socket.as_raw_fd();
            unsafe {
                // SO_RCVBUFFORCE bypasses net.core.rmem_max (requires root);
                // fall back to SO_RCVBUF with a warning if unprivileged.
                let buf_val = RECV_BUF as libc::c_int;
                let force_ok = libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_RCVBUFFORCE,
                    &buf_val as *const _ as _,
                    size_of::<libc::c_int>() as _,
                ) == 0;
                if !force_ok {
                    socket.set_recv_buffer_size(RECV_BUF).ok();
                    if let Ok(actual) = socket.recv_buffer_size() {
                        if actual < RECV_BUF / 2 {
                            tracing::warn!(
                                "recv buffer is {}KB (wanted {}KB); \
                                 run as root or: sysctl -w net.core.rmem_max={}",
                                actual / 1024,
                                RECV_BUF / 1024,
                                RECV_BUF * 2
                            );
                        }
                    }
                }
            }
        }

        #[cfg(not(target_os = "linux"))]
        socket.set_recv_buffer_size(RECV_BUF).ok();

        Ok(Listener {
            socket,
            tx,
            metrics,
        })
    }

    /// The address actually bound (resolves port 0 to the assigned port).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = self.socket.local_addr()?;
        addr.as_socket()
            .context("ingest socket has no inet address")
    }

    /// Main receive loop; runs until the process exits.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!("ingest listener started");
        let mut buf = vec![0u8; PKT_CAP];
        loop {
            let buf_uninit: &mut [std::mem::MaybeUninit<u8>] = unsafe {
                std::slice::from_raw_parts_mut(buf.as_mut_ptr() as _, buf.len())
            };
            let n = match self.socket.recv(buf_uninit) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(err = %e, "ingest recv failed");
                    continue;
                }
            };
            if n == 0 {
                continue;
            }

            self.metrics.packets_received.fetch_add(1, Relaxed);
            self.metrics.bytes_received.fetch_add(n as u64, Relaxed);

            if self
                .tx
                .try_send(Datagram {
                    data: buf[..n].to_vec(),
                })
                .is_err()
            {
                self.metrics.packets_dropped.fetch_add(1, Relaxed);
            }
        }
    }
}
