//! Downstream UDP forwarder.
//!
//! Packs outgoing lines into newline-separated datagrams of at most
//! [`MAX_UDP_LENGTH`] bytes and sends a packet as soon as the next line
//! would not fit. Send errors are counted and logged, never propagated —
//! a dead collector must not stall the relay.

use anyhow::{Context, Result};
use std::net::UdpSocket;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use crate::metrics::RelayMetrics;
use crate::parse::MAX_UDP_LENGTH;

pub struct Forwarder {
    socket: UdpSocket,
    buf: Vec<u8>,
    metrics: Arc<RelayMetrics>,
}

impl Forwarder {
    pub fn new(downstream: &str, metrics: Arc<RelayMetrics>) -> Result<Forwarder> {
        let socket =
            UdpSocket::bind("0.0.0.0:0").context("failed to bind forwarder socket")?;
        socket
            .connect(downstream)
            .with_context(|| format!("failed to resolve downstream address {}", downstream))?;
        Ok(Forwarder {
            socket,
            buf: Vec::with_capacity(MAX_UDP_LENGTH),
            metrics,
        })
    }

    /// Queue one line, sending the pending packet first if it won't fit.
    /// A line longer than one datagram can never be sent and is dropped.
    pub fn send_line(&mut self, line: &[u8]) {
        if line.is_empty() || line.len() > MAX_UDP_LENGTH {
            return;
        }
        let needed = if self.buf.is_empty() {
            line.len()
        } else {
            line.len() + 1
        };
        if self.buf.len() + needed > MAX_UDP_LENGTH {
            self.flush();
        }
        if !self.buf.is_empty() {
            self.buf.push(b'\n');
        }
        self.buf.extend_from_slice(line);
    }

    /// Send the pending packet, if any.
    pub fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        match self.socket.send(&self.buf) {
            Ok(_) => {
                self.metrics.forward_packets.fetch_add(1, Relaxed);
            }
            Err(e) => {
                self.metrics.forward_errors.fetch_add(1, Relaxed);
                tracing::warn!(err = %e, "downstream send failed");
            }
        }
        self.buf.clear();
    }
}
