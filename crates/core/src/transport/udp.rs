//! UDP listener: bound RTP *or* RTCP socket, receive loop dispatch.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Which of the RTP/RTCP pair a listener or datagram belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Rtp,
    Rtcp,
}

/// A single bound UDP socket with a background receive loop.
///
/// Used both for a [`Stream`](crate::mount::Stream)'s ingress sockets (one
/// per role) and for a UDP subscriber's server-side send/receive sockets.
/// The receive loop polls with a bounded timeout so [`close`](Self::close)
/// is observed promptly without needing to interrupt a blocking read.
pub struct UdpListener {
    socket: Arc<UdpSocket>,
    port: u16,
    running: Arc<AtomicBool>,
}

impl UdpListener {
    /// Bind `0.0.0.0:port`. Address-in-use is reported as
    /// [`RelayError::PortUnavailable`] so callers can cycle to a fresh
    /// port pair.
    pub fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).map_err(|err| {
            if err.kind() == std::io::ErrorKind::AddrInUse {
                RelayError::PortUnavailable(port, err)
            } else {
                RelayError::Io(err)
            }
        })?;
        socket.set_read_timeout(Some(Duration::from_millis(500)))?;

        Ok(Self {
            socket: Arc::new(socket),
            port,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Shared handle to the bound socket, for sending datagrams out of
    /// band from the receive loop (e.g. fan-out to UDP subscribers).
    pub fn socket(&self) -> Arc<UdpSocket> {
        self.socket.clone()
    }

    /// Spawn the receive loop. `on_datagram` is invoked with each inbound
    /// packet's bytes and sender address, for as long as the listener is
    /// open. Safe to call once per listener.
    pub fn spawn_receive_loop<F>(&self, on_datagram: F)
    where
        F: Fn(&[u8], SocketAddr) + Send + 'static,
    {
        let socket = self.socket.clone();
        let running = self.running.clone();
        let port = self.port;

        thread::spawn(move || {
            let mut buf = [0u8; 65_536];
            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut buf) {
                    Ok((n, addr)) => on_datagram(&buf[..n], addr),
                    Err(ref e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) => {}
                    Err(e) => {
                        tracing::debug!(port, error = %e, "udp receive loop ending");
                        break;
                    }
                }
            }
            tracing::trace!(port, "udp receive loop exited");
        });
    }

    /// Stop the receive loop. The loop observes this within its poll
    /// timeout; the socket itself closes once all `Arc` handles drop.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
