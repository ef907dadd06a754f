//! Subscriber sessions and wrappers.
//!
//! A [`SubscriberSession`] is one subscribed leg — one transport, one
//! stream. A [`SubscriberWrapper`] aggregates every session created on a
//! single RTSP control connection (one per SETUP) and owns that
//! connection's keepalive deadline. Back-references to the owning mount
//! are by path, not pointer — sessions look the mount
//! back up through the registry rather than holding an `Arc<Mount>`,
//! which would cycle with the mount's own `Arc<Stream>` → `Arc<SubscriberSession>`
//! ownership.

pub mod transport;

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use transport::TransportRequest;

use crate::error::{RelayError, Result};
use crate::interleave::TcpInterleaver;
use crate::mount::{Mount, MountRegistry};
use crate::pool::PortPool;
use crate::transport::udp::UdpListener;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);
static WRAPPER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default keepalive interval in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 60;

fn next_hex_id(counter: &AtomicU64) -> String {
    format!("{:016X}", counter.fetch_add(1, Ordering::SeqCst))
}

enum SessionTransport {
    Udp {
        remote_rtp_addr: SocketAddr,
        remote_rtcp_addr: SocketAddr,
        rtp_listener: UdpListener,
        rtcp_listener: UdpListener,
    },
    Tcp {
        interleaver: Arc<TcpInterleaver>,
    },
}

/// One subscriber leg: a transport (UDP socket pair or TCP
/// interleaver) bound to one stream of one mount.
pub struct SubscriberSession {
    id: String,
    mount_path: String,
    stream_id: u32,
    registry: MountRegistry,
    pool: PortPool,
    transport: SessionTransport,
    open: AtomicBool,
}

impl SubscriberSession {
    /// Construct a TCP-interleaved subscriber session. `setup()` for TCP
    /// is a no-op beyond this construction.
    pub fn new_tcp(
        mount_path: String,
        stream_id: u32,
        registry: MountRegistry,
        pool: PortPool,
        interleaver: Arc<TcpInterleaver>,
    ) -> Self {
        Self {
            id: next_hex_id(&SESSION_COUNTER),
            mount_path,
            stream_id,
            registry,
            pool,
            transport: SessionTransport::Tcp { interleaver },
            open: AtomicBool::new(true),
        }
    }

    /// Construct a UDP subscriber session, allocating a server-side port
    /// pair and binding RTP then RTCP sockets. Address-in-use on either
    /// bind releases the pair and retries with a fresh one.
    ///
    /// RTCP datagrams received on the bound RTCP socket count as keepalive
    /// traffic and refresh `wrapper` directly, independent of the control
    /// connection's own RTSP traffic — this is how a UDP subscriber that
    /// never sends another OPTIONS/PLAY stays alive.
    pub fn new_udp(
        mount_path: String,
        stream_id: u32,
        registry: MountRegistry,
        pool: PortPool,
        wrapper: Weak<SubscriberWrapper>,
        remote_ip: IpAddr,
        client_rtp_port: u16,
        client_rtcp_port: u16,
    ) -> Result<(Self, u16, u16)> {
        loop {
            let rtp_port = pool.next().ok_or(RelayError::PoolExhausted)?;
            let rtcp_port = rtp_port + 1;

            let rtp_listener = match UdpListener::bind(rtp_port) {
                Ok(l) => l,
                Err(RelayError::PortUnavailable(p, _)) => {
                    pool.release(rtp_port);
                    tracing::warn!(port = p, "subscriber rtp port in use, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let rtcp_listener = match UdpListener::bind(rtcp_port) {
                Ok(l) => l,
                Err(RelayError::PortUnavailable(p, _)) => {
                    rtp_listener.close();
                    pool.release(rtp_port);
                    tracing::warn!(port = p, "subscriber rtcp port in use, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let server_rtp_port = rtp_listener.port();
            let server_rtcp_port = rtcp_listener.port();

            let keepalive_wrapper = wrapper.clone();
            rtcp_listener.spawn_receive_loop(move |_payload, _addr| {
                if let Some(wrapper) = keepalive_wrapper.upgrade() {
                    wrapper.refresh();
                }
            });

            let session = Self {
                id: next_hex_id(&SESSION_COUNTER),
                mount_path,
                stream_id,
                registry,
                pool,
                transport: SessionTransport::Udp {
                    remote_rtp_addr: SocketAddr::new(remote_ip, client_rtp_port),
                    remote_rtcp_addr: SocketAddr::new(remote_ip, client_rtcp_port),
                    rtp_listener,
                    rtcp_listener,
                },
                open: AtomicBool::new(true),
            };
            return Ok((session, server_rtp_port, server_rtcp_port));
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// No-op if closed. TCP enqueues via the interleaver; UDP sends to the
    /// subscriber's remote RTP port. Send errors are logged and swallowed.
    pub fn send_rtp(&self, payload: &[u8]) {
        if !self.is_open() {
            return;
        }
        match &self.transport {
            SessionTransport::Tcp { interleaver } => interleaver.send_rtp(payload),
            SessionTransport::Udp {
                remote_rtp_addr,
                rtp_listener,
                ..
            } => {
                if let Err(e) = rtp_listener.socket().send_to(payload, remote_rtp_addr) {
                    tracing::debug!(session_id = %self.id, error = %e, "udp rtp send failed");
                }
            }
        }
    }

    pub fn send_rtcp(&self, payload: &[u8]) {
        if !self.is_open() {
            return;
        }
        match &self.transport {
            SessionTransport::Tcp { interleaver } => interleaver.send_rtcp(payload),
            SessionTransport::Udp {
                remote_rtcp_addr,
                rtcp_listener,
                ..
            } => {
                if let Err(e) = rtcp_listener.socket().send_to(payload, remote_rtcp_addr) {
                    tracing::debug!(session_id = %self.id, error = %e, "udp rtcp send failed");
                }
            }
        }
    }

    /// Idempotent close: flips `open`, leaves the owning mount's stream
    /// (which may fire `onMountNowEmpty`), tears down transport resources,
    /// and releases any pool ports it owns.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(mount) = self.registry.get_mount(&self.mount_path) {
            mount.client_leave(self.stream_id, &self.id);
        }

        match &self.transport {
            SessionTransport::Tcp { interleaver } => interleaver.close(),
            SessionTransport::Udp {
                rtp_listener,
                rtcp_listener,
                ..
            } => {
                let port = rtp_listener.port();
                rtp_listener.close();
                rtcp_listener.close();
                self.pool.release(port);
            }
        }

        tracing::info!(session_id = %self.id, "subscriber session closed");
    }
}

/// Aggregates every [`SubscriberSession`] created on one RTSP control
/// connection, and owns that connection's keepalive deadline.
pub struct SubscriberWrapper {
    id: String,
    mount: Arc<Mount>,
    authorization_header: Mutex<Option<String>>,
    clients: Mutex<Vec<Arc<SubscriberSession>>>,
    deadline: Mutex<Instant>,
    keepalive: Duration,
    closed: AtomicBool,
}

impl SubscriberWrapper {
    pub fn new(mount: Arc<Mount>, authorization_header: Option<String>, keepalive_secs: u64) -> Self {
        let keepalive = Duration::from_secs(keepalive_secs);
        Self {
            id: next_hex_id(&WRAPPER_COUNTER),
            mount,
            authorization_header: Mutex::new(authorization_header),
            clients: Mutex::new(Vec::new()),
            deadline: Mutex::new(Instant::now() + keepalive),
            keepalive,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mount(&self) -> &Arc<Mount> {
        &self.mount
    }

    pub fn authorization_header(&self) -> Option<String> {
        self.authorization_header.lock().clone()
    }

    /// Register a session under this wrapper (called once per SETUP on
    /// this connection).
    pub fn add_client(&self, session: Arc<SubscriberSession>) {
        self.clients.lock().push(session);
    }

    /// Attach every contained session to its stream's fan-out set.
    pub fn play(&self) {
        for session in self.clients.lock().iter() {
            if let Some(stream) = self.mount.stream(session.stream_id()) {
                stream.add_client(session.clone());
            }
        }
    }

    /// Reset the keepalive deadline from now.
    pub fn refresh(&self) {
        *self.deadline.lock() = Instant::now() + self.keepalive;
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= *self.deadline.lock()
    }

    /// Idempotent: closes every contained session. Does not itself fire
    /// `clientClose` — the caller (keepalive sweep or TEARDOWN handler)
    /// does that once it knows whether this was a timeout or an explicit
    /// teardown.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let clients: Vec<Arc<SubscriberSession>> = self.clients.lock().drain(..).collect();
        for client in clients {
            client.close();
        }
    }
}

/// Process-wide map from `Session` header value to [`SubscriberWrapper`],
/// shared between the Client Server's request handlers and the keepalive
/// sweep thread.
#[derive(Clone, Default)]
pub struct WrapperRegistry {
    wrappers: Arc<Mutex<std::collections::HashMap<String, Arc<SubscriberWrapper>>>>,
}

impl WrapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, wrapper: Arc<SubscriberWrapper>) {
        self.wrappers.lock().insert(wrapper.id().to_string(), wrapper);
    }

    pub fn get(&self, id: &str) -> Option<Arc<SubscriberWrapper>> {
        self.wrappers.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<SubscriberWrapper>> {
        self.wrappers.lock().remove(id)
    }

    /// Sweep expired wrappers and wrappers whose mount is gone from the
    /// registry, closing and removing each and invoking `on_gone` with the
    /// mount it was attached to.
    pub fn sweep<F: FnMut(&Arc<Mount>)>(&self, mount_registry: &MountRegistry, now: Instant, mut on_gone: F) {
        let stale: Vec<Arc<SubscriberWrapper>> = {
            let wrappers = self.wrappers.lock();
            wrappers
                .values()
                .filter(|w| {
                    w.is_expired(now) || mount_registry.get_mount(w.mount().path()).is_none()
                })
                .cloned()
                .collect()
        };

        for wrapper in stale {
            self.wrappers.lock().remove(wrapper.id());
            wrapper.close();
            on_gone(wrapper.mount());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PortPool;

    fn registry() -> MountRegistry {
        MountRegistry::new(PortPool::new(18000, 16))
    }

    #[test]
    fn wrapper_keepalive_expires_after_interval() {
        let reg = registry();
        let mount = reg.add_mount("/live/a", Vec::new(), None);
        let wrapper = SubscriberWrapper::new(mount, None, 60);
        assert!(!wrapper.is_expired(Instant::now()));
        assert!(wrapper.is_expired(Instant::now() + Duration::from_secs(61)));
    }

    #[test]
    fn wrapper_refresh_extends_deadline() {
        let reg = registry();
        let mount = reg.add_mount("/live/a", Vec::new(), None);
        let wrapper = SubscriberWrapper::new(mount, None, 60);
        let later = Instant::now() + Duration::from_secs(59);
        assert!(!wrapper.is_expired(later));
        wrapper.refresh();
        assert!(!wrapper.is_expired(later));
    }

    #[test]
    fn udp_session_close_is_idempotent() {
        let reg = registry();
        let mount = reg.add_mount("/live/a", Vec::new(), None);
        mount.create_stream("/live/a/streamid=0").unwrap();
        let pool = PortPool::new(18100, 8);
        let (session, _rtp, _rtcp) = SubscriberSession::new_udp(
            "/live/a".to_string(),
            0,
            reg.clone(),
            pool.clone(),
            Weak::new(),
            "127.0.0.1".parse().unwrap(),
            40000,
            40001,
        )
        .unwrap();
        session.close();
        session.close();
        assert!(!session.is_open());
    }

    #[test]
    fn wrapper_registry_sweep_removes_expired() {
        let reg = registry();
        let mount = reg.add_mount("/live/a", Vec::new(), None);
        let wrappers = WrapperRegistry::new();
        let wrapper = Arc::new(SubscriberWrapper::new(mount, None, 60));
        wrappers.insert(wrapper.clone());

        let mut seen = 0;
        wrappers.sweep(&reg, Instant::now() + Duration::from_secs(61), |_m| seen += 1);
        assert_eq!(seen, 1);
        assert!(wrappers.get(wrapper.id()).is_none());
    }
}
