//! Mounts and streams: the published-resource tree that
//! sits between publisher ingress and subscriber egress.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{RelayError, Result};
use crate::pool::PortPool;
use crate::session::SubscriberSession;
use crate::transport::udp::UdpListener;

static MOUNT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Invoked when a mount's streams all reach zero subscribers. Advisory
/// only — the mount is not auto-destroyed.
pub type MountEmptyHook = Arc<dyn Fn(&Mount) + Send + Sync>;

struct StreamPorts {
    rtp_port: u16,
    rtcp_port: u16,
    rtp_listener: Option<UdpListener>,
    rtcp_listener: Option<UdpListener>,
}

/// One media substream of a mount, addressed by integer stream id.
///
/// Owns its ingress UDP listeners and the pair of ports they're bound to.
/// Subscribers attach at PLAY time via [`add_client`](Self::add_client),
/// not at SETUP — a session exists before it receives any fan-out.
pub struct Stream {
    id: u32,
    ports: Mutex<StreamPorts>,
    clients: Mutex<Vec<Arc<SubscriberSession>>>,
    closed: AtomicBool,
}

impl Stream {
    fn new(id: u32, rtp_port: u16, rtcp_port: u16, rtp_listener: UdpListener, rtcp_listener: UdpListener) -> Self {
        Self {
            id,
            ports: Mutex::new(StreamPorts {
                rtp_port,
                rtcp_port,
                rtp_listener: Some(rtp_listener),
                rtcp_listener: Some(rtcp_listener),
            }),
            clients: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn rtp_port(&self) -> u16 {
        self.ports.lock().rtp_port
    }

    pub fn rtcp_port(&self) -> u16 {
        self.ports.lock().rtcp_port
    }

    /// Spawn receive loops on whichever listeners are currently bound,
    /// fanning each datagram out to every attached client. Called once
    /// right after a (re)bind.
    fn start_ingress(self: &Arc<Self>) {
        let ports = self.ports.lock();
        if let Some(l) = &ports.rtp_listener {
            let stream = self.clone();
            l.spawn_receive_loop(move |payload, _addr| stream.fan_out_rtp(payload));
        }
        if let Some(l) = &ports.rtcp_listener {
            let stream = self.clone();
            l.spawn_receive_loop(move |payload, _addr| stream.fan_out_rtcp(payload));
        }
    }

    /// Re-bind any listener that isn't currently up, cycling to a fresh
    /// port pair on address-in-use. Returns `Ok(true)` if
    /// the stream was already fully bound (nothing to do), `Ok(false)` if
    /// it just cycled to a new pair (caller should restart its pass over
    /// all streams, since the released port may now be free for someone
    /// else to race for), or an error if the pool is exhausted.
    fn ensure_bound(self: &Arc<Self>, pool: &PortPool) -> Result<bool> {
        {
            let ports = self.ports.lock();
            if ports.rtp_listener.is_some() && ports.rtcp_listener.is_some() {
                return Ok(true);
            }
        }

        let mut ports = self.ports.lock();
        let rtp_listener = match UdpListener::bind(ports.rtp_port) {
            Ok(l) => l,
            Err(RelayError::PortUnavailable(p, _)) => {
                pool.release(ports.rtp_port);
                let fresh = pool.next().ok_or(RelayError::PoolExhausted)?;
                ports.rtp_port = fresh;
                ports.rtcp_port = fresh + 1;
                tracing::warn!(port = p, fresh, "stream rtp port in use, cycling");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let rtcp_listener = match UdpListener::bind(ports.rtcp_port) {
            Ok(l) => l,
            Err(RelayError::PortUnavailable(p, _)) => {
                rtp_listener.close();
                pool.release(ports.rtp_port);
                let fresh = pool.next().ok_or(RelayError::PoolExhausted)?;
                ports.rtp_port = fresh;
                ports.rtcp_port = fresh + 1;
                tracing::warn!(port = p, fresh, "stream rtcp port in use, cycling");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        ports.rtp_port = rtp_listener.port();
        ports.rtcp_port = rtcp_listener.port();
        ports.rtp_listener = Some(rtp_listener);
        ports.rtcp_listener = Some(rtcp_listener);
        drop(ports);
        self.start_ingress();
        Ok(true)
    }

    fn fan_out_rtp(&self, payload: &[u8]) {
        for client in self.clients.lock().iter() {
            client.send_rtp(payload);
        }
    }

    fn fan_out_rtcp(&self, payload: &[u8]) {
        for client in self.clients.lock().iter() {
            client.send_rtcp(payload);
        }
    }

    /// Deframed TCP-interleaved ingress from the publisher takes the
    /// same fan-out path as UDP ingress.
    pub fn ingest_interleaved(&self, is_rtcp: bool, payload: &[u8]) {
        if is_rtcp {
            self.fan_out_rtcp(payload);
        } else {
            self.fan_out_rtp(payload);
        }
    }

    /// Attach a session to the fan-out set.
    pub fn add_client(&self, session: Arc<SubscriberSession>) {
        self.clients.lock().push(session);
    }

    /// Detach a session by id (TEARDOWN / close / disconnect cleanup).
    pub fn remove_client(&self, session_id: &str) {
        self.clients.lock().retain(|c| c.id() != session_id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Idempotent close: tears down listeners and every attached client,
    /// returning the RTP port to release back to the pool (`None` if
    /// already closed).
    fn close(&self) -> Option<u16> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }

        let mut ports = self.ports.lock();
        let released = ports.rtp_port;
        if let Some(l) = ports.rtp_listener.take() {
            l.close();
        }
        if let Some(l) = ports.rtcp_listener.take() {
            l.close();
        }
        drop(ports);

        let clients: Vec<Arc<SubscriberSession>> = self.clients.lock().drain(..).collect();
        for client in clients {
            client.close();
        }

        Some(released)
    }
}

/// A published resource at a path. Created on first ANNOUNCE,
/// destroyed by TEARDOWN, publisher disconnect, or explicit close.
pub struct Mount {
    id: String,
    path: String,
    sdp: Vec<u8>,
    range: Mutex<Option<String>>,
    streams: Mutex<HashMap<u32, Arc<Stream>>>,
    pool: PortPool,
    on_empty: Option<MountEmptyHook>,
    closed: AtomicBool,
}

impl Mount {
    fn new(path: &str, sdp: Vec<u8>, pool: PortPool, on_empty: Option<MountEmptyHook>) -> Self {
        let id = MOUNT_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self {
            id: format!("{id:016X}"),
            path: path.to_string(),
            sdp,
            range: Mutex::new(None),
            streams: Mutex::new(HashMap::new()),
            pool,
            on_empty,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn sdp(&self) -> &[u8] {
        &self.sdp
    }

    pub fn range(&self) -> Option<String> {
        self.range.lock().clone()
    }

    pub fn set_range(&self, range: String) {
        *self.range.lock() = Some(range);
    }

    pub fn stream(&self, id: u32) -> Option<Arc<Stream>> {
        self.streams.lock().get(&id).cloned()
    }

    /// Parse the stream id out of `uri`, allocate a fresh port pair, and
    /// eagerly bind both ingress listeners. Fails if the stream id
    /// is already taken or the pool/bind fails.
    pub fn create_stream(&self, uri: &str) -> Result<Arc<Stream>> {
        let parsed = crate::uri::parse_uri(uri);

        if self.streams.lock().contains_key(&parsed.stream_id) {
            return Err(RelayError::Conflict(format!(
                "stream {} already exists on {}",
                parsed.stream_id, self.path
            )));
        }

        let rtp_port = self.pool.next().ok_or(RelayError::PoolExhausted)?;
        let rtcp_port = rtp_port + 1;

        let rtp_listener = match UdpListener::bind(rtp_port) {
            Ok(l) => l,
            Err(e) => {
                self.pool.release(rtp_port);
                return Err(e);
            }
        };
        let rtcp_listener = match UdpListener::bind(rtcp_port) {
            Ok(l) => l,
            Err(e) => {
                rtp_listener.close();
                self.pool.release(rtp_port);
                return Err(e);
            }
        };

        let stream = Arc::new(Stream::new(
            parsed.stream_id,
            rtp_port,
            rtcp_port,
            rtp_listener,
            rtcp_listener,
        ));
        stream.start_ingress();
        self.streams.lock().insert(parsed.stream_id, stream.clone());

        tracing::info!(
            mount = %self.path,
            stream_id = parsed.stream_id,
            rtp_port,
            rtcp_port,
            "stream created"
        );

        Ok(stream)
    }

    /// Re-bind every owned stream's ingress listeners, cycling through
    /// fresh port pairs on address-in-use until the whole set is stable
    ///.
    pub fn setup(&self) -> Result<()> {
        'retry: loop {
            let ids: Vec<u32> = self.streams.lock().keys().copied().collect();
            for id in ids {
                let Some(stream) = self.streams.lock().get(&id).cloned() else {
                    continue;
                };
                if !stream.ensure_bound(&self.pool)? {
                    continue 'retry;
                }
            }
            return Ok(());
        }
    }

    /// Idempotent close: tears down every stream, returning the RTP ports
    /// to release back to the pool.
    pub fn close(&self) -> Vec<u16> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }

        let streams: Vec<Arc<Stream>> = self.streams.lock().drain().map(|(_, s)| s).collect();
        let released: Vec<u16> = streams.iter().filter_map(|s| s.close()).collect();

        tracing::info!(mount = %self.path, released = released.len(), "mount closed");
        released
    }

    /// Remove `session_id` from `stream_id`'s fan-out set; if every stream
    /// is now empty, fire the advisory `onMountNowEmpty` hook.
    pub fn client_leave(&self, stream_id: u32, session_id: &str) {
        if let Some(stream) = self.streams.lock().get(&stream_id).cloned() {
            stream.remove_client(session_id);
        }

        let all_empty = self
            .streams
            .lock()
            .values()
            .all(|s| s.client_count() == 0);

        if all_empty {
            if let Some(hook) = &self.on_empty {
                hook(self);
            }
        }
    }
}

/// Process-wide map from path to [`Mount`], mediating the shared
/// [`PortPool`].
#[derive(Clone)]
pub struct MountRegistry {
    mounts: Arc<Mutex<HashMap<String, Arc<Mount>>>>,
    pool: PortPool,
}

impl MountRegistry {
    pub fn new(pool: PortPool) -> Self {
        Self {
            mounts: Arc::new(Mutex::new(HashMap::new())),
            pool,
        }
    }

    /// Resolve a mount by path or full URI, normalized through the same
    /// parser used everywhere else.
    pub fn get_mount(&self, uri_or_path: &str) -> Option<Arc<Mount>> {
        let path = crate::uri::path_only(uri_or_path);
        self.mounts.lock().get(&path).cloned()
    }

    /// Create and insert a mount at `path`, replacing any existing one.
    pub fn add_mount(&self, path: &str, sdp: Vec<u8>, on_empty: Option<MountEmptyHook>) -> Arc<Mount> {
        let mount = Arc::new(Mount::new(path, sdp, self.pool.clone(), on_empty));
        self.mounts.lock().insert(path.to_string(), mount.clone());
        tracing::info!(path, mount_id = mount.id(), "mount added");
        mount
    }

    /// Remove `path` from the map. Does not close the mount — the caller
    /// orchestrates that.
    pub fn delete_mount(&self, path: &str) -> Option<Arc<Mount>> {
        let removed = self.mounts.lock().remove(path);
        if removed.is_some() {
            tracing::info!(path, "mount removed from registry");
        }
        removed
    }

    pub fn get_next_rtp_port(&self) -> Option<u16> {
        self.pool.next()
    }

    pub fn return_rtp_port_to_pool(&self, port: u16) {
        self.pool.release(port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MountRegistry {
        MountRegistry::new(PortPool::new(16000, 32))
    }

    #[test]
    fn add_and_get_mount() {
        let reg = registry();
        reg.add_mount("/live/a", b"v=0\r\n".to_vec(), None);
        let mount = reg.get_mount("/live/a").unwrap();
        assert_eq!(mount.path(), "/live/a");
        assert_eq!(mount.sdp(), b"v=0\r\n");
    }

    #[test]
    fn get_mount_resolves_full_uri() {
        let reg = registry();
        reg.add_mount("/live/a", b"v=0\r\n".to_vec(), None);
        assert!(reg.get_mount("rtsp://host:554/live/a/streamid=0").is_some());
    }

    #[test]
    fn delete_mount_removes_from_registry() {
        let reg = registry();
        reg.add_mount("/live/a", Vec::new(), None);
        assert!(reg.delete_mount("/live/a").is_some());
        assert!(reg.get_mount("/live/a").is_none());
    }

    #[test]
    fn create_stream_rejects_duplicate_id() {
        let reg = registry();
        let mount = reg.add_mount("/live/a", Vec::new(), None);
        mount.create_stream("/live/a/streamid=0").unwrap();
        assert!(mount.create_stream("/live/a/streamid=0").is_err());
    }

    #[test]
    fn close_releases_ports_and_is_idempotent() {
        let reg = registry();
        let mount = reg.add_mount("/live/a", Vec::new(), None);
        let initial = {
            let pool = PortPool::new(16000, 32);
            pool.available()
        };
        mount.create_stream("/live/a/streamid=0").unwrap();

        let released_first = mount.close();
        assert_eq!(released_first.len(), 1);
        for p in &released_first {
            reg.return_rtp_port_to_pool(*p);
        }

        let released_second = mount.close();
        assert!(released_second.is_empty());
        let _ = initial;
    }

    #[test]
    fn client_leave_fires_empty_hook_with_no_streams() {
        use std::sync::atomic::AtomicBool;
        let reg = registry();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let hook: MountEmptyHook = Arc::new(move |_m| fired_clone.store(true, Ordering::SeqCst));
        let mount = reg.add_mount("/live/a", Vec::new(), Some(hook));
        mount.client_leave(0, "nonexistent");
        assert!(fired.load(Ordering::SeqCst));
    }
}
