//! Client Server: the RTSP state machine for subscribers.
//!
//! Unlike the publisher side, state here is held in the
//! [`SubscriberWrapper`]/[`SubscriberSession`] pair rather than the
//! connection — a subscriber may reconnect its control socket (TCP
//! keepalive aside) and resume by `Session` id, and every request is
//! authenticated independently.

use std::net::TcpStream;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{CheckMountOutcome, SubscriberHooks};
use crate::interleave::TcpInterleaver;
use crate::mount::MountRegistry;
use crate::pool::PortPool;
use crate::protocol::auth;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::session::transport::{self, TransportRequest};
use crate::session::{SubscriberSession, SubscriberWrapper, WrapperRegistry};

const ALLOWED_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN";

fn session_id_of(header: &str) -> &str {
    header.split(';').next().unwrap_or(header).trim()
}

/// Per-connection subscriber state plus the shared registries/hooks it
/// acts on. One handler per RTSP control connection; the wrapper it
/// creates or attaches to outlives the connection if the transport is UDP.
pub struct SubscribeHandler {
    mounts: MountRegistry,
    wrappers: WrapperRegistry,
    pool: PortPool,
    hooks: Arc<SubscriberHooks>,
    keepalive_secs: u64,
    wrapper: Mutex<Option<Arc<SubscriberWrapper>>>,
    /// Whichever wrapper this connection is currently associated with,
    /// rebound on every request that carries a resolvable `Session` header
    /// or creates a new one. Refreshed on every byte of inbound traffic on
    /// this socket, not just PLAY/OPTIONS — this is how a TCP subscriber
    /// stays alive on interleaved media ack traffic alone.
    current_wrapper: Mutex<Option<Arc<SubscriberWrapper>>>,
}

impl SubscribeHandler {
    pub fn new(
        mounts: MountRegistry,
        wrappers: WrapperRegistry,
        pool: PortPool,
        hooks: Arc<SubscriberHooks>,
        keepalive_secs: u64,
    ) -> Self {
        Self {
            mounts,
            wrappers,
            pool,
            hooks,
            keepalive_secs,
            wrapper: Mutex::new(None),
            current_wrapper: Mutex::new(None),
        }
    }

    pub fn handle(&self, request: &RtspRequest, stream: &TcpStream) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0").to_string();
        self.bind_session(request);

        let response = match request.method.as_str() {
            "OPTIONS" => self.handle_options(&cseq, request),
            "DESCRIBE" => self.handle_describe(&cseq, request),
            "SETUP" => self.handle_setup(&cseq, request, stream),
            "PLAY" => self.handle_play(&cseq, request),
            "TEARDOWN" => self.handle_teardown(&cseq, request),
            other => {
                tracing::warn!(method = other, %cseq, "unsupported subscriber method");
                RtspResponse::new(501, "Not Implemented").add_header("CSeq", &cseq)
            }
        };

        self.refresh_current();
        response
    }

    /// Associate this connection with the wrapper named by the request's
    /// `Session` header, if any resolves. Does nothing for requests with no
    /// `Session` header or one that doesn't resolve (SETUP's first request
    /// on a fresh connection binds its own newly-created wrapper instead).
    fn bind_session(&self, request: &RtspRequest) {
        if let Some(session_header) = request.get_header("Session")
            && let Some(wrapper) = self.wrappers.get(session_id_of(session_header))
        {
            *self.current_wrapper.lock() = Some(wrapper);
        }
    }

    /// Refresh the keepalive deadline of whichever wrapper this connection
    /// is currently associated with, if any. Called on every inbound
    /// request and every inbound interleaved frame.
    pub fn refresh_current(&self) {
        if let Some(wrapper) = self.current_wrapper.lock().as_ref() {
            wrapper.refresh();
        }
    }

    /// Absent hook allows everything; otherwise Authorization is
    /// required, must match the wrapper bound to any `Session` header
    /// present (anti-hijack), and must decode to credentials the hook
    /// accepts.
    fn authenticate(&self, cseq: &str, request: &RtspRequest) -> Option<RtspResponse> {
        let Some(hook) = &self.hooks.authentication else {
            return None;
        };

        let Some(header) = request.get_header("Authorization") else {
            return Some(auth::challenge(cseq));
        };

        if let Some(session_header) = request.get_header("Session")
            && let Some(wrapper) = self.wrappers.get(session_id_of(session_header))
            && wrapper.authorization_header().as_deref() != Some(header)
        {
            tracing::warn!(%cseq, "Authorization does not match the session's bound header");
            return Some(auth::challenge(cseq));
        }

        match auth::decode_basic(header) {
            Some(creds) if hook(&creds.username, &creds.password) => None,
            _ => Some(auth::challenge(cseq)),
        }
    }

    fn handle_options(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if let Some(session_header) = request.get_header("Session") {
            if let Some(resp) = self.authenticate(cseq, request) {
                return resp;
            }
            if self.wrappers.get(session_id_of(session_header)).is_none() {
                return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
            }
        }

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Public", ALLOWED_METHODS)
    }

    fn handle_describe(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if let Some(resp) = self.authenticate(cseq, request) {
            return resp;
        }

        if let Some(hook) = &self.hooks.check_mount {
            match hook(request) {
                CheckMountOutcome::Allow => {}
                CheckMountOutcome::Forbidden => {
                    return RtspResponse::new(403, "Forbidden").add_header("CSeq", cseq);
                }
                CheckMountOutcome::Status(code) => {
                    return RtspResponse::new(code, "Rejected").add_header("CSeq", cseq);
                }
            }
        }

        let Some(mount) = self.mounts.get_mount(&request.uri) else {
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let sdp = String::from_utf8_lossy(mount.sdp()).into_owned();

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .with_body(sdp)
    }

    fn handle_setup(&self, cseq: &str, request: &RtspRequest, stream: &TcpStream) -> RtspResponse {
        if let Some(resp) = self.authenticate(cseq, request) {
            return resp;
        }

        let wrapper = match request.get_header("Session") {
            Some(header) => match self.wrappers.get(session_id_of(header)) {
                Some(w) => w,
                None => {
                    return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
                }
            },
            None => {
                let Some(mount) = self.mounts.get_mount(&request.uri) else {
                    return RtspResponse::not_found().add_header("CSeq", cseq);
                };
                let auth_header = request.get_header("Authorization").map(str::to_string);
                let wrapper = Arc::new(SubscriberWrapper::new(mount, auth_header, self.keepalive_secs));
                self.wrappers.insert(wrapper.clone());
                *self.wrapper.lock() = Some(wrapper.clone());
                *self.current_wrapper.lock() = Some(wrapper.clone());
                wrapper
            }
        };

        let parsed_uri = crate::uri::parse_uri(&request.uri);
        if parsed_uri.path != wrapper.mount().path() {
            return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
        }
        if wrapper.mount().stream(parsed_uri.stream_id).is_none() {
            return RtspResponse::not_found().add_header("CSeq", cseq);
        }

        let Some(transport_header) = request.get_header("Transport") else {
            return RtspResponse::new(461, "Unsupported Transport").add_header("CSeq", cseq);
        };
        let Some(parsed_transport) = TransportRequest::parse(transport_header) else {
            return RtspResponse::new(461, "Unsupported Transport").add_header("CSeq", cseq);
        };

        let (session, transport_response) = match parsed_transport {
            TransportRequest::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => {
                let cloned = match stream.try_clone() {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(%cseq, error = %e, "failed to clone subscriber socket");
                        return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
                    }
                };
                let interleaver = match TcpInterleaver::spawn(cloned, rtp_channel, rtcp_channel) {
                    Ok(i) => Arc::new(i),
                    Err(e) => {
                        tracing::error!(%cseq, error = %e, "failed to spawn tcp interleaver");
                        return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
                    }
                };
                let session = Arc::new(SubscriberSession::new_tcp(
                    wrapper.mount().path().to_string(),
                    parsed_uri.stream_id,
                    self.mounts.clone(),
                    self.pool.clone(),
                    interleaver,
                ));
                let response = transport::render_response(&parsed_transport, 0, 0);
                (session, response)
            }
            TransportRequest::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let remote_ip = stream
                    .peer_addr()
                    .map(|a| a.ip())
                    .unwrap_or_else(|_| [0, 0, 0, 0].into());

                match SubscriberSession::new_udp(
                    wrapper.mount().path().to_string(),
                    parsed_uri.stream_id,
                    self.mounts.clone(),
                    self.pool.clone(),
                    Arc::downgrade(&wrapper),
                    remote_ip,
                    client_rtp_port,
                    client_rtcp_port,
                ) {
                    Ok((session, server_rtp_port, server_rtcp_port)) => {
                        let response =
                            transport::render_response(&parsed_transport, server_rtp_port, server_rtcp_port);
                        (Arc::new(session), response)
                    }
                    Err(e) => {
                        tracing::error!(%cseq, error = %e, "SETUP udp bind failed");
                        return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
                    }
                }
            }
        };

        wrapper.add_client(session);

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport_response)
            .add_header("Session", &format!("{};timeout={}", wrapper.id(), self.keepalive_secs))
    }

    fn handle_play(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if let Some(resp) = self.authenticate(cseq, request) {
            return resp;
        }

        let Some(session_header) = request.get_header("Session") else {
            return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
        };
        let Some(wrapper) = self.wrappers.get(session_id_of(session_header)) else {
            return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
        };

        wrapper.play();

        tracing::info!(wrapper_id = wrapper.id(), mount = wrapper.mount().path(), "subscriber playing");

        let mut response = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(range) = wrapper.mount().range() {
            response = response.add_header("Range", &range);
        }
        response
    }

    fn handle_teardown(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if let Some(resp) = self.authenticate(cseq, request) {
            return resp;
        }

        let Some(session_header) = request.get_header("Session") else {
            return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
        };
        let id = session_id_of(session_header);
        let Some(wrapper) = self.wrappers.remove(id) else {
            return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
        };
        wrapper.close();

        RtspResponse::ok().add_header("CSeq", cseq)
    }

    /// Run on socket close/error: tear down the wrapper this connection
    /// created, if any (UDP sessions outlive the control socket only until
    /// TEARDOWN or keepalive expiry in the reference behavior, but a dead
    /// control connection with no prior TEARDOWN is treated the same way
    /// here — nothing else observes it again).
    pub fn disconnect_cleanup(&self) {
        if let Some(wrapper) = self.wrapper.lock().take() {
            self.wrappers.remove(wrapper.id());
            wrapper.close();
        }
    }
}
