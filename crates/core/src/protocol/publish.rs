//! Publish Server: the RTSP state machine for publishers.
//!
//! States per control connection: `INIT -> AUTHED -> ANNOUNCED(mount) ->
//! SET_UP -> RECORDING -> TORN_DOWN`. Tracked here as a handful of
//! `Mutex`-guarded fields rather than an explicit enum.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::PublisherHooks;
use crate::mount::{Mount, MountRegistry, Stream};
use crate::protocol::auth;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::session::transport::{self, TransportRequest};

const ALLOWED_METHODS: &str = "OPTIONS, ANNOUNCE, SETUP, RECORD, TEARDOWN";

/// Per-connection publisher state plus the shared registry/hooks it acts
/// on.
pub struct PublishHandler {
    client_addr: SocketAddr,
    mounts: MountRegistry,
    hooks: Arc<PublisherHooks>,
    mount: Mutex<Option<Arc<Mount>>>,
    path: Mutex<Option<String>>,
    authorization: Mutex<Option<String>>,
    /// Interleaved channel byte -> (stream, is_rtcp), populated by SETUP
    /// when the publisher negotiates TCP transport. Consulted by the
    /// connection loop to route deframed payloads.
    channels: Mutex<HashMap<u8, (Arc<Stream>, bool)>>,
}

impl PublishHandler {
    pub fn new(client_addr: SocketAddr, mounts: MountRegistry, hooks: Arc<PublisherHooks>) -> Self {
        Self {
            client_addr,
            mounts,
            hooks,
            mount: Mutex::new(None),
            path: Mutex::new(None),
            authorization: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Look up which stream an interleaved channel byte belongs to, and
    /// whether it's the RTCP half of the pair.
    pub fn lookup_channel(&self, channel: u8) -> Option<(Arc<Stream>, bool)> {
        self.channels.lock().get(&channel).cloned()
    }

    pub fn handle(&self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0").to_string();

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(&cseq),
            "ANNOUNCE" => self.handle_announce(&cseq, request),
            "SETUP" => self.handle_setup(&cseq, request),
            "RECORD" => self.handle_record(&cseq, request),
            "TEARDOWN" => self.handle_teardown(&cseq, request),
            other => {
                tracing::warn!(method = other, %cseq, "unsupported publisher method");
                RtspResponse::new(501, "Not Implemented").add_header("CSeq", &cseq)
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Public", ALLOWED_METHODS)
    }

    fn authenticate(&self, cseq: &str, request: &RtspRequest) -> Option<RtspResponse> {
        let Some(hook) = &self.hooks.authentication else {
            return None;
        };
        let Some(header) = request.get_header("Authorization") else {
            return Some(auth::challenge(cseq));
        };
        match auth::decode_basic(header) {
            Some(creds) if hook(&creds.username, &creds.password) => None,
            _ => Some(auth::challenge(cseq)),
        }
    }

    /// The stored Authorization (set at ANNOUNCE) must match, if present.
    fn auth_matches(&self, request: &RtspRequest) -> bool {
        match &*self.authorization.lock() {
            Some(stored) => request.get_header("Authorization") == Some(stored.as_str()),
            None => true,
        }
    }

    fn handle_announce(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if let Some(resp) = self.authenticate(cseq, request) {
            return resp;
        }

        if let Some(hook) = &self.hooks.check_mount
            && !hook(request)
        {
            tracing::warn!(%cseq, uri = %request.uri, "ANNOUNCE rejected by checkMount hook");
            return RtspResponse::new(403, "Forbidden").add_header("CSeq", cseq);
        }

        let path = crate::uri::path_only(&request.uri);

        if self.mounts.get_mount(&path).is_some() {
            tracing::warn!(%cseq, path, "ANNOUNCE for already-mounted path");
            return RtspResponse::new(503, "Service Unavailable").add_header("CSeq", cseq);
        }

        let mount = self
            .mounts
            .add_mount(&path, request.body.clone(), self.hooks.mount_now_empty.clone());

        *self.mount.lock() = Some(mount.clone());
        *self.path.lock() = Some(path.clone());
        *self.authorization.lock() = request.get_header("Authorization").map(str::to_string);

        tracing::info!(%cseq, path, mount_id = mount.id(), client = %self.client_addr, "mount announced");

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &format!("{};timeout=30", mount.id()))
    }

    fn handle_setup(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if !self.auth_matches(request) {
            return auth::challenge(cseq);
        }

        let Some(mount) = self.mount.lock().clone() else {
            tracing::warn!(%cseq, "SETUP before ANNOUNCE");
            return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
        };

        let Some(transport_header) = request.get_header("Transport") else {
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };

        let Some(parsed) = TransportRequest::parse(transport_header) else {
            tracing::warn!(%cseq, transport_header, "SETUP malformed Transport header");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };

        if let TransportRequest::Interleaved {
            rtp_channel,
            rtcp_channel,
        } = parsed
        {
            let stream = match mount.create_stream(&request.uri) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(%cseq, error = %e, "SETUP create_stream failed");
                    return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
                }
            };
            self.channels
                .lock()
                .insert(rtp_channel, (stream.clone(), false));
            self.channels.lock().insert(rtcp_channel, (stream, true));

            let transport_response = transport::render_response(&parsed, 0, 0);
            return RtspResponse::ok()
                .add_header("CSeq", cseq)
                .add_header("Transport", &transport_response)
                .add_header("Session", &format!("{};timeout=30", mount.id()));
        }

        let stream = match mount.create_stream(&request.uri) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(%cseq, error = %e, "SETUP create_stream failed");
                return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
            }
        };

        let transport_response = transport::render_response(&parsed, stream.rtp_port(), stream.rtcp_port());

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport_response)
            .add_header("Session", &format!("{};timeout=30", mount.id()))
    }

    fn handle_record(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if !self.auth_matches(request) {
            return auth::challenge(cseq);
        }

        let Some(mount) = self.mount.lock().clone() else {
            return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
        };

        let session_id = request
            .get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim());
        if session_id != Some(mount.id()) {
            tracing::warn!(%cseq, "RECORD with mismatched Session header");
            return RtspResponse::new(454, "Session Not Found").add_header("CSeq", cseq);
        }

        if let Some(range) = request.get_header("Range") {
            mount.set_range(range.to_string());
        }

        if let Err(e) = mount.setup() {
            tracing::error!(%cseq, error = %e, "RECORD mount.setup failed");
            return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
        }

        tracing::info!(%cseq, mount_id = mount.id(), "recording started");

        RtspResponse::ok().add_header("CSeq", cseq)
    }

    fn handle_teardown(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        if !self.auth_matches(request) {
            return auth::challenge(cseq);
        }

        if let Some(path) = self.path.lock().take() {
            self.disconnect_cleanup_for(&path);
        }

        RtspResponse::ok().add_header("CSeq", cseq)
    }

    fn disconnect_cleanup_for(&self, path: &str) {
        if let Some(mount) = self.mounts.delete_mount(path).or_else(|| self.mount.lock().take()) {
            for port in mount.close() {
                self.mounts.return_rtp_port_to_pool(port);
            }
        }
    }

    /// Run on socket close/error.
    /// Idempotent.
    pub fn disconnect_cleanup(&self) {
        let path = self.path.lock().take();
        if let Some(path) = path {
            self.disconnect_cleanup_for(&path);
        } else if let Some(mount) = self.mount.lock().take() {
            for port in mount.close() {
                self.mounts.return_rtp_port_to_pool(port);
            }
        }
    }
}
