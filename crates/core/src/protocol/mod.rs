//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text-based RTSP signaling protocol — request
//! parsing, response building, and the two independent state machines
//! ([`publish`] and [`subscribe`]) that route methods for the Publish
//! Server and Client Server respectively.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! DESCRIBE rtsp://server/stream RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! Key differences from HTTP:
//! - Stateful: sessions persist across requests (RFC 2326 §3).
//! - Different methods: OPTIONS, ANNOUNCE, DESCRIBE, SETUP, RECORD, PLAY,
//!   TEARDOWN.
//! - Session header carries a server-assigned ID (RFC 2326 §12.37).
//!
//! ## Method split
//!
//! | Method | Handler | Purpose |
//! |--------|---------|---------|
//! | OPTIONS | both | Capability discovery |
//! | ANNOUNCE | publish | Register a mount's SDP |
//! | DESCRIBE | subscribe | Retrieve SDP session description |
//! | SETUP | both | Negotiate transport (UDP ports or interleaved) |
//! | RECORD | publish | Start accepting ingress |
//! | PLAY | subscribe | Start media delivery |
//! | TEARDOWN | both | Destroy mount / session |

pub mod auth;
pub mod publish;
pub mod request;
pub mod response;
pub mod subscribe;

pub use publish::PublishHandler;
pub use request::RtspRequest;
pub use response::RtspResponse;
pub use subscribe::SubscribeHandler;
