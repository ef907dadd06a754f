//! Network transport layer for RTSP signaling and RTP/RTCP media delivery.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling, one
//!   connection per client with a thread per connection. When a session
//!   negotiates `interleaved=R-C` transport, the same socket also carries
//!   `$`-framed RTP/RTCP (see [`crate::interleave`]).
//!
//! - **UDP** ([`udp`]): each [`Stream`](crate::mount::Stream) binds a pair
//!   of [`UdpListener`]s (one per [`Role`]) for publisher ingress, and each
//!   UDP subscriber gets its own send socket for egress.

pub mod tcp;
pub mod udp;

pub use udp::{Role, UdpListener};
