//! # rtsp-relay — RTSP relay server library
//!
//! A Rust library for relaying live RTSP publish streams to many
//! subscribers: publishers `ANNOUNCE`/`RECORD` media at a mount path, and
//! any number of subscribers `DESCRIBE`/`SETUP`/`PLAY` that same path to
//! receive the relayed RTP/RTCP, byte-for-byte, over UDP or TCP
//! interleaving.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 2326](https://tools.ietf.org/html/rfc2326) | RTSP 1.0 | Request/response parsing, session lifecycle, transport negotiation |
//! | [RFC 2617](https://tools.ietf.org/html/rfc2617) | HTTP Basic auth | `Authorization`/`WWW-Authenticate` challenge-response |
//!
//! RTP/RTCP payloads themselves are opaque bytes to this crate — no
//! codec-aware packetization or SDP generation happens here; both halves of
//! the relay forward what they receive unchanged.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  cli            — binary entry point      │
//! ├──────────────────────────────────────────┤
//! │  server::Relay  — orchestrator            │
//! │  mount          — Mount / Stream registry │
//! ├──────────────────────────────────────────┤
//! │  protocol       — RTSP parsing, publish/  │
//! │                   subscribe state machines│
//! │  session        — subscriber sessions,    │
//! │                   wrappers, Transport hdr │
//! ├──────────────────────────────────────────┤
//! │  transport      — TCP signaling, UDP data │
//! │  interleave     — `$`-framed TCP media    │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use rtsp_relay::config::RelayConfig;
//! use rtsp_relay::server::Relay;
//!
//! let mut relay = Relay::new(RelayConfig::default());
//! relay.start().unwrap();
//! ```
//!
//! ## Crate layout
//!
//! - [`server`] — [`server::Relay`] orchestrator.
//! - [`config`] — [`config::RelayConfig`] and the host-supplied hook types.
//! - [`mount`] — [`mount::Mount`], [`mount::Stream`], and [`mount::MountRegistry`].
//! - [`protocol`] — RTSP request/response parsing, the publish and subscribe
//!   state machines, and Basic auth.
//! - [`session`] — subscriber sessions, wrappers, and `Transport` header
//!   parsing/rendering.
//! - [`pool`] — the shared RTP/RTCP port pool.
//! - [`interleave`] — TCP-interleaved (`$`-framed) media transport.
//! - [`uri`] — RTSP URI normalization.
//! - [`transport`] — TCP connection loops and UDP listeners.
//! - [`error`] — [`error::RelayError`] enum and [`error::Result`] alias.

pub mod config;
pub mod error;
pub mod interleave;
pub mod mount;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod uri;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use mount::{Mount, MountRegistry};
pub use server::Relay;
