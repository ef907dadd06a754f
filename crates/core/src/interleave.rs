//! TCP interleaved transport: `$`-prefixed framing of RTP/RTCP over
//! the RTSP control socket, plus a backpressure-aware write queue.

use std::collections::VecDeque;
use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::{Condvar, Mutex};

/// Interleaved frame marker (`$`), RFC 2326 §10.12.
pub const FRAME_MARKER: u8 = 0x24;

/// Encode one interleaved frame: `$`, channel, 16-bit big-endian length,
/// payload.
pub fn encode_frame(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.push(FRAME_MARKER);
    buf.push(channel);
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Incremental deframer for inbound interleaved bytes.
///
/// Accumulates bytes fed via [`feed`](Self::feed) and emits complete
/// `(channel, payload)` frames. Bytes that aren't part of a `$`-frame
/// (ordinary RTSP request/response text sharing the same socket) are
/// silently discarded during resync — this is expected, not an error.
#[derive(Default)]
pub struct Deframer {
    buf: Vec<u8>,
}

impl Deframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed newly read bytes and drain as many complete frames as are
    /// available. Partial frames remain buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }

            if self.buf[0] != FRAME_MARKER {
                match self.buf.iter().position(|&b| b == FRAME_MARKER) {
                    Some(pos) if pos > 0 => {
                        self.buf.drain(..pos);
                        continue;
                    }
                    Some(_) => unreachable!("handled by the preceding branch"),
                    None => {
                        self.buf.clear();
                        break;
                    }
                }
            }

            let channel = self.buf[1];
            let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;

            if self.buf.len() < 4 + len {
                break;
            }

            let payload = self.buf[4..4 + len].to_vec();
            self.buf.drain(..4 + len);
            frames.push((channel, payload));
        }

        frames
    }
}

struct WriterState {
    queue: VecDeque<Vec<u8>>,
    closed: bool,
}

/// A TCP interleaver bound to one RTSP control socket and a pair of
/// channel bytes (RTP channel, RTCP channel).
///
/// Outbound sends enqueue onto a FIFO; a dedicated writer thread drains it
/// with blocking socket writes, so a slow peer's backpressure (the OS
/// socket buffer filling up) only stalls that peer's own queue, never the
/// caller of [`send`](Self::send). `close` is idempotent.
pub struct TcpInterleaver {
    rtp_channel: u8,
    rtcp_channel: u8,
    state: Arc<Mutex<WriterState>>,
    not_empty: Arc<Condvar>,
    open: Arc<AtomicBool>,
}

impl TcpInterleaver {
    /// Spawn the writer thread over a cloned handle to `stream` and return
    /// the interleaver. `rtp_channel`/`rtcp_channel` are the two channel
    /// bytes negotiated via `interleaved=R-C`.
    pub fn spawn(stream: TcpStream, rtp_channel: u8, rtcp_channel: u8) -> std::io::Result<Self> {
        let writer = stream.try_clone()?;
        let state = Arc::new(Mutex::new(WriterState {
            queue: VecDeque::new(),
            closed: false,
        }));
        let not_empty = Arc::new(Condvar::new());
        let open = Arc::new(AtomicBool::new(true));

        let thread_state = state.clone();
        let thread_not_empty = not_empty.clone();
        let thread_open = open.clone();
        thread::spawn(move || {
            Self::writer_loop(writer, thread_state, thread_not_empty, thread_open);
        });

        Ok(Self {
            rtp_channel,
            rtcp_channel,
            state,
            not_empty,
            open,
        })
    }

    fn writer_loop(
        mut writer: TcpStream,
        state: Arc<Mutex<WriterState>>,
        not_empty: Arc<Condvar>,
        open: Arc<AtomicBool>,
    ) {
        loop {
            let frame = {
                let mut guard = state.lock();
                loop {
                    if guard.closed {
                        return;
                    }
                    if let Some(frame) = guard.queue.pop_front() {
                        break frame;
                    }
                    not_empty.wait(&mut guard);
                }
            };

            // A blocking write_all stalls here exactly while the kernel
            // send buffer is full — that stall only affects this peer's
            // queue, never callers of `send` on other interleavers.
            if let Err(err) = writer.write_all(&frame) {
                tracing::warn!(error = %err, "interleaved write failed, closing");
                open.store(false, Ordering::SeqCst);
                let mut guard = state.lock();
                guard.closed = true;
                guard.queue.clear();
                return;
            }
        }
    }

    /// Enqueue a raw payload for delivery on the RTP channel.
    pub fn send_rtp(&self, payload: &[u8]) {
        self.enqueue(self.rtp_channel, payload);
    }

    /// Enqueue a raw payload for delivery on the RTCP channel.
    pub fn send_rtcp(&self, payload: &[u8]) {
        self.enqueue(self.rtcp_channel, payload);
    }

    fn enqueue(&self, channel: u8, payload: &[u8]) {
        if !self.open.load(Ordering::SeqCst) {
            return;
        }
        let frame = encode_frame(channel, payload);
        let mut guard = self.state.lock();
        if guard.closed {
            return;
        }
        guard.queue.push_back(frame);
        self.not_empty.notify_one();
    }

    /// Idempotent close: drops the queue, signals the writer thread to
    /// exit, marks the interleaver closed. Subsequent sends are no-ops.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut guard = self.state.lock();
        guard.closed = true;
        guard.queue.clear();
        self.not_empty.notify_one();
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trip() {
        let mut deframer = Deframer::new();
        let packets = [(0u8, b"hello".to_vec()), (1u8, b"world!!".to_vec())];

        let mut wire = Vec::new();
        for (ch, payload) in &packets {
            wire.extend_from_slice(&encode_frame(*ch, payload));
        }

        let frames = deframer.feed(&wire);
        assert_eq!(frames, packets);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut deframer = Deframer::new();
        let full = encode_frame(0, b"HELLO");

        assert!(deframer.feed(&full[..3]).is_empty());
        let frames = deframer.feed(&full[3..]);
        assert_eq!(frames, vec![(0, b"HELLO".to_vec())]);
    }

    #[test]
    fn resyncs_after_non_marker_noise() {
        let mut deframer = Deframer::new();
        let mut wire = b"RTSP junk not a frame".to_vec();
        wire.extend_from_slice(&encode_frame(2, b"payload"));

        let frames = deframer.feed(&wire);
        assert_eq!(frames, vec![(2, b"payload".to_vec())]);
    }

    #[test]
    fn noise_with_no_marker_is_dropped_entirely() {
        let mut deframer = Deframer::new();
        assert!(deframer.feed(b"no dollar sign here").is_empty());
    }

    #[test]
    fn multiple_frames_in_one_feed() {
        let mut deframer = Deframer::new();
        let mut wire = encode_frame(0, b"a");
        wire.extend_from_slice(&encode_frame(1, b"bb"));
        wire.extend_from_slice(&encode_frame(0, b"ccc"));

        let frames = deframer.feed(&wire);
        assert_eq!(
            frames,
            vec![
                (0, b"a".to_vec()),
                (1, b"bb".to_vec()),
                (0, b"ccc".to_vec()),
            ]
        );
    }
}
