use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::{PublisherHooks, SubscriberHooks};
use crate::interleave::{Deframer, FRAME_MARKER};
use crate::mount::MountRegistry;
use crate::pool::PortPool;
use crate::protocol::request::RtspRequest;
use crate::protocol::{PublishHandler, SubscribeHandler};
use crate::session::WrapperRegistry;

/// One unit of protocol traffic read off an RTSP control socket: either an
/// interleaved `$`-frame or a complete RTSP request's raw text.
#[derive(Debug)]
enum Frame {
    Interleaved { channel: u8, payload: Vec<u8> },
    Text(String),
}

/// Reads [`Frame`]s off one RTSP control socket, distinguishing `$`-prefixed
/// interleaved media from RTSP request text sharing the same socket.
///
/// The first byte of each new unit of traffic decides which side handles
/// it: `$` hands bytes to the [`Deframer`], anything else accumulates as an
/// RTSP text line. The `Deframer` is kept alive across calls so its
/// resync-past-noise behavior actually governs this socket, not just its
/// own unit tests — see [`Deframer::feed`].
struct FrameReader {
    reader: BufReader<TcpStream>,
    deframer: Deframer,
    pending: VecDeque<(u8, Vec<u8>)>,
}

impl FrameReader {
    fn new(reader: BufReader<TcpStream>) -> Self {
        Self {
            reader,
            deframer: Deframer::new(),
            pending: VecDeque::new(),
        }
    }

    /// Read the next frame. Returns `Ok(None)` on clean EOF.
    fn read_frame(&mut self) -> io::Result<Option<Frame>> {
        if let Some((channel, payload)) = self.pending.pop_front() {
            return Ok(Some(Frame::Interleaved { channel, payload }));
        }

        loop {
            let peek = self.reader.fill_buf()?;
            if peek.is_empty() {
                return Ok(None);
            }

            if peek[0] == FRAME_MARKER {
                let chunk = peek.to_vec();
                let consumed = chunk.len();
                self.reader.consume(consumed);

                let mut frames = self.deframer.feed(&chunk).into_iter();
                if let Some((channel, payload)) = frames.next() {
                    self.pending.extend(frames);
                    return Ok(Some(Frame::Interleaved { channel, payload }));
                }
                // Chunk held only a partial frame (or was resynced away as
                // noise with nothing left); read more and try again.
                continue;
            }

            let mut request_text = String::new();
            loop {
                let mut line = String::new();
                let n = self.reader.read_line(&mut line)?;
                if n == 0 {
                    return Ok(None);
                }
                request_text.push_str(&line);
                if line == "\r\n" || line == "\n" {
                    break;
                }
            }
            return Ok(Some(Frame::Text(request_text)));
        }
    }

    /// Read exactly `buf.len()` further bytes off the control socket, for
    /// the body (e.g. ANNOUNCE's SDP payload) following a request's headers.
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buf)
    }
}

/// Parse `text` into a request and, if `Content-Length` is present, read
/// that many further bytes off `reader` as the body (the SDP payload of an
/// ANNOUNCE, typically).
fn parse_request(reader: &mut FrameReader, text: &str) -> io::Result<Option<RtspRequest>> {
    let mut request = match RtspRequest::parse(text) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "RTSP parse error");
            return Ok(None);
        }
    };

    let content_length = request.content_length();
    if content_length > 0 {
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body)?;
        request.body = body;
    }

    Ok(Some(request))
}

/// Non-blocking TCP accept loop shared by the publisher and subscriber
/// listeners. Polls `running` every 50ms between accepts so the owning
/// [`crate::server::Relay`] can shut the listener down promptly.
fn accept_loop<F>(listener: TcpListener, running: Arc<AtomicBool>, mut spawn_connection: F)
where
    F: FnMut(TcpStream, SocketAddr) + Send,
{
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => spawn_connection(stream, addr),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// Spawn the Publish Server's accept loop on the calling thread.
pub fn publisher_accept_loop(
    listener: TcpListener,
    mounts: MountRegistry,
    hooks: Arc<PublisherHooks>,
    running: Arc<AtomicBool>,
) {
    accept_loop(listener, running.clone(), move |stream, addr| {
        if stream.set_nonblocking(false).is_err() {
            return;
        }
        let mounts = mounts.clone();
        let hooks = hooks.clone();
        thread::spawn(move || run_publish_connection(stream, addr, mounts, hooks));
    });
}

/// Spawn the Client Server's accept loop on the calling thread.
pub fn subscriber_accept_loop(
    listener: TcpListener,
    mounts: MountRegistry,
    wrappers: WrapperRegistry,
    pool: PortPool,
    hooks: Arc<SubscriberHooks>,
    keepalive_secs: u64,
    running: Arc<AtomicBool>,
) {
    accept_loop(listener, running.clone(), move |stream, addr| {
        if stream.set_nonblocking(false).is_err() {
            return;
        }
        let mounts = mounts.clone();
        let wrappers = wrappers.clone();
        let pool = pool.clone();
        let hooks = hooks.clone();
        thread::spawn(move || run_subscribe_connection(stream, addr, mounts, wrappers, pool, hooks, keepalive_secs));
    });
}

fn run_publish_connection(stream: TcpStream, peer_addr: SocketAddr, mounts: MountRegistry, hooks: Arc<PublisherHooks>) {
    tracing::info!(%peer_addr, "publisher connected");

    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut reader = FrameReader::new(BufReader::new(reader_stream));
    let mut writer = stream;
    let handler = PublishHandler::new(peer_addr, mounts, hooks);

    let reason = loop {
        match reader.read_frame() {
            Ok(Some(Frame::Interleaved { channel, payload })) => {
                match handler.lookup_channel(channel) {
                    Some((stream, is_rtcp)) => stream.ingest_interleaved(is_rtcp, &payload),
                    None => tracing::trace!(%peer_addr, channel, "interleaved frame on unknown channel, dropped"),
                }
            }
            Ok(Some(Frame::Text(text))) => {
                let request = match parse_request(&mut reader, &text) {
                    Ok(Some(r)) => r,
                    Ok(None) => continue,
                    Err(_) => break "read error",
                };
                tracing::debug!(%peer_addr, method = %request.method, uri = %request.uri, "request");
                let response = handler.handle(&request);
                tracing::debug!(%peer_addr, status = response.status_code, "response");
                if writer.write_all(response.serialize().as_bytes()).is_err() {
                    break "write error";
                }
            }
            Ok(None) => break "connection closed by client",
            Err(_) => break "read error",
        }
    };

    handler.disconnect_cleanup();
    tracing::info!(%peer_addr, reason, "publisher disconnected");
}

fn run_subscribe_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    mounts: MountRegistry,
    wrappers: WrapperRegistry,
    pool: PortPool,
    hooks: Arc<SubscriberHooks>,
    keepalive_secs: u64,
) {
    tracing::info!(%peer_addr, "subscriber connected");

    let reader_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };
    let mut reader = FrameReader::new(BufReader::new(reader_stream));
    let mut writer = match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    };
    let handler = SubscribeHandler::new(mounts, wrappers, pool, hooks, keepalive_secs);

    let reason = loop {
        match reader.read_frame() {
            Ok(Some(Frame::Interleaved { channel, .. })) => {
                // Subscribers aren't expected to send media back; log and
                // drop rather than relaying it anywhere. Still counts as
                // inbound traffic on the control socket for keepalive.
                handler.refresh_current();
                tracing::trace!(%peer_addr, channel, "interleaved frame from subscriber, discarded");
            }
            Ok(Some(Frame::Text(text))) => {
                let request = match parse_request(&mut reader, &text) {
                    Ok(Some(r)) => r,
                    Ok(None) => continue,
                    Err(_) => break "read error",
                };
                tracing::debug!(%peer_addr, method = %request.method, uri = %request.uri, "request");
                let response = handler.handle(&request, &stream);
                tracing::debug!(%peer_addr, status = response.status_code, "response");
                if writer.write_all(response.serialize().as_bytes()).is_err() {
                    break "write error";
                }
            }
            Ok(None) => break "connection closed by client",
            Err(_) => break "read error",
        }
    };

    handler.disconnect_cleanup();
    tracing::info!(%peer_addr, reason, "subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spin up a loopback pair and hand the server half to a [`FrameReader`].
    fn loopback_pair() -> (TcpStream, FrameReader) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        let reader = FrameReader::new(BufReader::new(server));
        (client, reader)
    }

    #[test]
    fn reads_interleaved_frame_off_the_wire() {
        let (mut client, mut reader) = loopback_pair();
        client.write_all(&crate::interleave::encode_frame(2, b"HELLO")).unwrap();

        match reader.read_frame().unwrap() {
            Some(Frame::Interleaved { channel, payload }) => {
                assert_eq!(channel, 2);
                assert_eq!(payload, b"HELLO");
            }
            other => panic!("expected interleaved frame, got {other:?}"),
        }
    }

    #[test]
    fn resyncs_past_noise_wedged_between_two_frames() {
        let (mut client, mut reader) = loopback_pair();
        // Noise with no `$` marker landing in the same read chunk as the
        // frame before and after it: the first frame puts the reader into
        // frame-reading mode, so the noise is handed to the `Deframer`
        // rather than misread as RTSP text, and its resync recovers the
        // second frame instead of hanging or erroring.
        let mut wire = crate::interleave::encode_frame(1, b"first");
        wire.extend_from_slice(b"NOISENOISE");
        wire.extend_from_slice(&crate::interleave::encode_frame(2, b"second"));
        client.write_all(&wire).unwrap();

        match reader.read_frame().unwrap() {
            Some(Frame::Interleaved { channel, payload }) => {
                assert_eq!(channel, 1);
                assert_eq!(payload, b"first");
            }
            other => panic!("expected first frame, got {other:?}"),
        }
        match reader.read_frame().unwrap() {
            Some(Frame::Interleaved { channel, payload }) => {
                assert_eq!(channel, 2);
                assert_eq!(payload, b"second");
            }
            other => panic!("expected resynced second frame, got {other:?}"),
        }
    }

    #[test]
    fn reads_request_text_sharing_the_socket_with_frames() {
        let (mut client, mut reader) = loopback_pair();
        client
            .write_all(b"OPTIONS rtsp://localhost/test RTSP/1.0\r\nCSeq: 1\r\n\r\n")
            .unwrap();
        client.write_all(&crate::interleave::encode_frame(0, b"AB")).unwrap();

        match reader.read_frame().unwrap() {
            Some(Frame::Text(text)) => assert!(text.starts_with("OPTIONS")),
            other => panic!("expected request text, got {other:?}"),
        }
        match reader.read_frame().unwrap() {
            Some(Frame::Interleaved { channel, payload }) => {
                assert_eq!(channel, 0);
                assert_eq!(payload, b"AB");
            }
            other => panic!("expected interleaved frame, got {other:?}"),
        }
    }

    #[test]
    fn eof_yields_none() {
        let (client, mut reader) = loopback_pair();
        drop(client);
        assert!(reader.read_frame().unwrap().is_none());
    }
}
