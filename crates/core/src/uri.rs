//! RTSP URI normalization.
//!
//! An RTSP URI is normalized to its path component (the `rtsp://host`
//! prefix is stripped). A trailing `/streamid=N` suffix is peeled off and
//! its decimal `N` becomes the stream id; an absent suffix means stream id 0.

/// A normalized mount path plus the stream id addressed within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUri {
    pub path: String,
    pub stream_id: u32,
}

/// Strip a `rtsp://host[:port]` prefix, leaving the path (including the
/// leading `/`). Bare paths (already starting with `/`) pass through
/// unchanged. Anything else is treated as a bare path too.
pub fn strip_scheme_and_host(uri: &str) -> &str {
    if let Some(after) = uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        match after.find('/') {
            Some(slash) => &after[slash..],
            None => "/",
        }
    } else {
        uri
    }
}

/// Parse a full request URI into its mount path and stream id.
///
/// ```
/// use rtsp_relay::uri::parse_uri;
///
/// let p = parse_uri("rtsp://cam.local:554/live/cam1/streamid=2");
/// assert_eq!(p.path, "/live/cam1");
/// assert_eq!(p.stream_id, 2);
///
/// let p = parse_uri("/live/cam1");
/// assert_eq!(p.path, "/live/cam1");
/// assert_eq!(p.stream_id, 0);
/// ```
pub fn parse_uri(uri: &str) -> ParsedUri {
    let path = strip_scheme_and_host(uri);

    match path.rfind("/streamid=") {
        Some(pos) => {
            let (base, suffix) = path.split_at(pos);
            let id_str = &suffix["/streamid=".len()..];
            let stream_id = id_str.parse().unwrap_or(0);
            let base = if base.is_empty() { "/" } else { base };
            ParsedUri {
                path: base.to_string(),
                stream_id,
            }
        }
        None => ParsedUri {
            path: path.to_string(),
            stream_id: 0,
        },
    }
}

/// Just the normalized path, discarding any stream id suffix. Used by
/// mount lookups that don't care about the stream (DESCRIBE, ANNOUNCE).
pub fn path_only(uri: &str) -> String {
    parse_uri(uri).path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scheme_and_host() {
        assert_eq!(strip_scheme_and_host("rtsp://host:554/live/a"), "/live/a");
    }

    #[test]
    fn bare_path_passes_through() {
        assert_eq!(strip_scheme_and_host("/live/a"), "/live/a");
    }

    #[test]
    fn host_with_no_path_is_root() {
        assert_eq!(strip_scheme_and_host("rtsp://host:554"), "/");
    }

    #[test]
    fn parses_streamid_suffix() {
        let p = parse_uri("rtsp://host/live/cam1/streamid=3");
        assert_eq!(p.path, "/live/cam1");
        assert_eq!(p.stream_id, 3);
    }

    #[test]
    fn missing_suffix_defaults_to_stream_zero() {
        let p = parse_uri("rtsp://host/live/cam1");
        assert_eq!(p.path, "/live/cam1");
        assert_eq!(p.stream_id, 0);
    }

    #[test]
    fn bare_path_with_streamid() {
        let p = parse_uri("/live/cam1/streamid=0");
        assert_eq!(p.path, "/live/cam1");
        assert_eq!(p.stream_id, 0);
    }

    #[test]
    fn malformed_streamid_defaults_to_zero() {
        let p = parse_uri("/live/cam1/streamid=abc");
        assert_eq!(p.path, "/live/cam1");
        assert_eq!(p.stream_id, 0);
    }
}
