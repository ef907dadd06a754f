//! Parsing and rendering of the RTSP `Transport` header (RFC 2326 §12.39).
//!
//! A client requests either UDP unicast (`client_port=R-C`) or TCP
//! interleaving (`interleaved=R-C`); both are treated as first-class,
//! not one as a fallback of the other.

/// What a client asked for in its SETUP `Transport` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRequest {
    /// `RTP/AVP;unicast;client_port=R-C`: server allocates a UDP port pair
    /// and sends to `client_addr:client_rtp_port` / `client_rtcp_port`.
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
    /// `RTP/AVP/TCP;interleaved=R-C`: RTP/RTCP ride the RTSP control
    /// socket, `$`-framed on the two given channel bytes.
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
}

impl TransportRequest {
    /// Parse the `Transport` header value, preferring whichever parameter
    /// set (`client_port=` or `interleaved=`) is present. Malformed or
    /// absent parameters yield `None`, which the caller maps to a 461
    /// Unsupported Transport response.
    ///
    /// ```
    /// use rtsp_relay::session::transport::TransportRequest;
    ///
    /// let t = TransportRequest::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(t, TransportRequest::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 });
    ///
    /// let t = TransportRequest::parse("RTP/AVP/TCP;interleaved=0-1").unwrap();
    /// assert_eq!(t, TransportRequest::Interleaved { rtp_channel: 0, rtcp_channel: 1 });
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        for part in header.split(';') {
            let part = part.trim();

            if let Some(ports) = part.strip_prefix("client_port=") {
                let (rtp, rtcp) = split_pair(ports)?;
                return Some(TransportRequest::Udp {
                    client_rtp_port: rtp,
                    client_rtcp_port: rtcp,
                });
            }

            if let Some(channels) = part.strip_prefix("interleaved=") {
                let (rtp, rtcp) = split_pair(channels)?;
                return Some(TransportRequest::Interleaved {
                    rtp_channel: rtp,
                    rtcp_channel: rtcp,
                });
            }
        }
        None
    }

    pub fn is_interleaved(&self) -> bool {
        matches!(self, TransportRequest::Interleaved { .. })
    }
}

fn split_pair<T: std::str::FromStr>(value: &str) -> Option<(T, T)> {
    let mut parts = value.split('-');
    let a = parts.next()?.parse().ok()?;
    let b = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((a, b))
}

/// Render the server's reply `Transport` header for a negotiated session.
pub fn render_response(request: &TransportRequest, server_rtp_port: u16, server_rtcp_port: u16) -> String {
    match request {
        TransportRequest::Udp {
            client_rtp_port,
            client_rtcp_port,
        } => format!(
            "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};server_port={server_rtp_port}-{server_rtcp_port}"
        ),
        TransportRequest::Interleaved {
            rtp_channel,
            rtcp_channel,
        } => format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_udp_client_port() {
        let t = TransportRequest::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(
            t,
            TransportRequest::Udp {
                client_rtp_port: 5000,
                client_rtcp_port: 5001
            }
        );
    }

    #[test]
    fn parses_interleaved_channels() {
        let t = TransportRequest::parse("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap();
        assert_eq!(
            t,
            TransportRequest::Interleaved {
                rtp_channel: 2,
                rtcp_channel: 3
            }
        );
    }

    #[test]
    fn neither_parameter_present() {
        assert!(TransportRequest::parse("RTP/AVP;unicast").is_none());
    }

    #[test]
    fn malformed_pair_rejected() {
        assert!(TransportRequest::parse("client_port=5000").is_none());
        assert!(TransportRequest::parse("client_port=5000-5001-5002").is_none());
    }

    #[test]
    fn renders_udp_response() {
        let req = TransportRequest::Udp {
            client_rtp_port: 8000,
            client_rtcp_port: 8001,
        };
        assert_eq!(
            render_response(&req, 6000, 6001),
            "RTP/AVP;unicast;client_port=8000-8001;server_port=6000-6001"
        );
    }

    #[test]
    fn renders_interleaved_response() {
        let req = TransportRequest::Interleaved {
            rtp_channel: 0,
            rtcp_channel: 1,
        };
        assert_eq!(
            render_response(&req, 0, 0),
            "RTP/AVP/TCP;unicast;interleaved=0-1"
        );
    }
}
