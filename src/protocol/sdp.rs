//! SDP-style media description bodies (RFC 8866 subset).
//!
//! A call offer/answer carries one audio stream:
//!
//! ```text
//! v=0                              ← protocol version
//! o=- <call-id> 0 IN IP4 <addr>    ← origin
//! s=VoIP Call                      ← session name
//! c=IN IP4 <addr>                  ← connection address
//! t=0 0                            ← timing
//! m=audio <port> RTP/AVP 0         ← media: UDP port + payload type
//! a=rtpmap:0 PCMU/8000             ← codec/clock rate
//! ```
//!
//! Parsing reads only the `m=` line (second token: port) and the `c=`
//! line (third token: IP); the rest is carried for well-formedness.

use std::net::{IpAddr, SocketAddr};

use crate::error::{ProtocolErrorKind, Result, VoipError};

/// Payload type for PCMU/G.711 µ-law, the one supported codec (RFC 3551).
pub const PAYLOAD_TYPE_PCMU: u8 = 0;

/// A negotiated media endpoint: where RTP should be sent, and with what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// Connection IP from the `c=` line.
    pub ip: IpAddr,
    /// UDP media port from the `m=` line.
    pub port: u16,
    /// RTP payload type from the `m=` line (fixed 0 for PCMU).
    pub payload_type: u8,
}

impl MediaDescription {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        MediaDescription {
            ip,
            port,
            payload_type: PAYLOAD_TYPE_PCMU,
        }
    }

    /// The socket address RTP packets should target.
    pub fn rtp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// The companion reporting address (media port + 1, RFC 3550 §11).
    pub fn rtcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port + 1)
    }

    /// Generate the session description body for an offer or answer.
    pub fn to_body(&self, call_id: &str) -> String {
        let mut sdp: Vec<String> = Vec::new();
        sdp.push("v=0".to_string());
        sdp.push(format!("o=- {} 0 IN IP4 {}", call_id, self.ip));
        sdp.push("s=VoIP Call".to_string());
        sdp.push(format!("c=IN IP4 {}", self.ip));
        sdp.push("t=0 0".to_string());
        sdp.push(format!("m=audio {} RTP/AVP {}", self.port, self.payload_type));
        sdp.push(format!("a=rtpmap:{} PCMU/8000", self.payload_type));
        format!("{}\r\n", sdp.join("\r\n"))
    }

    /// Parse a media description out of a message body.
    ///
    /// Fails with [`VoipError::Protocol`] when either the media port or
    /// the connection IP cannot be extracted.
    pub fn parse(body: &str) -> Result<Self> {
        let mut port: Option<u16> = None;
        let mut payload_type = PAYLOAD_TYPE_PCMU;
        let mut ip: Option<IpAddr> = None;

        for line in body.lines() {
            if let Some(media) = line.strip_prefix("m=") {
                let mut tokens = media.split_whitespace();
                let _kind = tokens.next();
                port = tokens.next().and_then(|t| t.parse().ok());
                // m=audio <port> RTP/AVP <pt>
                if let Some(pt) = tokens.nth(1).and_then(|t| t.parse().ok()) {
                    payload_type = pt;
                }
            } else if let Some(conn) = line.strip_prefix("c=") {
                ip = conn.split_whitespace().nth(2).and_then(|t| t.parse().ok());
            }
        }

        match (ip, port) {
            (Some(ip), Some(port)) => Ok(MediaDescription {
                ip,
                port,
                payload_type,
            }),
            _ => {
                tracing::warn!(body_len = body.len(), "body has no parsable media endpoint");
                Err(VoipError::protocol(ProtocolErrorKind::InvalidMediaDescription))
            }
        }
    }
}
