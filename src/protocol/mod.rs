//! SIP-style signalling message codec.
//!
//! Messages follow the familiar text layout:
//!
//! ```text
//! INVITE sip:user@10.0.0.2 SIP/2.0\r\n
//! Via: SIP/2.0/UDP 10.0.0.1:5062;branch=z9hG4bK1234\r\n
//! From: <sip:user1@10.0.0.1>;tag=4471\r\n
//! To: <sip:user2@10.0.0.2>\r\n
//! Call-ID: 583920@10.0.0.1\r\n
//! CSeq: 1 INVITE\r\n
//! Content-Type: application/sdp\r\n
//! Content-Length: 131\r\n
//! \r\n
//! v=0\r\n...
//! ```
//!
//! Parsing classifies the start line as a request (known method) or a
//! response (`SIP/2.0 <code> <reason>`); anything else is a
//! [`ParseError`](crate::error::ParseErrorKind::InvalidStartLine).
//! Header lookup is case-insensitive; the mandatory set is enforced by
//! [`Headers`].

pub mod headers;
pub mod request;
pub mod response;
pub mod sdp;

pub use headers::Headers;
pub use request::SipRequest;
pub use response::SipResponse;
pub use sdp::MediaDescription;

use crate::error::{ParseErrorKind, Result, VoipError};

/// Request methods the dialog understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Invite,
    Ack,
    Bye,
}

impl Method {
    /// Method token as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
        }
    }

    pub(crate) fn from_token(token: &str) -> Option<Self> {
        match token {
            "INVITE" => Some(Method::Invite),
            "ACK" => Some(Method::Ack),
            "BYE" => Some(Method::Bye),
            _ => None,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed signalling message: either a request or a response.
#[derive(Debug)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    /// Parse a datagram into a request or response.
    ///
    /// Splits headers from body at the first blank line, builds the
    /// mandatory header record, and attaches the body when
    /// `Content-Length` declares one.
    pub fn parse(raw: &str) -> Result<Self> {
        let start_line = raw.lines().next().ok_or(VoipError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let first_token = start_line.split_whitespace().next().ok_or(VoipError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        if first_token == "SIP/2.0" {
            SipResponse::parse(raw).map(SipMessage::Response)
        } else if Method::from_token(first_token).is_some() {
            SipRequest::parse(raw).map(SipMessage::Request)
        } else {
            Err(VoipError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            })
        }
    }
}

/// Split a raw message into header `(name, value)` pairs and an optional
/// body, shared by request and response parsing.
///
/// The body is everything after the first blank line; it is kept only
/// when a non-zero `Content-Length` was declared, and its byte length
/// must match the declaration.
pub(crate) fn split_headers_and_body(raw: &str) -> Result<(Vec<(String, String)>, Option<String>)> {
    let (head, body_text) = match raw.split_once("\r\n\r\n") {
        Some((head, rest)) => (head, rest),
        None => match raw.split_once("\n\n") {
            Some((head, rest)) => (head, rest),
            None => (raw, ""),
        },
    };

    let mut pairs = Vec::new();
    for line in head.lines().skip(1) {
        if line.is_empty() {
            break;
        }
        let colon_pos = line.find(':').ok_or(VoipError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;
        let name = line[..colon_pos].trim().to_string();
        let value = line[colon_pos + 1..].trim().to_string();
        pairs.push((name, value));
    }

    let declared_len: usize = pairs
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0);

    let body = match declared_len {
        0 => None,
        n if body_text.len() == n => Some(body_text.to_string()),
        _ => {
            return Err(VoipError::Parse {
                kind: ParseErrorKind::BodyLengthMismatch,
            });
        }
    };

    Ok((pairs, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_request() {
        let raw = "INVITE sip:user@10.0.0.2 SIP/2.0\r\n\
                   Via: SIP/2.0/UDP 10.0.0.1:5062\r\n\
                   From: <sip:a@10.0.0.1>;tag=1\r\n\
                   To: <sip:b@10.0.0.2>\r\n\
                   Call-ID: 7@10.0.0.1\r\n\
                   CSeq: 1 INVITE\r\n\r\n";
        match SipMessage::parse(raw).unwrap() {
            SipMessage::Request(req) => assert_eq!(req.method, Method::Invite),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn classify_response() {
        let raw = "SIP/2.0 200 OK\r\n\
                   Via: SIP/2.0/UDP 10.0.0.1:5062\r\n\
                   From: <sip:a@10.0.0.1>;tag=1\r\n\
                   To: <sip:b@10.0.0.2>;tag=2\r\n\
                   Call-ID: 7@10.0.0.1\r\n\
                   CSeq: 1 INVITE\r\n\r\n";
        match SipMessage::parse(raw).unwrap() {
            SipMessage::Response(resp) => assert_eq!(resp.status_code, 200),
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn unknown_start_line_rejected() {
        let err = SipMessage::parse("REGISTER sip:user@h SIP/2.0\r\n\r\n").unwrap_err();
        assert!(matches!(
            err,
            VoipError::Parse {
                kind: ParseErrorKind::InvalidStartLine
            }
        ));
    }

    #[test]
    fn body_shorter_than_declared_rejected() {
        let raw = "INVITE sip:user@10.0.0.2 SIP/2.0\r\n\
                   Via: SIP/2.0/UDP 10.0.0.1:5062\r\n\
                   From: <sip:a@10.0.0.1>;tag=1\r\n\
                   To: <sip:b@10.0.0.2>\r\n\
                   Call-ID: 7@10.0.0.1\r\n\
                   CSeq: 1 INVITE\r\n\
                   Content-Length: 99\r\n\r\nv=0\r\n";
        let err = SipMessage::parse(raw).unwrap_err();
        assert!(matches!(
            err,
            VoipError::Parse {
                kind: ParseErrorKind::BodyLengthMismatch
            }
        ));
    }

    #[test]
    fn body_matching_declared_length_kept() {
        let body = "v=0\r\n";
        let raw = format!(
            "INVITE sip:user@10.0.0.2 SIP/2.0\r\n\
             Via: SIP/2.0/UDP 10.0.0.1:5062\r\n\
             From: <sip:a@10.0.0.1>;tag=1\r\n\
             To: <sip:b@10.0.0.2>\r\n\
             Call-ID: 7@10.0.0.1\r\n\
             CSeq: 1 INVITE\r\n\
             Content-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        match SipMessage::parse(&raw).unwrap() {
            SipMessage::Request(req) => assert_eq!(req.body.as_deref(), Some(body)),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_rejected() {
        assert!(SipMessage::parse("").is_err());
    }
}
