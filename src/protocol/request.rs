use crate::error::{ParseErrorKind, Result, VoipError};
use crate::protocol::{Headers, Method, split_headers_and_body};

/// A signalling request (INVITE, ACK, BYE).
///
/// Built by the [`Dialog`](crate::dialog::Dialog) with the mandatory
/// header set already populated; serialization appends
/// `Content-Type`/`Content-Length` automatically when a body is present.
#[derive(Debug)]
pub struct SipRequest {
    pub method: Method,
    /// Request target, e.g. `sip:user@10.0.0.2`.
    pub target: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl SipRequest {
    pub fn new(method: Method, target: &str, headers: Headers) -> Self {
        SipRequest {
            method,
            target: target.to_string(),
            headers,
            body: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Parse a request from its text representation.
    ///
    /// The start line must be `METHOD target [SIP/2.0]` with a known
    /// method; the mandatory headers must all be present.
    pub fn parse(raw: &str) -> Result<Self> {
        let start_line = raw.lines().next().ok_or(VoipError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let mut tokens = start_line.split_whitespace();
        let method = tokens
            .next()
            .and_then(Method::from_token)
            .ok_or(VoipError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            })?;
        let target = tokens
            .next()
            .ok_or(VoipError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            })?
            .to_string();

        let (pairs, body) = split_headers_and_body(raw)?;
        let headers = Headers::from_pairs(pairs)?;

        Ok(SipRequest {
            method,
            target,
            headers,
            body,
        })
    }

    /// Serialize to the text wire format.
    ///
    /// `Content-Type: application/sdp` and `Content-Length` are emitted
    /// when a body is present; `Content-Length: 0` otherwise.
    pub fn serialize(&self) -> String {
        let mut out = format!("{} {} SIP/2.0\r\n", self.method, self.target);
        self.headers.serialize_into(&mut out);
        match &self.body {
            Some(body) => {
                out.push_str("Content-Type: application/sdp\r\n");
                out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                out.push_str(body);
            }
            None => out.push_str("Content-Length: 0\r\n\r\n"),
        }
        out
    }
}
