use crate::error::{ParseErrorKind, Result, VoipError};
use crate::protocol::{Headers, split_headers_and_body};

/// A signalling response.
///
/// Serializes to the standard text format:
///
/// ```text
/// SIP/2.0 200 OK\r\n
/// Via: ...\r\n
/// ...
/// Content-Length: 0\r\n
/// \r\n
/// ```
#[derive(Debug)]
#[must_use]
pub struct SipResponse {
    pub status_code: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl SipResponse {
    pub fn new(status_code: u16, reason: &str, headers: Headers) -> Self {
        SipResponse {
            status_code,
            reason: reason.to_string(),
            headers,
            body: None,
        }
    }

    /// 200 OK — success.
    pub fn ok(headers: Headers) -> Self {
        Self::new(200, "OK", headers)
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    /// Whether this response reports success.
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// Parse a response from its text representation.
    ///
    /// The status line must be `SIP/2.0 <3-digit-code> <reason>`.
    pub fn parse(raw: &str) -> Result<Self> {
        let status_line = raw.lines().next().ok_or(VoipError::Parse {
            kind: ParseErrorKind::EmptyMessage,
        })?;

        let mut tokens = status_line.split_whitespace();
        if tokens.next() != Some("SIP/2.0") {
            return Err(VoipError::Parse {
                kind: ParseErrorKind::InvalidStartLine,
            });
        }
        let code_token = tokens.next().ok_or(VoipError::Parse {
            kind: ParseErrorKind::InvalidStatusCode,
        })?;
        if code_token.len() != 3 {
            return Err(VoipError::Parse {
                kind: ParseErrorKind::InvalidStatusCode,
            });
        }
        let status_code: u16 = code_token.parse().map_err(|_| VoipError::Parse {
            kind: ParseErrorKind::InvalidStatusCode,
        })?;
        let reason = tokens.collect::<Vec<_>>().join(" ");

        let (pairs, body) = split_headers_and_body(raw)?;
        let headers = Headers::from_pairs(pairs)?;

        Ok(SipResponse {
            status_code,
            reason,
            headers,
            body,
        })
    }

    /// Serialize to the text wire format.
    ///
    /// `Content-Length` is computed from the body; bodyless responses
    /// declare zero.
    pub fn serialize(&self) -> String {
        let mut out = format!("SIP/2.0 {} {}\r\n", self.status_code, self.reason);
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
