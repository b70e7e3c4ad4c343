//! SIP dialog state machine.
//!
//! A dialog is the signalling relationship between the two call
//! participants, identified by Call-ID plus the two parties' tags. One
//! [`Dialog`] is owned by exactly one session and mutated only through
//! its own transition methods.
//!
//! ## Lifecycle
//!
//! ```text
//! Caller:  Idle → InviteSent → EstablishedPending → Active → ByeSent → Terminated
//! Callee:  Idle → InviteReceived → OkSent → Active → ByeReceived → Terminated
//! ```
//!
//! A message that does not fit the current state is rejected with a
//! protocol error and the dialog is left unchanged. The remote tag is
//! learned from the first inbound message carrying one; ACK and BYE
//! cannot be generated before that point. CSeq increments by exactly one
//! for every originated request, whatever its kind.

use std::net::IpAddr;

use rand::RngExt;

use crate::error::{ProtocolErrorKind, Result, VoipError};
use crate::protocol::{Headers, MediaDescription, Method, SipRequest, SipResponse};

/// Which side of the call this dialog plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

/// Dialog lifecycle states; see the module docs for the two paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Idle,
    InviteSent,
    InviteReceived,
    EstablishedPending,
    OkSent,
    Active,
    ByeSent,
    ByeReceived,
    Terminated,
}

impl DialogState {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::InviteSent => "InviteSent",
            Self::InviteReceived => "InviteReceived",
            Self::EstablishedPending => "EstablishedPending",
            Self::OkSent => "OkSent",
            Self::Active => "Active",
            Self::ByeSent => "ByeSent",
            Self::ByeReceived => "ByeReceived",
            Self::Terminated => "Terminated",
        }
    }
}

/// Per-call signalling state machine.
#[derive(Debug)]
pub struct Dialog {
    role: Role,
    state: DialogState,
    /// Opaque call identifier, fixed for the dialog's lifetime.
    call_id: String,
    local_tag: String,
    /// Learned from the first inbound message carrying a `tag` parameter.
    remote_tag: Option<String>,
    local_cseq: u32,
    local_ip: IpAddr,
    local_port: u16,
    remote_ip: IpAddr,
}

impl Dialog {
    /// Create a caller-side dialog with fresh random Call-ID and tag.
    pub fn caller(local_ip: IpAddr, local_port: u16, remote_ip: IpAddr) -> Self {
        let mut rng = rand::rng();
        let call_id = format!("{}@{}", rng.random::<u32>(), local_ip);
        let local_tag = format!("{:04}", rng.random::<u16>() % 10000);
        tracing::debug!(%call_id, role = "caller", "dialog created");
        Dialog {
            role: Role::Caller,
            state: DialogState::Idle,
            call_id,
            local_tag,
            remote_tag: None,
            local_cseq: 0,
            local_ip,
            local_port,
            remote_ip,
        }
    }

    /// Create a callee-side dialog; Call-ID and remote tag are adopted
    /// from the INVITE when it arrives.
    pub fn callee(local_ip: IpAddr, local_port: u16, remote_ip: IpAddr) -> Self {
        let local_tag = format!("{:04}", rand::rng().random::<u16>() % 10000);
        Dialog {
            role: Role::Callee,
            state: DialogState::Idle,
            call_id: String::new(),
            local_tag,
            remote_tag: None,
            local_cseq: 0,
            local_ip,
            local_port,
            remote_ip,
        }
    }

    pub fn state(&self) -> DialogState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn local_cseq(&self) -> u32 {
        self.local_cseq
    }

    /// The peer's tag, required before ACK or BYE can be generated.
    pub fn remote_tag(&self) -> Result<&str> {
        self.remote_tag
            .as_deref()
            .ok_or_else(|| VoipError::protocol(ProtocolErrorKind::MissingRemoteTag))
    }

    fn unexpected(&self, event: &'static str) -> VoipError {
        tracing::warn!(state = self.state.name(), event, "unexpected dialog event");
        VoipError::protocol(ProtocolErrorKind::UnexpectedMessage {
            state: self.state.name(),
            event,
        })
    }

    fn expect_state(&self, expected: DialogState, event: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(self.unexpected(event));
        }
        Ok(())
    }

    fn transition(&mut self, next: DialogState) {
        tracing::debug!(
            call_id = %self.call_id,
            from = self.state.name(),
            to = next.name(),
            "dialog transition"
        );
        self.state = next;
    }

    fn request_headers(&mut self, method: Method, to_tag: Option<&str>) -> Headers {
        self.local_cseq += 1;
        let branch: u16 = rand::rng().random::<u16>() % 10000;
        let to = match to_tag {
            Some(tag) => format!("<sip:user2@{}>;tag={}", self.remote_ip, tag),
            None => format!("<sip:user2@{}>", self.remote_ip),
        };
        let mut headers = Headers::new(
            format!(
                "SIP/2.0/UDP {}:{};branch=z9hG4bK{}",
                self.local_ip, self.local_port, branch
            ),
            format!("<sip:user1@{}>;tag={}", self.local_ip, self.local_tag),
            to,
            self.call_id.clone(),
            format!("{} {}", self.local_cseq, method),
        );
        headers.contact = Some(format!("<sip:user1@{}:{}>", self.local_ip, self.local_port));
        headers.push_extra("Max-Forwards", "70");
        headers
    }

    // --- caller transitions ---

    /// Build the INVITE carrying the local media offer. Idle → InviteSent.
    pub fn invite(&mut self, local_media: &MediaDescription) -> Result<SipRequest> {
        self.expect_state(DialogState::Idle, "send INVITE")?;
        if self.role != Role::Caller {
            return Err(self.unexpected("send INVITE"));
        }
        let body = local_media.to_body(&self.call_id);
        let headers = self.request_headers(Method::Invite, None);
        self.transition(DialogState::InviteSent);
        let target = format!("sip:user@{}", self.remote_ip);
        Ok(SipRequest::new(Method::Invite, &target, headers).with_body(body))
    }

    /// Consume the response to the INVITE. InviteSent → EstablishedPending.
    ///
    /// Captures the peer's tag from the To header and extracts the
    /// answered media endpoint from the body. A non-200 status or a 200
    /// without a parsable media port is a protocol error and tears the
    /// attempt down.
    pub fn on_invite_response(&mut self, response: &SipResponse) -> Result<MediaDescription> {
        self.expect_state(DialogState::InviteSent, "INVITE response")?;

        if !response.is_success() {
            tracing::warn!(status = response.status_code, "peer declined INVITE");
            self.transition(DialogState::Terminated);
            return Err(VoipError::protocol(ProtocolErrorKind::UnexpectedStatus(
                response.status_code,
            )));
        }

        if let Some(tag) = Headers::tag_of(&response.headers.to) {
            self.remote_tag = Some(tag.to_string());
        }

        let body = response.body.as_deref().ok_or_else(|| {
            VoipError::protocol(ProtocolErrorKind::InvalidMediaDescription)
        })?;
        let media = MediaDescription::parse(body)?;

        self.transition(DialogState::EstablishedPending);
        tracing::info!(call_id = %self.call_id, peer_media = %media.rtp_addr(), "call answered");
        Ok(media)
    }

    /// Build the ACK confirming the answer. EstablishedPending → Active.
    ///
    /// Requires the remote tag; failing that is a protocol error, never
    /// a request with a hole in it.
    pub fn ack(&mut self) -> Result<SipRequest> {
        self.expect_state(DialogState::EstablishedPending, "send ACK")?;
        let tag = self.remote_tag()?.to_string();
        let headers = self.request_headers(Method::Ack, Some(&tag));
        self.transition(DialogState::Active);
        let target = format!("sip:user@{}", self.remote_ip);
        Ok(SipRequest::new(Method::Ack, &target, headers))
    }

    /// Build the BYE ending the call. Active → ByeSent.
    pub fn bye(&mut self) -> Result<SipRequest> {
        self.expect_state(DialogState::Active, "send BYE")?;
        let tag = self.remote_tag()?.to_string();
        let headers = self.request_headers(Method::Bye, Some(&tag));
        self.transition(DialogState::ByeSent);
        let target = format!("sip:user@{}", self.remote_ip);
        Ok(SipRequest::new(Method::Bye, &target, headers))
    }

    /// Consume the 200 OK to the BYE. ByeSent → Terminated.
    pub fn on_bye_response(&mut self, response: &SipResponse) -> Result<()> {
        self.expect_state(DialogState::ByeSent, "BYE response")?;
        if !response.is_success() {
            return Err(VoipError::protocol(ProtocolErrorKind::UnexpectedStatus(
                response.status_code,
            )));
        }
        self.transition(DialogState::Terminated);
        tracing::info!(call_id = %self.call_id, "call terminated");
        Ok(())
    }

    // --- callee transitions ---

    /// Consume an inbound INVITE. Idle → InviteReceived.
    ///
    /// Adopts the caller's Call-ID, learns the caller's tag from the
    /// From header, and extracts the offered media endpoint.
    pub fn on_invite(&mut self, request: &SipRequest) -> Result<MediaDescription> {
        self.expect_state(DialogState::Idle, "INVITE")?;
        if request.method != Method::Invite || self.role != Role::Callee {
            return Err(self.unexpected("INVITE"));
        }

        let body = request.body.as_deref().ok_or_else(|| {
            VoipError::protocol(ProtocolErrorKind::InvalidMediaDescription)
        })?;
        let media = MediaDescription::parse(body)?;

        self.call_id = request.headers.call_id.clone();
        if let Some(tag) = Headers::tag_of(&request.headers.from) {
            self.remote_tag = Some(tag.to_string());
        }

        self.transition(DialogState::InviteReceived);
        tracing::info!(call_id = %self.call_id, offer = %media.rtp_addr(), "INVITE received");
        Ok(media)
    }

    /// Build the 200 OK answering the INVITE with the local media
    /// endpoint. InviteReceived → OkSent.
    ///
    /// Mirrors the request's Via, From, Call-ID and CSeq; To gains the
    /// local tag.
    pub fn ok_to_invite(
        &mut self,
        request: &SipRequest,
        local_media: &MediaDescription,
    ) -> Result<SipResponse> {
        self.expect_state(DialogState::InviteReceived, "send 200 OK")?;
        let mut headers = Headers::new(
            request.headers.via.clone(),
            request.headers.from.clone(),
            format!("{};tag={}", request.headers.to, self.local_tag),
            request.headers.call_id.clone(),
            request.headers.cseq.clone(),
        );
        headers.contact = Some(format!("<sip:user2@{}:{}>", self.local_ip, self.local_port));
        let body = local_media.to_body(&self.call_id);
        self.transition(DialogState::OkSent);
        Ok(SipResponse::ok(headers).with_body(body))
    }

    /// Consume the ACK. OkSent → Active.
    pub fn on_ack(&mut self, request: &SipRequest) -> Result<()> {
        self.expect_state(DialogState::OkSent, "ACK")?;
        if request.method != Method::Ack {
            return Err(self.unexpected("ACK"));
        }
        self.transition(DialogState::Active);
        tracing::info!(call_id = %self.call_id, "call active");
        Ok(())
    }

    /// Consume the BYE. Active → ByeReceived.
    pub fn on_bye(&mut self, request: &SipRequest) -> Result<()> {
        self.expect_state(DialogState::Active, "BYE")?;
        if request.method != Method::Bye {
            return Err(self.unexpected("BYE"));
        }
        self.transition(DialogState::ByeReceived);
        Ok(())
    }

    /// Build the 200 OK to the BYE. ByeReceived → Terminated.
    pub fn ok_to_bye(&mut self, request: &SipRequest) -> Result<SipResponse> {
        self.expect_state(DialogState::ByeReceived, "send 200 OK to BYE")?;
        let headers = Headers::new(
            request.headers.via.clone(),
            request.headers.from.clone(),
            request.headers.to.clone(),
            request.headers.call_id.clone(),
            request.headers.cseq.clone(),
        );
        self.transition(DialogState::Terminated);
        tracing::info!(call_id = %self.call_id, "call terminated");
        Ok(SipResponse::ok(headers))
    }

    // --- shared ---

    /// External cancellation: a normal transition to Terminated, not an
    /// error. No further requests may be generated or accepted.
    pub fn cancel(&mut self) {
        if self.state != DialogState::Terminated {
            tracing::info!(call_id = %self.call_id, state = self.state.name(), "dialog cancelled");
            self.transition(DialogState::Terminated);
        }
    }

    /// Whether the call reached the media phase (ACK exchanged).
    pub fn is_active(&self) -> bool {
        self.state == DialogState::Active
    }
}
