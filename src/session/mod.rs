//! End-to-end call lifecycle orchestration.
//!
//! A [`CallSession`] ties the [`Dialog`], the RTP packetizer, and the
//! sender-report cadence together and owns every network endpoint for
//! the call's lifetime. Two roles:
//!
//! - [`run_caller`](CallSession::run_caller): INVITE → 200 OK → ACK,
//!   then a paced send loop over an external [`PayloadSource`], a
//!   terminal marker packet, and BYE → 200 OK.
//! - [`run_callee`](CallSession::run_callee): wait for INVITE → answer
//!   200 OK → ACK, then deliver depacketized payloads to an external
//!   [`PayloadSink`] until BYE arrives, answer it, and stop.
//!
//! ## Cancellation
//!
//! Every blocking receive is a short-timeout poll re-issued in a loop
//! that checks a cooperative flag each iteration, so cancellation
//! latency is bounded by the poll timeout and no socket is torn down
//! under a blocked call. Cancelling is not an error: the caller still
//! attempts a best-effort BYE when the dialog was active.
//!
//! The callee's media loop runs on its own thread that owns the media
//! socket outright and hands decoded packets to the signalling thread
//! over an `mpsc` channel; the socket closes only after that thread
//! observes the stop flag and exits.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crate::dialog::Dialog;
use crate::error::{ProtocolErrorKind, Result, VoipError};
use crate::media::rtcp::{Reporter, SenderReport};
use crate::media::{RtpPacket, RtpSession};
use crate::protocol::{MediaDescription, Method, SipMessage};
use crate::transport::UdpEndpoint;

/// Poll timeout for every blocking receive; bounds cancellation latency.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for an expected signalling message before the call
/// attempt fails with [`VoipError::Timeout`].
pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_secs(5);

/// Codec frame duration: 160 samples at 8 kHz.
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(20);

/// Default payload chunk size: 20 ms of 8 kHz linear PCM.
pub const DEFAULT_CHUNK_SIZE: usize = 160;

/// Supplies outbound payload chunks: a lazy, finite, non-restartable
/// sequence. Chunk size is up to the producer; 160 bytes corresponds to
/// one 20 ms frame.
pub trait PayloadSource {
    fn next_chunk(&mut self) -> Option<Vec<u8>>;
}

impl<I> PayloadSource for I
where
    I: Iterator<Item = Vec<u8>>,
{
    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.next()
    }
}

/// Accepts decoded payload chunks in delivery order.
pub trait PayloadSink {
    fn consume(&mut self, payload: &[u8]);
}

impl<F> PayloadSink for F
where
    F: FnMut(&[u8]),
{
    fn consume(&mut self, payload: &[u8]) {
        self(payload)
    }
}

/// Addressing and timing parameters for one call.
///
/// The media and report destinations are never taken from here — they
/// come out of the peer's session description.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Local IP advertised in signalling and SDP.
    pub local_ip: IpAddr,
    /// Local UDP port for signalling messages.
    pub signalling_port: u16,
    /// Local UDP port offered for inbound media.
    pub media_port: u16,
    /// The peer's signalling address.
    pub remote_signalling: SocketAddr,
    /// Socket read timeout for every poll iteration.
    pub poll_timeout: Duration,
    /// Bounded wait for an expected signalling message.
    pub answer_timeout: Duration,
    /// Sleep between media sends.
    pub frame_duration: Duration,
}

impl CallConfig {
    pub fn new(
        local_ip: IpAddr,
        signalling_port: u16,
        media_port: u16,
        remote_signalling: SocketAddr,
    ) -> Self {
        CallConfig {
            local_ip,
            signalling_port,
            media_port,
            remote_signalling,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            answer_timeout: DEFAULT_ANSWER_TIMEOUT,
            frame_duration: DEFAULT_FRAME_DURATION,
        }
    }
}

/// Cumulative media totals for a finished call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallStats {
    /// RTP packets sent or received.
    pub packets: u32,
    /// Payload octets sent or received.
    pub octets: u32,
    /// Sender reports emitted (always zero on the receive side).
    pub reports: u32,
}

/// Outcome of a signalling wait that may be cancelled.
enum Waited {
    Message(SipMessage, SocketAddr),
    Cancelled,
}

/// One end of a point-to-point call.
pub struct CallSession {
    config: CallConfig,
    cancel: Arc<AtomicBool>,
}

impl CallSession {
    pub fn new(config: CallConfig) -> Self {
        CallSession {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for requesting cooperative cancellation from another thread.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Poll the signalling endpoint until a message arrives, the deadline
    /// passes ([`VoipError::Timeout`]), or cancellation is requested.
    fn await_signalling(
        &self,
        endpoint: &UdpEndpoint,
        deadline: Option<Instant>,
        expecting: &'static str,
    ) -> Result<Waited> {
        let mut buf = [0u8; 65535];
        loop {
            if self.cancelled() {
                return Ok(Waited::Cancelled);
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    tracing::warn!(expecting, "signalling wait timed out");
                    return Err(VoipError::Timeout(expecting));
                }
            }
            if let Some((len, from)) = endpoint.recv_from(&mut buf)? {
                let text = String::from_utf8_lossy(&buf[..len]);
                return Ok(Waited::Message(SipMessage::parse(&text)?, from));
            }
        }
    }

    /// Drive a complete outbound call, consuming `source` at the codec's
    /// native rate.
    ///
    /// Returns the media totals on success or clean cancellation;
    /// surfaces [`VoipError::Timeout`] when the peer never answers and
    /// protocol errors when it answers wrongly.
    pub fn run_caller(&self, source: &mut dyn PayloadSource) -> Result<CallStats> {
        let cfg = &self.config;
        let sip = UdpEndpoint::bind(
            SocketAddr::new(cfg.local_ip, cfg.signalling_port),
            cfg.poll_timeout,
        )?;
        let media = UdpEndpoint::bind(
            SocketAddr::new(cfg.local_ip, cfg.media_port),
            cfg.poll_timeout,
        )?;

        let mut dialog = Dialog::caller(cfg.local_ip, cfg.signalling_port, cfg.remote_signalling.ip());
        let local_media = MediaDescription::new(cfg.local_ip, cfg.media_port);

        let invite = dialog.invite(&local_media)?;
        sip.send_to(invite.serialize().as_bytes(), cfg.remote_signalling)?;
        tracing::info!(call_id = %dialog.call_id(), to = %cfg.remote_signalling, "INVITE sent");

        let deadline = Instant::now() + cfg.answer_timeout;
        let answer = match self.await_signalling(&sip, Some(deadline), "200 OK to INVITE")? {
            Waited::Message(SipMessage::Response(resp), _) => resp,
            Waited::Message(SipMessage::Request(req), _) => {
                return Err(VoipError::protocol(ProtocolErrorKind::UnexpectedMessage {
                    state: "InviteSent",
                    event: req.method.as_str(),
                }));
            }
            Waited::Cancelled => {
                dialog.cancel();
                return Ok(CallStats::default());
            }
        };

        let peer_media = dialog.on_invite_response(&answer)?;
        let ack = dialog.ack()?;
        sip.send_to(ack.serialize().as_bytes(), cfg.remote_signalling)?;

        let stats = self.send_media(&media, &peer_media, source)?;

        let bye = dialog.bye()?;
        sip.send_to(bye.serialize().as_bytes(), cfg.remote_signalling)?;
        tracing::info!(call_id = %dialog.call_id(), "BYE sent");

        let deadline = Instant::now() + cfg.answer_timeout;
        match self.await_signalling(&sip, Some(deadline), "200 OK to BYE") {
            Ok(Waited::Message(SipMessage::Response(resp), _)) => {
                dialog.on_bye_response(&resp)?;
            }
            Ok(Waited::Message(SipMessage::Request(req), _)) => {
                return Err(VoipError::protocol(ProtocolErrorKind::UnexpectedMessage {
                    state: "ByeSent",
                    event: req.method.as_str(),
                }));
            }
            Ok(Waited::Cancelled) => dialog.cancel(),
            // Teardown after cancellation is best-effort only.
            Err(VoipError::Timeout(_)) if self.cancelled() => dialog.cancel(),
            Err(e) => return Err(e),
        }

        Ok(stats)
    }

    /// Paced media send loop plus terminal marker packet.
    ///
    /// One chunk per frame duration; a sender report goes to the peer's
    /// report port after every 20th packet. Exactly one packet carries
    /// the marker bit: the last one, whose payload is empty even when
    /// the source produced nothing at all.
    fn send_media(
        &self,
        media: &UdpEndpoint,
        peer: &MediaDescription,
        source: &mut dyn PayloadSource,
    ) -> Result<CallStats> {
        let mut rtp = RtpSession::new();
        let reporter = Reporter::default();
        let mut reports = 0u32;

        let emit = |rtp: &mut RtpSession, payload: &[u8], marker: bool| -> Result<bool> {
            let packet = rtp.packetize(payload, marker);
            media.send_to(&packet.pack(), peer.rtp_addr())?;
            if reporter.due(rtp.packet_count()) {
                let report = SenderReport::snapshot(rtp, SystemTime::now());
                media.send_to(&report.pack(), peer.rtcp_addr())?;
                tracing::debug!(
                    packets = report.packet_count,
                    octets = report.octet_count,
                    to = %peer.rtcp_addr(),
                    "sender report emitted"
                );
                return Ok(true);
            }
            Ok(false)
        };

        tracing::info!(to = %peer.rtp_addr(), "media stream started");
        while let Some(chunk) = source.next_chunk() {
            if self.cancelled() {
                tracing::info!("media stream cancelled");
                break;
            }
            if emit(&mut rtp, &chunk, false)? {
                reports += 1;
            }
            thread::sleep(self.config.frame_duration);
        }

        // Terminal marker packet, sent on exhaustion and cancellation alike.
        if emit(&mut rtp, &[], true)? {
            reports += 1;
        }
        tracing::info!(packets = rtp.packet_count(), "media stream complete");

        Ok(CallStats {
            packets: rtp.packet_count(),
            octets: rtp.octet_count(),
            reports,
        })
    }

    /// Answer one inbound call, delivering depacketized payloads to
    /// `sink` until the peer hangs up or cancellation is requested.
    ///
    /// Returns the receive totals; a cancellation before any INVITE
    /// arrives yields zeroed stats.
    pub fn run_callee(&self, sink: &mut dyn PayloadSink) -> Result<CallStats> {
        let cfg = &self.config;
        let sip = UdpEndpoint::bind(
            SocketAddr::new(cfg.local_ip, cfg.signalling_port),
            cfg.poll_timeout,
        )?;
        let mut dialog = Dialog::callee(cfg.local_ip, cfg.signalling_port, cfg.remote_signalling.ip());

        // No deadline here: wait for a call until told to stop.
        let (invite, peer_addr) = loop {
            match self.await_signalling(&sip, None, "INVITE")? {
                Waited::Message(SipMessage::Request(req), from)
                    if req.method == Method::Invite =>
                {
                    break (req, from);
                }
                Waited::Message(msg, from) => {
                    tracing::warn!(%from, ?msg, "ignoring unexpected message while idle");
                }
                Waited::Cancelled => return Ok(CallStats::default()),
            }
        };

        dialog.on_invite(&invite)?;
        let local_media = MediaDescription::new(cfg.local_ip, cfg.media_port);

        // Bind the media socket before answering, so the first packets
        // the peer sends after our 200 OK have somewhere to land.
        let media = UdpEndpoint::bind(
            SocketAddr::new(cfg.local_ip, cfg.media_port),
            cfg.poll_timeout,
        )?;

        let ok = dialog.ok_to_invite(&invite, &local_media)?;
        sip.send_to(ok.serialize().as_bytes(), peer_addr)?;
        tracing::info!(call_id = %dialog.call_id(), "200 OK sent");

        let deadline = Instant::now() + cfg.answer_timeout;
        match self.await_signalling(&sip, Some(deadline), "ACK")? {
            Waited::Message(SipMessage::Request(req), _) if req.method == Method::Ack => {
                dialog.on_ack(&req)?;
            }
            Waited::Message(SipMessage::Request(req), _) => {
                return Err(VoipError::protocol(ProtocolErrorKind::UnexpectedMessage {
                    state: "OkSent",
                    event: req.method.as_str(),
                }));
            }
            Waited::Message(SipMessage::Response(resp), _) => {
                return Err(VoipError::protocol(ProtocolErrorKind::UnexpectedStatus(
                    resp.status_code,
                )));
            }
            Waited::Cancelled => {
                dialog.cancel();
                return Ok(CallStats::default());
            }
        }

        // Media receiver thread: owns the socket, forwards decoded
        // packets over a channel, exits when the stop flag flips.
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<RtpPacket>();
        let receiver_stop = stop.clone();
        let receiver = thread::spawn(move || receive_loop(media, tx, receiver_stop));

        let mut stats = CallStats::default();
        let mut deliver = |stats: &mut CallStats, packet: RtpPacket| {
            stats.packets += 1;
            stats.octets += packet.payload.len() as u32;
            // The empty terminal marker frame carries nothing to play.
            if !packet.payload.is_empty() {
                sink.consume(&packet.payload);
            }
        };

        let mut buf = [0u8; 65535];
        let bye = loop {
            for packet in rx.try_iter() {
                deliver(&mut stats, packet);
            }
            if self.cancelled() {
                break None;
            }
            // One bounded poll per iteration; no deadline, the peer ends
            // the call with BYE or we are cancelled.
            let polled = match sip.recv_from(&mut buf) {
                Ok(polled) => polled,
                Err(e) => {
                    stop.store(true, Ordering::SeqCst);
                    let _ = receiver.join();
                    return Err(e);
                }
            };
            if let Some((len, from)) = polled {
                let text = String::from_utf8_lossy(&buf[..len]);
                match SipMessage::parse(&text) {
                    Ok(SipMessage::Request(req)) if req.method == Method::Bye => {
                        break Some((req, from));
                    }
                    Ok(msg) => {
                        tracing::warn!(%from, ?msg, "ignoring unexpected message while active");
                    }
                    Err(e) => {
                        tracing::warn!(%from, error = %e, "malformed signalling while active");
                    }
                }
            }
        };

        let teardown = match bye {
            Some((req, from)) => dialog
                .on_bye(&req)
                .and_then(|()| dialog.ok_to_bye(&req))
                .and_then(|ok| sip.send_to(ok.serialize().as_bytes(), from))
                .map(|_| ()),
            None => {
                dialog.cancel();
                Ok(())
            }
        };

        // Join before surfacing any teardown error so the media socket
        // never outlives its owning loop.
        stop.store(true, Ordering::SeqCst);
        if receiver.join().is_err() {
            tracing::warn!("media receiver thread panicked");
        }
        // Drain whatever arrived between the BYE and the thread exit.
        for packet in rx.try_iter() {
            deliver(&mut stats, packet);
        }
        teardown?;

        tracing::info!(packets = stats.packets, octets = stats.octets, "call finished");
        Ok(stats)
    }
}

/// Media receive loop: bounded polls, short datagrams dropped, decoded
/// packets forwarded in arrival order.
///
/// The socket lives and dies with this loop; nothing else touches it.
fn receive_loop(media: UdpEndpoint, tx: mpsc::Sender<RtpPacket>, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; 65535];
    let mut draining = false;
    loop {
        if !draining && stop.load(Ordering::SeqCst) {
            // Stop requested: pick up what already reached the socket
            // buffer, then exit on the next empty poll.
            draining = true;
        }
        let (len, _from) = match media.recv_from(&mut buf) {
            Ok(Some(datagram)) => datagram,
            Ok(None) if draining => break,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "media receive failed");
                break;
            }
        };
        match RtpPacket::parse(&buf[..len]) {
            Ok(packet) => {
                tracing::trace!(
                    sequence = packet.sequence,
                    timestamp = packet.timestamp,
                    len = packet.payload.len(),
                    marker = packet.marker,
                    "RTP packet received"
                );
                if tx.send(packet).is_err() {
                    break;
                }
            }
            Err(VoipError::ShortPacket { len }) => {
                tracing::debug!(len, "dropping short media datagram");
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable media datagram");
            }
        }
    }
    tracing::debug!("media receive loop exited");
}
