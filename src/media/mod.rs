//! RTP media packetization and counters (RFC 3550 subset).
//!
//! [`RtpSession`] holds the send-side state: a fixed random SSRC, a
//! wrapping 16-bit sequence number (random start), a monotonic timestamp
//! that advances by the payload byte length (one byte per sample at
//! 8 kHz PCMU), and cumulative packet/octet totals feeding the sender
//! reports in [`rtcp`].
//!
//! The receive side is stateless: [`RtpPacket::parse`] decodes datagrams
//! in arrival order; reordering, loss detection and jitter buffering are
//! deliberately absent.

pub mod rtcp;
pub mod rtp;

pub use rtp::{RTP_HEADER_LEN, RtpPacket};

use rand::RngExt;

use crate::protocol::sdp::PAYLOAD_TYPE_PCMU;

/// Send-side RTP state for one media session.
///
/// SSRC is chosen once at random and never changes; the counters have a
/// single writer (the session's send loop) for their whole lifetime.
#[derive(Debug)]
pub struct RtpSession {
    ssrc: u32,
    payload_type: u8,
    sequence: u16,
    timestamp: u32,
    packet_count: u32,
    octet_count: u32,
}

impl RtpSession {
    /// Create with a random SSRC and random initial sequence number
    /// (RFC 3550 §5.1, §8.1).
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let ssrc = rng.random::<u32>();
        let sequence = rng.random::<u16>();
        tracing::debug!(
            ssrc = format_args!("{:#010X}", ssrc),
            start_sequence = sequence,
            "RTP session created"
        );
        Self::with_state(ssrc, sequence)
    }

    /// Create with explicit SSRC and starting sequence (tests).
    pub fn with_state(ssrc: u32, sequence: u16) -> Self {
        RtpSession {
            ssrc,
            payload_type: PAYLOAD_TYPE_PCMU,
            sequence,
            timestamp: 0,
            packet_count: 0,
            octet_count: 0,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number the next packet will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Timestamp the next packet will carry.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Packets sent so far.
    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    /// Payload octets sent so far.
    pub fn octet_count(&self) -> u32 {
        self.octet_count
    }

    /// Build the next outbound packet and advance all counters.
    ///
    /// The current sequence and timestamp are stamped onto the packet;
    /// then the sequence wraps mod 65536 and the timestamp advances by
    /// the payload length in samples (== bytes for PCMU).
    pub fn packetize(&mut self, payload: &[u8], marker: bool) -> RtpPacket {
        let packet = RtpPacket {
            marker,
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
            payload: payload.to_vec(),
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(payload.len() as u32);
        self.packet_count += 1;
        self.octet_count += payload.len() as u32;
        packet
    }
}

impl Default for RtpSession {
    fn default() -> Self {
        Self::new()
    }
}
