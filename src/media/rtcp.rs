//! RTCP sender reports (RFC 3550 §6.4.1, minimal subset).
//!
//! Exactly one packet type is produced: a 28-byte sender report with no
//! reception report blocks, emitted after every 20th RTP packet to the
//! peer media port + 1. No RTCP is consumed.
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|   RC=0  |    PT=200     |            length=6           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  NTP timestamp, seconds                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                  NTP timestamp, fraction                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         RTP timestamp                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     sender's packet count                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     sender's octet count                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use crate::media::RtpSession;

/// RTCP packet type for sender reports.
pub const PACKET_TYPE_SR: u8 = 200;

/// Report length in 32-bit words minus one.
pub const SR_LENGTH_WORDS: u16 = 6;

/// Serialized sender report size in bytes.
pub const SR_LEN: usize = 28;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
pub const NTP_UNIX_OFFSET: u32 = 2_208_988_800;

/// One sender report: wall clock plus cumulative session totals at the
/// moment of emission. Built, transmitted, and forgotten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    pub ssrc: u32,
    /// Seconds since 1900-01-01.
    pub ntp_seconds: u32,
    /// Fractional second as 32-bit fixed point.
    pub ntp_fraction: u32,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl SenderReport {
    /// Snapshot the session's current totals at the given wall-clock time.
    pub fn snapshot(session: &RtpSession, now: SystemTime) -> Self {
        let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or_default();
        SenderReport {
            ssrc: session.ssrc(),
            ntp_seconds: (since_epoch.as_secs() as u32).wrapping_add(NTP_UNIX_OFFSET),
            ntp_fraction: (((since_epoch.subsec_nanos() as u64) << 32) / 1_000_000_000) as u32,
            rtp_timestamp: session.timestamp(),
            packet_count: session.packet_count(),
            octet_count: session.octet_count(),
        }
    }

    /// Serialize the fixed 28-byte layout, network byte order.
    pub fn pack(&self) -> [u8; SR_LEN] {
        let mut buf = [0u8; SR_LEN];
        buf[0] = 2 << 6; // V=2, P=0, RC=0
        buf[1] = PACKET_TYPE_SR;
        buf[2..4].copy_from_slice(&SR_LENGTH_WORDS.to_be_bytes());
        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ntp_seconds.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ntp_fraction.to_be_bytes());
        buf[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf[20..24].copy_from_slice(&self.packet_count.to_be_bytes());
        buf[24..28].copy_from_slice(&self.octet_count.to_be_bytes());
        buf
    }
}

/// Decides when a sender report is due: after every `interval`-th packet.
#[derive(Debug)]
pub struct Reporter {
    interval: u32,
}

/// Packets between consecutive sender reports.
pub const DEFAULT_REPORT_INTERVAL: u32 = 20;

impl Reporter {
    pub fn new(interval: u32) -> Self {
        Reporter { interval }
    }

    /// True when the session's packet count has just crossed a report
    /// boundary (count ≡ 0 mod interval, counting from 1).
    pub fn due(&self, packet_count: u32) -> bool {
        packet_count > 0 && packet_count % self.interval == 0
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(DEFAULT_REPORT_INTERVAL)
    }
}
