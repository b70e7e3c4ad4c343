//! Integration tests: full INVITE → 200 OK → ACK → media → BYE calls
//! over real loopback UDP sockets.
//!
//! Fixed high ports, one range per test, so the tests can run in
//! parallel without colliding.

use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use voip::media::RTP_HEADER_LEN;
use voip::session::DEFAULT_CHUNK_SIZE;
use voip::{CallConfig, CallSession, SipMessage, SipRequest, VoipError};

fn config(sip_port: u16, media_port: u16, remote_sip_port: u16) -> CallConfig {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let mut cfg = CallConfig::new(
        "127.0.0.1".parse().unwrap(),
        sip_port,
        media_port,
        format!("127.0.0.1:{remote_sip_port}").parse().unwrap(),
    );
    cfg.poll_timeout = Duration::from_millis(50);
    cfg.answer_timeout = Duration::from_secs(2);
    cfg
}

/// Frames with recognizable content so ordering is checkable.
fn frames(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| vec![i as u8; DEFAULT_CHUNK_SIZE])
        .collect()
}

#[test]
fn loopback_call_delivers_payloads_in_order() {
    let sent = frames(30);

    let callee_cfg = config(19212, 19210, 19202);
    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let received_in_thread = received.clone();

    let callee = thread::spawn(move || {
        let session = CallSession::new(callee_cfg);
        let mut sink = |payload: &[u8]| {
            received_in_thread.lock().unwrap().push(payload.to_vec());
        };
        session.run_callee(&mut sink)
    });

    // Give the callee time to bind its signalling socket.
    thread::sleep(Duration::from_millis(100));

    let caller_cfg = config(19202, 19200, 19212);
    let session = CallSession::new(caller_cfg);
    let mut source = sent.clone().into_iter();
    let caller_stats = session.run_caller(&mut source).expect("caller side");

    let callee_stats = callee.join().unwrap().expect("callee side");

    // 30 audio frames plus the empty terminal marker packet.
    assert_eq!(caller_stats.packets, 31);
    assert_eq!(caller_stats.octets, 30 * DEFAULT_CHUNK_SIZE as u32);
    assert_eq!(caller_stats.reports, 1, "one sender report per 20 packets");

    assert_eq!(callee_stats.packets, 31);
    assert_eq!(callee_stats.octets, caller_stats.octets);

    // The sink sees every non-empty payload, in order, marker excluded.
    assert_eq!(*received.lock().unwrap(), sent);
}

/// Scripted peer answering at the wire level, asserting the raw bytes
/// the caller emits: header fields, sequence continuity, marker
/// placement, report cadence, and that media targets the answered port
/// rather than the offered one.
#[test]
fn caller_media_targets_answered_port_with_correct_framing() {
    const CALLER_SIP: u16 = 19102;
    const CALLER_MEDIA: u16 = 19100;
    const PEER_SIP: u16 = 19112;
    const PEER_MEDIA: u16 = 19104; // deliberately not the offered port

    let peer = thread::spawn(move || {
        let sip = UdpSocket::bind(("127.0.0.1", PEER_SIP)).unwrap();
        sip.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let rtp = UdpSocket::bind(("127.0.0.1", PEER_MEDIA)).unwrap();
        rtp.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let rtcp = UdpSocket::bind(("127.0.0.1", PEER_MEDIA + 1)).unwrap();
        rtcp.set_read_timeout(Some(Duration::from_millis(200))).unwrap();

        let mut buf = [0u8; 65535];

        // INVITE
        let (len, caller_addr) = sip.recv_from(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..len]).to_string();
        let invite = SipRequest::parse(&text).expect("INVITE parses");
        let body = invite.body.as_deref().expect("INVITE has SDP");
        assert!(
            body.contains(&format!("m=audio {CALLER_MEDIA} RTP/AVP 0")),
            "offer must carry the caller's media port"
        );

        // 200 OK answering with a different media port.
        let sdp = format!(
            "v=0\r\no=- 1 0 IN IP4 127.0.0.1\r\ns=VoIP Call\r\n\
             c=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio {PEER_MEDIA} RTP/AVP 0\r\n\
             a=rtpmap:0 PCMU/8000\r\n"
        );
        let ok = format!(
            "SIP/2.0 200 OK\r\nVia: {}\r\nFrom: {}\r\nTo: {};tag=8122\r\n\
             Call-ID: {}\r\nCSeq: {}\r\nContent-Type: application/sdp\r\n\
             Content-Length: {}\r\n\r\n{}",
            invite.headers.via,
            invite.headers.from,
            invite.headers.to,
            invite.headers.call_id,
            invite.headers.cseq,
            sdp.len(),
            sdp
        );
        sip.send_to(ok.as_bytes(), caller_addr).unwrap();

        // ACK
        let (len, _) = sip.recv_from(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..len]).to_string();
        let ack = SipRequest::parse(&text).expect("ACK parses");
        assert_eq!(ack.method, voip::Method::Ack);
        assert!(
            ack.headers.to.contains("tag=8122"),
            "ACK must echo the learned remote tag"
        );

        // Collect RTP until the marker packet arrives.
        let mut packets: Vec<Vec<u8>> = Vec::new();
        loop {
            let (len, _) = rtp.recv_from(&mut buf).unwrap();
            let datagram = buf[..len].to_vec();
            let marker = datagram[1] & 0x80 != 0;
            packets.push(datagram);
            if marker {
                break;
            }
        }

        // Collect whatever sender reports arrived.
        let mut reports: Vec<Vec<u8>> = Vec::new();
        while let Ok((len, _)) = rtcp.recv_from(&mut buf) {
            reports.push(buf[..len].to_vec());
        }

        // BYE, answered so the caller can finish.
        let (len, caller_addr) = sip.recv_from(&mut buf).unwrap();
        let text = String::from_utf8_lossy(&buf[..len]).to_string();
        let bye = SipRequest::parse(&text).expect("BYE parses");
        assert_eq!(bye.method, voip::Method::Bye);
        let ok = format!(
            "SIP/2.0 200 OK\r\nVia: {}\r\nFrom: {}\r\nTo: {}\r\n\
             Call-ID: {}\r\nCSeq: {}\r\nContent-Length: 0\r\n\r\n",
            bye.headers.via,
            bye.headers.from,
            bye.headers.to,
            bye.headers.call_id,
            bye.headers.cseq,
        );
        sip.send_to(ok.as_bytes(), caller_addr).unwrap();

        (packets, reports)
    });

    thread::sleep(Duration::from_millis(100));

    let session = CallSession::new(config(CALLER_SIP, CALLER_MEDIA, PEER_SIP));
    let mut source = frames(25).into_iter();
    let stats = session.run_caller(&mut source).expect("caller side");
    assert_eq!(stats.packets, 26);

    let (packets, reports) = peer.join().unwrap();
    assert_eq!(packets.len(), 26, "25 frames plus the terminal marker");

    let ssrc = u32::from_be_bytes(packets[0][8..12].try_into().unwrap());
    let first_seq = u16::from_be_bytes([packets[0][2], packets[0][3]]);
    let mut expected_timestamp = u32::from_be_bytes(packets[0][4..8].try_into().unwrap());

    for (i, datagram) in packets.iter().enumerate() {
        assert_eq!(datagram[0] >> 6, 2, "RTP version");
        assert_eq!(datagram[1] & 0x7f, 0, "payload type PCMU");
        let seq = u16::from_be_bytes([datagram[2], datagram[3]]);
        assert_eq!(seq, first_seq.wrapping_add(i as u16), "sequence continuity");
        let timestamp = u32::from_be_bytes(datagram[4..8].try_into().unwrap());
        assert_eq!(timestamp, expected_timestamp, "timestamp continuity");
        expected_timestamp =
            expected_timestamp.wrapping_add((datagram.len() - RTP_HEADER_LEN) as u32);
        assert_eq!(
            u32::from_be_bytes(datagram[8..12].try_into().unwrap()),
            ssrc,
            "SSRC constant across the stream"
        );

        let marker = datagram[1] & 0x80 != 0;
        if i == packets.len() - 1 {
            assert!(marker, "last packet carries the marker");
            assert_eq!(datagram.len(), RTP_HEADER_LEN, "marker payload is empty");
        } else {
            assert!(!marker, "only the terminal packet carries the marker");
        }
    }

    // Exactly one report for 26 packets, emitted at packet 20.
    assert_eq!(reports.len(), 1);
    let sr = &reports[0];
    assert_eq!(sr.len(), 28);
    assert_eq!(sr[0] >> 6, 2);
    assert_eq!(sr[1], 200, "packet type SR");
    assert_eq!(u16::from_be_bytes([sr[2], sr[3]]), 6, "length in words");
    assert_eq!(
        u32::from_be_bytes(sr[4..8].try_into().unwrap()),
        ssrc,
        "report SSRC matches the media SSRC"
    );
    assert_eq!(
        u32::from_be_bytes(sr[20..24].try_into().unwrap()),
        20,
        "packet count at emission"
    );
    assert_eq!(
        u32::from_be_bytes(sr[24..28].try_into().unwrap()),
        20 * DEFAULT_CHUNK_SIZE as u32,
        "octet count at emission"
    );
}

#[test]
fn zero_length_source_sends_single_marker_then_bye() {
    const CALLER_SIP: u16 = 19402;
    const CALLER_MEDIA: u16 = 19400;
    const PEER_SIP: u16 = 19412;
    const PEER_MEDIA: u16 = 19410;

    let peer = thread::spawn(move || {
        let sip = UdpSocket::bind(("127.0.0.1", PEER_SIP)).unwrap();
        sip.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let rtp = UdpSocket::bind(("127.0.0.1", PEER_MEDIA)).unwrap();
        rtp.set_read_timeout(Some(Duration::from_secs(3))).unwrap();

        let mut buf = [0u8; 65535];
        let (len, caller_addr) = sip.recv_from(&mut buf).unwrap();
        let invite =
            SipRequest::parse(&String::from_utf8_lossy(&buf[..len])).expect("INVITE parses");

        let sdp = format!(
            "v=0\r\no=- 1 0 IN IP4 127.0.0.1\r\ns=VoIP Call\r\n\
             c=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio {PEER_MEDIA} RTP/AVP 0\r\n"
        );
        let ok = format!(
            "SIP/2.0 200 OK\r\nVia: {}\r\nFrom: {}\r\nTo: {};tag=31\r\n\
             Call-ID: {}\r\nCSeq: {}\r\nContent-Length: {}\r\n\r\n{}",
            invite.headers.via,
            invite.headers.from,
            invite.headers.to,
            invite.headers.call_id,
            invite.headers.cseq,
            sdp.len(),
            sdp
        );
        sip.send_to(ok.as_bytes(), caller_addr).unwrap();

        sip.recv_from(&mut buf).unwrap(); // ACK

        // Exactly one media datagram: the empty marker packet.
        let (len, _) = rtp.recv_from(&mut buf).unwrap();
        assert_eq!(len, RTP_HEADER_LEN);
        assert_ne!(buf[1] & 0x80, 0, "marker bit set");

        let (len, caller_addr) = sip.recv_from(&mut buf).unwrap();
        let bye = SipRequest::parse(&String::from_utf8_lossy(&buf[..len])).expect("BYE parses");
        assert_eq!(bye.method, voip::Method::Bye);
        let ok = format!(
            "SIP/2.0 200 OK\r\nVia: {}\r\nFrom: {}\r\nTo: {}\r\n\
             Call-ID: {}\r\nCSeq: {}\r\nContent-Length: 0\r\n\r\n",
            bye.headers.via,
            bye.headers.from,
            bye.headers.to,
            bye.headers.call_id,
            bye.headers.cseq,
        );
        sip.send_to(ok.as_bytes(), caller_addr).unwrap();
    });

    thread::sleep(Duration::from_millis(100));

    let session = CallSession::new(config(CALLER_SIP, CALLER_MEDIA, PEER_SIP));
    let mut source = std::iter::empty::<Vec<u8>>();
    let stats = session.run_caller(&mut source).expect("caller side");

    assert_eq!(stats.packets, 1);
    assert_eq!(stats.octets, 0);
    peer.join().unwrap();
}

#[test]
fn unanswered_invite_times_out() {
    let mut cfg = config(19502, 19500, 19512); // nothing listens on 19512
    cfg.answer_timeout = Duration::from_millis(300);

    let session = CallSession::new(cfg);
    let mut source = frames(3).into_iter();
    let err = session.run_caller(&mut source).unwrap_err();
    assert!(
        matches!(err, VoipError::Timeout("200 OK to INVITE")),
        "expected timeout, got {err:?}"
    );
}

#[test]
fn malformed_message_while_waiting_fails_cleanly() {
    const CALLER_SIP: u16 = 19602;
    const PEER_SIP: u16 = 19612;

    let peer = thread::spawn(move || {
        let sip = UdpSocket::bind(("127.0.0.1", PEER_SIP)).unwrap();
        sip.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let mut buf = [0u8; 65535];
        let (_, caller_addr) = sip.recv_from(&mut buf).unwrap();
        // A "response" that is not a signalling message at all.
        sip.send_to(b"NOT A SIP MESSAGE\r\n\r\n", caller_addr).unwrap();
    });

    thread::sleep(Duration::from_millis(100));

    let session = CallSession::new(config(CALLER_SIP, 19600, PEER_SIP));
    let mut source = frames(1).into_iter();
    let err = session.run_caller(&mut source).unwrap_err();
    assert!(matches!(err, VoipError::Parse { .. }), "got {err:?}");
    peer.join().unwrap();
}

#[test]
fn callee_cancellation_before_invite_returns_cleanly() {
    let session = CallSession::new(config(19702, 19700, 19712));
    let cancel = session.cancel_flag();

    let handle = thread::spawn(move || {
        let mut sink = |_: &[u8]| {};
        session.run_callee(&mut sink)
    });

    thread::sleep(Duration::from_millis(150));
    cancel.store(true, std::sync::atomic::Ordering::SeqCst);

    let stats = handle.join().unwrap().expect("cancellation is not an error");
    assert_eq!(stats, voip::CallStats::default());
}

/// A caller cancelled mid-stream stops pulling from the source but
/// still closes the stream properly: one empty marker packet, then a
/// BYE on the signalling port.
#[test]
fn caller_cancellation_mid_stream_sends_marker_and_bye() {
    const CALLER_SIP: u16 = 19302;
    const CALLER_MEDIA: u16 = 19300;
    const PEER_SIP: u16 = 19312;
    const PEER_MEDIA: u16 = 19310;

    let session = CallSession::new(config(CALLER_SIP, CALLER_MEDIA, PEER_SIP));
    let cancel = session.cancel_flag();

    let peer = thread::spawn(move || {
        let sip = UdpSocket::bind(("127.0.0.1", PEER_SIP)).unwrap();
        sip.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let rtp = UdpSocket::bind(("127.0.0.1", PEER_MEDIA)).unwrap();
        rtp.set_read_timeout(Some(Duration::from_secs(3))).unwrap();

        let mut buf = [0u8; 65535];
        let (len, caller_addr) = sip.recv_from(&mut buf).unwrap();
        let invite =
            SipRequest::parse(&String::from_utf8_lossy(&buf[..len])).expect("INVITE parses");

        let sdp = format!(
            "v=0\r\no=- 1 0 IN IP4 127.0.0.1\r\ns=VoIP Call\r\n\
             c=IN IP4 127.0.0.1\r\nt=0 0\r\nm=audio {PEER_MEDIA} RTP/AVP 0\r\n"
        );
        let ok = format!(
            "SIP/2.0 200 OK\r\nVia: {}\r\nFrom: {}\r\nTo: {};tag=52\r\n\
             Call-ID: {}\r\nCSeq: {}\r\nContent-Length: {}\r\n\r\n{}",
            invite.headers.via,
            invite.headers.from,
            invite.headers.to,
            invite.headers.call_id,
            invite.headers.cseq,
            sdp.len(),
            sdp
        );
        sip.send_to(ok.as_bytes(), caller_addr).unwrap();

        sip.recv_from(&mut buf).unwrap(); // ACK

        // Ask for the hang-up once a few frames have arrived, then keep
        // reading until the stream closes.
        let mut packets = 0usize;
        let marker_len;
        loop {
            let (len, _) = rtp.recv_from(&mut buf).unwrap();
            packets += 1;
            if packets == 5 {
                cancel.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            if buf[1] & 0x80 != 0 {
                marker_len = len;
                break;
            }
        }

        let (len, _) = sip.recv_from(&mut buf).unwrap();
        let bye = SipRequest::parse(&String::from_utf8_lossy(&buf[..len])).expect("BYE parses");
        assert_eq!(bye.method, voip::Method::Bye);

        (packets, marker_len)
    });

    thread::sleep(Duration::from_millis(100));

    let mut source = frames(500).into_iter();
    let stats = session.run_caller(&mut source).expect("cancelled caller finishes cleanly");

    let (packets, marker_len) = peer.join().unwrap();
    assert_eq!(marker_len, RTP_HEADER_LEN, "terminal marker payload is empty");
    assert!(
        (6..50).contains(&packets),
        "stream cut well short of the 500-frame source, got {packets}"
    );
    assert_eq!(stats.packets, packets as u32);
}

#[test]
fn invite_missing_call_id_is_a_protocol_error() {
    let raw = "INVITE sip:user@127.0.0.1 SIP/2.0\r\n\
               Via: SIP/2.0/UDP 127.0.0.1:19802\r\n\
               From: <sip:user1@127.0.0.1>;tag=1\r\n\
               To: <sip:user2@127.0.0.1>\r\n\
               CSeq: 1 INVITE\r\n\r\n";
    assert!(matches!(
        SipMessage::parse(raw).unwrap_err(),
        VoipError::Protocol { .. }
    ));
}
