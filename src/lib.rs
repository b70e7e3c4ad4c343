//! Point-to-point VoIP engine: SIP-style signalling over UDP paired
//! with RTP media transport and periodic sender reports.
//!
//! The crate is the protocol core only. Audio file reading, device
//! playback, and user interfaces are external collaborators wired in
//! through [`PayloadSource`] and [`PayloadSink`].
//!
//! ```no_run
//! use voip::{CallConfig, CallSession};
//!
//! let config = CallConfig::new(
//!     "192.168.1.10".parse().unwrap(),
//!     5062,
//!     5000,
//!     "192.168.1.20:5062".parse().unwrap(),
//! );
//! let session = CallSession::new(config);
//! let mut frames = std::iter::repeat_n(vec![0u8; 160], 100);
//! let stats = session.run_caller(&mut frames).unwrap();
//! println!("sent {} packets", stats.packets);
//! ```

pub mod dialog;
pub mod error;
pub mod media;
pub mod protocol;
pub mod session;
pub mod transport;

pub use dialog::{Dialog, DialogState, Role};
pub use error::{Result, VoipError};
pub use media::{RtpPacket, RtpSession};
pub use protocol::{MediaDescription, Method, SipMessage, SipRequest, SipResponse};
pub use session::{CallConfig, CallSession, CallStats, PayloadSink, PayloadSource};
