//! RFC 3550 RTP receiver core.
//!
//! This crate implements the receive-side state machine of an RTP endpoint:
//! for every inbound packet it normalizes the parsed header (RTX
//! de-encapsulation, SSRC filtering), detects source and payload-type
//! transitions, classifies packets as in-order / reordered / retransmitted,
//! and maintains the statistics needed to fill RFC 3550 receiver report
//! blocks and the RFC 5450 extended jitter report.
//!
//! The crate does not touch the network and does not parse the RTP wire
//! format: the caller hands [`RtpReceiver::incoming_rtp_packet`] an already
//! parsed [`RtpHeader`] plus the raw packet bytes. Everything the receiver
//! learns flows back out through the [`FeedbackSink`] callback trait and the
//! statistics getters.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rtp_receiver::{AudioReceiver, RtpReceiver, SystemClock};
//!
//! let clock = Arc::new(SystemClock::new());
//! let media = Arc::new(AudioReceiver::new(payload_sink));
//! let receiver = RtpReceiver::new(0, clock, media, feedback, rtcp_peer);
//!
//! receiver.register_receive_payload("opus", 111, 48000, 2, 0)?;
//! receiver.incoming_rtp_packet(header, &packet)?;
//! let stats = receiver.statistics(true)?;
//! ```

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub(crate) mod bitrate;
pub mod clock;
pub mod extension;
pub mod feedback;
pub mod header;
pub mod media;
pub mod receiver;
pub mod registry;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use extension::{ExtensionKind, HeaderExtensionMap};
pub use feedback::{AliveState, FeedbackSink, PacketKind, PayloadSink, RtcpPeer};
pub use header::RtpHeader;
pub use media::{
    AudioReceiver, MediaKind, MediaReceiver, PayloadChange, SpecificPayload, VideoCodecKind,
    VideoReceiver,
};
pub use receiver::RtpReceiver;
pub use registry::{Payload, PayloadRegistry};
pub use stats::{DataCounters, NackMethod, ReceiverStatistics};

/// Maximum number of contributing sources carried in an RTP header.
pub const MAX_CSRC: usize = 15;

/// Maximum length of a codec payload name, including the terminating byte of
/// the on-the-wire representation.
pub const RTP_PAYLOAD_NAME_SIZE: usize = 32;

/// Media clock rate used for all video payloads.
pub const DEFAULT_VIDEO_FREQUENCY: u32 = 90_000;

/// Reordering distance beyond which a sequence jump backwards is taken as a
/// restart of the remote side rather than a retransmission.
pub const DEFAULT_MAX_REORDERING_THRESHOLD: u16 = 50;
