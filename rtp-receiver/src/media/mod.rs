//! Media-specific halves of the receiver.
//!
//! The core state machine is media agnostic; everything that differs between
//! audio and video sits behind [`MediaReceiver`]:
//!
//! - [`AudioReceiver`]: tracks telephone-event and comfort-noise payload
//!   types, reports CSRC changes, derives its clock rate from the last media
//!   payload.
//! - [`VideoReceiver`]: fixed 90 kHz clock, no payload special cases, no
//!   CSRC reporting.

mod audio;
mod video;

pub use audio::AudioReceiver;
pub use video::VideoReceiver;

use crate::feedback::{AliveState, FeedbackSink};
use crate::header::RtpHeader;
use crate::DEFAULT_VIDEO_FREQUENCY;
use rtp_shared::Result;

/// Which media plane a receiver serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Video codec families the receiver distinguishes.
///
/// Only FEC needs special handling (in-band recovery data never
/// re-initializes the decoder); everything else is carried for the decoder
/// hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodecKind {
    Generic,
    Vp8,
    Fec,
}

impl VideoCodecKind {
    /// Classify a registered payload name.
    pub(crate) fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("vp8") {
            VideoCodecKind::Vp8
        } else if name.eq_ignore_ascii_case("ulpfec") {
            VideoCodecKind::Fec
        } else {
            VideoCodecKind::Generic
        }
    }
}

/// The codec-specific half of a payload descriptor, shared between the
/// registry and the media receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecificPayload {
    Audio {
        frequency: u32,
        channels: u8,
        rate: u32,
    },
    Video {
        codec: VideoCodecKind,
        max_rate: u32,
    },
}

impl SpecificPayload {
    /// Decoder-init parameters: (frequency, channels, rate).
    pub(crate) fn decoder_parameters(&self) -> (u32, u8, u32) {
        match *self {
            SpecificPayload::Audio {
                frequency,
                channels,
                rate,
            } => (frequency, channels, rate),
            SpecificPayload::Video { max_rate, .. } => (DEFAULT_VIDEO_FREQUENCY, 1, max_rate),
        }
    }
}

/// Outcome of asking a media receiver about a payload-type transition.
#[derive(Default, Debug, Clone, Copy)]
pub struct PayloadChange {
    /// The transition invalidates the statistics epoch.
    pub reset_statistics: bool,
    /// The transition must not be recorded (telephone events, comfort
    /// noise); the stream continues on the previous codec.
    pub discard_changes: bool,
}

/// Capabilities the core requires from the audio and video specializations.
///
/// Implementations are shared references; any mutable state lives behind
/// interior mutability. With the exception of [`parse_rtp_packet`] and
/// [`invoke_on_initialize_decoder`], methods may be called while the
/// receiver lock is held and must not call back into the receiver.
///
/// [`parse_rtp_packet`]: MediaReceiver::parse_rtp_packet
/// [`invoke_on_initialize_decoder`]: MediaReceiver::invoke_on_initialize_decoder
pub trait MediaReceiver: Send + Sync {
    fn kind(&self) -> MediaKind;

    /// Parse and deliver one packet's payload. Called outside the receiver
    /// lock; failures propagate to the caller of `incoming_rtp_packet`.
    fn parse_rtp_packet(
        &self,
        header: &RtpHeader,
        specific: &SpecificPayload,
        is_red: bool,
        packet: &[u8],
        now_ms: i64,
        is_first_packet: bool,
    ) -> Result<()>;

    /// Media clock rate of the current stream, in Hz.
    fn frequency_hz(&self) -> u32;

    /// A descriptor was created in the payload registry. Failing here fails
    /// the registration.
    fn on_new_payload_type_created(&self, name: &str, payload_type: u8, frequency: u32)
        -> Result<()>;

    fn last_media_specific_payload(&self) -> SpecificPayload;

    fn set_last_media_specific_payload(&self, specific: SpecificPayload);

    /// Evaluate a payload-type transition before the registry is consulted.
    fn check_payload_changed(&self, payload_type: u8) -> PayloadChange;

    /// Hand the decoder-init event to the feedback sink, filling in the
    /// media-specific parameters.
    fn invoke_on_initialize_decoder(
        &self,
        feedback: &dyn FeedbackSink,
        id: i32,
        payload_type: u8,
        name: &str,
        specific: &SpecificPayload,
    ) -> Result<()>;

    /// Whether CSRC-list changes on this payload type are reported upward.
    fn should_report_csrc_changes(&self, payload_type: u8) -> bool;

    /// Media-specific liveness verdict when RTP has gone quiet but RTCP is
    /// still alive.
    fn process_dead_or_alive(&self, last_payload_length: usize) -> AliveState;
}
