//! Video specialization of the media receiver.

use std::sync::{Arc, Mutex, PoisonError};

use log::warn;

use crate::feedback::{AliveState, FeedbackSink, PayloadSink};
use crate::header::RtpHeader;
use crate::media::{MediaKind, MediaReceiver, PayloadChange, SpecificPayload, VideoCodecKind};
use crate::DEFAULT_VIDEO_FREQUENCY;
use rtp_shared::{Error, Result};

/// Video receiver: fixed 90 kHz clock, payload delivery to the sink.
///
/// Depacketization beyond the RTP layer (NAL reassembly, VP8 payload
/// descriptors) happens downstream of the [`PayloadSink`].
pub struct VideoReceiver {
    sink: Arc<dyn PayloadSink>,
    last_payload: Mutex<SpecificPayload>,
}

impl VideoReceiver {
    pub fn new(sink: Arc<dyn PayloadSink>) -> Self {
        Self {
            sink,
            last_payload: Mutex::new(SpecificPayload::Video {
                codec: VideoCodecKind::Generic,
                max_rate: 0,
            }),
        }
    }

    fn last_payload(&self) -> std::sync::MutexGuard<'_, SpecificPayload> {
        self.last_payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl MediaReceiver for VideoReceiver {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn parse_rtp_packet(
        &self,
        header: &RtpHeader,
        specific: &SpecificPayload,
        _is_red: bool,
        packet: &[u8],
        _now_ms: i64,
        _is_first_packet: bool,
    ) -> Result<()> {
        if let SpecificPayload::Video { .. } = specific {
            *self.last_payload() = *specific;
        }

        let payload_end = packet.len() - header.padding_length;
        let payload = &packet[header.header_length..payload_end];
        if payload.is_empty() {
            return Ok(());
        }
        self.sink.on_received_payload(header, payload)
    }

    fn frequency_hz(&self) -> u32 {
        DEFAULT_VIDEO_FREQUENCY
    }

    fn on_new_payload_type_created(
        &self,
        _name: &str,
        _payload_type: u8,
        _frequency: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn last_media_specific_payload(&self) -> SpecificPayload {
        *self.last_payload()
    }

    fn set_last_media_specific_payload(&self, specific: SpecificPayload) {
        *self.last_payload() = specific;
    }

    fn check_payload_changed(&self, _payload_type: u8) -> PayloadChange {
        PayloadChange::default()
    }

    fn invoke_on_initialize_decoder(
        &self,
        feedback: &dyn FeedbackSink,
        id: i32,
        payload_type: u8,
        name: &str,
        specific: &SpecificPayload,
    ) -> Result<()> {
        let (frequency, channels, rate) = specific.decoder_parameters();
        feedback
            .on_initialize_decoder(id, payload_type, name, frequency, channels, rate)
            .map_err(|_| {
                warn!("failed to initialize video decoder for payload type {payload_type}");
                Error::ErrDecoderInitFailed(payload_type)
            })
    }

    fn should_report_csrc_changes(&self, _payload_type: u8) -> bool {
        false
    }

    fn process_dead_or_alive(&self, _last_payload_length: usize) -> AliveState {
        // Video liveness comes from RTP receipt alone.
        AliveState::Dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CollectingSink {
        payloads: StdMutex<Vec<Vec<u8>>>,
    }

    impl PayloadSink for CollectingSink {
        fn on_received_payload(&self, _header: &RtpHeader, payload: &[u8]) -> Result<()> {
            self.payloads.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_video_clock_rate_is_fixed() {
        let receiver = VideoReceiver::new(Arc::new(CollectingSink::default()));
        assert_eq!(receiver.frequency_hz(), DEFAULT_VIDEO_FREQUENCY);

        receiver.set_last_media_specific_payload(SpecificPayload::Video {
            codec: VideoCodecKind::Vp8,
            max_rate: 500,
        });
        assert_eq!(receiver.frequency_hz(), DEFAULT_VIDEO_FREQUENCY);
    }

    #[test]
    fn test_video_delivers_payload() {
        let sink = Arc::new(CollectingSink::default());
        let receiver = VideoReceiver::new(sink.clone());
        let header = RtpHeader {
            header_length: 12,
            ..Default::default()
        };
        let mut packet = vec![0u8; 12];
        packet.extend_from_slice(&[1, 2, 3, 4]);

        let specific = SpecificPayload::Video {
            codec: VideoCodecKind::Vp8,
            max_rate: 0,
        };
        receiver
            .parse_rtp_packet(&header, &specific, false, &packet, 0, true)
            .unwrap();
        assert_eq!(sink.payloads.lock().unwrap().as_slice(), &[vec![1, 2, 3, 4]]);
    }

    #[test]
    fn test_video_never_reports_csrc_changes_and_defers_liveness() {
        let receiver = VideoReceiver::new(Arc::new(CollectingSink::default()));
        assert!(!receiver.should_report_csrc_changes(96));
        assert_eq!(receiver.process_dead_or_alive(1_000), AliveState::Dead);
    }
}
