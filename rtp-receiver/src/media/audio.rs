//! Audio specialization of the media receiver.

use std::sync::{Arc, Mutex, PoisonError};

use log::warn;

use crate::feedback::{AliveState, FeedbackSink, PayloadSink};
use crate::header::RtpHeader;
use crate::media::{MediaKind, MediaReceiver, PayloadChange, SpecificPayload};
use rtp_shared::{Error, Result};

const DEFAULT_AUDIO_FREQUENCY: u32 = 8_000;

struct AudioState {
    last_payload: SpecificPayload,
    telephone_event_payload_type: Option<u8>,
    cng_nb_payload_type: Option<u8>,
    cng_wb_payload_type: Option<u8>,
    cng_swb_payload_type: Option<u8>,
    cng_fb_payload_type: Option<u8>,
    last_received_cng_payload_type: Option<u8>,
}

/// Audio receiver: delivers payloads to the sink and keeps the bookkeeping
/// that makes telephone events and comfort noise invisible to the decoder.
pub struct AudioReceiver {
    sink: Arc<dyn PayloadSink>,
    state: Mutex<AudioState>,
}

impl AudioReceiver {
    pub fn new(sink: Arc<dyn PayloadSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(AudioState {
                last_payload: SpecificPayload::Audio {
                    frequency: DEFAULT_AUDIO_FREQUENCY,
                    channels: 1,
                    rate: 0,
                },
                telephone_event_payload_type: None,
                cng_nb_payload_type: None,
                cng_wb_payload_type: None,
                cng_swb_payload_type: None,
                cng_fb_payload_type: None,
                last_received_cng_payload_type: None,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, AudioState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioState {
    fn is_cng_payload_type(&self, payload_type: u8) -> bool {
        [
            self.cng_nb_payload_type,
            self.cng_wb_payload_type,
            self.cng_swb_payload_type,
            self.cng_fb_payload_type,
        ]
        .contains(&Some(payload_type))
    }
}

impl MediaReceiver for AudioReceiver {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
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
        if let SpecificPayload::Audio { .. } = specific {
            self.state().last_payload = *specific;
        }

        let payload_end = packet.len() - header.padding_length;
        let payload = &packet[header.header_length..payload_end];
        if payload.is_empty() {
            // Keep-alive; nothing to hand to the decoder.
            return Ok(());
        }
        self.sink.on_received_payload(header, payload)
    }

    fn frequency_hz(&self) -> u32 {
        match self.state().last_payload {
            SpecificPayload::Audio { frequency, .. } => frequency,
            SpecificPayload::Video { .. } => DEFAULT_AUDIO_FREQUENCY,
        }
    }

    fn on_new_payload_type_created(
        &self,
        name: &str,
        payload_type: u8,
        frequency: u32,
    ) -> Result<()> {
        let mut state = self.state();
        if name.eq_ignore_ascii_case("telephone-event") {
            state.telephone_event_payload_type = Some(payload_type);
        } else if name.eq_ignore_ascii_case("cn") {
            match frequency {
                8_000 => state.cng_nb_payload_type = Some(payload_type),
                16_000 => state.cng_wb_payload_type = Some(payload_type),
                32_000 => state.cng_swb_payload_type = Some(payload_type),
                48_000 => state.cng_fb_payload_type = Some(payload_type),
                _ => {
                    warn!("comfort noise registered with frequency {frequency}");
                    return Err(Error::ErrCnFrequencyUnsupported(frequency));
                }
            }
        }
        Ok(())
    }

    fn last_media_specific_payload(&self) -> SpecificPayload {
        self.state().last_payload
    }

    fn set_last_media_specific_payload(&self, specific: SpecificPayload) {
        self.state().last_payload = specific;
    }

    fn check_payload_changed(&self, payload_type: u8) -> PayloadChange {
        let mut state = self.state();
        if state.telephone_event_payload_type == Some(payload_type) {
            // DTMF rides alongside the speech codec.
            return PayloadChange {
                reset_statistics: false,
                discard_changes: true,
            };
        }
        if state.is_cng_payload_type(payload_type) {
            let band_changed = state.last_received_cng_payload_type != Some(payload_type);
            state.last_received_cng_payload_type = Some(payload_type);
            return PayloadChange {
                reset_statistics: band_changed,
                discard_changes: true,
            };
        }
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
                warn!("failed to initialize audio decoder for payload type {payload_type}");
                Error::ErrDecoderInitFailed(payload_type)
            })
    }

    fn should_report_csrc_changes(&self, _payload_type: u8) -> bool {
        true
    }

    fn process_dead_or_alive(&self, last_payload_length: usize) -> AliveState {
        // Keep-alives do not prove the far end is producing audio.
        if last_payload_length > 0 {
            AliveState::Alive
        } else {
            AliveState::Dead
        }
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

    fn receiver_with_sink() -> (AudioReceiver, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        (AudioReceiver::new(sink.clone()), sink)
    }

    #[test]
    fn test_parse_strips_header_and_padding() {
        let (receiver, sink) = receiver_with_sink();
        let header = RtpHeader {
            header_length: 12,
            padding_length: 2,
            ..Default::default()
        };
        let mut packet = vec![0u8; 12];
        packet.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        packet.extend_from_slice(&[0, 2]); // padding

        let specific = SpecificPayload::Audio {
            frequency: 48_000,
            channels: 2,
            rate: 0,
        };
        receiver
            .parse_rtp_packet(&header, &specific, false, &packet, 0, true)
            .unwrap();

        assert_eq!(sink.payloads.lock().unwrap().as_slice(), &[vec![0xAA, 0xBB, 0xCC]]);
        // The parse also refreshed the clock rate.
        assert_eq!(receiver.frequency_hz(), 48_000);
    }

    #[test]
    fn test_parse_skips_empty_payload() {
        let (receiver, sink) = receiver_with_sink();
        let header = RtpHeader {
            header_length: 12,
            ..Default::default()
        };
        let packet = vec![0u8; 12];
        let specific = SpecificPayload::Audio {
            frequency: 8_000,
            channels: 1,
            rate: 0,
        };
        receiver
            .parse_rtp_packet(&header, &specific, false, &packet, 0, true)
            .unwrap();
        assert!(sink.payloads.lock().unwrap().is_empty());
    }

    #[test]
    fn test_telephone_event_is_discarded() {
        let (receiver, _) = receiver_with_sink();
        receiver
            .on_new_payload_type_created("telephone-event", 106, 8_000)
            .unwrap();

        let change = receiver.check_payload_changed(106);
        assert!(change.discard_changes);
        assert!(!change.reset_statistics);
    }

    #[test]
    fn test_cng_band_change_resets_statistics() {
        let (receiver, _) = receiver_with_sink();
        receiver.on_new_payload_type_created("CN", 13, 8_000).unwrap();
        receiver.on_new_payload_type_created("CN", 98, 16_000).unwrap();

        let first = receiver.check_payload_changed(13);
        assert!(first.discard_changes);
        assert!(first.reset_statistics);

        // Same band again: discard without reset.
        let again = receiver.check_payload_changed(13);
        assert!(again.discard_changes);
        assert!(!again.reset_statistics);

        // Band switch: reset again.
        let switched = receiver.check_payload_changed(98);
        assert!(switched.reset_statistics);
    }

    #[test]
    fn test_cng_with_unsupported_frequency_is_rejected() {
        let (receiver, _) = receiver_with_sink();
        assert_eq!(
            receiver.on_new_payload_type_created("CN", 99, 44_100),
            Err(Error::ErrCnFrequencyUnsupported(44_100))
        );
    }

    #[test]
    fn test_dead_or_alive_requires_payload() {
        let (receiver, _) = receiver_with_sink();
        assert_eq!(receiver.process_dead_or_alive(0), AliveState::Dead);
        assert_eq!(receiver.process_dead_or_alive(160), AliveState::Alive);
    }
}
