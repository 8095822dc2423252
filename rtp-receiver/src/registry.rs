//! Payload registry: payload-type number to codec descriptor.

use std::collections::HashMap;

use crate::media::{MediaKind, SpecificPayload, VideoCodecKind};
use crate::RTP_PAYLOAD_NAME_SIZE;
use rtp_shared::{Error, Result};

/// A registered codec descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub name: String,
    pub specific: SpecificPayload,
}

impl Payload {
    pub fn is_audio(&self) -> bool {
        matches!(self.specific, SpecificPayload::Audio { .. })
    }
}

/// Maps RTP payload-type numbers to codec descriptors and remembers which
/// payload types the stream last used.
///
/// Re-registering a payload type with different parameters replaces the
/// descriptor and counts as newly created; identical parameters are a no-op.
#[derive(Debug, Clone)]
pub struct PayloadRegistry {
    kind: MediaKind,
    payloads: HashMap<u8, Payload>,
    red_payload_type: Option<u8>,
    last_received_payload_type: Option<u8>,
    last_received_media_payload_type: Option<u8>,
}

impl PayloadRegistry {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            payloads: HashMap::new(),
            red_payload_type: None,
            last_received_payload_type: None,
            last_received_media_payload_type: None,
        }
    }

    /// Register a codec under `payload_type`.
    ///
    /// Returns whether a descriptor was created (the caller runs the media
    /// receiver's creation hook only in that case).
    pub fn register_receive_payload(
        &mut self,
        name: &str,
        payload_type: u8,
        frequency: u32,
        channels: u8,
        rate: u32,
    ) -> Result<bool> {
        if name.len() >= RTP_PAYLOAD_NAME_SIZE {
            return Err(Error::ErrPayloadNameTooLong);
        }

        let specific = match self.kind {
            MediaKind::Audio => SpecificPayload::Audio {
                frequency,
                channels,
                rate,
            },
            MediaKind::Video => SpecificPayload::Video {
                codec: VideoCodecKind::from_name(name),
                max_rate: rate,
            },
        };

        if let Some(existing) = self.payloads.get(&payload_type) {
            if existing.name.eq_ignore_ascii_case(name) && existing.specific == specific {
                return Ok(false);
            }
        }

        self.payloads.insert(
            payload_type,
            Payload {
                name: name.to_owned(),
                specific,
            },
        );
        if name.eq_ignore_ascii_case("red") {
            self.red_payload_type = Some(payload_type);
        } else if self.red_payload_type == Some(payload_type) {
            self.red_payload_type = None;
        }
        Ok(true)
    }

    pub fn deregister_receive_payload(&mut self, payload_type: u8) -> Result<()> {
        if self.payloads.remove(&payload_type).is_none() {
            return Err(Error::ErrPayloadTypeUnknown(payload_type));
        }
        if self.red_payload_type == Some(payload_type) {
            self.red_payload_type = None;
        }
        Ok(())
    }

    /// Reverse lookup by codec parameters.
    pub fn receive_payload_type(
        &self,
        name: &str,
        frequency: u32,
        channels: u8,
        rate: u32,
    ) -> Result<u8> {
        self.payloads
            .iter()
            .find(|(_, payload)| {
                if !payload.name.eq_ignore_ascii_case(name) {
                    return false;
                }
                match payload.specific {
                    SpecificPayload::Audio {
                        frequency: f,
                        channels: c,
                        rate: r,
                    } => f == frequency && c == channels && (r == rate || r == 0 || rate == 0),
                    SpecificPayload::Video { .. } => true,
                }
            })
            .map(|(payload_type, _)| *payload_type)
            .ok_or(Error::ErrPayloadNameUnknown)
    }

    pub fn payload(&self, payload_type: u8) -> Option<&Payload> {
        self.payloads.get(&payload_type)
    }

    pub fn last_received_payload_type(&self) -> Option<u8> {
        self.last_received_payload_type
    }

    pub fn set_last_received_payload_type(&mut self, payload_type: u8) {
        self.last_received_payload_type = Some(payload_type);
    }

    pub fn reset_last_received_payload_types(&mut self) {
        self.last_received_payload_type = None;
        self.last_received_media_payload_type = None;
    }

    /// The payload type registered under the name "red", if any.
    pub fn red_payload_type(&self) -> Option<u8> {
        self.red_payload_type
    }

    /// Record the last media (non-RED, non-FEC) payload type; returns whether
    /// the media type is unchanged.
    pub fn report_media_payload_type(&mut self, payload_type: u8) -> bool {
        if self.last_received_media_payload_type == Some(payload_type) {
            return true;
        }
        self.last_received_media_payload_type = Some(payload_type);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio_registry() -> PayloadRegistry {
        PayloadRegistry::new(MediaKind::Audio)
    }

    #[test]
    fn test_register_and_reverse_lookup_round_trip() {
        let mut registry = audio_registry();
        assert!(registry
            .register_receive_payload("PCMU", 0, 8_000, 1, 64_000)
            .unwrap());
        assert!(registry
            .register_receive_payload("opus", 111, 48_000, 2, 0)
            .unwrap());

        assert_eq!(registry.receive_payload_type("PCMU", 8_000, 1, 64_000), Ok(0));
        assert_eq!(registry.receive_payload_type("opus", 48_000, 2, 0), Ok(111));
        // Rate is a soft match when either side leaves it unset.
        assert_eq!(registry.receive_payload_type("pcmu", 8_000, 1, 0), Ok(0));
        assert_eq!(
            registry.receive_payload_type("PCMA", 8_000, 1, 0),
            Err(Error::ErrPayloadNameUnknown)
        );
    }

    #[test]
    fn test_identical_reregistration_creates_nothing() {
        let mut registry = audio_registry();
        assert!(registry
            .register_receive_payload("opus", 111, 48_000, 2, 0)
            .unwrap());
        assert!(!registry
            .register_receive_payload("opus", 111, 48_000, 2, 0)
            .unwrap());
    }

    #[test]
    fn test_conflicting_reregistration_replaces_descriptor() {
        let mut registry = audio_registry();
        registry
            .register_receive_payload("opus", 111, 48_000, 2, 0)
            .unwrap();
        // Same payload type, different channel count: descriptor is replaced
        // and reported as newly created.
        assert!(registry
            .register_receive_payload("opus", 111, 48_000, 1, 0)
            .unwrap());

        let payload = registry.payload(111).unwrap();
        assert_eq!(
            payload.specific,
            SpecificPayload::Audio {
                frequency: 48_000,
                channels: 1,
                rate: 0
            }
        );
    }

    #[test]
    fn test_name_length_is_capped() {
        let mut registry = audio_registry();
        let name = "x".repeat(RTP_PAYLOAD_NAME_SIZE);
        assert_eq!(
            registry.register_receive_payload(&name, 96, 8_000, 1, 0),
            Err(Error::ErrPayloadNameTooLong)
        );
    }

    #[test]
    fn test_red_marker_follows_registration() {
        let mut registry = audio_registry();
        assert_eq!(registry.red_payload_type(), None);

        registry
            .register_receive_payload("RED", 127, 8_000, 1, 0)
            .unwrap();
        assert_eq!(registry.red_payload_type(), Some(127));

        // Replacing the descriptor under the same payload type clears it.
        registry
            .register_receive_payload("PCMU", 127, 8_000, 1, 0)
            .unwrap();
        assert_eq!(registry.red_payload_type(), None);

        registry
            .register_receive_payload("red", 126, 8_000, 1, 0)
            .unwrap();
        registry.deregister_receive_payload(126).unwrap();
        assert_eq!(registry.red_payload_type(), None);
    }

    #[test]
    fn test_deregister_unknown_payload_type() {
        let mut registry = audio_registry();
        assert_eq!(
            registry.deregister_receive_payload(96),
            Err(Error::ErrPayloadTypeUnknown(96))
        );
    }

    #[test]
    fn test_last_received_payload_types() {
        let mut registry = audio_registry();
        assert_eq!(registry.last_received_payload_type(), None);

        registry.set_last_received_payload_type(111);
        assert_eq!(registry.last_received_payload_type(), Some(111));

        registry.reset_last_received_payload_types();
        assert_eq!(registry.last_received_payload_type(), None);
    }

    #[test]
    fn test_report_media_payload_type_detects_changes() {
        let mut registry = audio_registry();
        assert!(!registry.report_media_payload_type(96));
        assert!(registry.report_media_payload_type(96));
        assert!(!registry.report_media_payload_type(97));
        assert!(registry.report_media_payload_type(97));
    }

    #[test]
    fn test_video_codec_kind_from_name() {
        let mut registry = PayloadRegistry::new(MediaKind::Video);
        registry
            .register_receive_payload("VP8", 96, 90_000, 1, 0)
            .unwrap();
        registry
            .register_receive_payload("ULPFEC", 97, 90_000, 1, 0)
            .unwrap();

        assert_eq!(
            registry.payload(96).unwrap().specific,
            SpecificPayload::Video {
                codec: VideoCodecKind::Vp8,
                max_rate: 0
            }
        );
        assert_eq!(
            registry.payload(97).unwrap().specific,
            SpecificPayload::Video {
                codec: VideoCodecKind::Fec,
                max_rate: 0
            }
        );
    }
}
