//! The reception state machine and its thread-safe facade.
//!
//! [`RtpReceiver`] is called from at least three contexts: the network read
//! path ([`incoming_rtp_packet`]), a periodic timer ([`packet_timeout`],
//! [`process_dead_or_alive`], [`process_bitrate`]) and arbitrary control
//! threads (setters and statistics reads). One exclusive lock guards all
//! state; feedback callbacks and payload parsing run with the lock released
//! so the layers above can call back in without deadlocking.
//!
//! [`incoming_rtp_packet`]: RtpReceiver::incoming_rtp_packet
//! [`packet_timeout`]: RtpReceiver::packet_timeout
//! [`process_dead_or_alive`]: RtpReceiver::process_dead_or_alive
//! [`process_bitrate`]: RtpReceiver::process_bitrate

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Buf;
use log::{debug, error, warn};

use crate::bitrate::BitrateEstimator;
use crate::clock::{current_rtp, Clock};
use crate::extension::{ExtensionKind, HeaderExtensionMap};
use crate::feedback::{AliveState, FeedbackSink, PacketKind, RtcpPeer};
use crate::header::RtpHeader;
use crate::media::{MediaReceiver, SpecificPayload, VideoCodecKind};
use crate::registry::{Payload, PayloadRegistry};
use crate::stats::{DataCounters, NackMethod, ReceiverStatistics, ReceptionStats};
use crate::MAX_CSRC;
use rtp_shared::{Error, Result};

/// An RTP packet within the last second proves the stream alive.
const RTP_ALIVE_WINDOW_MS: i64 = 1_000;

struct ReceiverState {
    registry: PayloadRegistry,
    extension_map: HeaderExtensionMap,
    stats: ReceptionStats,
    bitrate: BitrateEstimator,

    /// 0 until the first packet, and again after a packet timeout.
    last_receive_time_ms: i64,
    last_received_payload_length: usize,
    /// 0 disables the timeout.
    packet_timeout_ms: u32,

    ssrc: u32,
    num_csrcs: usize,
    current_remote_csrc: [u32; MAX_CSRC],
    num_energy: usize,
    current_remote_energy: [u8; MAX_CSRC],

    use_ssrc_filter: bool,
    ssrc_filter: u32,

    rtx: bool,
    rtx_ssrc: u32,
}

/// Deferred feedback, snapshotted under the lock and delivered after release.
enum Event {
    ReceivedPacket(PacketKind),
    SsrcChanged(u32),
    InitializeDecoder {
        payload_type: u8,
        name: String,
        frequency: u32,
        channels: u8,
        rate: u32,
    },
    CsrcChanged {
        csrc: u32,
        added: bool,
    },
}

/// Decoder hand-off planned by a payload-type change; executed through the
/// media receiver once the lock is released.
struct DecoderInit {
    payload_type: u8,
    name: String,
}

/// Receive-side RTP state machine for one stream.
///
/// The collaborator handles are shared references whose lifetime outlives
/// the receiver; the receiver owns none of them.
pub struct RtpReceiver {
    id: i32,
    clock: Arc<dyn Clock>,
    media: Arc<dyn MediaReceiver>,
    feedback: Arc<dyn FeedbackSink>,
    rtcp: Arc<dyn RtcpPeer>,
    state: Mutex<ReceiverState>,
}

impl RtpReceiver {
    pub fn new(
        id: i32,
        clock: Arc<dyn Clock>,
        media: Arc<dyn MediaReceiver>,
        feedback: Arc<dyn FeedbackSink>,
        rtcp: Arc<dyn RtcpPeer>,
    ) -> Self {
        let registry = PayloadRegistry::new(media.kind());
        Self {
            id,
            clock,
            media,
            feedback,
            rtcp,
            state: Mutex::new(ReceiverState {
                registry,
                extension_map: HeaderExtensionMap::new(),
                stats: ReceptionStats::new(),
                bitrate: BitrateEstimator::new(),
                last_receive_time_ms: 0,
                last_received_payload_length: 0,
                packet_timeout_ms: 0,
                ssrc: 0,
                num_csrcs: 0,
                current_remote_csrc: [0; MAX_CSRC],
                num_energy: 0,
                current_remote_energy: [0; MAX_CSRC],
                use_ssrc_filter: false,
                ssrc_filter: 0,
                rtx: false,
                rtx_ssrc: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReceiverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, events: Vec<Event>) {
        for event in events {
            match event {
                Event::ReceivedPacket(kind) => self.feedback.on_received_packet(self.id, kind),
                Event::SsrcChanged(ssrc) => {
                    // The RTCP sender and receiver need the new remote SSRC
                    // before anyone reacts to the change.
                    self.rtcp.set_remote_ssrc(ssrc);
                    self.feedback.on_incoming_ssrc_changed(self.id, ssrc);
                }
                Event::InitializeDecoder {
                    payload_type,
                    name,
                    frequency,
                    channels,
                    rate,
                } => {
                    if self
                        .feedback
                        .on_initialize_decoder(self.id, payload_type, &name, frequency, channels, rate)
                        .is_err()
                    {
                        error!("failed to create decoder for payload type {payload_type}");
                    }
                }
                Event::CsrcChanged { csrc, added } => {
                    self.feedback.on_incoming_csrc_changed(self.id, csrc, added)
                }
            }
        }
    }

    /// Feed one parsed packet into the receiver.
    ///
    /// `header` is consumed because RTX de-encapsulation rewrites it in
    /// place before the packet is processed as part of the main stream.
    pub fn incoming_rtp_packet(&self, mut header: RtpHeader, packet: &[u8]) -> Result<()> {
        let packet_length = packet.len();
        let length = packet_length as i64 - header.padding_length as i64;
        if length - (header.header_length as i64) < 0 {
            warn!("rtp packet shorter than its header");
            return Err(Error::ErrPacketShorterThanHeader);
        }

        let mut events: Vec<Event> = Vec::new();
        let payload_outcome = {
            let mut state = self.lock();

            if state.rtx && state.rtx_ssrc == header.ssrc {
                if header.header_length + 2 > packet_length {
                    return Err(Error::ErrRtxPacketTooShort);
                }
                // The first two payload bytes carry the original sequence
                // number, big endian; the rest is the original payload.
                let mut original_seq = &packet[header.header_length..];
                header.ssrc = state.ssrc;
                header.sequence_number = original_seq.get_u16();
                // The retransmission prefix counts as RTP header.
                header.header_length += 2;
            }

            if state.use_ssrc_filter && header.ssrc != state.ssrc_filter {
                warn!(
                    "dropping packet from ssrc {:#010x} due to ssrc filter",
                    header.ssrc
                );
                return Err(Error::ErrSsrcFiltered);
            }

            if state.last_receive_time_ms == 0 {
                // Triggers only once per epoch.
                let kind = if header.payload_length(packet_length) == 0 {
                    PacketKind::KeepAlive
                } else {
                    PacketKind::Rtp
                };
                events.push(Event::ReceivedPacket(kind));
            }

            let first_payload_byte = if header.payload_length(packet_length) > 0 {
                packet[header.header_length]
            } else {
                0
            };

            self.check_ssrc_changed(&mut state, &header, &mut events);
            self.check_payload_changed(&mut state, &header, first_payload_byte)
        };
        self.deliver(events);

        let (specific, is_red, decoder_init) = match payload_outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if header.payload_length(packet_length) == 0 {
                    debug!("received keepalive");
                    return Ok(());
                }
                warn!("received invalid payload type: {e}");
                return Err(e);
            }
        };

        if let Some(init) = decoder_init {
            if let Err(e) = self.media.invoke_on_initialize_decoder(
                &*self.feedback,
                self.id,
                init.payload_type,
                &init.name,
                &specific,
            ) {
                if header.payload_length(packet_length) == 0 {
                    debug!("received keepalive");
                    return Ok(());
                }
                return Err(e);
            }
        }

        let mut csrc_events: Vec<Event> = Vec::new();
        let is_first_packet = {
            let mut state = self.lock();
            self.check_csrc(&mut state, &header, &mut csrc_events);

            let is_first_packet_in_frame = state
                .stats
                .last_received_sequence_number
                .wrapping_add(1)
                == header.sequence_number
                && state.stats.last_received_timestamp != header.timestamp;
            is_first_packet_in_frame || state.last_receive_time_ms == 0
        };
        self.deliver(csrc_events);

        let payload_data_length = header.payload_length(packet_length);

        self.media.parse_rtp_packet(
            &header,
            &specific,
            is_red,
            packet,
            self.clock.now_ms(),
            is_first_packet,
        )?;

        let min_rtt_ms = self.rtcp.min_rtt_ms(header.ssrc).unwrap_or(0);

        let mut state = self.lock();
        let now_ms = self.clock.now_ms();
        let frequency_hz = self.media.frequency_hz();

        // Compares against the running maximum, so classify before the
        // statistics update advances it.
        let old_packet = state.stats.retransmit_of_old_packet(
            header.sequence_number,
            header.timestamp,
            now_ms,
            state.last_receive_time_ms,
            frequency_hz,
            min_rtt_ms,
        );

        let now_rtp_samples = current_rtp(&*self.clock, frequency_hz);
        state.bitrate.update(payload_data_length);
        state
            .stats
            .update(&header, payload_data_length, old_packet, now_rtp_samples);

        state.last_receive_time_ms = now_ms;
        state.last_received_payload_length = payload_data_length;

        if !old_packet {
            if state.stats.last_received_timestamp != header.timestamp {
                state.stats.last_received_timestamp = header.timestamp;
                state.stats.last_received_frame_time_ms = now_ms;
            }
            state.stats.last_received_sequence_number = header.sequence_number;
            state.stats.last_received_transmission_time_offset = header.transmission_time_offset;
        }
        Ok(())
    }

    /// Detect and absorb a change of synchronization source.
    fn check_ssrc_changed(
        &self,
        state: &mut ReceiverState,
        header: &RtpHeader,
        events: &mut Vec<Event>,
    ) {
        let last_received_payload_type = state.registry.last_received_payload_type();
        if state.ssrc == header.ssrc
            && !(last_received_payload_type.is_none() && state.ssrc == 0)
        {
            return;
        }

        state.stats.reset_statistics();
        state.stats.clear_last_received();

        let mut decoder_init: Option<Event> = None;
        if state.ssrc != 0 {
            // The stream restarted. Same codec as before still means the
            // decoder must be told.
            if Some(header.payload_type) == last_received_payload_type {
                let Some(payload) = state.registry.payload(header.payload_type) else {
                    return;
                };
                let (frequency, channels, rate) = payload.specific.decoder_parameters();
                decoder_init = Some(Event::InitializeDecoder {
                    payload_type: header.payload_type,
                    name: payload.name.clone(),
                    frequency,
                    channels,
                    rate,
                });
            }
        }
        state.ssrc = header.ssrc;

        events.push(Event::SsrcChanged(header.ssrc));
        if let Some(event) = decoder_init {
            events.push(event);
        }
    }

    /// Detect a payload-type change and resolve the packet's codec.
    ///
    /// Returns the media-specific payload to parse with, whether the packet
    /// was RED-wrapped, and a planned decoder hand-off (run outside the
    /// lock).
    fn check_payload_changed(
        &self,
        state: &mut ReceiverState,
        header: &RtpHeader,
        first_payload_byte: u8,
    ) -> Result<(SpecificPayload, bool, Option<DecoderInit>)> {
        let mut payload_type = header.payload_type;
        let last_received = state.registry.last_received_payload_type();

        if Some(payload_type) == last_received {
            return Ok((self.media.last_media_specific_payload(), false, None));
        }

        let mut is_red = false;
        if state.registry.red_payload_type() == Some(payload_type) {
            // The real codec is named by the first payload byte.
            payload_type = first_payload_byte & 0x7f;
            is_red = true;

            if state.registry.red_payload_type() == Some(payload_type) {
                // Proceeding would record RED as the last received payload
                // type and corrupt everything keyed off it.
                return Err(Error::ErrRedInsideRed);
            }
            if Some(payload_type) == last_received {
                return Ok((self.media.last_media_specific_payload(), is_red, None));
            }
        }

        let change = self.media.check_payload_changed(payload_type);
        if change.reset_statistics {
            state.stats.reset_statistics();
        }
        if change.discard_changes {
            return Ok((self.media.last_media_specific_payload(), false, None));
        }

        let payload = state
            .registry
            .payload(payload_type)
            .ok_or(Error::ErrUnknownPayloadType(payload_type))?;
        let name = payload.name.clone();
        let specific = payload.specific;

        state.registry.set_last_received_payload_type(payload_type);
        self.media.set_last_media_specific_payload(specific);

        let mut re_initialize_decoder = true;
        if let SpecificPayload::Video { codec, .. } = specific {
            if codec == VideoCodecKind::Fec {
                // In-band recovery data rides the media decoder.
                re_initialize_decoder = false;
            } else if state.registry.report_media_payload_type(payload_type) {
                // Same media codec; only the wrapping changed.
                re_initialize_decoder = false;
            }
        }

        if re_initialize_decoder {
            state.stats.reset_statistics();
            Ok((specific, is_red, Some(DecoderInit { payload_type, name })))
        } else {
            Ok((specific, is_red, None))
        }
    }

    /// Diff the contributing-source list and record audio levels.
    fn check_csrc(&self, state: &mut ReceiverState, header: &RtpHeader, events: &mut Vec<Event>) {
        if !self.media.should_report_csrc_changes(header.payload_type) {
            return;
        }

        let num_energy = usize::from(header.num_energy).min(MAX_CSRC);
        state.num_energy = num_energy;
        state.current_remote_energy[..num_energy].copy_from_slice(&header.energy[..num_energy]);

        let old_num_csrcs = state.num_csrcs;
        let old_remote_csrc = state.current_remote_csrc;

        let num_csrcs = usize::from(header.num_csrcs).min(MAX_CSRC);
        if num_csrcs > 0 {
            state.current_remote_csrc[..num_csrcs].copy_from_slice(&header.csrcs[..num_csrcs]);
        }
        if num_csrcs == 0 && old_num_csrcs == 0 {
            return;
        }
        state.num_csrcs = num_csrcs;

        let new_list = &header.csrcs[..num_csrcs];
        let old_list = &old_remote_csrc[..old_num_csrcs];

        let mut have_called_callback = false;
        for &csrc in new_list {
            if csrc != 0 && !old_list.contains(&csrc) {
                have_called_callback = true;
                events.push(Event::CsrcChanged { csrc, added: true });
            }
        }
        for &csrc in old_list {
            if csrc != 0 && !new_list.contains(&csrc) {
                have_called_callback = true;
                events.push(Event::CsrcChanged { csrc, added: false });
            }
        }
        if !have_called_callback {
            // Duplicate entries can change the set size without producing a
            // per-CSRC diff. CSRC 0 signals the direction; not interop safe,
            // other implementations may use 0 as a valid CSRC.
            if num_csrcs > old_num_csrcs {
                events.push(Event::CsrcChanged {
                    csrc: 0,
                    added: true,
                });
            } else if num_csrcs < old_num_csrcs {
                events.push(Event::CsrcChanged {
                    csrc: 0,
                    added: false,
                });
            }
        }
    }

    //
    // Payload registration.
    //

    /// Register a codec under `payload_type`. When a descriptor is created,
    /// the media receiver's creation hook runs; if it rejects the payload
    /// the registration is rolled back.
    pub fn register_receive_payload(
        &self,
        name: &str,
        payload_type: u8,
        frequency: u32,
        channels: u8,
        rate: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        let created =
            state
                .registry
                .register_receive_payload(name, payload_type, frequency, channels, rate)?;
        if created {
            if let Err(e) = self
                .media
                .on_new_payload_type_created(name, payload_type, frequency)
            {
                warn!("media receiver rejected payload {name}/{payload_type}");
                let _ = state.registry.deregister_receive_payload(payload_type);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn deregister_receive_payload(&self, payload_type: u8) -> Result<()> {
        self.lock().registry.deregister_receive_payload(payload_type)
    }

    /// Reverse lookup by codec parameters.
    pub fn receive_payload_type(
        &self,
        name: &str,
        frequency: u32,
        channels: u8,
        rate: u32,
    ) -> Result<u8> {
        self.lock()
            .registry
            .receive_payload_type(name, frequency, channels, rate)
    }

    pub fn payload(&self, payload_type: u8) -> Option<Payload> {
        self.lock().registry.payload(payload_type).cloned()
    }

    pub fn red_payload_type(&self) -> Option<u8> {
        self.lock().registry.red_payload_type()
    }

    //
    // Header extensions.
    //

    pub fn register_rtp_header_extension(&self, kind: ExtensionKind, id: u8) -> Result<()> {
        self.lock().extension_map.register(kind, id)
    }

    pub fn deregister_rtp_header_extension(&self, kind: ExtensionKind) -> Result<()> {
        self.lock().extension_map.deregister(kind)
    }

    /// A copy of the current extension map.
    pub fn header_extension_map(&self) -> HeaderExtensionMap {
        self.lock().extension_map.clone()
    }

    //
    // Liveness.
    //

    pub fn set_packet_timeout(&self, timeout_ms: u32) {
        self.lock().packet_timeout_ms = timeout_ms;
    }

    /// Periodic tick: fire the packet-timeout edge when the stream has gone
    /// quiet for longer than the configured window. One-shot until the next
    /// received packet rearms it.
    pub fn packet_timeout(&self) {
        let timed_out = {
            let mut state = self.lock();
            if state.packet_timeout_ms == 0 {
                // Not configured.
                return;
            }
            if state.last_receive_time_ms == 0 {
                // Not active.
                return;
            }
            let now_ms = self.clock.now_ms();
            if now_ms - state.last_receive_time_ms > i64::from(state.packet_timeout_ms) {
                // Only one callback.
                state.last_receive_time_ms = 0;
                state.registry.reset_last_received_payload_types();
                true
            } else {
                false
            }
        };
        if timed_out {
            self.feedback.on_packet_timeout(self.id);
        }
    }

    /// Periodic dead-or-alive evaluation. RTP within the last second is
    /// always alive; otherwise a live RTCP channel lets the media receiver
    /// decide, and silence on both is dead.
    pub fn process_dead_or_alive(&self, rtcp_alive: bool, now_ms: i64) {
        let alive = {
            let state = self.lock();
            if state.last_receive_time_ms + RTP_ALIVE_WINDOW_MS > now_ms {
                AliveState::Alive
            } else if rtcp_alive {
                self.media
                    .process_dead_or_alive(state.last_received_payload_length)
            } else {
                AliveState::Dead
            }
        };
        self.feedback.on_periodic_dead_or_alive(self.id, alive);
    }

    pub fn have_not_received_packets(&self) -> bool {
        self.lock().last_receive_time_ms == 0
    }

    //
    // Bitrate.
    //

    /// Periodic tick driving the bitrate estimator.
    pub fn process_bitrate(&self) {
        let now_ms = self.clock.now_ms();
        self.lock().bitrate.process(now_ms);
    }

    pub fn bitrate_bps(&self) -> u32 {
        self.lock().bitrate.bitrate_bps()
    }

    pub fn packet_rate(&self) -> u32 {
        self.lock().bitrate.packet_rate()
    }

    //
    // Stream configuration.
    //

    /// Turn negative acknowledgement accounting on or off. Turning it off
    /// restores the default reordering threshold.
    pub fn set_nack_status(&self, method: NackMethod, max_reordering_threshold: u16) {
        let mut state = self.lock();
        state.stats.max_reordering_threshold = if method == NackMethod::Rtcp {
            max_reordering_threshold
        } else {
            crate::DEFAULT_MAX_REORDERING_THRESHOLD
        };
        state.stats.nack_method = method;
    }

    pub fn nack_method(&self) -> NackMethod {
        self.lock().stats.nack_method
    }

    /// Configure the retransmission stream: packets arriving on `ssrc` are
    /// de-encapsulated back onto the main stream.
    pub fn set_rtx_status(&self, enable: bool, ssrc: u32) {
        let mut state = self.lock();
        state.rtx = enable;
        state.rtx_ssrc = ssrc;
    }

    pub fn rtx_status(&self) -> (bool, u32) {
        let state = self.lock();
        (state.rtx, state.rtx_ssrc)
    }

    /// Restrict the receiver to a single remote SSRC. Disabling clears the
    /// filter regardless of prior state.
    pub fn set_ssrc_filter(&self, enable: bool, allowed_ssrc: u32) {
        let mut state = self.lock();
        state.use_ssrc_filter = enable;
        state.ssrc_filter = if enable { allowed_ssrc } else { 0 };
    }

    pub fn ssrc_filter(&self) -> Option<u32> {
        let state = self.lock();
        if state.use_ssrc_filter {
            Some(state.ssrc_filter)
        } else {
            None
        }
    }

    //
    // Stream state.
    //

    pub fn ssrc(&self) -> u32 {
        self.lock().ssrc
    }

    /// Currently tracked contributing sources.
    pub fn csrcs(&self) -> Vec<u32> {
        let state = self.lock();
        state.current_remote_csrc[..state.num_csrcs].to_vec()
    }

    /// Per-CSRC audio levels from the most recent packet that carried them.
    pub fn energy(&self) -> Vec<u8> {
        let state = self.lock();
        state.current_remote_energy[..state.num_energy].to_vec()
    }

    pub fn sequence_number(&self) -> u16 {
        self.lock().stats.last_received_sequence_number
    }

    pub fn timestamp(&self) -> u32 {
        self.lock().stats.last_received_timestamp
    }

    pub fn last_received_frame_time_ms(&self) -> i64 {
        self.lock().stats.last_received_frame_time_ms
    }

    /// What the remote RTP timestamp would read right now, extrapolated from
    /// the last in-order packet at the media clock rate.
    pub fn estimated_remote_timestamp(&self) -> Result<u32> {
        let frequency_hz = self.media.frequency_hz();
        let state = self.lock();
        if state.stats.local_time_last_received_timestamp == 0 {
            warn!("remote timestamp estimate requested before any in-order packet");
            return Err(Error::ErrEstimateUnavailable);
        }
        let diff = current_rtp(&*self.clock, frequency_hz)
            .wrapping_sub(state.stats.local_time_last_received_timestamp);
        Ok(state.stats.last_received_timestamp.wrapping_add(diff))
    }

    /// Codec kind of the last received video payload.
    pub fn video_codec_type(&self) -> Option<VideoCodecKind> {
        match self.media.last_media_specific_payload() {
            SpecificPayload::Video { codec, .. } => Some(codec),
            SpecificPayload::Audio { .. } => None,
        }
    }

    /// Advertised maximum bitrate of the last received video payload.
    pub fn max_configured_bitrate(&self) -> Option<u32> {
        match self.media.last_media_specific_payload() {
            SpecificPayload::Video { max_rate, .. } => Some(max_rate),
            SpecificPayload::Audio { .. } => None,
        }
    }

    //
    // Statistics.
    //

    /// Build a statistics report. `reset` snapshots fresh values as the new
    /// baseline; `reset == false` replays the previous report.
    pub fn statistics(&self, reset: bool) -> Result<ReceiverStatistics> {
        self.lock().stats.report(reset)
    }

    pub fn data_counters(&self) -> Result<DataCounters> {
        let state = self.lock();
        if !state.stats.has_received() {
            return Err(Error::ErrNoDataReceived);
        }
        Ok(state.stats.data_counters())
    }

    /// Start a new statistics epoch.
    pub fn reset_statistics(&self) {
        self.lock().stats.reset_statistics();
    }

    /// Zero the byte/packet counters without touching sequence or jitter
    /// state.
    pub fn reset_data_counters(&self) {
        self.lock().stats.reset_data_counters();
    }

    /// Smoothed header+padding overhead per packet, in bytes.
    pub fn packet_overhead(&self) -> u16 {
        self.lock().stats.received_packet_oh
    }

    pub fn packet_count_received(&self) -> u32 {
        self.lock().stats.received_inorder_packet_count
    }

    pub fn byte_count_received(&self) -> u32 {
        self.lock().stats.received_byte_count
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        // Every known contributing source leaves with the receiver.
        let (num_csrcs, csrcs) = {
            let state = self.lock();
            (state.num_csrcs, state.current_remote_csrc)
        };
        for &csrc in &csrcs[..num_csrcs] {
            self.feedback.on_incoming_csrc_changed(self.id, csrc, false);
        }
    }
}
