//! Callback seams between the receiver and the layers above it.
//!
//! All callbacks are invoked with the receiver lock released, so
//! implementations are free to call back into the receiver.

use crate::header::RtpHeader;
use rtp_shared::Result;

/// What kind of packet opened the current SSRC epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Rtp,
    /// Empty payload; maintains NAT bindings and signals liveness only.
    KeepAlive,
}

/// Verdict of the periodic dead-or-alive evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliveState {
    Alive,
    Dead,
}

/// Upward event sink for receiver state transitions.
///
/// Default implementations are no-ops so sinks only override what they care
/// about.
pub trait FeedbackSink: Send + Sync {
    /// First packet of an SSRC epoch. Fires at most once until the receiver
    /// times out and rearms.
    fn on_received_packet(&self, id: i32, kind: PacketKind) {
        let _ = (id, kind);
    }

    fn on_incoming_ssrc_changed(&self, id: i32, ssrc: u32) {
        let _ = (id, ssrc);
    }

    /// `added` is true when the CSRC entered the contributing set, false when
    /// it left. CSRC 0 with either direction signals a set-size change that
    /// produced no per-CSRC diff (duplicate entries in the header).
    fn on_incoming_csrc_changed(&self, id: i32, csrc: u32, added: bool) {
        let _ = (id, csrc, added);
    }

    /// The stream switched to a codec the decoder has not been prepared for,
    /// or restarted on a new SSRC with the same codec.
    fn on_initialize_decoder(
        &self,
        id: i32,
        payload_type: u8,
        name: &str,
        frequency: u32,
        channels: u8,
        rate: u32,
    ) -> Result<()> {
        let _ = (id, payload_type, name, frequency, channels, rate);
        Ok(())
    }

    fn on_packet_timeout(&self, id: i32) {
        let _ = id;
    }

    fn on_periodic_dead_or_alive(&self, id: i32, alive: AliveState) {
        let _ = (id, alive);
    }
}

/// The slice of the RTCP module the receiver needs: remote-SSRC bookkeeping
/// and the minimum observed round-trip time.
pub trait RtcpPeer: Send + Sync {
    fn set_remote_ssrc(&self, ssrc: u32);

    /// Minimum RTT in milliseconds for the given SSRC, if any RTT has been
    /// measured yet.
    fn min_rtt_ms(&self, ssrc: u32) -> Option<u16>;
}

/// Receives depacketized payload bytes from the media receivers.
pub trait PayloadSink: Send + Sync {
    fn on_received_payload(&self, header: &RtpHeader, payload: &[u8]) -> Result<()>;
}
