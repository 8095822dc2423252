//! Reception statistics: RFC 3550 receiver-report inputs and the RFC 5450
//! extended jitter report.
//!
//! All arithmetic is integral. Jitter is kept in Q4 fixed point exactly as
//! RFC 3550 Appendix A.8 does it; a floating-point rendition drifts by
//! fractions of a sample and never matches the reference values.

use crate::header::RtpHeader;
use crate::DEFAULT_MAX_REORDERING_THRESHOLD;
use rtp_shared::{Error, Result};

/// Interarrival gaps above this many samples (5 s at the video clock) are
/// sender timestamp jumps, not jitter.
const MAX_TIME_DIFF_SAMPLES: u32 = 450_000;

/// Negative acknowledgement mode of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackMethod {
    Off,
    Rtcp,
}

/// One statistics report, as consumed by an RTCP report-block builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverStatistics {
    /// Fraction of packets lost since the previous report, scaled to 0..=255.
    pub fraction_lost: u8,
    /// Cumulative packets lost this epoch; 24 bits valid.
    pub cumulative_lost: u32,
    /// `(wrap_count << 16) | highest_sequence_number`.
    pub extended_highest_sequence_number: u32,
    /// Interarrival jitter in media-clock samples.
    pub jitter: u32,
    /// Running maximum of the jitter estimate.
    pub max_jitter: u32,
    /// Jitter with the RFC 5450 transmission-time offset applied.
    pub jitter_transmission_time_offset: u32,
    /// Packets missing since the previous report.
    pub missing: u32,
}

/// Byte and packet totals for the current data-counter epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataCounters {
    pub bytes_received: u32,
    pub packets_received: u32,
}

/// Per-stream reception state: sequence tracking, jitter accumulators,
/// loss counters and the snapshot of the last emitted report.
#[derive(Debug)]
pub(crate) struct ReceptionStats {
    pub(crate) received_seq_first: u16,
    pub(crate) received_seq_max: u16,
    pub(crate) received_seq_wraps: u16,

    pub(crate) jitter_q4: i32,
    pub(crate) jitter_max_q4: i32,
    pub(crate) jitter_q4_transmission_time_offset: i32,
    pub(crate) cumulative_loss: u32,

    /// Local clock in media-clock samples when the previous in-order packet
    /// arrived.
    pub(crate) local_time_last_received_timestamp: u32,
    pub(crate) last_received_timestamp: u32,
    pub(crate) last_received_sequence_number: u16,
    pub(crate) last_received_transmission_time_offset: i32,
    pub(crate) last_received_frame_time_ms: i64,

    pub(crate) received_byte_count: u32,
    pub(crate) received_old_packet_count: u32,
    pub(crate) received_inorder_packet_count: u32,
    /// Smoothed header+padding overhead (RFC 5104 §4.2.1.2), seeded with the
    /// bare 12-byte RTP header.
    pub(crate) received_packet_oh: u16,

    pub(crate) last_report_inorder_packets: u32,
    pub(crate) last_report_old_packets: u32,
    pub(crate) last_report_seq_max: u16,
    pub(crate) last_report_fraction_lost: u8,
    pub(crate) last_report_cumulative_lost: u32,
    pub(crate) last_report_extended_high_seq_num: u32,
    pub(crate) last_report_jitter: u32,
    pub(crate) last_report_jitter_transmission_time_offset: u32,
    pub(crate) last_report_missing: u32,

    pub(crate) max_reordering_threshold: u16,
    pub(crate) nack_method: NackMethod,
}

impl ReceptionStats {
    pub(crate) fn new() -> Self {
        Self {
            received_seq_first: 0,
            received_seq_max: 0,
            received_seq_wraps: 0,
            jitter_q4: 0,
            jitter_max_q4: 0,
            jitter_q4_transmission_time_offset: 0,
            cumulative_loss: 0,
            local_time_last_received_timestamp: 0,
            last_received_timestamp: 0,
            last_received_sequence_number: 0,
            last_received_transmission_time_offset: 0,
            last_received_frame_time_ms: 0,
            received_byte_count: 0,
            received_old_packet_count: 0,
            received_inorder_packet_count: 0,
            received_packet_oh: 12,
            last_report_inorder_packets: 0,
            last_report_old_packets: 0,
            last_report_seq_max: 0,
            last_report_fraction_lost: 0,
            last_report_cumulative_lost: 0,
            last_report_extended_high_seq_num: 0,
            last_report_jitter: 0,
            last_report_jitter_transmission_time_offset: 0,
            last_report_missing: 0,
            max_reordering_threshold: DEFAULT_MAX_REORDERING_THRESHOLD,
            nack_method: NackMethod::Off,
        }
    }

    /// Whether any packet has been accounted for in this epoch.
    pub(crate) fn has_received(&self) -> bool {
        !(self.received_seq_first == 0 && self.received_byte_count == 0)
    }

    /// Start a new statistics epoch.
    pub(crate) fn reset_statistics(&mut self) {
        self.last_report_inorder_packets = 0;
        self.last_report_old_packets = 0;
        self.last_report_seq_max = 0;
        self.last_report_fraction_lost = 0;
        self.last_report_cumulative_lost = 0;
        self.last_report_extended_high_seq_num = 0;
        self.last_report_jitter = 0;
        self.last_report_jitter_transmission_time_offset = 0;
        self.last_report_missing = 0;
        self.jitter_q4 = 0;
        self.jitter_max_q4 = 0;
        self.cumulative_loss = 0;
        self.jitter_q4_transmission_time_offset = 0;
        self.received_seq_wraps = 0;
        self.received_seq_max = 0;
        self.received_seq_first = 0;
        self.received_byte_count = 0;
        self.received_old_packet_count = 0;
        self.received_inorder_packet_count = 0;
    }

    /// Zero only the byte/packet counters and the in-order report snapshot.
    pub(crate) fn reset_data_counters(&mut self) {
        self.received_byte_count = 0;
        self.received_old_packet_count = 0;
        self.received_inorder_packet_count = 0;
        self.last_report_inorder_packets = 0;
    }

    /// Forget the last-received timing fields on an SSRC transition.
    pub(crate) fn clear_last_received(&mut self) {
        self.last_received_timestamp = 0;
        self.last_received_sequence_number = 0;
        self.last_received_transmission_time_offset = 0;
        self.last_received_frame_time_ms = 0;
    }

    pub(crate) fn extended_highest_sequence_number(&self) -> u32 {
        (u32::from(self.received_seq_wraps) << 16) | u32::from(self.received_seq_max)
    }

    pub(crate) fn data_counters(&self) -> DataCounters {
        DataCounters {
            bytes_received: self.received_byte_count,
            packets_received: self
                .received_old_packet_count
                .wrapping_add(self.received_inorder_packet_count),
        }
    }

    /// Account one accepted packet. `now_rtp_samples` is the local clock in
    /// media-clock samples at arrival.
    pub(crate) fn update(
        &mut self,
        header: &RtpHeader,
        payload_length: usize,
        old_packet: bool,
        now_rtp_samples: u32,
    ) {
        self.received_byte_count = self.received_byte_count.wrapping_add(payload_length as u32);

        if self.received_seq_max == 0 && self.received_seq_wraps == 0 {
            // First packet of the statistics epoch.
            self.received_seq_first = header.sequence_number;
            self.received_seq_max = header.sequence_number;
            self.received_inorder_packet_count = 1;
            self.local_time_last_received_timestamp = now_rtp_samples;
            return;
        }

        if self.in_order_packet(header.sequence_number) {
            self.received_inorder_packet_count = self.received_inorder_packet_count.wrapping_add(1);

            if header.sequence_number < self.received_seq_max {
                // Wrap around (or remote restart; either way a new cycle).
                self.received_seq_wraps = self.received_seq_wraps.wrapping_add(1);
            }
            self.received_seq_max = header.sequence_number;

            if header.timestamp != self.last_received_timestamp
                && self.received_inorder_packet_count > 1
            {
                let receive_diff =
                    now_rtp_samples.wrapping_sub(self.local_time_last_received_timestamp);

                let timestamp_diff = header.timestamp.wrapping_sub(self.last_received_timestamp);
                let time_diff_samples =
                    (receive_diff.wrapping_sub(timestamp_diff) as i32).unsigned_abs();
                if time_diff_samples < MAX_TIME_DIFF_SAMPLES {
                    let jitter_diff_q4 = ((time_diff_samples << 4) as i32) - self.jitter_q4;
                    self.jitter_q4 += (jitter_diff_q4 + 8) >> 4;
                }

                // Extended jitter report, RFC 5450: the same estimator over
                // the send timestamp corrected by the transmission offset.
                let timestamp_ext = header
                    .timestamp
                    .wrapping_add(header.transmission_time_offset as u32);
                let last_timestamp_ext = self
                    .last_received_timestamp
                    .wrapping_add(self.last_received_transmission_time_offset as u32);
                let timestamp_diff_ext = timestamp_ext.wrapping_sub(last_timestamp_ext);
                let time_diff_samples_ext =
                    (receive_diff.wrapping_sub(timestamp_diff_ext) as i32).unsigned_abs();
                if time_diff_samples_ext < MAX_TIME_DIFF_SAMPLES {
                    let jitter_diff_q4 = ((time_diff_samples_ext << 4) as i32)
                        - self.jitter_q4_transmission_time_offset;
                    self.jitter_q4_transmission_time_offset += (jitter_diff_q4 + 8) >> 4;
                }
            }
            self.local_time_last_received_timestamp = now_rtp_samples;
        } else if old_packet {
            self.received_old_packet_count = self.received_old_packet_count.wrapping_add(1);
        } else {
            self.received_inorder_packet_count = self.received_inorder_packet_count.wrapping_add(1);
        }

        // Measured overhead, RFC 5104 §4.2.1.2:
        // avg_OH (new) = 15/16*avg_OH (old) + 1/16*pckt_OH
        let packet_oh = (header.header_length + header.padding_length) as u32;
        self.received_packet_oh =
            ((15 * u32::from(self.received_packet_oh) + packet_oh) >> 4) as u16;
    }

    /// Classify a sequence number against the current epoch.
    ///
    /// A packet far enough below the running maximum is a restart of the
    /// remote side, not a retransmission; the comparison is deliberately
    /// signed so a small maximum cannot underflow into a huge threshold.
    pub(crate) fn in_order_packet(&self, sequence_number: u16) -> bool {
        let restart = i32::from(self.received_seq_max) - i32::from(self.max_reordering_threshold)
            > i32::from(sequence_number);
        if self.received_seq_max >= sequence_number {
            // Unless the high/low bytes say the counter wrapped, this is a
            // duplicate or a reordered packet.
            if !(self.received_seq_max > 0xff00 && sequence_number < 0x0ff) && !restart {
                return false;
            }
        } else {
            // Reverse wrap: a packet from before the wrap arriving late.
            if sequence_number > 0xff00 && self.received_seq_max < 0x0ff && !restart {
                return false;
            }
        }
        true
    }

    /// Whether an out-of-order packet arrived too late to be a plain
    /// reordering, judged against the minimum RTT (or, absent one, two
    /// standard deviations of the jitter estimate).
    pub(crate) fn retransmit_of_old_packet(
        &self,
        sequence_number: u16,
        rtp_timestamp: u32,
        now_ms: i64,
        last_receive_time_ms: i64,
        frequency_hz: u32,
        min_rtt_ms: u16,
    ) -> bool {
        if self.in_order_packet(sequence_number) {
            return false;
        }

        let frequency_khz = i64::from((frequency_hz / 1000).max(1));
        let time_diff_ms = now_ms - last_receive_time_ms;

        // Timestamp distance to the last in-order packet, in milliseconds,
        // signed: retransmissions sit in the past.
        let rtp_timestamp_diff_ms =
            i64::from(rtp_timestamp.wrapping_sub(self.last_received_timestamp) as i32)
                / frequency_khz;

        let max_delay_ms = if min_rtt_ms == 0 {
            // Jitter standard deviation in samples; two of them give 95%
            // confidence. Converted to milliseconds via the clock rate.
            let jitter_std = f64::from(self.jitter_q4 >> 4).sqrt();
            let max_delay_ms = ((2.0 * jitter_std) / frequency_khz as f64) as i64;
            max_delay_ms.max(1)
        } else {
            i64::from(min_rtt_ms) / 3 + 1
        };

        time_diff_ms > rtp_timestamp_diff_ms + max_delay_ms
    }

    /// Build a statistics report.
    ///
    /// With `reset == false` the previous report is replayed verbatim; with
    /// `reset == true` fresh values are computed and snapshotted as the new
    /// report baseline.
    pub(crate) fn report(&mut self, reset: bool) -> Result<ReceiverStatistics> {
        if !self.has_received() {
            return Err(Error::ErrNoDataReceived);
        }

        if !reset {
            if self.last_report_inorder_packets == 0 {
                return Err(Error::ErrNoReportAvailable);
            }
            return Ok(ReceiverStatistics {
                fraction_lost: self.last_report_fraction_lost,
                cumulative_lost: self.last_report_cumulative_lost,
                extended_highest_sequence_number: self.last_report_extended_high_seq_num,
                jitter: self.last_report_jitter,
                max_jitter: (self.jitter_max_q4 >> 4) as u32,
                jitter_transmission_time_offset: self.last_report_jitter_transmission_time_offset,
                missing: self.last_report_missing,
            });
        }

        if self.last_report_inorder_packets == 0 {
            // First report of the epoch: open the window just before the
            // first received sequence number.
            self.last_report_seq_max = self.received_seq_first.wrapping_sub(1);
        }

        let mut expected_since_last = self.received_seq_max.wrapping_sub(self.last_report_seq_max);
        if self.last_report_seq_max > self.received_seq_max {
            expected_since_last = 0;
        }

        // Received since the last report; retransmissions only count when
        // NACK is off (without retransmissions every old packet is a plain
        // reordering).
        let mut received_since_last = self
            .received_inorder_packet_count
            .wrapping_sub(self.last_report_inorder_packets);
        if self.nack_method == NackMethod::Off {
            received_since_last = received_since_last.wrapping_add(
                self.received_old_packet_count
                    .wrapping_sub(self.last_report_old_packets),
            );
        }

        let missing = u32::from(expected_since_last).saturating_sub(received_since_last);
        let fraction_lost = if expected_since_last > 0 {
            ((255 * missing) / u32::from(expected_since_last)) as u8
        } else {
            0
        };

        self.cumulative_loss = (self.cumulative_loss + missing).min(0x00ff_ffff);

        if self.jitter_q4 > self.jitter_max_q4 {
            self.jitter_max_q4 = self.jitter_q4;
        }

        let stats = ReceiverStatistics {
            fraction_lost,
            cumulative_lost: self.cumulative_loss,
            extended_highest_sequence_number: self.extended_highest_sequence_number(),
            jitter: (self.jitter_q4 >> 4) as u32,
            max_jitter: (self.jitter_max_q4 >> 4) as u32,
            jitter_transmission_time_offset: (self.jitter_q4_transmission_time_offset >> 4) as u32,
            missing,
        };

        self.last_report_fraction_lost = stats.fraction_lost;
        self.last_report_cumulative_lost = stats.cumulative_lost;
        self.last_report_extended_high_seq_num = stats.extended_highest_sequence_number;
        self.last_report_jitter = stats.jitter;
        self.last_report_jitter_transmission_time_offset = stats.jitter_transmission_time_offset;
        self.last_report_missing = stats.missing;
        self.last_report_inorder_packets = self.received_inorder_packet_count;
        self.last_report_old_packets = self.received_old_packet_count;
        self.last_report_seq_max = self.received_seq_max;

        Ok(stats)
    }
}
