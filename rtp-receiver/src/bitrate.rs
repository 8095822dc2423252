//! Exponentially smoothed receive-rate estimate.

/// Windows shorter than this are folded into the next one.
const MIN_WINDOW_MS: i64 = 100;
/// A gap this long means the stream paused; the stale window is discarded.
const MAX_WINDOW_MS: i64 = 10_000;

/// Tracks bits/s and packets/s over a short window, smoothed as
/// `new = (old + 3 * window) / 4`.
#[derive(Debug)]
pub(crate) struct BitrateEstimator {
    packet_count: u32,
    byte_count: u32,
    packet_rate: u32,
    bitrate: u32,
    time_last_rate_update_ms: i64,
}

impl BitrateEstimator {
    pub(crate) fn new() -> Self {
        Self {
            packet_count: 0,
            byte_count: 0,
            packet_rate: 0,
            bitrate: 0,
            time_last_rate_update_ms: 0,
        }
    }

    /// Account one accepted packet.
    pub(crate) fn update(&mut self, bytes: usize) {
        self.byte_count = self.byte_count.wrapping_add(bytes as u32);
        self.packet_count = self.packet_count.wrapping_add(1);
    }

    /// Fold the current window into the smoothed rates. Driven by the
    /// periodic process tick.
    pub(crate) fn process(&mut self, now_ms: i64) {
        let diff_ms = now_ms - self.time_last_rate_update_ms;
        if diff_ms < MIN_WINDOW_MS {
            return;
        }
        if diff_ms > MAX_WINDOW_MS && self.time_last_rate_update_ms > 0 {
            // Too long since the last update; the window tells us nothing.
            self.time_last_rate_update_ms = now_ms;
            self.byte_count = 0;
            self.packet_count = 0;
            return;
        }

        let diff_ms = diff_ms as u64;
        let packets_per_sec = (u64::from(self.packet_count) * 1_000 / diff_ms) as u32;
        let bits_per_sec = (u64::from(self.byte_count) * 8 * 1_000 / diff_ms) as u32;

        self.packet_rate = (self.packet_rate + 3 * packets_per_sec) / 4;
        self.bitrate = (self.bitrate + 3 * bits_per_sec) / 4;

        self.time_last_rate_update_ms = now_ms;
        self.byte_count = 0;
        self.packet_count = 0;
    }

    /// Smoothed receive rate in bits per second.
    pub(crate) fn bitrate_bps(&self) -> u32 {
        self.bitrate
    }

    /// Smoothed receive rate in packets per second.
    pub(crate) fn packet_rate(&self) -> u32 {
        self.packet_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_converge_on_steady_input() {
        let mut estimator = BitrateEstimator::new();

        let mut now_ms = 0i64;
        for _ in 0..20 {
            // 50 packets of 160 bytes per second.
            for _ in 0..50 {
                estimator.update(160);
            }
            now_ms += 1_000;
            estimator.process(now_ms);
        }

        // 160 * 8 * 50 = 64 kbit/s.
        let bitrate = estimator.bitrate_bps();
        assert!((63_000..=64_000).contains(&bitrate), "bitrate {bitrate}");
        let packet_rate = estimator.packet_rate();
        assert!((49..=50).contains(&packet_rate), "packet rate {packet_rate}");
    }

    #[test]
    fn test_short_window_is_deferred() {
        let mut estimator = BitrateEstimator::new();
        estimator.update(1_000);
        estimator.process(50);
        assert_eq!(estimator.bitrate_bps(), 0);

        // The bytes were kept and count toward the next window.
        estimator.process(1_000);
        assert!(estimator.bitrate_bps() > 0);
    }

    #[test]
    fn test_long_gap_discards_window() {
        let mut estimator = BitrateEstimator::new();
        for _ in 0..50 {
            estimator.update(160);
        }
        estimator.process(1_000);
        let before_gap = estimator.bitrate_bps();
        assert!(before_gap > 0);

        // A 30 s silence, then one packet: the stale window is dropped
        // rather than averaged over the gap.
        estimator.update(160);
        estimator.process(31_000);
        assert_eq!(estimator.bitrate_bps(), before_gap);
    }
}
