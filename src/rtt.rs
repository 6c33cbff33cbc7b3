// Copyright (c) 2016 The Chromium Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

// Copyright (C) 2024, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use crate::units::TimeDelta;
use crate::units::Timestamp;

/// Smoothing factor for the exponentially weighted RTT average.
const ALPHA: f64 = 0.125;
/// Smoothing factor for the mean RTT deviation.
const BETA: f64 = 0.25;
/// RTT assumed before the first sample arrives.
const INITIAL_RTT: TimeDelta = TimeDelta::from_millis(100);

/// Round-trip time statistics: latest, minimum, smoothed RTT and the mean
/// deviation of the smoothed estimate.
#[derive(Debug)]
pub struct RttStats {
    latest_rtt: TimeDelta,
    min_rtt: TimeDelta,
    smoothed_rtt: TimeDelta,
    previous_srtt: TimeDelta,
    mean_deviation: TimeDelta,
    initial_rtt: TimeDelta,
}

impl Default for RttStats {
    fn default() -> Self {
        RttStats {
            latest_rtt: TimeDelta::ZERO,
            min_rtt: TimeDelta::ZERO,
            smoothed_rtt: TimeDelta::ZERO,
            previous_srtt: TimeDelta::ZERO,
            mean_deviation: TimeDelta::ZERO,
            initial_rtt: INITIAL_RTT,
        }
    }
}

impl RttStats {
    /// Feeds a new sample: the acknowledgement arrived `send_delta` after
    /// the packet was sent, and the peer reports having delayed it by
    /// `ack_delay`.
    pub fn update_rtt(
        &mut self, send_delta: TimeDelta, ack_delay: TimeDelta, _now: Timestamp,
    ) {
        if send_delta.is_infinite() || send_delta <= TimeDelta::ZERO {
            warn!(
                "ignoring RTT sample, send_delta is infinite, zero or negative: {send_delta:?}"
            );
            return;
        }

        // The min RTT deliberately skips the ack_delay correction: coarse
        // peer clocks can report a delay large enough to underestimate it.
        if self.min_rtt.is_zero() || self.min_rtt > send_delta {
            self.min_rtt = send_delta;
        }

        self.previous_srtt = self.smoothed_rtt;

        let mut rtt_sample = send_delta;
        if rtt_sample > ack_delay {
            rtt_sample = rtt_sample - ack_delay;
        }
        self.latest_rtt = rtt_sample;

        if self.smoothed_rtt.is_zero() {
            // First valid sample seeds the estimators.
            self.smoothed_rtt = rtt_sample;
            self.mean_deviation = rtt_sample / 2;
        } else {
            self.mean_deviation = self.mean_deviation * (1.0 - BETA) +
                (self.smoothed_rtt - rtt_sample).abs() * BETA;
            self.smoothed_rtt =
                self.smoothed_rtt * (1.0 - ALPHA) + rtt_sample * ALPHA;
            trace!(
                "smoothed_rtt: {:?} mean_deviation: {:?}",
                self.smoothed_rtt,
                self.mean_deviation
            );
        }
    }

    /// Raises the smoothed estimates to at least the latest sample. Called
    /// when the smoothed values are known to lag reality (e.g. after a
    /// retransmission timeout).
    pub fn expire_smoothed_metrics(&mut self) {
        self.mean_deviation = self
            .mean_deviation
            .max((self.smoothed_rtt - self.latest_rtt).abs());
        self.smoothed_rtt = self.smoothed_rtt.max(self.latest_rtt);
    }

    /// Resets all measurements; the path changed so none of them apply.
    pub fn on_connection_migration(&mut self) {
        self.latest_rtt = TimeDelta::ZERO;
        self.min_rtt = TimeDelta::ZERO;
        self.smoothed_rtt = TimeDelta::ZERO;
        self.previous_srtt = TimeDelta::ZERO;
        self.mean_deviation = TimeDelta::ZERO;
        self.initial_rtt = INITIAL_RTT;
    }

    /// Overrides the RTT assumed before any sample arrives. Non-positive
    /// values are rejected.
    pub fn set_initial_rtt(&mut self, initial_rtt: TimeDelta) {
        if initial_rtt <= TimeDelta::ZERO {
            error!("attempt to set initial rtt to {initial_rtt:?}");
            return;
        }

        self.initial_rtt = initial_rtt;
    }

    /// The exponentially weighted moving average RTT. Zero until the first
    /// valid sample.
    pub fn smoothed_rtt(&self) -> TimeDelta {
        self.smoothed_rtt
    }

    /// The smoothed RTT as it was before the most recent sample.
    pub fn previous_srtt(&self) -> TimeDelta {
        self.previous_srtt
    }

    /// The most recent sample. Zero until the first valid sample.
    pub fn latest_rtt(&self) -> TimeDelta {
        self.latest_rtt
    }

    /// The smallest sample observed on this path. Zero until the first valid
    /// sample.
    pub fn min_rtt(&self) -> TimeDelta {
        self.min_rtt
    }

    pub fn mean_deviation(&self) -> TimeDelta {
        self.mean_deviation
    }

    pub fn initial_rtt(&self) -> TimeDelta {
        self.initial_rtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: i64) -> TimeDelta {
        TimeDelta::from_millis(millis)
    }

    fn now() -> Timestamp {
        Timestamp::from_millis(10_000)
    }

    #[test]
    fn defaults_before_any_sample() {
        let rtt = RttStats::default();

        assert!(rtt.smoothed_rtt().is_zero());
        assert!(rtt.min_rtt().is_zero());
        assert!(rtt.latest_rtt().is_zero());
        assert_eq!(rtt.initial_rtt(), ms(100));
    }

    #[test]
    fn first_sample_seeds_estimators() {
        let mut rtt = RttStats::default();

        rtt.update_rtt(ms(300), TimeDelta::ZERO, now());

        assert_eq!(rtt.latest_rtt(), ms(300));
        assert_eq!(rtt.smoothed_rtt(), ms(300));
        assert_eq!(rtt.min_rtt(), ms(300));
        assert_eq!(rtt.mean_deviation(), ms(150));
    }

    #[test]
    fn smoothed_rtt_is_weighted_average() {
        let mut rtt = RttStats::default();

        rtt.update_rtt(ms(300), TimeDelta::ZERO, now());
        rtt.update_rtt(ms(400), TimeDelta::ZERO, now());

        // 7/8 * 300 + 1/8 * 400
        assert_eq!(rtt.smoothed_rtt(), TimeDelta::from_micros(312_500));
        assert_eq!(rtt.previous_srtt(), ms(300));
        assert_eq!(rtt.latest_rtt(), ms(400));
    }

    #[test]
    fn ack_delay_is_subtracted_but_not_from_min() {
        let mut rtt = RttStats::default();

        rtt.update_rtt(ms(200), ms(50), now());

        assert_eq!(rtt.latest_rtt(), ms(150));
        assert_eq!(rtt.smoothed_rtt(), ms(150));
        // min_rtt uses the uncorrected delta.
        assert_eq!(rtt.min_rtt(), ms(200));
    }

    #[test]
    fn oversized_ack_delay_is_ignored() {
        let mut rtt = RttStats::default();

        rtt.update_rtt(ms(100), ms(200), now());

        // The correction would produce a negative sample, so the raw delta
        // is used instead.
        assert_eq!(rtt.latest_rtt(), ms(100));
    }

    #[test]
    fn invalid_samples_are_dropped() {
        let mut rtt = RttStats::default();

        rtt.update_rtt(TimeDelta::ZERO, TimeDelta::ZERO, now());
        rtt.update_rtt(ms(-10), TimeDelta::ZERO, now());
        rtt.update_rtt(TimeDelta::plus_infinity(), TimeDelta::ZERO, now());

        assert!(rtt.smoothed_rtt().is_zero());
        assert!(rtt.min_rtt().is_zero());
    }

    #[test]
    fn min_rtt_is_monotone_nonincreasing() {
        let mut rtt = RttStats::default();

        for sample in [200, 100, 150, 90, 300] {
            rtt.update_rtt(ms(sample), TimeDelta::ZERO, now());
            assert!(rtt.min_rtt() <= rtt.latest_rtt());
        }

        assert_eq!(rtt.min_rtt(), ms(90));
    }

    #[test]
    fn expire_smoothed_metrics_raises_estimates() {
        let mut rtt = RttStats::default();

        rtt.update_rtt(ms(100), TimeDelta::ZERO, now());
        rtt.update_rtt(ms(500), TimeDelta::ZERO, now());

        assert!(rtt.smoothed_rtt() < rtt.latest_rtt());
        rtt.expire_smoothed_metrics();
        assert_eq!(rtt.smoothed_rtt(), rtt.latest_rtt());
    }

    #[test]
    fn connection_migration_resets_everything() {
        let mut rtt = RttStats::default();
        rtt.update_rtt(ms(100), TimeDelta::ZERO, now());

        rtt.on_connection_migration();

        assert!(rtt.smoothed_rtt().is_zero());
        assert!(rtt.min_rtt().is_zero());
        assert!(rtt.latest_rtt().is_zero());
        assert_eq!(rtt.initial_rtt(), ms(100));
    }

    #[test]
    fn set_initial_rtt_rejects_non_positive() {
        let mut rtt = RttStats::default();

        rtt.set_initial_rtt(ms(0));
        assert_eq!(rtt.initial_rtt(), ms(100));

        rtt.set_initial_rtt(ms(50));
        assert_eq!(rtt.initial_rtt(), ms(50));
    }
}
