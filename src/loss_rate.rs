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

/// Feedback batches are aggregated until at least this many packets have
/// been reported, so a single small batch cannot swing the estimate.
const MIN_PACKETS_PER_UPDATE: u64 = 20;

/// Packet loss rate estimator fed from transport feedback.
///
/// Reported per-batch sent/lost counts accumulate until enough packets have
/// been observed, at which point the loss rate snaps to `lost / expected`
/// over the accumulated window.
#[derive(Debug, Default)]
pub struct LossRateFilter {
    lost_since_last_update: u64,
    expected_since_last_update: u64,
    loss_rate_estimate: f64,
}

impl LossRateFilter {
    pub fn update_with_loss_status(
        &mut self, packets_sent: usize, packets_lost: usize,
    ) {
        self.lost_since_last_update += packets_lost as u64;
        self.expected_since_last_update += packets_sent as u64;

        if self.expected_since_last_update >= MIN_PACKETS_PER_UPDATE {
            self.loss_rate_estimate = self.lost_since_last_update as f64 /
                self.expected_since_last_update as f64;
            self.lost_since_last_update = 0;
            self.expected_since_last_update = 0;
        }
    }

    /// The current loss rate as a ratio in `[0, 1]`.
    pub fn loss_rate(&self) -> f64 {
        self.loss_rate_estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_feedback_means_no_loss() {
        let filter = LossRateFilter::default();
        assert_eq!(filter.loss_rate(), 0.0);
    }

    #[test]
    fn estimate_waits_for_enough_packets() {
        let mut filter = LossRateFilter::default();

        filter.update_with_loss_status(10, 5);
        assert_eq!(filter.loss_rate(), 0.0);

        filter.update_with_loss_status(10, 5);
        assert_eq!(filter.loss_rate(), 0.5);
    }

    #[test]
    fn window_resets_after_each_update() {
        let mut filter = LossRateFilter::default();

        filter.update_with_loss_status(20, 10);
        assert_eq!(filter.loss_rate(), 0.5);

        // A clean window replaces, not averages with, the previous one.
        filter.update_with_loss_status(20, 0);
        assert_eq!(filter.loss_rate(), 0.0);
    }

    #[test]
    fn lossless_feedback_keeps_zero_estimate() {
        let mut filter = LossRateFilter::default();

        for _ in 0..10 {
            filter.update_with_loss_status(25, 0);
            assert_eq!(filter.loss_rate(), 0.0);
        }
    }
}
